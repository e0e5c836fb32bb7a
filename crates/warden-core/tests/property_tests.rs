//! Property-based tests for warden-core
//!
//! Uses proptest to verify process and message invariants across randomized inputs

use proptest::prelude::*;
use warden_core::{
    CombineInfo, EarningCombineInfo, MessageType, ProcessStep, ProcessTransactionData, StepStatus,
    StepType,
};

// ============================================================================
// Strategies
// ============================================================================

fn step_type_strategy() -> impl Strategy<Value = StepType> {
    prop_oneof![
        Just(StepType::Xcm),
        Just(StepType::Bridge),
        Just(StepType::TokenApproval),
        Just(StepType::Swap),
        Just(StepType::Join),
        Just(StepType::Mint),
    ]
}

fn process_strategy() -> impl Strategy<Value = ProcessTransactionData> {
    prop::collection::vec(step_type_strategy(), 3..8).prop_map(|types| {
        let steps = types
            .into_iter()
            .enumerate()
            .map(|(i, t)| ProcessStep::new(i, t, None))
            .collect();
        ProcessTransactionData::new(
            "p-prop",
            "0xabc",
            steps,
            CombineInfo::Earning(EarningCombineInfo {
                slug: "DOT___native_staking".to_string(),
                amount: "1".to_string(),
                chain: "polkadot".to_string(),
                selected_validators: Vec::new(),
            }),
            false,
        )
    })
}

/// Random sequence of (step index, target status) transitions
fn transitions_strategy() -> impl Strategy<Value = Vec<(usize, StepStatus)>> {
    prop::collection::vec(
        (
            0usize..8,
            prop_oneof![
                Just(StepStatus::Submitting),
                Just(StepStatus::Complete),
                Just(StepStatus::Failed),
                Just(StepStatus::Queued),
            ],
        ),
        0..40,
    )
}

// ============================================================================
// Process Properties
// ============================================================================

proptest! {
    /// Whatever transitions are attempted, a step is never submitting while
    /// an earlier step is not complete, and statuses never move backwards.
    #[test]
    fn prop_steps_stay_sequential(
        mut process in process_strategy(),
        transitions in transitions_strategy(),
    ) {
        for (index, status) in transitions {
            let before: Vec<StepStatus> = process.steps.iter().map(|s| s.status).collect();
            let _ = process.set_step_status(index, status);

            for (old, step) in before.iter().zip(&process.steps) {
                prop_assert!(old == &step.status || old.can_transition_to(step.status));
            }
            for (k, step) in process.steps.iter().enumerate() {
                if step.status == StepStatus::Submitting {
                    prop_assert!(process.steps[..k].iter().all(|s| s.status == StepStatus::Complete));
                }
            }
        }
    }

    /// Unknown message types are always rejected as unhandled
    #[test]
    fn prop_unknown_message_types_unhandled(name in "[a-z]{1,12}\\.[a-zA-Z]{1,12}") {
        let wire = format!("pri(x{})", name);
        let known = MessageType::ALL.iter().any(|t| t.as_str() == wire);
        prop_assume!(!known);
        prop_assert!(wire.parse::<MessageType>().is_err());
    }
}

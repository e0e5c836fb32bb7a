//! Multi-step transaction process model
//!
//! A process is a swap or earning flow split into ordered steps. Step status
//! only moves forward, and step `k + 1` may not start before step `k` is
//! complete.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Process kind, derived from the combine info variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessType {
    /// Token swap, possibly crossing chains
    Swap,
    /// Staking / yield position
    Earning,
}

impl ProcessType {
    /// Storage tag
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::Swap => "SWAP",
            ProcessType::Earning => "EARNING",
        }
    }
}

/// Overall process status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    /// Created, nothing submitted yet
    Queued,
    /// A step is being submitted or settled
    Submitting,
    /// All steps complete
    Complete,
    /// A step failed, remaining steps abandoned
    Failed,
    /// Cross-chain settlement did not arrive in time; resumable
    Timeout,
    /// Abandoned by the user
    Cancelled,
}

impl ProcessStatus {
    /// No further step will run without user action
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Complete | ProcessStatus::Failed | ProcessStatus::Cancelled
        )
    }

    /// Storage tag
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Queued => "QUEUED",
            ProcessStatus::Submitting => "SUBMITTING",
            ProcessStatus::Complete => "COMPLETE",
            ProcessStatus::Failed => "FAILED",
            ProcessStatus::Timeout => "TIMEOUT",
            ProcessStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Step status (forward-only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Waiting for its turn
    Queued,
    /// Handed to the step builder
    Submitting,
    /// Settled on chain
    Complete,
    /// Failed on chain or while building
    Failed,
    /// Did not settle in time
    Timeout,
    /// Abandoned
    Cancelled,
}

impl StepStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Queued | StepStatus::Submitting)
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        match self {
            StepStatus::Queued => {
                matches!(next, StepStatus::Submitting | StepStatus::Cancelled)
            }
            StepStatus::Submitting => next.is_terminal(),
            _ => false,
        }
    }
}

/// Kind of work a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    /// Cross-consensus transfer between parachains
    Xcm,
    /// Bridge transfer between ecosystems
    Bridge,
    /// ERC-20 style allowance
    TokenApproval,
    /// Pick the token used to pay fees
    SetFeeToken,
    /// The swap itself
    Swap,
    /// Join a nomination pool or vault
    Join,
    /// Mint a liquid staking derivative
    Mint,
    /// Plain transfer
    Transfer,
}

impl StepType {
    /// Steps that move funds to another chain and need settlement
    pub fn is_cross_chain(&self) -> bool {
        matches!(self, StepType::Xcm | StepType::Bridge)
    }
}

/// Fee quoted for a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFee {
    /// Amount in the token's smallest unit
    pub amount: String,
    /// Token slug
    pub token: String,
}

/// One step of a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStep {
    /// Position in the process
    pub id: usize,
    /// Kind of work
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Current status
    pub status: StepStatus,
    /// Quoted fee
    #[serde(default)]
    pub fee: Option<StepFee>,
    /// Extrinsic / transaction hash once submitted
    #[serde(default)]
    pub tx_hash: Option<String>,
    /// Failure reason
    #[serde(default)]
    pub error: Option<String>,
}

impl ProcessStep {
    /// Create a queued step
    pub fn new(id: usize, step_type: StepType, fee: Option<StepFee>) -> Self {
        Self {
            id,
            step_type,
            status: StepStatus::Queued,
            fee,
            tx_hash: None,
            error: None,
        }
    }
}

/// Swap-specific data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapCombineInfo {
    /// Provider quote id
    pub quote_id: String,
    /// Source token slug
    pub from_token: String,
    /// Destination token slug
    pub to_token: String,
    /// Amount sold
    pub from_amount: String,
    /// Amount expected
    pub to_amount: String,
    /// Accepted slippage, fraction
    pub slippage: f64,
}

/// Earning-specific data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningCombineInfo {
    /// Yield pool slug
    pub slug: String,
    /// Amount staked
    pub amount: String,
    /// Chain the position lives on
    pub chain: String,
    /// Selected validators or pool id
    #[serde(default)]
    pub selected_validators: Vec<String>,
}

/// Combined metadata, one variant per process type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "info", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CombineInfo {
    /// Swap flow
    Swap(SwapCombineInfo),
    /// Earning flow
    Earning(EarningCombineInfo),
}

impl CombineInfo {
    /// Process type carried by this variant
    pub fn process_type(&self) -> ProcessType {
        match self {
            CombineInfo::Swap(_) => ProcessType::Swap,
            CombineInfo::Earning(_) => ProcessType::Earning,
        }
    }
}

/// Tracked multi-step process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTransactionData {
    /// Process id
    pub id: String,
    /// Owning account
    pub address: String,
    /// Overall status
    pub status: ProcessStatus,
    /// Step currently in focus
    pub current_step_id: usize,
    /// Ordered steps
    pub steps: Vec<ProcessStep>,
    /// Type-specific metadata
    pub combine_info: CombineInfo,
    /// Later steps are submitted without further confirmation
    #[serde(default)]
    pub one_sign: bool,
    /// A step after the first failed; UI shows rollback messaging
    #[serde(default)]
    pub rollback: bool,
    /// Last failure reason
    #[serde(default)]
    pub last_error: Option<String>,
    /// Unix timestamp (seconds)
    pub created_at: i64,
    /// Unix timestamp (seconds)
    pub updated_at: i64,
}

impl ProcessTransactionData {
    /// Create a queued process
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        steps: Vec<ProcessStep>,
        combine_info: CombineInfo,
        one_sign: bool,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: id.into(),
            address: address.into(),
            status: ProcessStatus::Queued,
            current_step_id: 0,
            steps,
            combine_info,
            one_sign,
            rollback: false,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Process type
    pub fn process_type(&self) -> ProcessType {
        self.combine_info.process_type()
    }

    /// Step by index
    pub fn step(&self, index: usize) -> Result<&ProcessStep> {
        self.steps
            .get(index)
            .ok_or_else(|| Error::Validation(format!("Process {} has no step {}", self.id, index)))
    }

    /// Index of the first step not yet complete
    pub fn next_step_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status != StepStatus::Complete)
    }

    /// Whether every step is complete
    pub fn all_complete(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Complete)
    }

    /// Check that step `index` may be submitted now
    pub fn ensure_submittable(&self, index: usize) -> Result<()> {
        let step = self.step(index)?;
        if self.status.is_terminal() {
            return Err(Error::Validation(format!(
                "Process {} is already {}",
                self.id,
                self.status.as_str()
            )));
        }
        if step.status != StepStatus::Queued {
            return Err(Error::Validation(format!(
                "Step {} of process {} was already submitted",
                index, self.id
            )));
        }
        if let Some(pending) = self.steps[..index]
            .iter()
            .find(|s| s.status != StepStatus::Complete)
        {
            return Err(Error::Validation(format!(
                "Step {} of process {} is not complete",
                pending.id, self.id
            )));
        }
        Ok(())
    }

    /// Move step `index` to `status`, enforcing forward-only transitions
    pub fn set_step_status(&mut self, index: usize, status: StepStatus) -> Result<()> {
        if status == StepStatus::Submitting {
            self.ensure_submittable(index)?;
        }
        let step = self
            .steps
            .get_mut(index)
            .ok_or_else(|| Error::Validation(format!("No step {}", index)))?;
        if !step.status.can_transition_to(status) {
            return Err(Error::Validation(format!(
                "Step {} cannot move from {:?} to {:?}",
                index, step.status, status
            )));
        }
        step.status = status;
        self.current_step_id = index;
        self.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }
}

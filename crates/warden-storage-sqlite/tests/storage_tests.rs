//! On-disk storage tests

use tempfile::TempDir;
use warden_core::{
    AutoLockSettings, CombineInfo, ProcessStatus, ProcessStep, ProcessTransactionData,
    StepStatus, StepType, SwapCombineInfo,
};
use warden_storage_sqlite::{Database, ProcessStore, SettingsStore};

fn swap_process(id: &str) -> ProcessTransactionData {
    ProcessTransactionData::new(
        id,
        "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty",
        vec![
            ProcessStep::new(0, StepType::Xcm, None),
            ProcessStep::new(1, StepType::SetFeeToken, None),
            ProcessStep::new(2, StepType::Swap, None),
        ],
        CombineInfo::Swap(SwapCombineInfo {
            quote_id: "quote-1".to_string(),
            from_token: "polkadot-NATIVE-DOT".to_string(),
            to_token: "hydradx_main-NATIVE-HDX".to_string(),
            from_amount: "10000000000".to_string(),
            to_amount: "123".to_string(),
            slippage: 0.005,
        }),
        true,
    )
}

#[test]
fn processes_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("background.db");

    {
        let db = Database::open(&path).unwrap();
        let store = ProcessStore::new(&db);
        let mut process = swap_process("swap-1");
        process.set_step_status(0, StepStatus::Submitting).unwrap();
        process.set_step_status(0, StepStatus::Complete).unwrap();
        process.status = ProcessStatus::Timeout;
        store.save_process(&process).unwrap();

        SettingsStore::new(&db)
            .save_auto_lock(&AutoLockSettings {
                time_auto_lock: 30,
                always_lock: false,
            })
            .unwrap();
    }

    let db = Database::open(&path).unwrap();
    let loaded = ProcessStore::new(&db).get_process("swap-1").unwrap();
    assert_eq!(loaded.status, ProcessStatus::Timeout);
    assert_eq!(loaded.steps[0].status, StepStatus::Complete);
    assert_eq!(loaded.steps[1].status, StepStatus::Queued);
    assert!(loaded.one_sign);

    let settings = SettingsStore::new(&db).load_auto_lock().unwrap().unwrap();
    assert_eq!(settings.time_auto_lock, 30);
}

#[test]
fn repeated_creation_writes_once() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("background.db")).unwrap();
    let store = ProcessStore::new(&db);

    let written: Vec<bool> = (0..3)
        .map(|_| store.insert_if_absent(&swap_process("swap-2")).unwrap())
        .collect();
    assert_eq!(written, vec![true, false, false]);
    assert_eq!(store.list_processes().unwrap().len(), 1);
}

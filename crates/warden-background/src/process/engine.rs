//! Process engine
//!
//! Drives tracked multi-step processes. Every state change is persisted
//! before it is published, steps of one process run strictly one at a time,
//! and a cross-chain step holds the next step back until the funds land or
//! the wait ceiling passes.

use super::cross_chain::wait_for_balance;
use crate::config::BackgroundConfig;
use crate::services::{BalanceService, CrossChainTarget, StepBuilder, StepOutcome};
use crate::SharedDatabase;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use warden_core::{
    CombineInfo, Error, ProcessStatus, ProcessStep, ProcessTransactionData, Result, StepStatus,
};
use warden_storage_sqlite::ProcessStore;

const INTERRUPTED_MESSAGE: &str = "Interrupted before the step settled";

/// Engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Ceiling for the cross-chain settlement wait
    pub cross_chain_wait: Duration,
    /// Smallest flow tracked as a persisted process
    pub min_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&BackgroundConfig::default())
    }
}

impl From<&BackgroundConfig> for EngineConfig {
    fn from(config: &BackgroundConfig) -> Self {
        Self {
            cross_chain_wait: config.cross_chain_wait(),
            min_steps: config.min_process_steps,
        }
    }
}

/// Result of executing one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepProgress {
    Advanced,
    TimedOut,
}

struct Tracked {
    state: watch::Sender<ProcessTransactionData>,
    exec: tokio::sync::Mutex<()>,
}

impl Tracked {
    fn new(process: ProcessTransactionData) -> Self {
        let (state, _) = watch::channel(process);
        Self {
            state,
            exec: tokio::sync::Mutex::new(()),
        }
    }

    fn current(&self) -> ProcessTransactionData {
        self.state.borrow().clone()
    }
}

/// Multi-step process engine
pub struct ProcessEngine {
    db: SharedDatabase,
    builder: Arc<dyn StepBuilder>,
    balances: Arc<dyn BalanceService>,
    config: EngineConfig,
    tracked: Mutex<HashMap<String, Arc<Tracked>>>,
}

impl ProcessEngine {
    /// Create engine
    pub fn new(
        db: SharedDatabase,
        builder: Arc<dyn StepBuilder>,
        balances: Arc<dyn BalanceService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            builder,
            balances,
            config,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    /// Smallest flow tracked as a process
    pub fn min_steps(&self) -> usize {
        self.config.min_steps
    }

    /// Create and persist process `id` unless it already exists.
    ///
    /// Returns the stored process, which for an existing id is left untouched.
    pub fn create_process_if_need(
        &self,
        id: &str,
        address: &str,
        steps: Vec<ProcessStep>,
        combine_info: CombineInfo,
        one_sign: bool,
    ) -> Result<ProcessTransactionData> {
        if steps.len() < self.config.min_steps {
            return Err(Error::validation(format!(
                "A tracked process needs at least {} steps, got {}",
                self.config.min_steps,
                steps.len()
            )));
        }
        validate_steps(&steps)?;

        if let Some(existing) = self.cached(id) {
            debug!(process_id = %id, "Process already tracked");
            return Ok(existing.current());
        }

        let process = ProcessTransactionData::new(id, address, steps, combine_info, one_sign);
        let inserted = {
            let db = self.db.lock();
            ProcessStore::new(&db).insert_if_absent(&process)?
        };

        if !inserted {
            return Ok(self.tracked(id)?.current());
        }

        info!(
            event = "process_created",
            process_id = %id,
            process_type = process.process_type().as_str(),
            steps = process.steps.len(),
            one_sign,
            "Process created"
        );
        Ok(self.track(process).current())
    }

    /// Submit step `index` of process `id` and return the updated process.
    ///
    /// A failed step is recorded on the process before the error is returned.
    pub async fn submit_step(&self, id: &str, index: usize) -> Result<ProcessTransactionData> {
        let tracked = self.tracked(id)?;
        let _exec = tracked.exec.lock().await;
        self.execute_step(&tracked, index).await?;
        Ok(tracked.current())
    }

    /// Submit every remaining step back to back.
    ///
    /// Stops early when a cross-chain wait times out; the process can then be
    /// resumed with `submit_step` or another `run`.
    pub async fn run(&self, id: &str) -> Result<ProcessTransactionData> {
        let tracked = self.tracked(id)?;
        let _exec = tracked.exec.lock().await;

        loop {
            let current = tracked.current();
            if current.status.is_terminal() {
                break;
            }
            let Some(index) = current.next_step_index() else {
                break;
            };
            if self.execute_step(&tracked, index).await? == StepProgress::TimedOut {
                break;
            }
        }
        Ok(tracked.current())
    }

    /// Run a short flow without tracking it as a process
    pub async fn execute_direct(
        &self,
        address: &str,
        steps: Vec<ProcessStep>,
        combine_info: CombineInfo,
    ) -> Result<Vec<ProcessStep>> {
        validate_steps(&steps)?;
        let id = format!("direct-{}", uuid::Uuid::new_v4());
        let mut process = ProcessTransactionData::new(id, address, steps, combine_info, false);

        for index in 0..process.steps.len() {
            process.set_step_status(index, StepStatus::Submitting)?;
            let step = process.steps[index].clone();
            let outcome = match self.builder.submit_step(&process, &step).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        event = "direct_step_failed",
                        address = %address,
                        step = index,
                        "Direct flow step failed: {}",
                        e
                    );
                    return Err(Error::StepExecution {
                        step: index,
                        message: e.user_message(),
                    });
                }
            };
            process.steps[index].tx_hash = outcome.tx_hash.clone();
            process.set_step_status(index, StepStatus::Complete)?;

            if index + 1 < process.steps.len() {
                if let Some(target) = outcome.cross_chain {
                    self.await_settlement(target).await?;
                }
            }
        }

        Ok(process.steps)
    }

    /// Watch process `id`, loading it from storage if needed
    pub fn subscribe(&self, id: &str) -> Result<watch::Receiver<ProcessTransactionData>> {
        Ok(self.tracked(id)?.state.subscribe())
    }

    /// Latest state of process `id`
    pub fn get(&self, id: &str) -> Result<ProcessTransactionData> {
        Ok(self.tracked(id)?.current())
    }

    /// Every stored process, most recent first
    pub fn list(&self) -> Result<Vec<ProcessTransactionData>> {
        let db = self.db.lock();
        Ok(ProcessStore::new(&db).list_processes()?)
    }

    /// Delete complete, failed and cancelled processes
    pub fn clear_terminal(&self) -> Result<Vec<String>> {
        let removed = {
            let db = self.db.lock();
            ProcessStore::new(&db).delete_terminal()?
        };
        let mut tracked = self.tracked.lock();
        for id in &removed {
            tracked.remove(id);
        }
        info!(event = "processes_cleared", removed = removed.len(), "Cleared finished processes");
        Ok(removed)
    }

    /// Settle processes a previous run left mid-step.
    ///
    /// A step stuck in SUBMITTING is marked FAILED. A process whose submitted
    /// steps all completed was waiting on funds and becomes TIMEOUT, which the
    /// user can resume.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let interrupted = {
            let db = self.db.lock();
            ProcessStore::new(&db).list_by_status(&[ProcessStatus::Submitting])?
        };

        let count = interrupted.len();
        for mut process in interrupted {
            match process.steps.iter().position(|s| s.status == StepStatus::Submitting) {
                Some(index) => {
                    process.steps[index].error = Some(INTERRUPTED_MESSAGE.to_string());
                    process.set_step_status(index, StepStatus::Failed)?;
                    process.status = ProcessStatus::Failed;
                    process.rollback = index > 0;
                }
                None => process.status = ProcessStatus::Timeout,
            }
            process.last_error = Some(INTERRUPTED_MESSAGE.to_string());

            warn!(
                event = "process_recovered",
                process_id = %process.id,
                status = process.status.as_str(),
                "Recovered interrupted process"
            );
            let db = self.db.lock();
            ProcessStore::new(&db).save_process(&process)?;
        }
        Ok(count)
    }

    async fn execute_step(&self, tracked: &Tracked, index: usize) -> Result<StepProgress> {
        let mut process = tracked.current();
        process.set_step_status(index, StepStatus::Submitting)?;
        process.status = ProcessStatus::Submitting;
        process.last_error = None;
        self.persist(tracked, &process)?;

        let step = process.steps[index].clone();
        info!(
            event = "process_step_submitting",
            process_id = %process.id,
            step = index,
            step_type = ?step.step_type,
            "Submitting process step"
        );

        let outcome: StepOutcome = match self.builder.submit_step(&process, &step).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.user_message();
                process.steps[index].error = Some(message.clone());
                process.set_step_status(index, StepStatus::Failed)?;
                process.status = ProcessStatus::Failed;
                process.rollback = index > 0;
                process.last_error = Some(message.clone());
                self.persist(tracked, &process)?;

                warn!(
                    event = "process_step_failed",
                    process_id = %process.id,
                    step = index,
                    rollback = process.rollback,
                    error = %message,
                    "Process step failed"
                );
                return Err(Error::StepExecution {
                    step: index,
                    message,
                });
            }
        };

        process.steps[index].tx_hash = outcome.tx_hash.clone();
        process.set_step_status(index, StepStatus::Complete)?;
        if process.all_complete() {
            process.status = ProcessStatus::Complete;
        }
        self.persist(tracked, &process)?;

        info!(
            event = "process_step_complete",
            process_id = %process.id,
            step = index,
            tx_hash = outcome.tx_hash.as_deref().unwrap_or(""),
            "Process step complete"
        );

        if process.status == ProcessStatus::Complete {
            info!(event = "process_complete", process_id = %process.id, "Process complete");
            return Ok(StepProgress::Advanced);
        }

        if let Some(target) = outcome.cross_chain {
            if let Err(e) = self.await_settlement(target).await {
                let mut process = tracked.current();
                process.status = ProcessStatus::Timeout;
                process.last_error = Some(e.user_message());
                self.persist(tracked, &process)?;

                warn!(
                    event = "process_timeout",
                    process_id = %process.id,
                    step = index,
                    "Cross-chain settlement wait ended: {}",
                    e
                );
                return Ok(StepProgress::TimedOut);
            }
        }

        Ok(StepProgress::Advanced)
    }

    async fn await_settlement(&self, target: CrossChainTarget) -> Result<u128> {
        debug!(
            chain = %target.chain,
            address = %target.address,
            token = %target.token,
            target = target.target_balance,
            "Waiting for cross-chain settlement"
        );
        let stream = self
            .balances
            .subscribe_balance(&target.chain, &target.address, &target.token)
            .await?;
        wait_for_balance(stream, target.target_balance, self.config.cross_chain_wait).await
    }

    fn persist(&self, tracked: &Tracked, process: &ProcessTransactionData) -> Result<()> {
        {
            let db = self.db.lock();
            ProcessStore::new(&db).save_process(process)?;
        }
        tracked.state.send_replace(process.clone());
        Ok(())
    }

    fn cached(&self, id: &str) -> Option<Arc<Tracked>> {
        self.tracked.lock().get(id).cloned()
    }

    fn track(&self, process: ProcessTransactionData) -> Arc<Tracked> {
        self.tracked
            .lock()
            .entry(process.id.clone())
            .or_insert_with(|| Arc::new(Tracked::new(process)))
            .clone()
    }

    fn tracked(&self, id: &str) -> Result<Arc<Tracked>> {
        if let Some(tracked) = self.cached(id) {
            return Ok(tracked);
        }
        let stored = {
            let db = self.db.lock();
            ProcessStore::new(&db).load_process(id)?
        };
        let process = stored.ok_or_else(|| Error::NotFound(format!("process {}", id)))?;
        Ok(self.track(process))
    }
}

fn validate_steps(steps: &[ProcessStep]) -> Result<()> {
    if steps.is_empty() {
        return Err(Error::validation("A flow needs at least one step"));
    }
    for (index, step) in steps.iter().enumerate() {
        if step.id != index {
            return Err(Error::validation(format!(
                "Step at position {} has id {}",
                index, step.id
            )));
        }
        if step.status != StepStatus::Queued {
            return Err(Error::validation(format!("Step {} is not queued", index)));
        }
    }
    Ok(())
}

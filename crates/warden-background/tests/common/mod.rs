//! Shared fixtures for background integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use warden_background::{
    Background, BackgroundConfig, CrossChainTarget, InMemoryBalanceService, Port, StepBuilder,
    StepOutcome,
};
use warden_core::{
    AccountInfo, Error, KdfParams, KeyringGateway, MemoryKeyring, PortMessage, ProcessStep,
    ProcessTransactionData, Result,
};
use warden_storage_sqlite::Database;

pub const PASSWORD: &str = "correct horse battery";

/// Step builder that follows a script: optional failing step, optional
/// cross-chain targets per step. Every submission is recorded.
#[derive(Default)]
pub struct ScriptedStepBuilder {
    fail_at: Option<usize>,
    cross_chain: HashMap<usize, CrossChainTarget>,
    submitted: watch::Sender<Vec<(String, usize)>>,
}

impl ScriptedStepBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(mut self, step: usize) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub fn cross_chain_at(mut self, step: usize, target: CrossChainTarget) -> Self {
        self.cross_chain.insert(step, target);
        self
    }

    pub fn submissions(&self) -> watch::Receiver<Vec<(String, usize)>> {
        self.submitted.subscribe()
    }

    pub fn submitted_steps(&self, process_id: &str) -> Vec<usize> {
        self.submitted
            .borrow()
            .iter()
            .filter(|(id, _)| id == process_id)
            .map(|(_, step)| *step)
            .collect()
    }
}

#[async_trait]
impl StepBuilder for ScriptedStepBuilder {
    async fn submit_step(&self, process: &ProcessTransactionData, step: &ProcessStep) -> Result<StepOutcome> {
        self.submitted
            .send_modify(|list| list.push((process.id.clone(), step.id)));

        if self.fail_at == Some(step.id) {
            return Err(Error::Other("1010: Invalid Transaction: Inability to pay some fees".to_string()));
        }
        Ok(StepOutcome {
            tx_hash: Some(format!("0x{:064x}", step.id + 1)),
            cross_chain: self.cross_chain.get(&step.id).cloned(),
        })
    }
}

pub struct Harness {
    pub background: Arc<Background>,
    pub keyring: Arc<MemoryKeyring>,
    pub balances: InMemoryBalanceService,
    pub builder: Arc<ScriptedStepBuilder>,
    pub port: Port,
    pub outbound: mpsc::Receiver<PortMessage>,
}

impl Harness {
    pub async fn new(builder: ScriptedStepBuilder) -> Self {
        Self::with_config(builder, BackgroundConfig::default()).await
    }

    pub async fn with_config(builder: ScriptedStepBuilder, config: BackgroundConfig) -> Self {
        Self::with_database(builder, config, Database::open_in_memory().unwrap()).await
    }

    pub async fn with_database(builder: ScriptedStepBuilder, config: BackgroundConfig, db: Database) -> Self {
        let keyring = Arc::new(MemoryKeyring::with_kdf(PASSWORD, KdfParams::insecure_fast()).unwrap());
        let balances = InMemoryBalanceService::new();
        let builder = Arc::new(builder);
        let background = Background::with_database(
            config,
            db,
            keyring.clone(),
            Arc::new(balances.clone()),
            builder.clone(),
        )
        .await
        .unwrap();
        let (port, outbound) = Port::new(64);

        Self {
            background,
            keyring,
            balances,
            builder,
            port,
            outbound,
        }
    }

    pub async fn call(&self, id: &str, message: &str, request: Value) -> Result<Value> {
        self.background.handle(id, message, request, &self.port).await
    }

    pub async fn password_account(&self) -> AccountInfo {
        self.keyring
            .create_account(warden_core::NewAccount {
                name: "Main".to_string(),
                kind: warden_core::AccountKind::Password,
                address: None,
            })
            .await
            .unwrap()
    }
}

pub fn hydradx_target(address: &str, target_balance: u128) -> CrossChainTarget {
    CrossChainTarget {
        chain: "hydradx_main".to_string(),
        address: address.to_string(),
        token: "hydradx_main-LOCAL-DOT".to_string(),
        target_balance,
    }
}

pub fn swap_request(process_id: &str, address: &str, one_sign: bool) -> Value {
    json!({
        "processId": process_id,
        "address": address,
        "steps": [
            {"type": "XCM", "fee": {"amount": "15000000", "token": "polkadot-NATIVE-DOT"}},
            {"type": "SET_FEE_TOKEN"},
            {"type": "SWAP"}
        ],
        "combineInfo": {
            "quoteId": "hydradx-quote-1",
            "fromToken": "polkadot-NATIVE-DOT",
            "toToken": "hydradx_main-NATIVE-HDX",
            "fromAmount": "10000000000",
            "toAmount": "850000000000000",
            "slippage": 0.01
        },
        "oneSign": one_sign
    })
}

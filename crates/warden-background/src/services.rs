//! External collaborators consumed by the orchestrator
//!
//! Chain-specific balance tracking and transaction building live outside the
//! background. They are reached through [`BalanceService`] and
//! [`StepBuilder`].

use crate::subscriptions::Subscription;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use warden_core::{Error, KeyringGateway, ProcessStep, ProcessTransactionData, Result};

const BALANCE_CHANNEL_CAPACITY: usize = 32;

/// Balance of one token for one address on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceUpdate {
    /// Chain slug
    pub chain: String,
    /// Account address
    pub address: String,
    /// Token slug
    pub token: String,
    /// Free balance in the token's smallest unit
    #[serde(serialize_with = "as_decimal_string")]
    pub free: u128,
}

fn as_decimal_string<S: Serializer>(value: &u128, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// Live balance feed; the producer is released when this is dropped
pub struct BalanceStream {
    /// Balance at subscription time, if known
    pub current: Option<BalanceUpdate>,
    receiver: mpsc::Receiver<BalanceUpdate>,
    producer: Subscription,
}

impl BalanceStream {
    /// Assemble a stream from its parts
    pub fn new(
        current: Option<BalanceUpdate>,
        receiver: mpsc::Receiver<BalanceUpdate>,
        producer: Subscription,
    ) -> Self {
        Self {
            current,
            receiver,
            producer,
        }
    }

    /// Next update; `None` once the producer stops
    pub async fn recv(&mut self) -> Option<BalanceUpdate> {
        self.receiver.recv().await
    }

    /// Split into the receiver and the producer handle
    pub fn into_parts(self) -> (mpsc::Receiver<BalanceUpdate>, Subscription) {
        (self.receiver, self.producer)
    }
}

/// Balance tracking collaborator
#[async_trait]
pub trait BalanceService: Send + Sync {
    /// Stream balances of `token` for `address` on `chain`
    async fn subscribe_balance(&self, chain: &str, address: &str, token: &str) -> Result<BalanceStream>;

    /// Initial balance sync for freshly loaded accounts
    async fn sync(&self, addresses: &[String]) -> Result<()>;
}

/// Balance a cross-chain step expects to land on the destination chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossChainTarget {
    /// Destination chain
    pub chain: String,
    /// Receiving address
    pub address: String,
    /// Token received
    pub token: String,
    /// Balance that counts as settled
    pub target_balance: u128,
}

/// Result of submitting one step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Transaction or extrinsic hash
    pub tx_hash: Option<String>,
    /// Set when funds still have to arrive on another chain
    pub cross_chain: Option<CrossChainTarget>,
}

/// Builds, signs and submits the transaction for one process step
#[async_trait]
pub trait StepBuilder: Send + Sync {
    /// Submit `step` of `process`
    async fn submit_step(&self, process: &ProcessTransactionData, step: &ProcessStep) -> Result<StepOutcome>;
}

type BalanceKey = (String, String, String);

#[derive(Default)]
struct BalanceState {
    next_subscriber: u64,
    balances: HashMap<BalanceKey, u128>,
    subscribers: HashMap<BalanceKey, Vec<(u64, mpsc::Sender<BalanceUpdate>)>>,
    synced: Vec<String>,
}

/// Balance service backed by in-process state
#[derive(Clone, Default)]
pub struct InMemoryBalanceService {
    state: Arc<Mutex<BalanceState>>,
}

impl InMemoryBalanceService {
    /// Create empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a balance and push it to subscribers
    pub fn set_balance(&self, chain: &str, address: &str, token: &str, free: u128) {
        let key = (chain.to_string(), address.to_string(), token.to_string());
        let update = BalanceUpdate {
            chain: chain.to_string(),
            address: address.to_string(),
            token: token.to_string(),
            free,
        };

        let mut state = self.state.lock();
        state.balances.insert(key.clone(), free);
        if let Some(subscribers) = state.subscribers.get_mut(&key) {
            subscribers.retain(|(_, tx)| match tx.try_send(update.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(chain = %chain, address = %address, "Balance subscriber lagging, update dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }

    /// Number of live balance subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().subscribers.values().map(Vec::len).sum()
    }

    /// Addresses passed to `sync`, in call order
    pub fn synced_addresses(&self) -> Vec<String> {
        self.state.lock().synced.clone()
    }
}

#[async_trait]
impl BalanceService for InMemoryBalanceService {
    async fn subscribe_balance(&self, chain: &str, address: &str, token: &str) -> Result<BalanceStream> {
        let key = (chain.to_string(), address.to_string(), token.to_string());
        let (tx, rx) = mpsc::channel(BALANCE_CHANNEL_CAPACITY);

        let (subscriber, current) = {
            let mut state = self.state.lock();
            let subscriber = state.next_subscriber;
            state.next_subscriber += 1;
            state.subscribers.entry(key.clone()).or_default().push((subscriber, tx));
            (subscriber, state.balances.get(&key).copied())
        };

        let current = current.map(|free| BalanceUpdate {
            chain: chain.to_string(),
            address: address.to_string(),
            token: token.to_string(),
            free,
        });

        let state = self.state.clone();
        let producer = Subscription::new(move || {
            let mut state = state.lock();
            if let Some(subscribers) = state.subscribers.get_mut(&key) {
                subscribers.retain(|(id, _)| *id != subscriber);
                if subscribers.is_empty() {
                    state.subscribers.remove(&key);
                }
            }
        });

        Ok(BalanceStream::new(current, rx, producer))
    }

    async fn sync(&self, addresses: &[String]) -> Result<()> {
        self.state.lock().synced.extend(addresses.iter().cloned());
        tracing::debug!(accounts = addresses.len(), "Balance sync finished");
        Ok(())
    }
}

/// Step builder that signs each step locally and never broadcasts.
///
/// The hash of the signature stands in for the transaction hash.
pub struct LocalStepBuilder {
    keyring: Arc<dyn KeyringGateway>,
}

impl LocalStepBuilder {
    /// Sign through `keyring`
    pub fn new(keyring: Arc<dyn KeyringGateway>) -> Self {
        Self { keyring }
    }
}

#[async_trait]
impl StepBuilder for LocalStepBuilder {
    async fn submit_step(&self, process: &ProcessTransactionData, step: &ProcessStep) -> Result<StepOutcome> {
        let payload = serde_json::to_vec(&(process.id.as_str(), step))?;
        let signature = self.keyring.sign(&process.address, &payload).await?;
        Ok(StepOutcome {
            tx_hash: Some(format!("0x{}", hex::encode(Sha256::digest(&signature)))),
            cross_chain: None,
        })
    }
}

/// Step builder for deployments without chain access
pub struct UnconfiguredStepBuilder;

#[async_trait]
impl StepBuilder for UnconfiguredStepBuilder {
    async fn submit_step(&self, _process: &ProcessTransactionData, step: &ProcessStep) -> Result<StepOutcome> {
        Err(Error::Other(format!(
            "No step builder configured for {:?} steps",
            step.step_type
        )))
    }
}

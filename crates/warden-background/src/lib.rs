//! Warden wallet background orchestrator
//!
//! Single entry point for every message a wallet UI or dapp sends to the
//! background: routes message types, keeps subscriptions alive for as long
//! as their port, queues requests that need user confirmation, locks the
//! keyring after inactivity and drives multi-step swap and earning
//! processes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auto_lock;
pub mod config;
pub mod dispatcher;
pub mod pending;
pub mod port;
pub mod process;
pub mod requests;
pub mod server;
pub mod services;
pub mod subscriptions;

use std::sync::Arc;

pub use auto_lock::{AutoLockController, SkipGuard};
pub use config::BackgroundConfig;
pub use dispatcher::{Background, ConfirmationQueue, SigningQueue};
pub use pending::{PendingRequest, PendingRequestStore, PendingResponse, RequestStatus};
pub use port::{ListenerId, Port};
pub use process::{EngineConfig, ProcessEngine};
pub use server::{handle_message, serve_port};
pub use services::{
    BalanceService, BalanceStream, BalanceUpdate, CrossChainTarget, InMemoryBalanceService,
    LocalStepBuilder, StepBuilder, StepOutcome, UnconfiguredStepBuilder,
};
pub use subscriptions::{Subscription, SubscriptionRegistry};

/// Database handle shared by the components that persist state
pub type SharedDatabase = Arc<parking_lot::Mutex<warden_storage_sqlite::Database>>;

//! Warden wallet background core
//!
//! Shared data model for the background orchestrator: the error taxonomy,
//! the RPC message table, the multi-step process model, auto-lock settings
//! and the keyring gateway the orchestrator signs through.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod keyring;
pub mod message;
pub mod process;
pub mod settings;

pub use error::{Error, ErrorCategory, Result, STALE_REQUEST_MESSAGE};
pub use keyring::{
    AccountExport, AccountInfo, AccountKind, KdfParams, KeyringGateway, MemoryKeyring, NewAccount,
    MIN_PASSWORD_LENGTH,
};
pub use message::{MessageType, PortMessage, RequestMessage};
pub use process::{
    CombineInfo, EarningCombineInfo, ProcessStatus, ProcessStep, ProcessTransactionData,
    ProcessType, StepFee, StepStatus, StepType, SwapCombineInfo,
};
pub use settings::{AutoLockSettings, DEFAULT_AUTO_LOCK_MINUTES, MAX_AUTO_LOCK_MINUTES};

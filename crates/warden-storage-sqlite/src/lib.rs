//! SQLite persistence for the Warden background orchestrator
//!
//! WAL-mode database with versioned migrations holding tracked multi-step
//! processes and key/value settings. Writes retry on SQLITE_BUSY with
//! exponential backoff.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod database;
pub mod error;
pub mod migrations;
pub mod process_store;
mod retry;
pub mod settings_store;

pub use database::Database;
pub use error::{Error, Result};
pub use migrations::SCHEMA_VERSION;
pub use process_store::ProcessStore;
pub use retry::{BASE_BACKOFF_MS, MAX_BACKOFF_MS, MAX_BUSY_RETRIES};
pub use settings_store::SettingsStore;

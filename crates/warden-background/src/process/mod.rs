//! Multi-step transaction processes

pub mod cross_chain;
pub mod engine;

pub use cross_chain::wait_for_balance;
pub use engine::{EngineConfig, ProcessEngine};

//! Whale Watch Library
//!
//! Multi-chain whale movement detection and alert dispatch.

pub mod alert;
pub mod chain;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod ledger;
pub mod price;
pub mod provider;
pub mod scheduler;
pub mod tasks;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};

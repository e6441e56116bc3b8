//! linkpool: a pre-generated short-code pool for a URL shortener.
//!
//! Codes are drawn from a configurable alphabet, held in a fast-store list
//! until popped, reconciled against the durable store so consumed codes are
//! never re-issued, and replenished by a monitor once the pool crosses its
//! low-water mark. Retrieval never fails: an empty or unreachable pool
//! degrades to local generation, tagged with `source = "fallback"`.

pub mod admin;
pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod manager;
pub mod monitor;
pub mod service;
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use generator::CodeGenerator;
pub use manager::PoolManager;
pub use monitor::PoolMonitor;
pub use store::{CodeIssue, CodeSource, PoolStore};

//! jrggs-sync library interface
//!
//! Incremental sync and metrics engine for tracked issues and pull
//! requests. Exposes the engine pieces for the binary and for integration
//! tests.

pub mod change_requests;
pub mod db;
pub mod directory;
pub mod engine;
pub mod error;
pub mod linking;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod settings;
pub mod source;
pub mod sync;
pub mod utils;

pub use crate::engine::Engine;
pub use crate::error::{SyncError, SyncResult};
pub use crate::scheduler::Scheduler;

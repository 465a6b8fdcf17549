//! # JRGGS Common Library
//!
//! Shared code for the JRGGS services including:
//! - Error type and result alias
//! - Bootstrap configuration loading (TOML + environment + CLI)
//! - SQLite pool initialization
//! - Event types (SyncEvent) and the broadcast event bus
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};

//! Utility modules

pub mod db_retry;
pub mod locks;

pub use db_retry::retry_on_lock;
pub use locks::{with_catch, NamedLocks};

//! Data models

pub mod change_request;
pub mod overrides;
pub mod work_item;

pub use change_request::*;
pub use overrides::*;
pub use work_item::*;

//! Error handling
//!
//! Defines error types and their mapping onto HTTP status classes.

pub mod handlers;
pub mod types;

pub use handlers::{error_kind, error_to_status, handle_error};
pub use types::*;

//! HTTP server
//!
//! Binds the listener, wires the `/api/files` routes and maps results onto
//! JSON responses.

pub mod core;
pub mod responses;
pub mod routes;

pub use core::{AppState, Server};

//! Web server module
//!
//! Serves token snapshots and tracker diagnostics as JSON over HTTP.

mod api;
mod server;

pub use server::WebServer;

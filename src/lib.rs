//! tokentrack daemon: HTTP front-end over `tokentrack-core`.

pub mod analyze;
pub mod config;
pub mod pidfile;
pub mod web;

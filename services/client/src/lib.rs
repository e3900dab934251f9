//! docvoice client library
//!
//! Everything the `docvoice` binary wires together: configuration, the HTTP
//! document service, the terminal speech backends, command parsing, rendering
//! and the interactive session loop.

pub mod api;
pub mod commands;
pub mod config;
pub mod render;
pub mod session;
pub mod speech;

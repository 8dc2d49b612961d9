//! Call Bridge API Library Crate
//!
//! This library contains the web service around the call session engine:
//! configuration, application state, HTTP handlers, the per-call WebSocket
//! endpoint, and routing. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;

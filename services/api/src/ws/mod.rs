//! WebSocket Call Sessions
//!
//! This module connects the telephony platform's per-call WebSocket to the
//! call session engine. It is structured into submodules:
//!
//! - `session`: Upgrades the connection, registers the call, and runs its session.
//! - `transport`: Reads inbound frames and writes outbound frames on the socket.

pub mod session;
mod transport;

pub use session::ws_handler;

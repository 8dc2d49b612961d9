//! Call Bridge Core
//!
//! The per-call protocol engine that sits between a telephony platform's
//! real-time event channel and a text-completion backend. It is transport
//! agnostic: frames go out through a [`sink::FrameSink`] and come in as raw text.

pub mod frame;
pub mod llm_client;
pub mod registry;
pub mod sequencer;
pub mod session;
pub mod sink;

//! The seam between the protocol engine and whatever carries frames to the platform.

use crate::frame::OutboundFrame;
use async_trait::async_trait;

/// The connection to the caller can no longer carry frames.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection is closed")]
    Closed,
    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport failure: {0}")]
    Io(String),
}

/// Accepts outbound frames in order.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: &OutboundFrame) -> Result<(), TransportError>;

    /// Whether the peer is still reachable. Checked before every frame of a reply.
    fn is_open(&self) -> bool {
        true
    }
}

/// Collects frames in memory.
#[async_trait]
impl FrameSink for Vec<OutboundFrame> {
    async fn send_frame(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
        self.push(frame.clone());
        Ok(())
    }
}

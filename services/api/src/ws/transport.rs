//! Socket plumbing between a call's WebSocket and its `CallSession`.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use callbridge_core::{
    frame::{OutboundFrame, WireSchema},
    sink::{FrameSink, TransportError},
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Forwards inbound text frames to the session until the caller goes away.
///
/// Runs as its own task so that a hang-up is noticed even while the session is
/// waiting on the completion backend; `open` is cleared as soon as it is. The
/// socket keeps being read while the session's queue is full, so a close frame
/// behind a burst of frames is still seen; the overflow waits in order.
pub(crate) async fn forward_inbound(
    mut socket_rx: SplitStream<WebSocket>,
    frames: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
) {
    let mut backlog: VecDeque<String> = VecDeque::new();
    loop {
        tokio::select! {
            permit = frames.reserve(), if !backlog.is_empty() => {
                let Ok(permit) = permit else { break };
                if let Some(text) = backlog.pop_front() {
                    permit.send(text);
                }
            }
            msg_result = socket_rx.next() => match msg_result {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str().to_owned();
                    if backlog.is_empty() {
                        match frames.try_send(text) {
                            Ok(()) => {}
                            Err(TrySendError::Full(text)) => {
                                debug!("Session busy, queueing inbound frame");
                                backlog.push_back(text);
                            }
                            Err(TrySendError::Closed(_)) => break,
                        }
                    } else {
                        backlog.push_back(text);
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!(bytes = data.len(), "Ignoring binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Caller sent close frame");
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Error receiving from call WebSocket");
                    break;
                }
                None => break,
            },
        }
    }
    if !backlog.is_empty() {
        debug!(dropped = backlog.len(), "Caller gone, dropping queued frames");
    }
    open.store(false, Ordering::SeqCst);
}

/// Writes session frames to the socket in the configured wire schema.
pub(crate) struct WsFrameSink {
    socket_tx: SplitSink<WebSocket, Message>,
    schema: WireSchema,
    open: Arc<AtomicBool>,
}

impl WsFrameSink {
    pub(crate) fn new(
        socket_tx: SplitSink<WebSocket, Message>,
        schema: WireSchema,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            socket_tx,
            schema,
            open,
        }
    }

    /// Sends a close frame if the caller is still there, then shuts the sink.
    pub(crate) async fn close(mut self) {
        if self.is_open() {
            let _ = self.socket_tx.send(Message::Close(None)).await;
            self.open.store(false, Ordering::SeqCst);
        }
        let _ = self.socket_tx.close().await;
    }
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_frame(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let Some(text) = self.schema.encode(frame)? else {
            return Ok(());
        };
        if let Err(e) = self.socket_tx.send(Message::Text(text.into())).await {
            self.open.store(false, Ordering::SeqCst);
            return Err(TransportError::Io(e.to_string()));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

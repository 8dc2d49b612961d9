//! Manages the WebSocket connection lifecycle for one phone call.

use super::transport::{WsFrameSink, forward_inbound};
use crate::state::AppState;
use axum::{
    extract::{
        Path, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use callbridge_core::session::CallSession;
use futures_util::StreamExt;
use std::sync::{Arc, atomic::AtomicBool};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, info, instrument, warn};
use uuid::Uuid;

/// Maximum accepted WebSocket message size (1 MB). Frames carry text only.
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Inbound frames buffered while a turn is being answered.
const INBOUND_BUFFER: usize = 64;

/// Axum handler to upgrade an HTTP connection to a call WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(call_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, call_id, state))
}

/// Runs one call from handshake to hang-up.
///
/// The call is registered for as long as this function runs; a second connection
/// for a call id that is already active is refused with a policy close frame.
#[instrument(name = "call_session", skip_all, fields(call_id = %call_id, connection_id))]
async fn handle_socket(mut socket: WebSocket, call_id: String, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    tracing::Span::current().record("connection_id", tracing::field::display(connection_id));

    let _registration = match state.registry.register(&call_id, connection_id) {
        Ok(registration) => registration,
        Err(e) => {
            warn!(error = %e, "Refusing connection");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };
    info!("Call connected");

    let (socket_tx, socket_rx) = socket.split();
    let open = Arc::new(AtomicBool::new(true));
    let (frames_tx, frames_rx) = mpsc::channel(INBOUND_BUFFER);
    let reader =
        tokio::spawn(forward_inbound(socket_rx, frames_tx, open.clone()).in_current_span());

    let mut sink = WsFrameSink::new(socket_tx, state.session_settings.wire_schema, open);
    let mut session = CallSession::new(
        call_id,
        state.completion_client.clone(),
        state.session_settings.clone(),
    );

    match session
        .run(
            ReceiverStream::new(frames_rx),
            &mut sink,
            state.config.idle_timeout,
        )
        .await
    {
        Ok(()) => info!(replies = session.replies_sent(), "Call session finished"),
        Err(e) => warn!(
            error = %e,
            replies = session.replies_sent(),
            "Call session ended by transport failure"
        ),
    }

    sink.close().await;
    reader.abort();
}

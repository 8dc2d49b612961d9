//! Session State Machine
//!
//! A [`CallSession`] owns the protocol state of one phone call. It performs the
//! handshake, classifies every inbound frame and, when the caller finishes a turn,
//! obtains exactly one reply and hands it to the [`ReplySequencer`]. Frames are
//! processed strictly one at a time, so a turn's outbound sequence is always
//! complete before the next inbound frame is looked at.

use crate::{
    frame::{self, FrameKind, Modality, OutboundFrame, WireSchema},
    llm_client::CompletionClient,
    sequencer::ReplySequencer,
    sink::{FrameSink, TransportError},
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_PERSONA: &str = "You are a warm, professional receptionist. Respond like a real person: short, natural sentences, small pauses, friendly tone.";
pub const DEFAULT_GREETING: &str =
    "Hi! Thanks for calling. This is your receptionist speaking. How can I help today?";
pub const DEFAULT_FALLBACK: &str = "Hi there! Thanks for calling. How can I help you today?";
pub const DEFAULT_MAX_MALFORMED_FRAMES: u32 = 3;

/// Per-deployment behaviour shared read-only by every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// System instructions forwarded with every completion request.
    pub persona: String,
    /// Spoken at session start and in answer to an empty utterance.
    pub greeting: String,
    /// Spoken when the completion backend fails.
    pub fallback: String,
    pub send_greeting: bool,
    pub modalities: Vec<Modality>,
    pub send_turn_end: bool,
    pub wire_schema: WireSchema,
    /// Consecutive malformed frames tolerated before the session is closed.
    pub max_malformed_frames: u32,
    /// Split reply text into deltas of at most this many characters.
    pub delta_chunk_chars: Option<usize>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            fallback: DEFAULT_FALLBACK.to_string(),
            send_greeting: true,
            modalities: vec![Modality::Audio, Modality::Text],
            send_turn_end: true,
            wire_schema: WireSchema::Realtime,
            max_malformed_frames: DEFAULT_MAX_MALFORMED_FRAMES,
            delta_chunk_chars: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Handshaking,
    Listening,
    ReplyPending,
    ReplyStreaming,
    Closed,
}

/// Where the text of a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Completion,
    EmptyUtterance,
    Fallback,
}

/// The text owed to the caller for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    pub text: String,
    pub source: ReplySource,
}

/// Decides what to say for one utterance. Never fails: an empty utterance gets the
/// greeting without a backend call, and a backend failure gets the fallback text.
pub async fn resolve_reply(
    client: &dyn CompletionClient,
    settings: &SessionSettings,
    utterance: &str,
) -> TurnReply {
    if utterance.trim().is_empty() {
        debug!("Empty utterance, answering with greeting");
        return TurnReply {
            text: settings.greeting.clone(),
            source: ReplySource::EmptyUtterance,
        };
    }

    match client.complete(&settings.persona, utterance).await {
        Ok(text) => TurnReply {
            text,
            source: ReplySource::Completion,
        },
        Err(e) => {
            warn!(error = %e, "Completion failed, substituting fallback reply");
            TurnReply {
                text: settings.fallback.clone(),
                source: ReplySource::Fallback,
            }
        }
    }
}

pub struct CallSession {
    call_id: String,
    state: SessionState,
    sequencer: ReplySequencer,
    last_utterance: Option<String>,
    malformed_streak: u32,
    client: Arc<dyn CompletionClient>,
    settings: Arc<SessionSettings>,
}

impl CallSession {
    pub fn new(
        call_id: impl Into<String>,
        client: Arc<dyn CompletionClient>,
        settings: Arc<SessionSettings>,
    ) -> Self {
        let sequencer = ReplySequencer::new(
            settings.modalities.clone(),
            settings.send_turn_end,
            settings.delta_chunk_chars,
        );
        Self {
            call_id: call_id.into(),
            state: SessionState::Handshaking,
            sequencer,
            last_utterance: None,
            malformed_streak: 0,
            client,
            settings,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The caller's most recent utterance. No older turns are kept.
    pub fn last_utterance(&self) -> Option<&str> {
        self.last_utterance.as_deref()
    }

    /// Sequence number of the last answered turn (zero before the first one).
    pub fn replies_sent(&self) -> u64 {
        self.sequencer.last_sequence()
    }

    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!(call_id = %self.call_id, from = ?self.state, "Session closed");
            self.state = SessionState::Closed;
        }
    }

    fn fail(&mut self, err: TransportError) -> TransportError {
        warn!(call_id = %self.call_id, error = %err, "Transport failed, closing session");
        self.close();
        err
    }

    /// Sends the session-ready frame and, if configured, the greeting.
    pub async fn start<S: FrameSink + ?Sized>(&mut self, sink: &mut S) -> Result<(), TransportError> {
        if self.state != SessionState::Handshaking {
            return Ok(());
        }

        let ready = OutboundFrame::session_ready(self.settings.modalities.clone());
        if let Err(e) = sink.send_frame(&ready).await {
            return Err(self.fail(e));
        }
        self.state = SessionState::Listening;

        if self.settings.send_greeting {
            if let Err(e) = self
                .sequencer
                .emit_greeting(&self.settings.greeting, sink)
                .await
            {
                return Err(self.fail(e));
            }
        }
        info!(call_id = %self.call_id, "Session ready");
        Ok(())
    }

    /// Processes one raw inbound frame and returns the resulting state.
    ///
    /// Malformed frames are logged and dropped; the session closes only once more
    /// than `max_malformed_frames` arrive in a row. A transport error closes the
    /// session and is returned.
    pub async fn handle_text<S: FrameSink + ?Sized>(
        &mut self,
        raw: &str,
        sink: &mut S,
    ) -> Result<SessionState, TransportError> {
        match self.state {
            SessionState::Closed => {
                debug!("Ignoring frame received after close");
                return Ok(SessionState::Closed);
            }
            SessionState::Handshaking => self.start(sink).await?,
            _ => {}
        }

        let frame = match frame::decode(raw) {
            Ok(frame) => {
                self.malformed_streak = 0;
                frame
            }
            Err(e) => {
                self.malformed_streak += 1;
                warn!(error = %e, streak = self.malformed_streak, "Discarding malformed frame");
                if self.malformed_streak > self.settings.max_malformed_frames {
                    warn!("Too many consecutive malformed frames, closing session");
                    self.close();
                }
                return Ok(self.state);
            }
        };

        match frame.kind {
            FrameKind::ResponseRequired { utterance } => self.answer(utterance, sink).await?,
            FrameKind::UpdateOnly => trace!("Update-only frame, no reply owed"),
            FrameKind::HandshakeAck => debug!("Platform acknowledged session"),
            FrameKind::Unknown => debug!(payload = %frame.payload, "Ignoring unrecognized frame"),
        }
        Ok(self.state)
    }

    async fn answer<S: FrameSink + ?Sized>(
        &mut self,
        utterance: String,
        sink: &mut S,
    ) -> Result<(), TransportError> {
        self.state = SessionState::ReplyPending;
        info!(call_id = %self.call_id, utterance = %utterance, "Caller turn complete");

        let reply = resolve_reply(self.client.as_ref(), &self.settings, &utterance).await;
        self.last_utterance = Some(utterance);

        self.state = SessionState::ReplyStreaming;
        match self.sequencer.emit_reply(&reply.text, sink).await {
            Ok(id) => {
                info!(response_id = %id, source = ?reply.source, reply = %reply.text, "Reply sent");
                self.state = SessionState::Listening;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Runs the session to completion over a stream of raw text frames.
    ///
    /// Returns when the stream ends (the caller hung up), no frame arrives within
    /// `idle_timeout`, the session closes itself, or the transport fails. The
    /// session is always `Closed` afterwards.
    pub async fn run<I, S>(
        &mut self,
        mut inbound: I,
        sink: &mut S,
        idle_timeout: Option<Duration>,
    ) -> Result<(), TransportError>
    where
        I: Stream<Item = String> + Unpin + Send,
        S: FrameSink + ?Sized,
    {
        let result = self.drive(&mut inbound, sink, idle_timeout).await;
        self.close();
        result
    }

    async fn drive<I, S>(
        &mut self,
        inbound: &mut I,
        sink: &mut S,
        idle_timeout: Option<Duration>,
    ) -> Result<(), TransportError>
    where
        I: Stream<Item = String> + Unpin + Send,
        S: FrameSink + ?Sized,
    {
        self.start(sink).await?;

        while self.state != SessionState::Closed {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, inbound.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        info!(?limit, "Call idle for too long, closing session");
                        break;
                    }
                },
                None => inbound.next().await,
            };

            let Some(raw) = next else {
                info!("Caller connection closed");
                break;
            };
            self.handle_text(&raw, sink).await?;
        }
        Ok(())
    }
}

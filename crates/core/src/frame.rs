//! Frame Codec
//!
//! Decodes the JSON event frames sent by the telephony platform into a tagged
//! [`FrameKind`] and encodes [`OutboundFrame`]s in the configured
//! [`WireSchema`]. Both directions are pure transformations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Frame types the platform sends to acknowledge the session handshake.
const HANDSHAKE_ACK_TYPES: &[&str] = &["session.updated", "call_details"];

/// A failure to make sense of an inbound frame. Never fatal on its own.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("field `{0}` has an unexpected type")]
    InvalidField(&'static str),
}

/// The classification of an inbound frame, which drives every downstream decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// The platform acknowledged our session-ready frame.
    HandshakeAck,
    /// Partial transcript or control traffic; no reply is owed.
    UpdateOnly,
    /// The caller finished a turn and a reply is owed.
    ResponseRequired { utterance: String },
    /// Anything else. Ignored.
    Unknown,
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub kind: FrameKind,
    pub payload: Value,
}

impl InboundFrame {
    /// The caller's utterance, present only for response-required frames.
    pub fn utterance(&self) -> Option<&str> {
        match &self.kind {
            FrameKind::ResponseRequired { utterance } => Some(utterance),
            _ => None,
        }
    }
}

/// Decodes a raw text frame.
pub fn decode(raw: &str) -> Result<InboundFrame, FrameError> {
    let payload: Value = serde_json::from_str(raw)?;
    let object = payload.as_object().ok_or(FrameError::NotAnObject)?;

    let interaction_type = match object.get("interaction_type") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => return Err(FrameError::InvalidField("interaction_type")),
    };

    let kind = match interaction_type {
        Some("update_only") => FrameKind::UpdateOnly,
        Some("response_required") => FrameKind::ResponseRequired {
            utterance: extract_utterance(object)?,
        },
        Some(_) => FrameKind::Unknown,
        None => match object.get("type").and_then(Value::as_str) {
            Some(t) if HANDSHAKE_ACK_TYPES.contains(&t) => FrameKind::HandshakeAck,
            _ => FrameKind::Unknown,
        },
    };

    Ok(InboundFrame { kind, payload })
}

/// Pulls the caller's words out of `message`, `text` or `transcript`, in that order.
///
/// A `transcript` may be a plain string or a list of `{role, content}` turns, in
/// which case the last user turn is taken.
fn extract_utterance(object: &Map<String, Value>) -> Result<String, FrameError> {
    for field in ["message", "text"] {
        match object.get(field) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => return Ok(s.trim().to_string()),
            Some(_) => return Err(FrameError::InvalidField(field)),
        }
    }

    match object.get("transcript") {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(Value::Array(turns)) => Ok(turns
            .iter()
            .rev()
            .find(|turn| turn.get("role").and_then(Value::as_str) == Some("user"))
            .and_then(|turn| turn.get("content"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()),
        Some(_) => Err(FrameError::InvalidField("transcript")),
    }
}

/// A response modality the platform may synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Audio,
    Text,
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "audio" => Ok(Modality::Audio),
            "text" => Ok(Modality::Text),
            other => Err(format!("unknown modality '{}'", other)),
        }
    }
}

/// Identifies one reply within a session. Sequence 0 is reserved for the greeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyId(u64);

impl ReplyId {
    pub const GREETING: ReplyId = ReplyId(0);

    pub fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    pub fn sequence(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReplyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "greeting"),
            n => write!(f, "reply_{}", n),
        }
    }
}

impl FromStr for ReplyId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "greeting" {
            return Ok(ReplyId::GREETING);
        }
        s.strip_prefix("reply_")
            .and_then(|n| n.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .map(ReplyId)
            .ok_or_else(|| format!("invalid reply id '{}'", s))
    }
}

impl Serialize for ReplyId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReplyId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Frames sent to the telephony platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundFrame {
    #[serde(rename = "session.update")]
    SessionReady {
        status: SessionStatus,
        modalities: Vec<Modality>,
    },
    #[serde(rename = "response.create")]
    ResponseCreate {
        response_id: ReplyId,
        modalities: Vec<Modality>,
    },
    #[serde(rename = "response.output_text.delta")]
    ResponseDelta { response_id: ReplyId, delta: String },
    #[serde(rename = "response.output_text.done")]
    ResponseDone { response_id: ReplyId },
    #[serde(rename = "turn.end")]
    TurnEnd { turn_type: TurnType },
}

impl OutboundFrame {
    pub fn session_ready(modalities: Vec<Modality>) -> Self {
        OutboundFrame::SessionReady {
            status: SessionStatus::Ready,
            modalities,
        }
    }

    pub fn agent_turn_end() -> Self {
        OutboundFrame::TurnEnd {
            turn_type: TurnType::AgentTurn,
        }
    }

    /// The reply this frame belongs to, if any.
    pub fn response_id(&self) -> Option<ReplyId> {
        match self {
            OutboundFrame::ResponseCreate { response_id, .. }
            | OutboundFrame::ResponseDelta { response_id, .. }
            | OutboundFrame::ResponseDone { response_id } => Some(*response_id),
            OutboundFrame::SessionReady { .. } | OutboundFrame::TurnEnd { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnType {
    AgentTurn,
}

/// The outbound frame vocabulary spoken to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireSchema {
    /// Create/delta/done framing with an explicit turn end.
    #[default]
    Realtime,
    /// Bare `response.output_text` frames carrying the text, with no reply framing.
    Legacy,
}

impl FromStr for WireSchema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "realtime" => Ok(WireSchema::Realtime),
            "legacy" => Ok(WireSchema::Legacy),
            other => Err(format!("unknown wire schema '{}'", other)),
        }
    }
}

impl WireSchema {
    /// Serializes a frame, or returns `None` when this vocabulary has no such frame.
    pub fn encode(self, frame: &OutboundFrame) -> Result<Option<String>, serde_json::Error> {
        match self {
            WireSchema::Realtime => encode(frame).map(Some),
            WireSchema::Legacy => {
                let value = match frame {
                    OutboundFrame::SessionReady { .. } => serde_json::json!({
                        "type": "session.update",
                        "status": "ready",
                    }),
                    OutboundFrame::ResponseDelta { delta, .. } => serde_json::json!({
                        "type": "response.output_text",
                        "text": delta,
                    }),
                    _ => return Ok(None),
                };
                serde_json::to_string(&value).map(Some)
            }
        }
    }
}

/// Serializes a frame in the realtime vocabulary.
pub fn encode(frame: &OutboundFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

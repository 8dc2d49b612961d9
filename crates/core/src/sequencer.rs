//! Reply Sequencer
//!
//! Turns reply text into the create → delta → done (→ turn end) frame sequence and
//! owns the per-session reply counter.

use crate::{
    frame::{Modality, OutboundFrame, ReplyId},
    sink::{FrameSink, TransportError},
};
use tracing::debug;

pub struct ReplySequencer {
    last_sequence: u64,
    modalities: Vec<Modality>,
    send_turn_end: bool,
    delta_chunk_chars: Option<usize>,
}

impl ReplySequencer {
    pub fn new(
        modalities: Vec<Modality>,
        send_turn_end: bool,
        delta_chunk_chars: Option<usize>,
    ) -> Self {
        Self {
            last_sequence: 0,
            modalities,
            send_turn_end,
            delta_chunk_chars: delta_chunk_chars.filter(|n| *n > 0),
        }
    }

    /// The most recently allocated reply sequence. Zero until a turn has been answered.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Emits the greeting under the reserved `greeting` identifier.
    pub async fn emit_greeting<S: FrameSink + ?Sized>(
        &mut self,
        text: &str,
        sink: &mut S,
    ) -> Result<ReplyId, TransportError> {
        self.emit(ReplyId::GREETING, text, sink).await?;
        Ok(ReplyId::GREETING)
    }

    /// Allocates the next reply identifier and emits the full sequence for `text`.
    pub async fn emit_reply<S: FrameSink + ?Sized>(
        &mut self,
        text: &str,
        sink: &mut S,
    ) -> Result<ReplyId, TransportError> {
        self.last_sequence += 1;
        let id = ReplyId::new(self.last_sequence);
        self.emit(id, text, sink).await?;
        Ok(id)
    }

    async fn emit<S: FrameSink + ?Sized>(
        &self,
        id: ReplyId,
        text: &str,
        sink: &mut S,
    ) -> Result<(), TransportError> {
        let frames = self.frames_for(id, text);
        debug!(response_id = %id, frames = frames.len(), "Emitting reply sequence");
        for frame in &frames {
            if !sink.is_open() {
                return Err(TransportError::Closed);
            }
            sink.send_frame(frame).await?;
        }
        Ok(())
    }

    /// The exact frames that make up one reply.
    pub fn frames_for(&self, id: ReplyId, text: &str) -> Vec<OutboundFrame> {
        let mut frames = vec![OutboundFrame::ResponseCreate {
            response_id: id,
            modalities: self.modalities.clone(),
        }];
        frames.extend(
            self.chunk(text)
                .into_iter()
                .map(|delta| OutboundFrame::ResponseDelta {
                    response_id: id,
                    delta,
                }),
        );
        frames.push(OutboundFrame::ResponseDone { response_id: id });
        if self.send_turn_end {
            frames.push(OutboundFrame::agent_turn_end());
        }
        frames
    }

    fn chunk(&self, text: &str) -> Vec<String> {
        match self.delta_chunk_chars {
            Some(size) if text.chars().count() > size => text
                .chars()
                .collect::<Vec<_>>()
                .chunks(size)
                .map(|c| c.iter().collect())
                .collect(),
            _ => vec![text.to_string()],
        }
    }
}

//! Length-prefixed framing for the core agent socket.
//!
//! Both directions use a 4-byte big-endian length header followed by a JSON
//! payload. [`ClientCodec`] is the agent side (sends messages, reads
//! responses); [`CollectorCodec`] is the core agent side and is what test
//! doubles speak.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::error::ScoutError;
use crate::protocol::{AgentMessage, AgentResponse, FRAME_HEADER_LEN, MAX_FRAME_LEN};

/// Builds the raw frame codec shared by both sides.
#[must_use]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(FRAME_HEADER_LEN)
        .big_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Agent-side codec: encodes [`AgentMessage`], decodes [`AgentResponse`].
#[derive(Debug)]
pub struct ClientCodec {
    frames: LengthDelimitedCodec,
}

impl ClientCodec {
    /// Creates a codec with the standard frame limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: frame_codec(),
        }
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<AgentMessage> for ClientCodec {
    type Error = ScoutError;

    fn encode(&mut self, item: AgentMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.encode()?;
        self.frames.encode(payload, dst)?;
        Ok(())
    }
}

impl Decoder for ClientCodec {
    type Item = AgentResponse;
    type Error = ScoutError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src)? {
            Some(frame) => AgentResponse::decode(&frame).map(Some),
            None => Ok(None),
        }
    }
}

/// Core-agent-side codec: decodes [`AgentMessage`], encodes [`AgentResponse`].
#[derive(Debug)]
pub struct CollectorCodec {
    frames: LengthDelimitedCodec,
}

impl CollectorCodec {
    /// Creates a codec with the standard frame limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: frame_codec(),
        }
    }
}

impl Default for CollectorCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<AgentResponse> for CollectorCodec {
    type Error = ScoutError;

    fn encode(&mut self, item: AgentResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload: Bytes = item.encode()?;
        self.frames.encode(payload, dst)?;
        Ok(())
    }
}

impl Decoder for CollectorCodec {
    type Item = AgentMessage;
    type Error = ScoutError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src)? {
            Some(frame) => AgentMessage::decode(&frame).map(Some),
            None => Ok(None),
        }
    }
}

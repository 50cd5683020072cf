//! Core agent wire protocol (v1).
//!
//! Every frame is a 4-byte big-endian length followed by a JSON payload.
//! The payload is an object with exactly one key naming the message kind:
//!
//! ```text
//! {"StartSpan": {"request_id": "req-…", "span_id": "span-…", "operation": "SQL/Query", …}}
//! ```
//!
//! Responses use the same framing and shape, e.g. `{"StartSpan": {"result": "Success"}}`.
//! Unknown kinds fail decoding.

use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoutError};
use crate::types::{RequestId, SpanId, format_timestamp};

/// Size of the length header preceding every payload.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest payload accepted in either direction.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Protocol version announced at registration.
pub const API_VERSION: &str = "1.0";

/// Language announced at registration.
pub const LANGUAGE: &str = "rust";

/// Result string the core agent uses for an accepted message.
pub const RESULT_SUCCESS: &str = "Success";

/// Discriminator for every message kind on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Application registration.
    Register,
    /// A request started.
    StartRequest,
    /// A request finished and may be reported.
    FinishRequest,
    /// A tag attached to a request.
    TagRequest,
    /// A span started.
    StartSpan,
    /// A span stopped.
    StopSpan,
    /// A tag attached to a span.
    TagSpan,
    /// Out-of-band application event (metadata and such).
    ApplicationEvent,
}

impl MessageKind {
    /// Every kind, in protocol order.
    pub const ALL: [Self; 8] = [
        Self::Register,
        Self::StartRequest,
        Self::FinishRequest,
        Self::TagRequest,
        Self::StartSpan,
        Self::StopSpan,
        Self::TagSpan,
        Self::ApplicationEvent,
    ];

    /// Returns the wire name of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "Register",
            Self::StartRequest => "StartRequest",
            Self::FinishRequest => "FinishRequest",
            Self::TagRequest => "TagRequest",
            Self::StartSpan => "StartSpan",
            Self::StopSpan => "StopSpan",
            Self::TagSpan => "TagSpan",
            Self::ApplicationEvent => "ApplicationEvent",
        }
    }

    /// Looks a kind up by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registers the application with the core agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    /// Application name.
    pub app: String,
    /// Organization key.
    pub key: String,
    /// Agent language.
    pub language: String,
    /// Protocol version.
    pub api_version: String,
}

/// Marks the start of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Request id.
    pub request_id: RequestId,
    /// Start time (RFC 3339).
    pub timestamp: String,
}

/// Marks the end of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishRequest {
    /// Request id.
    pub request_id: RequestId,
    /// Finish time (RFC 3339).
    pub timestamp: String,
}

/// Attaches a tag to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRequest {
    /// Request id.
    pub request_id: RequestId,
    /// Tag name.
    pub tag: String,
    /// Tag value.
    pub value: serde_json::Value,
    /// Tag time (RFC 3339).
    pub timestamp: String,
}

/// Marks the start of a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSpan {
    /// Owning request id.
    pub request_id: RequestId,
    /// Span id.
    pub span_id: SpanId,
    /// Parent span id, absent for spans directly under the request.
    pub parent_id: Option<SpanId>,
    /// Operation name (e.g. `Controller/GET /`).
    pub operation: String,
    /// Start time (RFC 3339).
    pub timestamp: String,
}

/// Marks the end of a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopSpan {
    /// Owning request id.
    pub request_id: RequestId,
    /// Span id.
    pub span_id: SpanId,
    /// Stop time (RFC 3339).
    pub timestamp: String,
}

/// Attaches a tag to a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSpan {
    /// Owning request id.
    pub request_id: RequestId,
    /// Span id.
    pub span_id: SpanId,
    /// Tag name.
    pub tag: String,
    /// Tag value.
    pub value: serde_json::Value,
    /// Tag time (RFC 3339).
    pub timestamp: String,
}

/// Application-level event, such as the metadata push after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationEvent {
    /// Event type (e.g. `scout.metadata`).
    pub event_type: String,
    /// Event payload.
    pub event_value: serde_json::Value,
    /// Event source (e.g. `Pid: 1234`).
    pub source: String,
    /// Event time (RFC 3339).
    pub timestamp: String,
}

/// A message sent to the core agent.
///
/// Serialized externally tagged, so the variant name is the wire
/// discriminator and unknown discriminators are rejected on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentMessage {
    /// See [`Register`].
    Register(Register),
    /// See [`StartRequest`].
    StartRequest(StartRequest),
    /// See [`FinishRequest`].
    FinishRequest(FinishRequest),
    /// See [`TagRequest`].
    TagRequest(TagRequest),
    /// See [`StartSpan`].
    StartSpan(StartSpan),
    /// See [`StopSpan`].
    StopSpan(StopSpan),
    /// See [`TagSpan`].
    TagSpan(TagSpan),
    /// See [`ApplicationEvent`].
    ApplicationEvent(ApplicationEvent),
}

impl AgentMessage {
    /// Builds a registration message.
    #[must_use]
    pub fn register(app: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Register(Register {
            app: app.into(),
            key: key.into(),
            language: LANGUAGE.to_string(),
            api_version: API_VERSION.to_string(),
        })
    }

    /// Builds a start-request message.
    #[must_use]
    pub fn start_request(request_id: RequestId, at: SystemTime) -> Self {
        Self::StartRequest(StartRequest {
            request_id,
            timestamp: format_timestamp(at),
        })
    }

    /// Builds a finish-request message.
    #[must_use]
    pub fn finish_request(request_id: RequestId, at: SystemTime) -> Self {
        Self::FinishRequest(FinishRequest {
            request_id,
            timestamp: format_timestamp(at),
        })
    }

    /// Builds a request tag message.
    #[must_use]
    pub fn tag_request(
        request_id: RequestId,
        tag: impl Into<String>,
        value: serde_json::Value,
        at: SystemTime,
    ) -> Self {
        Self::TagRequest(TagRequest {
            request_id,
            tag: tag.into(),
            value,
            timestamp: format_timestamp(at),
        })
    }

    /// Builds a start-span message.
    #[must_use]
    pub fn start_span(
        request_id: RequestId,
        span_id: SpanId,
        parent_id: Option<SpanId>,
        operation: impl Into<String>,
        at: SystemTime,
    ) -> Self {
        Self::StartSpan(StartSpan {
            request_id,
            span_id,
            parent_id,
            operation: operation.into(),
            timestamp: format_timestamp(at),
        })
    }

    /// Builds a stop-span message.
    #[must_use]
    pub fn stop_span(request_id: RequestId, span_id: SpanId, at: SystemTime) -> Self {
        Self::StopSpan(StopSpan {
            request_id,
            span_id,
            timestamp: format_timestamp(at),
        })
    }

    /// Builds a span tag message.
    #[must_use]
    pub fn tag_span(
        request_id: RequestId,
        span_id: SpanId,
        tag: impl Into<String>,
        value: serde_json::Value,
        at: SystemTime,
    ) -> Self {
        Self::TagSpan(TagSpan {
            request_id,
            span_id,
            tag: tag.into(),
            value,
            timestamp: format_timestamp(at),
        })
    }

    /// Builds an application event message.
    #[must_use]
    pub fn application_event(
        event_type: impl Into<String>,
        event_value: serde_json::Value,
        source: impl Into<String>,
        at: SystemTime,
    ) -> Self {
        Self::ApplicationEvent(ApplicationEvent {
            event_type: event_type.into(),
            event_value,
            source: source.into(),
            timestamp: format_timestamp(at),
        })
    }

    /// Returns the kind of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Register(_) => MessageKind::Register,
            Self::StartRequest(_) => MessageKind::StartRequest,
            Self::FinishRequest(_) => MessageKind::FinishRequest,
            Self::TagRequest(_) => MessageKind::TagRequest,
            Self::StartSpan(_) => MessageKind::StartSpan,
            Self::StopSpan(_) => MessageKind::StopSpan,
            Self::TagSpan(_) => MessageKind::TagSpan,
            Self::ApplicationEvent(_) => MessageKind::ApplicationEvent,
        }
    }

    /// Returns the request id this message refers to, if any.
    #[must_use]
    pub const fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::StartRequest(m) => Some(&m.request_id),
            Self::FinishRequest(m) => Some(&m.request_id),
            Self::TagRequest(m) => Some(&m.request_id),
            Self::StartSpan(m) => Some(&m.request_id),
            Self::StopSpan(m) => Some(&m.request_id),
            Self::TagSpan(m) => Some(&m.request_id),
            Self::Register(_) | Self::ApplicationEvent(_) => None,
        }
    }

    /// Serializes this message to a frame payload (header not included).
    ///
    /// # Errors
    /// Returns a protocol error if serialization fails or the payload is
    /// larger than [`MAX_FRAME_LEN`].
    pub fn encode(&self) -> Result<Bytes> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| ScoutError::protocol(format!("failed to encode {}: {e}", self.kind())))?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(ScoutError::protocol(format!(
                "{} payload of {} bytes exceeds frame limit",
                self.kind(),
                payload.len()
            )));
        }
        Ok(Bytes::from(payload))
    }

    /// Parses a frame payload into a message.
    ///
    /// # Errors
    /// Returns a protocol error for malformed JSON or unknown kinds.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| ScoutError::protocol(format!("failed to decode message: {e}")))
    }
}

/// A decoded core agent response.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    /// Kind of message this response acknowledges.
    pub kind: MessageKind,
    /// Result string, when the core agent sent one.
    pub result: Option<String>,
    /// Full response body under the kind key.
    pub body: serde_json::Value,
}

impl AgentResponse {
    /// Creates a successful acknowledgement for `kind`.
    #[must_use]
    pub fn success(kind: MessageKind) -> Self {
        Self {
            kind,
            result: Some(RESULT_SUCCESS.to_string()),
            body: serde_json::json!({ "result": RESULT_SUCCESS }),
        }
    }

    /// Returns true unless the core agent reported a non-success result.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.as_deref().is_none_or(|r| r == RESULT_SUCCESS)
    }

    /// Serializes this response to a frame payload.
    ///
    /// # Errors
    /// Returns a protocol error if serialization fails.
    pub fn encode(&self) -> Result<Bytes> {
        let mut object = serde_json::Map::new();
        object.insert(self.kind.as_str().to_string(), self.body.clone());
        serde_json::to_vec(&serde_json::Value::Object(object))
            .map(Bytes::from)
            .map_err(|e| ScoutError::protocol(format!("failed to encode response: {e}")))
    }

    /// Parses a frame payload into a response.
    ///
    /// # Errors
    /// Returns a protocol error unless the payload is an object with a
    /// single known kind key.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| ScoutError::protocol(format!("failed to decode response: {e}")))?;
        let serde_json::Value::Object(object) = value else {
            return Err(ScoutError::protocol("response is not a JSON object"));
        };
        if object.len() != 1 {
            return Err(ScoutError::protocol(format!(
                "response must have exactly one kind key, found {}",
                object.len()
            )));
        }
        let Some((name, body)) = object.into_iter().next() else {
            return Err(ScoutError::protocol("empty response"));
        };
        let kind = MessageKind::from_name(&name)
            .ok_or_else(|| ScoutError::protocol(format!("unknown response kind {name:?}")))?;
        let result = body
            .get("result")
            .and_then(|r| r.as_str())
            .map(str::to_string);
        Ok(Self { kind, result, body })
    }
}

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A message one participant sends to the other through the relay.
///
/// Serialized as `{"type": ..., "payload": ...}`, the same shape the browser
/// sends, so relaying never reshapes a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Signal {
    /// Session description opening the peer connection
    Offer(Value),
    /// Session description answering an offer
    Answer(Value),
    IceCandidate(Value),
    Chat(ChatPayload),
    /// A shared file, inlined as a data URL
    Media(MediaPayload),
}

impl Signal {
    pub const OFFER: &'static str = "offer";
    pub const ANSWER: &'static str = "answer";
    pub const ICE_CANDIDATE: &'static str = "ice_candidate";
    pub const CHAT: &'static str = "chat";
    pub const MEDIA: &'static str = "media";

    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer(_) => Self::OFFER,
            Signal::Answer(_) => Self::ANSWER,
            Signal::IceCandidate(_) => Self::ICE_CANDIDATE,
            Signal::Chat(_) => Self::CHAT,
            Signal::Media(_) => Self::MEDIA,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub text: String,
    /// Fields the relay does not know about, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatPayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPayload {
    pub file_name: String,
    pub mime_type: String,
    pub data_url: String,
    /// Optional caption. `Some(None)` is an explicit `null`, kept so the
    /// payload is relayed exactly as sent.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub text: Option<Option<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MediaPayload {
    pub fn caption(&self) -> Option<&str> {
        self.text.as_ref().and_then(|text| text.as_deref())
    }
}

/// Distinguishes a field sent as `null` from one left out.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("message has no type")]
    MissingType,
    #[error("Unsupported message type: {0}")]
    UnsupportedType(String),
    #[error("{0} message requires a payload")]
    MissingPayload(&'static str),
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

/// Everything a participant may send on its control channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Leave the current partner (if any) and go back to the queue
    Next,
    Signal(Signal),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

impl ClientMessage {
    pub const NEXT: &'static str = "next";

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        let kind = envelope.kind.ok_or(ProtocolError::MissingType)?;

        let kind: &'static str = match kind.as_str() {
            Self::NEXT => return Ok(ClientMessage::Next),
            Signal::OFFER => Signal::OFFER,
            Signal::ANSWER => Signal::ANSWER,
            Signal::ICE_CANDIDATE => Signal::ICE_CANDIDATE,
            Signal::CHAT => Signal::CHAT,
            Signal::MEDIA => Signal::MEDIA,
            _ => return Err(ProtocolError::UnsupportedType(kind.clone())),
        };

        let payload = envelope.payload.ok_or(ProtocolError::MissingPayload(kind))?;
        let invalid = |e: serde_json::Error| ProtocolError::InvalidPayload {
            kind,
            reason: e.to_string(),
        };

        let signal = match kind {
            Signal::OFFER => Signal::Offer(payload),
            Signal::ANSWER => Signal::Answer(payload),
            Signal::ICE_CANDIDATE => Signal::IceCandidate(payload),
            Signal::CHAT => Signal::Chat(serde_json::from_value(payload).map_err(invalid)?),
            _ => Signal::Media(serde_json::from_value(payload).map_err(invalid)?),
        };
        Ok(ClientMessage::Signal(signal))
    }
}

impl FromStr for ClientMessage {
    type Err = ProtocolError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::from_slice(text.as_bytes())
    }
}

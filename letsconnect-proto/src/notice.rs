use serde::{Deserialize, Serialize};

use crate::signal::Signal;

/// Messages the relay originates itself, as opposed to relayed [`Signal`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// First message on every channel: the participant's own handle
    Connected {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    Status {
        state: String,
        message: String,
    },
    /// A partner was found; the initiator sends the offer
    Matched {
        #[serde(rename = "isInitiator")]
        is_initiator: bool,
    },
    PartnerDisconnected {
        message: String,
    },
    Error {
        message: String,
    },
}

impl Notice {
    pub fn waiting() -> Self {
        Notice::Status {
            state: "waiting".to_string(),
            message: "Waiting for a stranger...".to_string(),
        }
    }

    pub fn partner_disconnected() -> Self {
        Notice::PartnerDisconnected {
            message: "Stranger disconnected.".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Notice::Error {
            message: message.into(),
        }
    }
}

/// Anything written to a participant's control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Notice(Notice),
    Signal(Signal),
}

impl From<Notice> for ServerMessage {
    fn from(notice: Notice) -> Self {
        ServerMessage::Notice(notice)
    }
}

impl From<Signal> for ServerMessage {
    fn from(signal: Signal) -> Self {
        ServerMessage::Signal(signal)
    }
}

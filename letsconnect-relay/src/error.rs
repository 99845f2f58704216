use thiserror::Error;

use crate::registry::ParticipantId;

/// Failures scoped to a single participant. None of them tear down the relay.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    #[error("not in an active session")]
    NotInSession,
    #[error("participant is already matched")]
    AlreadyMatched,
    #[error("outbound channel is closed")]
    ChannelClosed,
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),
    #[error("participant {0} cannot be paired with itself")]
    SelfPairing(ParticipantId),
}

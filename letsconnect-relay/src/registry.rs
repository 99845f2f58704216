use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::error::RelayError;
use crate::outbox::Outbox;
use crate::session::SessionId;

/// Handle for one control-channel connection. Fresh per connection, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Connected but not asking for a partner
    Idle,
    /// Sitting in the matchmaking queue
    Waiting,
    /// Bound to a live session
    Matched,
    /// Channel gone; only seen on the record handed back by `unregister`
    Closed,
}

#[derive(Debug)]
pub struct Participant {
    pub id: ParticipantId,
    pub state: LifecycleState,
    pub session: Option<SessionId>,
    pub outbox: Outbox,
    pub connected_at: Instant,
}

/// Every participant with an open control channel.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    participants: HashMap<ParticipantId, Participant>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, outbox: Outbox) -> ParticipantId {
        let mut id = ParticipantId::new();
        while self.participants.contains_key(&id) {
            id = ParticipantId::new();
        }
        self.participants.insert(
            id,
            Participant {
                id,
                state: LifecycleState::Idle,
                session: None,
                outbox,
                connected_at: Instant::now(),
            },
        );
        log::debug!("Registered participant {}", id);
        id
    }

    /// Remove a participant, returning its final record in the `Closed` state.
    pub fn unregister(&mut self, id: ParticipantId) -> Option<Participant> {
        let mut participant = self.participants.remove(&id)?;
        participant.state = LifecycleState::Closed;
        log::debug!(
            "Unregistered participant {} after {:?}",
            id,
            participant.connected_at.elapsed()
        );
        Some(participant)
    }

    pub fn get(&self, id: ParticipantId) -> Result<&Participant, RelayError> {
        self.participants
            .get(&id)
            .ok_or(RelayError::UnknownParticipant(id))
    }

    pub fn get_mut(&mut self, id: ParticipantId) -> Result<&mut Participant, RelayError> {
        self.participants
            .get_mut(&id)
            .ok_or(RelayError::UnknownParticipant(id))
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }
}

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::error::RelayError;
use crate::registry::{ConnectionRegistry, LifecycleState, ParticipantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// One side asked for a new partner
    Next,
    /// One side's control channel closed
    Disconnect,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Next => "next",
            TerminationReason::Disconnect => "disconnect",
        }
    }
}

/// Session pairs two distinct participants.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// `members[0]` is the initiator and sends the offer
    members: [ParticipantId; 2],
    pub created_at: Instant,
    active: bool,
}

impl Session {
    fn new(initiator: ParticipantId, responder: ParticipantId) -> Self {
        Self {
            id: SessionId::new(),
            members: [initiator, responder],
            created_at: Instant::now(),
            active: true,
        }
    }

    pub fn members(&self) -> [ParticipantId; 2] {
        self.members
    }

    pub fn initiator(&self) -> ParticipantId {
        self.members[0]
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.members.contains(&participant)
    }

    /// The partner of `participant`. Fails once the session is terminated.
    pub fn other(&self, participant: ParticipantId) -> Result<ParticipantId, RelayError> {
        if !self.active {
            return Err(RelayError::NotInSession);
        }
        match self.members {
            [a, b] if a == participant => Ok(b),
            [a, b] if b == participant => Ok(a),
            _ => Err(RelayError::NotInSession),
        }
    }
}

/// Live sessions, keyed by id. Terminated sessions are removed.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind two unmatched participants into a new session.
    pub fn create(
        &mut self,
        registry: &mut ConnectionRegistry,
        initiator: ParticipantId,
        responder: ParticipantId,
    ) -> Result<SessionId, RelayError> {
        if initiator == responder {
            return Err(RelayError::SelfPairing(initiator));
        }
        for id in [initiator, responder] {
            let participant = registry.get(id)?;
            if participant.session.is_some() || participant.state == LifecycleState::Matched {
                return Err(RelayError::AlreadyMatched);
            }
        }

        let session = Session::new(initiator, responder);
        let session_id = session.id;
        for id in session.members {
            let participant = registry.get_mut(id)?;
            participant.state = LifecycleState::Matched;
            participant.session = Some(session_id);
        }
        self.sessions.insert(session_id, session);

        log::info!(
            "Session {} created initiator={} responder={}",
            session_id,
            initiator,
            responder
        );
        Ok(session_id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// The live session `participant` is bound to, looked up fresh.
    pub fn session_of(
        &self,
        registry: &ConnectionRegistry,
        participant: ParticipantId,
    ) -> Result<&Session, RelayError> {
        let session_id = registry
            .get(participant)?
            .session
            .ok_or(RelayError::NotInSession)?;
        let session = self.get(session_id).ok_or(RelayError::NotInSession)?;
        if !session.contains(participant) {
            return Err(RelayError::NotInSession);
        }
        Ok(session)
    }

    /// End a session and return both members to `Idle`.
    ///
    /// Returns the terminated session on the first call and `None` afterwards.
    pub fn terminate(
        &mut self,
        registry: &mut ConnectionRegistry,
        id: SessionId,
        reason: TerminationReason,
    ) -> Option<Session> {
        let mut session = self.sessions.remove(&id)?;
        session.active = false;

        for member in session.members {
            if let Ok(participant) = registry.get_mut(member) {
                if participant.session == Some(id) {
                    participant.session = None;
                    participant.state = LifecycleState::Idle;
                }
            }
        }

        log::info!(
            "Session {} terminated reason={} after {:?}",
            id,
            reason.as_str(),
            session.created_at.elapsed()
        );
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }
}

use std::collections::VecDeque;

use crate::error::RelayError;
use crate::registry::{ConnectionRegistry, LifecycleState, ParticipantId};
use crate::session::{SessionId, SessionTable};

/// Outcome of [`Matchmaker::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Queued; nobody eligible was waiting
    Waiting,
    /// Was already queued, nothing changed
    AlreadyWaiting,
    Matched(SessionId),
}

/// FIFO pool of participants waiting for a partner.
#[derive(Debug, Default)]
pub struct Matchmaker {
    queue: VecDeque<ParticipantId>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `id` up for pairing.
    ///
    /// Pairs with the longest-waiting eligible participant, who becomes the
    /// initiator of the new session. `avoid` is skipped as a candidate but
    /// keeps its place in the queue.
    pub fn enqueue(
        &mut self,
        registry: &mut ConnectionRegistry,
        sessions: &mut SessionTable,
        id: ParticipantId,
        avoid: Option<ParticipantId>,
    ) -> Result<Enqueued, RelayError> {
        match registry.get(id)?.state {
            LifecycleState::Matched => return Err(RelayError::AlreadyMatched),
            LifecycleState::Waiting => return Ok(Enqueued::AlreadyWaiting),
            LifecycleState::Idle | LifecycleState::Closed => {}
        }

        if let Some(partner) = self.take_partner(registry, id, avoid) {
            let session = sessions.create(registry, partner, id)?;
            return Ok(Enqueued::Matched(session));
        }

        registry.get_mut(id)?.state = LifecycleState::Waiting;
        self.queue.push_back(id);
        log::debug!("Participant {} waiting ({} queued)", id, self.queue.len());
        Ok(Enqueued::Waiting)
    }

    /// Take `id` out of the pool. Returns whether it was queued.
    pub fn withdraw(&mut self, registry: &mut ConnectionRegistry, id: ParticipantId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|queued| *queued != id);
        if let Ok(participant) = registry.get_mut(id) {
            if participant.state == LifecycleState::Waiting {
                participant.state = LifecycleState::Idle;
            }
        }
        self.queue.len() != before
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queued participants, oldest first.
    pub fn waiting(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.queue.iter().copied()
    }

    fn take_partner(
        &mut self,
        registry: &ConnectionRegistry,
        id: ParticipantId,
        avoid: Option<ParticipantId>,
    ) -> Option<ParticipantId> {
        let index = self.queue.iter().position(|candidate| {
            *candidate != id
                && Some(*candidate) != avoid
                && matches!(registry.get(*candidate), Ok(p) if p.state == LifecycleState::Waiting)
        })?;
        self.queue.remove(index)
    }
}

//! The single owner of all shared relay state.
//!
//! [`Lobby`] holds the registry, the waiting queue and the session table and
//! is only ever touched through the one mutex inside [`Coordinator`], so
//! pairing and termination never interleave. Lobby transitions return the
//! notifications they cause; the coordinator pushes them onto the recipients'
//! outboxes before releasing the lock, which keeps each participant's
//! lifecycle notices in lock order.

use letsconnect_proto::{Notice, Signal};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::RelayError;
use crate::matchmaker::{Enqueued, Matchmaker};
use crate::outbox::Outbox;
use crate::registry::{ConnectionRegistry, LifecycleState, ParticipantId};
use crate::relay::{self, Route};
use crate::session::{SessionId, SessionTable, TerminationReason};

/// A lifecycle notice for one participant, along with the session binding
/// it leaves that participant with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: ParticipantId,
    pub session: Option<SessionId>,
    pub notice: Notice,
}

impl Notification {
    fn new(to: ParticipantId, session: Option<SessionId>, notice: Notice) -> Self {
        Self {
            to,
            session,
            notice,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LobbyStats {
    pub connected: usize,
    pub waiting: usize,
    pub sessions: usize,
}

#[derive(Debug, Default)]
pub struct Lobby {
    registry: ConnectionRegistry,
    matchmaker: Matchmaker,
    sessions: SessionTable,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn matchmaker(&self) -> &Matchmaker {
        &self.matchmaker
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Register a new channel and put it straight up for matching.
    pub fn connect(&mut self, outbox: Outbox) -> (ParticipantId, Vec<Notification>) {
        let id = self.registry.register(outbox);
        let mut notes = vec![Notification::new(
            id,
            None,
            Notice::Connected {
                client_id: id.to_string(),
            },
        )];
        self.request_match(id, None, &mut notes);
        log::info!("Participant {} connected", id);
        (id, notes)
    }

    /// Drop the current partner, if any, and queue up again.
    pub fn next(&mut self, id: ParticipantId) -> Result<Vec<Notification>, RelayError> {
        let participant = self.registry.get(id)?;
        let mut notes = Vec::new();
        match (participant.state, participant.session) {
            (LifecycleState::Matched, Some(session)) => {
                let partner = self.end_session(session, id, TerminationReason::Next, &mut notes);
                self.request_match(id, partner, &mut notes);
            }
            (LifecycleState::Waiting, _) => {
                log::debug!("Participant {} asked for next while already waiting", id);
            }
            _ => self.request_match(id, None, &mut notes),
        }
        Ok(notes)
    }

    /// Tear down everything `id` holds and forget it.
    pub fn disconnect(&mut self, id: ParticipantId) -> Vec<Notification> {
        let mut notes = Vec::new();
        let Ok(participant) = self.registry.get(id) else {
            return notes;
        };
        match (participant.state, participant.session) {
            (LifecycleState::Waiting, _) => {
                self.matchmaker.withdraw(&mut self.registry, id);
            }
            (_, Some(session)) => {
                self.end_session(session, id, TerminationReason::Disconnect, &mut notes);
            }
            _ => {}
        }
        if let Some(closed) = self.registry.unregister(id) {
            log::info!("Participant {} {:?}", closed.id, closed.state);
        }
        notes
    }

    /// Terminate `session` on behalf of `leaver`.
    ///
    /// The remaining member gets one `partner_disconnected` and is re-queued.
    /// Terminating an already terminated session produces nothing.
    pub fn terminate(
        &mut self,
        session: SessionId,
        leaver: ParticipantId,
        reason: TerminationReason,
    ) -> Vec<Notification> {
        let mut notes = Vec::new();
        self.end_session(session, leaver, reason, &mut notes);
        notes
    }

    pub fn route(&self, sender: ParticipantId) -> Result<Route, RelayError> {
        relay::resolve(&self.registry, &self.sessions, sender)
    }

    pub fn stats(&self) -> LobbyStats {
        LobbyStats {
            connected: self.registry.len(),
            waiting: self.matchmaker.len(),
            sessions: self.sessions.len(),
        }
    }

    /// Push notifications onto their recipients' outboxes without blocking.
    pub fn deliver(&self, notes: Vec<Notification>) {
        for note in notes {
            let Ok(participant) = self.registry.get(note.to) else {
                continue;
            };
            if let Err(e) = participant.outbox.transition(note.session, note.notice) {
                log::debug!("Notification to {} dropped: {}", note.to, e);
            }
        }
    }

    fn end_session(
        &mut self,
        session: SessionId,
        leaver: ParticipantId,
        reason: TerminationReason,
        notes: &mut Vec<Notification>,
    ) -> Option<ParticipantId> {
        let ended = self
            .sessions
            .terminate(&mut self.registry, session, reason)?;
        let partner = ended.members().into_iter().find(|member| *member != leaver)?;
        if self.registry.contains(partner) {
            notes.push(Notification::new(
                partner,
                None,
                Notice::partner_disconnected(),
            ));
            self.request_match(partner, Some(leaver), notes);
        }
        Some(partner)
    }

    fn request_match(
        &mut self,
        id: ParticipantId,
        avoid: Option<ParticipantId>,
        notes: &mut Vec<Notification>,
    ) {
        let outcome = self
            .matchmaker
            .enqueue(&mut self.registry, &mut self.sessions, id, avoid);
        match outcome {
            Ok(Enqueued::Waiting) => notes.push(Notification::new(id, None, Notice::waiting())),
            Ok(Enqueued::AlreadyWaiting) => {}
            Ok(Enqueued::Matched(session_id)) => {
                let Some(session) = self.sessions.get(session_id) else {
                    return;
                };
                let initiator = session.initiator();
                for member in session.members() {
                    notes.push(Notification::new(
                        member,
                        Some(session_id),
                        Notice::Matched {
                            is_initiator: member == initiator,
                        },
                    ));
                }
            }
            Err(RelayError::AlreadyMatched) => {
                log::debug!("Participant {} is already matched; not queueing", id);
            }
            Err(e) => log::warn!("Could not queue participant {}: {}", id, e),
        }
    }
}

/// Shared handle to the lobby, one per server.
#[derive(Debug, Default)]
pub struct Coordinator {
    lobby: Mutex<Lobby>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, outbox: Outbox) -> ParticipantId {
        let mut lobby = self.lobby.lock().await;
        let (id, notes) = lobby.connect(outbox);
        lobby.deliver(notes);
        id
    }

    pub async fn next(&self, id: ParticipantId) -> Result<(), RelayError> {
        let mut lobby = self.lobby.lock().await;
        let notes = lobby.next(id)?;
        lobby.deliver(notes);
        Ok(())
    }

    pub async fn disconnect(&self, id: ParticipantId) {
        let mut lobby = self.lobby.lock().await;
        let notes = lobby.disconnect(id);
        lobby.deliver(notes);
    }

    /// Forward `signal` to the sender's partner.
    ///
    /// Membership is checked under the lock; delivery happens after it is
    /// released.
    pub async fn relay(&self, sender: ParticipantId, signal: Signal) -> Result<(), RelayError> {
        let route = self.lobby.lock().await.route(sender)?;
        route.deliver(signal);
        Ok(())
    }

    pub async fn stats(&self) -> LobbyStats {
        self.lobby.lock().await.stats()
    }

    pub async fn state_of(&self, id: ParticipantId) -> Option<LifecycleState> {
        let lobby = self.lobby.lock().await;
        lobby.registry().get(id).ok().map(|p| p.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{self, Inbox};
    use letsconnect_proto::{ChatPayload, ServerMessage};
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    fn notices_for(notes: &[Notification], id: ParticipantId) -> Vec<Notice> {
        notes
            .iter()
            .filter(|n| n.to == id)
            .map(|n| n.notice.clone())
            .collect()
    }

    fn state(lobby: &Lobby, id: ParticipantId) -> LifecycleState {
        lobby.registry().get(id).unwrap().state
    }

    fn assert_invariants(lobby: &Lobby) {
        let mut membership: HashMap<ParticipantId, SessionId> = HashMap::new();
        for session in lobby.sessions().iter() {
            let [a, b] = session.members();
            assert_ne!(a, b, "session {} pairs a participant with itself", session.id);
            assert!(session.is_active());
            for member in [a, b] {
                if let Some(previous) = membership.insert(member, session.id) {
                    panic!("{} is in sessions {} and {}", member, previous, session.id);
                }
                let participant = lobby.registry().get(member).unwrap();
                assert_eq!(participant.session, Some(session.id));
                assert_eq!(participant.state, LifecycleState::Matched);
            }
        }

        let mut queued = HashSet::new();
        for id in lobby.matchmaker().waiting() {
            assert!(queued.insert(id), "{} queued twice", id);
            assert!(!membership.contains_key(&id), "{} queued while matched", id);
        }

        for participant in lobby.registry().iter() {
            match participant.state {
                LifecycleState::Waiting => assert!(queued.contains(&participant.id)),
                LifecycleState::Matched => {
                    assert!(membership.contains_key(&participant.id))
                }
                LifecycleState::Idle => {
                    assert!(participant.session.is_none());
                    assert!(!queued.contains(&participant.id));
                }
                LifecycleState::Closed => panic!("closed participant still registered"),
            }
        }
    }

    #[test]
    fn scenario_offer_answer_then_next() {
        let mut lobby = Lobby::new();
        let (x, notes) = lobby.connect(outbox::channel(8).0);
        assert_eq!(
            notices_for(&notes, x),
            vec![
                Notice::Connected {
                    client_id: x.to_string()
                },
                Notice::waiting()
            ]
        );
        assert_eq!(state(&lobby, x), LifecycleState::Waiting);

        let (y, notes) = lobby.connect(outbox::channel(8).0);
        assert_eq!(
            notices_for(&notes, x),
            vec![Notice::Matched { is_initiator: true }]
        );
        assert_eq!(
            notices_for(&notes, y)[1..],
            [Notice::Matched {
                is_initiator: false
            }]
        );
        assert_eq!(lobby.route(x).unwrap().recipient, y);
        assert_eq!(lobby.route(y).unwrap().recipient, x);

        let notes = lobby.next(x).unwrap();
        assert_eq!(notices_for(&notes, x), vec![Notice::waiting()]);
        assert_eq!(
            notices_for(&notes, y),
            vec![Notice::partner_disconnected(), Notice::waiting()]
        );
        assert_eq!(state(&lobby, x), LifecycleState::Waiting);
        assert_eq!(state(&lobby, y), LifecycleState::Waiting);
        assert_eq!(lobby.route(y).unwrap_err(), RelayError::NotInSession);
        assert_invariants(&lobby);
    }

    #[test]
    fn next_while_waiting_changes_nothing() {
        let mut lobby = Lobby::new();
        let (x, _) = lobby.connect(outbox::channel(8).0);
        assert_eq!(lobby.next(x).unwrap(), vec![]);
        assert_eq!(lobby.stats().waiting, 1);
    }

    #[test]
    fn next_pairs_with_a_third_participant_not_the_old_partner() {
        let mut lobby = Lobby::new();
        let (x, _) = lobby.connect(outbox::channel(8).0);
        let (y, _) = lobby.connect(outbox::channel(8).0);
        // z waits on its own once x and y are busy
        let (z, _) = lobby.connect(outbox::channel(8).0);

        let notes = lobby.next(x).unwrap();
        // y is re-queued first and picks up z, x is left waiting
        assert_eq!(
            notices_for(&notes, y),
            vec![
                Notice::partner_disconnected(),
                Notice::Matched {
                    is_initiator: false
                }
            ]
        );
        assert_eq!(
            notices_for(&notes, z),
            vec![Notice::Matched { is_initiator: true }]
        );
        assert_eq!(notices_for(&notes, x), vec![Notice::waiting()]);
        assert_invariants(&lobby);
    }

    #[test]
    fn chat_while_waiting_has_no_route() {
        let mut lobby = Lobby::new();
        let (x, _) = lobby.connect(outbox::channel(8).0);
        assert_eq!(lobby.route(x).unwrap_err(), RelayError::NotInSession);
    }

    #[test]
    fn abrupt_disconnect_requeues_the_partner() {
        let mut lobby = Lobby::new();
        let (x, _) = lobby.connect(outbox::channel(8).0);
        let (y, _) = lobby.connect(outbox::channel(8).0);

        let notes = lobby.disconnect(y);
        assert_eq!(
            notices_for(&notes, x),
            vec![Notice::partner_disconnected(), Notice::waiting()]
        );
        assert!(notices_for(&notes, y).is_empty());
        assert_eq!(state(&lobby, x), LifecycleState::Waiting);
        assert!(lobby.registry().get(y).is_err());
        assert_eq!(lobby.route(x).unwrap_err(), RelayError::NotInSession);

        let (w, notes) = lobby.connect(outbox::channel(8).0);
        assert_eq!(
            notices_for(&notes, x),
            vec![Notice::Matched { is_initiator: true }]
        );
        assert_eq!(lobby.route(x).unwrap().recipient, w);
        assert_invariants(&lobby);
    }

    #[test]
    fn terminating_twice_notifies_once() {
        let mut lobby = Lobby::new();
        let (x, _) = lobby.connect(outbox::channel(8).0);
        let (y, _) = lobby.connect(outbox::channel(8).0);
        let session = lobby.registry().get(x).unwrap().session.unwrap();

        let first = lobby.terminate(session, x, TerminationReason::Next);
        let second = lobby.terminate(session, x, TerminationReason::Next);
        assert_eq!(
            notices_for(&first, y),
            vec![Notice::partner_disconnected(), Notice::waiting()]
        );
        assert!(second.is_empty());
    }

    #[test]
    fn disconnect_while_waiting_withdraws() {
        let mut lobby = Lobby::new();
        let (x, _) = lobby.connect(outbox::channel(8).0);
        assert!(lobby.disconnect(x).is_empty());
        assert_eq!(
            lobby.stats(),
            LobbyStats {
                connected: 0,
                waiting: 0,
                sessions: 0
            }
        );
        // A disconnect for a handle that is already gone is harmless.
        assert!(lobby.disconnect(x).is_empty());
    }

    #[test]
    fn random_churn_keeps_invariants() {
        // xorshift, fixed seed so failures reproduce
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut rand = move |bound: usize| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % bound as u64) as usize
        };

        let mut lobby = Lobby::new();
        let mut live: Vec<ParticipantId> = Vec::new();
        let mut departed: Vec<ParticipantId> = Vec::new();

        for _ in 0..2_000 {
            match rand(10) {
                0..=3 => {
                    let (id, _) = lobby.connect(outbox::channel(1).0);
                    live.push(id);
                }
                4..=6 if !live.is_empty() => {
                    let id = live.swap_remove(rand(live.len()));
                    let notes = lobby.disconnect(id);
                    assert!(notes.iter().all(|n| n.to != id));
                    assert!(
                        notes
                            .iter()
                            .filter(|n| n.notice == Notice::partner_disconnected())
                            .count()
                            <= 1
                    );
                    departed.push(id);
                }
                _ if !live.is_empty() => {
                    let id = live[rand(live.len())];
                    lobby.next(id).unwrap();
                }
                _ => {}
            }
            assert_invariants(&lobby);
            assert_eq!(lobby.stats().connected, live.len());
        }

        for id in departed {
            assert_eq!(lobby.route(id).unwrap_err(), RelayError::UnknownParticipant(id));
        }
    }

    async fn drain(inbox: &mut Inbox) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(Some(msg)) =
            tokio::time::timeout(std::time::Duration::from_millis(20), inbox.recv()).await
        {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn coordinator_relays_between_partners_only() {
        let coordinator = Coordinator::new();
        let (x_out, mut x_in) = outbox::channel(16);
        let (y_out, mut y_in) = outbox::channel(16);
        let x = coordinator.connect(x_out).await;
        let y = coordinator.connect(y_out).await;
        drain(&mut x_in).await;
        drain(&mut y_in).await;

        let offer = Signal::Offer(json!({"sdp": "v=0"}));
        coordinator.relay(x, offer.clone()).await.unwrap();
        assert_eq!(drain(&mut y_in).await, vec![ServerMessage::Signal(offer)]);

        let answer = Signal::Answer(json!({"sdp": "v=0 answer"}));
        coordinator.relay(y, answer.clone()).await.unwrap();
        assert_eq!(drain(&mut x_in).await, vec![ServerMessage::Signal(answer)]);

        coordinator.next(x).await.unwrap();
        assert_eq!(
            drain(&mut y_in).await,
            vec![
                ServerMessage::Notice(Notice::partner_disconnected()),
                ServerMessage::Notice(Notice::waiting()),
            ]
        );
        assert_eq!(
            coordinator
                .relay(x, Signal::Chat(ChatPayload::new("hello?")))
                .await,
            Err(RelayError::NotInSession)
        );
        assert!(drain(&mut y_in).await.is_empty());
        assert_eq!(coordinator.state_of(y).await, Some(LifecycleState::Waiting));
    }

    #[tokio::test]
    async fn in_flight_signal_from_old_session_is_dropped() {
        let coordinator = Coordinator::new();
        let (x_out, _x_in) = outbox::channel(16);
        let (y_out, mut y_in) = outbox::channel(16);
        let x = coordinator.connect(x_out).await;
        coordinator.connect(y_out).await;
        drain(&mut y_in).await;

        // Route resolved while the session is live, delivered after it ended.
        let route = coordinator.lobby.lock().await.route(x).unwrap();
        coordinator.next(x).await.unwrap();
        route.deliver(Signal::IceCandidate(json!({"candidate": "late"})));

        assert_eq!(
            drain(&mut y_in).await,
            vec![
                ServerMessage::Notice(Notice::partner_disconnected()),
                ServerMessage::Notice(Notice::waiting()),
            ]
        );
    }

    #[tokio::test]
    async fn slow_reader_still_hears_partner_disconnected() {
        let coordinator = Coordinator::new();
        let (x_out, _x_in) = outbox::channel(4);
        let (y_out, mut y_in) = outbox::channel(4);
        let x = coordinator.connect(x_out).await;
        let y = coordinator.connect(y_out).await;

        for i in 0..10 {
            let chat = Signal::Chat(ChatPayload::new(format!("burst {i}")));
            coordinator.relay(x, chat).await.unwrap();
        }
        coordinator.next(x).await.unwrap();

        let received = drain(&mut y_in).await;
        let chats = received
            .iter()
            .filter(|m| matches!(m, ServerMessage::Signal(_)))
            .count();
        assert_eq!(chats, 4);
        assert_eq!(
            received[received.len() - 2..],
            [
                ServerMessage::Notice(Notice::partner_disconnected()),
                ServerMessage::Notice(Notice::waiting()),
            ]
        );
        assert_eq!(y_in.bound(), None);
        assert_eq!(coordinator.state_of(y).await, Some(LifecycleState::Waiting));
    }
}

//! Signaling relay: forwards a participant's signal to its current partner.
//!
//! The destination is always derived from the sender's binding as it stands
//! under the lobby lock; nothing the client sends names a recipient.

use letsconnect_proto::Signal;

use crate::error::RelayError;
use crate::outbox::Outbox;
use crate::registry::{ConnectionRegistry, ParticipantId};
use crate::session::{SessionId, SessionTable};

/// Where a signal from one participant goes, resolved under the lobby lock
/// and delivered after it is released.
#[derive(Debug, Clone)]
pub struct Route {
    pub session: SessionId,
    pub recipient: ParticipantId,
    outbox: Outbox,
}

pub fn resolve(
    registry: &ConnectionRegistry,
    sessions: &SessionTable,
    sender: ParticipantId,
) -> Result<Route, RelayError> {
    let session = sessions.session_of(registry, sender)?;
    let recipient = session.other(sender)?;
    let outbox = registry
        .get(recipient)
        .map_err(|_| RelayError::NotInSession)?
        .outbox
        .clone();
    Ok(Route {
        session: session.id,
        recipient,
        outbox,
    })
}

impl Route {
    /// Fire and forget. A recipient that is already tearing down loses the
    /// message; its partner hears about it through the disconnect path.
    pub fn deliver(self, signal: Signal) {
        let kind = signal.kind();
        match self.outbox.forward(self.session, signal) {
            Ok(()) => log::trace!(
                "Relayed {} to {} in session {}",
                kind,
                self.recipient,
                self.session
            ),
            Err(e) => log::debug!(
                "Discarded {} for {} in session {}: {}",
                kind,
                self.recipient,
                self.session,
                e
            ),
        }
    }
}

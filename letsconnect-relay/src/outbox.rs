//! Per-participant outbound queue.
//!
//! Every participant owns one channel drained by its WebSocket writer.
//! Lifecycle notices announce which session the participant is bound to, and
//! relayed signals are tagged with the session they were routed through. The
//! reading side drops any signal whose session is not the one most recently
//! announced, so a message that raced a termination never reaches the
//! participant after it was told its partner left.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use letsconnect_proto::{Notice, ServerMessage, Signal};
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::session::SessionId;

#[derive(Debug)]
enum Outbound {
    /// Changes the session binding seen by the reader
    Lifecycle {
        session: Option<SessionId>,
        notice: Notice,
    },
    Notice(Notice),
    Signal {
        session: SessionId,
        signal: Signal,
    },
}

/// Sending half, stored in the registry and cloned by the relay.
///
/// Lifecycle notices are never dropped. Plain notices and signals count
/// against `capacity` and are discarded once the reader falls that far behind.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outbound>,
    backlog: Arc<AtomicUsize>,
    capacity: usize,
}

/// Receiving half, owned by the participant's writer task.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Outbound>,
    backlog: Arc<AtomicUsize>,
    bound: Option<SessionId>,
}

pub fn channel(capacity: usize) -> (Outbox, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backlog = Arc::new(AtomicUsize::new(0));
    (
        Outbox {
            tx,
            backlog: backlog.clone(),
            capacity: capacity.max(1),
        },
        Inbox {
            rx,
            backlog,
            bound: None,
        },
    )
}

impl Outbox {
    /// Push a lifecycle notice and rebind the reader to `session`.
    pub fn transition(
        &self,
        session: Option<SessionId>,
        notice: Notice,
    ) -> Result<(), RelayError> {
        self.tx
            .send(Outbound::Lifecycle { session, notice })
            .map_err(|_| RelayError::ChannelClosed)
    }

    /// Push a notice that leaves the session binding alone.
    pub fn notify(&self, notice: Notice) -> Result<(), RelayError> {
        self.push(Outbound::Notice(notice))
    }

    pub fn forward(&self, session: SessionId, signal: Signal) -> Result<(), RelayError> {
        self.push(Outbound::Signal { session, signal })
    }

    fn push(&self, msg: Outbound) -> Result<(), RelayError> {
        if self.tx.is_closed() {
            return Err(RelayError::ChannelClosed);
        }
        if self.backlog.fetch_add(1, Ordering::AcqRel) >= self.capacity {
            // Backpressure: a reader this far behind loses the message.
            self.backlog.fetch_sub(1, Ordering::AcqRel);
            log::warn!("Dropping outbound message: channel full");
            return Ok(());
        }
        self.tx.send(msg).map_err(|_| {
            self.backlog.fetch_sub(1, Ordering::AcqRel);
            RelayError::ChannelClosed
        })
    }
}

impl Inbox {
    /// Next message to write to the socket, or `None` once every sender is gone.
    ///
    /// Cancel safe: the only await point is the channel receive.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        loop {
            match self.rx.recv().await? {
                Outbound::Lifecycle { session, notice } => {
                    self.bound = session;
                    return Some(notice.into());
                }
                Outbound::Notice(notice) => {
                    self.backlog.fetch_sub(1, Ordering::AcqRel);
                    return Some(notice.into());
                }
                Outbound::Signal { session, signal } => {
                    self.backlog.fetch_sub(1, Ordering::AcqRel);
                    if self.bound == Some(session) {
                        return Some(signal.into());
                    }
                    log::debug!(
                        "Dropping stale {} from session {} (bound to {:?})",
                        signal.kind(),
                        session,
                        self.bound
                    );
                }
            }
        }
    }

    /// Session this reader currently accepts signals for.
    pub fn bound(&self) -> Option<SessionId> {
        self.bound
    }
}

//! Let's Connect relay server library
//!
//! Pairs anonymous participants one-to-one and relays the WebRTC handshake,
//! chat text and shared files between the two members of each pairing. The
//! binary and the integration tests both build on this crate.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod matchmaker;
pub mod outbox;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;

pub use config::RelayConfig;
pub use coordinator::{Coordinator, Lobby, LobbyStats, Notification};
pub use error::RelayError;
pub use handler::control_channel;
pub use registry::{LifecycleState, ParticipantId};
pub use server::routes;
pub use session::{SessionId, TerminationReason};

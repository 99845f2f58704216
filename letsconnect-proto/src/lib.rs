//! Wire protocol spoken between browsers and the Let's Connect relay.
//!
//! Every WebSocket text frame carries one JSON object with a `type` field.
//! Inbound frames parse into [`ClientMessage`]; everything the relay pushes
//! back is a [`ServerMessage`].

pub mod notice;
pub mod signal;

pub use notice::{Notice, ServerMessage};
pub use signal::{ChatPayload, ClientMessage, MediaPayload, ProtocolError, Signal};

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use letsconnect_proto::{ClientMessage, Notice, ServerMessage};
use tokio::time::interval;
use warp::ws::{Message, WebSocket};

use crate::config::RelayConfig;
use crate::coordinator::Coordinator;
use crate::error::RelayError;
use crate::outbox::{self, Inbox, Outbox};
use crate::registry::ParticipantId;

/// Drive one participant's control channel until the socket closes.
pub async fn control_channel(
    ws: WebSocket,
    coordinator: Arc<Coordinator>,
    config: Arc<RelayConfig>,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (out_tx, inbox) = outbox::channel(config.channel_buffer);

    let writer = tokio::task::spawn(write_loop(ws_tx, inbox, config.heartbeat_interval));

    let id = coordinator.connect(out_tx.clone()).await;

    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(m) => m,
            Err(e) => {
                log::debug!("Participant {} socket error: {}", id, e);
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        if !(msg.is_text() || msg.is_binary()) {
            continue;
        }

        let parsed = match ClientMessage::from_slice(msg.as_bytes()) {
            Ok(m) => m,
            Err(e) => {
                log::debug!("Participant {} sent a malformed message: {}", id, e);
                reply_error(&out_tx, id, e.to_string());
                continue;
            }
        };

        match parsed {
            ClientMessage::Next => {
                if let Err(e) = coordinator.next(id).await {
                    log::warn!("next failed for {}: {}", id, e);
                }
            }
            ClientMessage::Signal(signal) => {
                let kind = signal.kind();
                match coordinator.relay(id, signal).await {
                    Ok(()) => {}
                    Err(RelayError::NotInSession) => {
                        let message = format!("Cannot send {kind}: not in an active session");
                        reply_error(&out_tx, id, message);
                    }
                    Err(e) => reply_error(&out_tx, id, e.to_string()),
                }
            }
        }
    }

    coordinator.disconnect(id).await;
    writer.abort();
    log::info!("Participant {} disconnected", id);
}

fn reply_error(out_tx: &Outbox, id: ParticipantId, message: String) {
    if let Err(e) = out_tx.notify(Notice::error(message)) {
        log::debug!("Could not report error to {}: {}", id, e);
    }
}

async fn write_loop<S>(mut ws_tx: S, mut inbox: Inbox, heartbeat: Duration)
where
    S: futures::Sink<Message> + Unpin,
{
    let mut ticker = interval(heartbeat);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        let frame = tokio::select! {
            msg = inbox.recv() => match msg {
                Some(msg) => match encode(&msg) {
                    Some(frame) => frame,
                    None => continue,
                },
                None => break,
            },
            _ = ticker.tick() => Message::ping(Vec::new()),
        };
        if ws_tx.send(frame).await.is_err() {
            break;
        }
    }
}

fn encode(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(text) => Some(Message::text(text)),
        Err(e) => {
            log::error!("Failed to encode outbound message: {}", e);
            None
        }
    }
}

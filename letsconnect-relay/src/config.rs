use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Outbound channel buffer size - prevents unbounded memory growth
pub const CHANNEL_BUFFER_SIZE: usize = 1024;

/// WebSocket ping interval in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Largest inbound message; shared files travel as data URLs
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    /// Directory holding the browser client (`index.html` and assets)
    pub static_dir: PathBuf,
    pub channel_buffer: usize,
    pub heartbeat_interval: Duration,
    pub max_message_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            static_dir: PathBuf::from("static"),
            channel_buffer: CHANNEL_BUFFER_SIZE,
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            max_message_bytes: MAX_MESSAGE_BYTES,
        }
    }
}

impl RelayConfig {
    /// Read `LETSCONNECT_*` variables from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(listen) = get("LETSCONNECT_LISTEN") {
            config.listen = listen
                .trim()
                .parse()
                .with_context(|| {
                    format!("invalid LETSCONNECT_LISTEN {listen:?} (expected host:port)")
                })?;
        }
        if let Some(dir) = get("LETSCONNECT_STATIC_DIR") {
            config.static_dir = PathBuf::from(dir);
        }
        if let Some(buffer) = get("LETSCONNECT_CHANNEL_BUFFER") {
            config.channel_buffer = parse_positive("LETSCONNECT_CHANNEL_BUFFER", &buffer)?;
        }
        if let Some(secs) = get("LETSCONNECT_HEARTBEAT_SECS") {
            config.heartbeat_interval =
                Duration::from_secs(parse_positive("LETSCONNECT_HEARTBEAT_SECS", &secs)? as u64);
        }
        if let Some(bytes) = get("LETSCONNECT_MAX_MESSAGE_BYTES") {
            config.max_message_bytes = parse_positive("LETSCONNECT_MAX_MESSAGE_BYTES", &bytes)?;
        }
        Ok(config)
    }
}

fn parse_positive(key: &str, value: &str) -> anyhow::Result<usize> {
    let n: usize = value
        .trim()
        .parse()
        .with_context(|| format!("invalid {key} {value:?}"))?;
    anyhow::ensure!(n > 0, "{key} must be greater than zero");
    Ok(n)
}

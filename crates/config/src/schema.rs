//! Config schema types (server, logging).

use serde::{Deserialize, Serialize};

/// Default upper bound on a single wire message.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

pub const DEFAULT_SEND_QUEUE_LEN: usize = 1024;

pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Listener settings for the TCP transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: String,

    pub port: u16,

    /// Frames longer than this are rejected and the connection is closed.
    pub max_frame_len: usize,

    /// Outbound frames queued per connection. A connection whose queue is
    /// full when another frame arrives is closed.
    pub send_queue_len: usize,

    /// A single frame write that takes longer than this closes the
    /// connection.
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 18790,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            send_queue_len: DEFAULT_SEND_QUEUE_LEN,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

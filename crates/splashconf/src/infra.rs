//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths used by a Splash process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the ZMQ IPC endpoints of every link.
    /// Default: /tmp
    #[serde(default = "PathsConfig::default_socket_dir")]
    pub socket_dir: PathBuf,
}

impl PathsConfig {
    pub(crate) fn default_socket_dir() -> PathBuf {
        PathBuf::from("/tmp")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            socket_dir: Self::default_socket_dir(),
        }
    }
}

/// Network bind addresses for the remote-client servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Host the socket and websocket servers listen on.
    /// Default: 127.0.0.1
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// Raw TCP tree-sync server port.
    /// Default: 9100
    #[serde(default = "BindConfig::default_socket_port")]
    pub socket_port: u16,

    /// WebSocket tree-sync server port.
    /// Default: 9101
    #[serde(default = "BindConfig::default_websocket_port")]
    pub websocket_port: u16,
}

impl BindConfig {
    pub(crate) fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    pub(crate) fn default_socket_port() -> u16 {
        9100
    }

    pub(crate) fn default_websocket_port() -> u16 {
        9101
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            socket_port: Self::default_socket_port(),
            websocket_port: Self::default_websocket_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// EnvFilter directive used when RUST_LOG is unset.
    /// Default: "info"
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    pub(crate) fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Timing knobs for tree replication and buffer transfers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Main loop period: process queued seeds, run tasks, propagate updates.
    /// Default: 16ms
    #[serde(default = "SyncConfig::default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// How long a producer waits for in-flight buffers before reusing them.
    /// Default: 100ms
    #[serde(default = "SyncConfig::default_buffer_wait_ms")]
    pub buffer_wait_ms: u64,

    /// TCP connect timeout for socket clients.
    /// Default: 2000ms
    #[serde(default = "SyncConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Receive timeout for protocol exchanges.
    /// Default: 5000ms
    #[serde(default = "SyncConfig::default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Fire leaf callbacks even when a replayed value is unchanged.
    /// Default: false
    #[serde(default)]
    pub notify_on_unchanged: bool,
}

impl SyncConfig {
    pub(crate) fn default_update_interval_ms() -> u64 {
        16
    }

    pub(crate) fn default_buffer_wait_ms() -> u64 {
        100
    }

    pub(crate) fn default_connect_timeout_ms() -> u64 {
        2000
    }

    pub(crate) fn default_receive_timeout_ms() -> u64 {
        5000
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: Self::default_update_interval_ms(),
            buffer_wait_ms: Self::default_buffer_wait_ms(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            receive_timeout_ms: Self::default_receive_timeout_ms(),
            notify_on_unchanged: false,
        }
    }
}

/// Complete infrastructure configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

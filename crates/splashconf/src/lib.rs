//! Minimal configuration loading for Splash processes.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): socket directory, bind ports, log
//!   level and replication timings. Fixed for the lifetime of the process.
//!
//! - **Bootstrap** (`BootstrapConfig`): the root name and the initial peers.
//!   After startup the running tree is the source of truth.
//!
//! # Usage
//!
//! ```rust,no_run
//! use splashconf::SplashConfig;
//!
//! let config = SplashConfig::load().expect("Failed to load config");
//! println!("root: {}", config.bootstrap.root_name);
//! println!("socket port: {}", config.infra.bind.socket_port);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/splash/config.toml` (system)
//! 2. `~/.config/splash/config.toml` (user)
//! 3. `./splash.toml` (local override, or the path given on the command line)
//! 4. Environment variables (`SPLASH_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! socket_dir = "/run/splash"
//!
//! [bind]
//! host = "0.0.0.0"
//! socket_port = 9100
//! websocket_port = 9101
//!
//! [telemetry]
//! log_level = "info,splashnet=debug"
//!
//! [sync]
//! update_interval_ms = 16
//! notify_on_unchanged = false
//!
//! [bootstrap]
//! root_name = "world"
//! peers = ["scene1", "scene2"]
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::BootstrapConfig;
pub use infra::{BindConfig, InfraConfig, PathsConfig, SyncConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete Splash configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplashConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Bootstrap - seeds runtime state.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl SplashConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/splash/config.toml`
    /// 3. `~/.config/splash/config.toml`
    /// 4. `./splash.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file taking the place of `./splash.toml`.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = SplashConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# Splash Configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "socket_dir = \"{}\"\n",
            self.infra.paths.socket_dir.display()
        ));

        output.push_str("\n[bind]\n");
        output.push_str(&format!("host = \"{}\"\n", self.infra.bind.host));
        output.push_str(&format!("socket_port = {}\n", self.infra.bind.socket_port));
        output.push_str(&format!(
            "websocket_port = {}\n",
            self.infra.bind.websocket_port
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output.push_str("\n[sync]\n");
        let sync = &self.infra.sync;
        output.push_str(&format!("update_interval_ms = {}\n", sync.update_interval_ms));
        output.push_str(&format!("buffer_wait_ms = {}\n", sync.buffer_wait_ms));
        output.push_str(&format!("connect_timeout_ms = {}\n", sync.connect_timeout_ms));
        output.push_str(&format!("receive_timeout_ms = {}\n", sync.receive_timeout_ms));
        output.push_str(&format!("notify_on_unchanged = {}\n", sync.notify_on_unchanged));

        output.push_str("\n[bootstrap]\n");
        output.push_str(&format!("root_name = \"{}\"\n", self.bootstrap.root_name));
        let peers: Vec<String> = self
            .bootstrap
            .peers
            .iter()
            .map(|p| format!("\"{}\"", p))
            .collect();
        output.push_str(&format!("peers = [{}]\n", peers.join(", ")));

        output
    }
}

//! Config file discovery, loading, and environment variable overlay.

use crate::infra::{BindConfig, PathsConfig, SyncConfig, TelemetryConfig};
use crate::{BootstrapConfig, ConfigError, InfraConfig, SplashConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Config files to load, in order: system, user, then `cli_path` if it
/// exists or `./splash.toml` otherwise. Missing files are skipped.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let user = directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("splash/config.toml"));
    let local = match cli_path {
        Some(path) if path.exists() => path.to_path_buf(),
        _ => PathBuf::from("splash.toml"),
    };

    [Some(PathBuf::from("/etc/splash/config.toml")), user, Some(local)]
        .into_iter()
        .flatten()
        .filter(|path| path.exists())
        .collect()
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<SplashConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from TOML string. Missing keys fall back to compiled defaults.
fn parse_toml(contents: &str, path: &Path) -> Result<SplashConfig, ConfigError> {
    let mut config: SplashConfig =
        toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let socket_dir = config.infra.paths.socket_dir.to_string_lossy().into_owned();
    config.infra.paths.socket_dir = expand_path(&socket_dir);

    Ok(config)
}

/// Prefer the overlay value unless it is still the compiled default.
fn pick<T: PartialEq>(base: T, overlay: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

/// Merge two configs, with `overlay` taking precedence.
pub fn merge_configs(base: SplashConfig, overlay: SplashConfig) -> SplashConfig {
    let (b, o) = (base.infra, overlay.infra);
    let sync_default = SyncConfig::default();

    SplashConfig {
        infra: InfraConfig {
            paths: PathsConfig {
                socket_dir: pick(
                    b.paths.socket_dir,
                    o.paths.socket_dir,
                    PathsConfig::default_socket_dir(),
                ),
            },
            bind: BindConfig {
                host: pick(b.bind.host, o.bind.host, BindConfig::default_host()),
                socket_port: pick(
                    b.bind.socket_port,
                    o.bind.socket_port,
                    BindConfig::default_socket_port(),
                ),
                websocket_port: pick(
                    b.bind.websocket_port,
                    o.bind.websocket_port,
                    BindConfig::default_websocket_port(),
                ),
            },
            telemetry: TelemetryConfig {
                log_level: pick(
                    b.telemetry.log_level,
                    o.telemetry.log_level,
                    TelemetryConfig::default_log_level(),
                ),
            },
            sync: SyncConfig {
                update_interval_ms: pick(
                    b.sync.update_interval_ms,
                    o.sync.update_interval_ms,
                    sync_default.update_interval_ms,
                ),
                buffer_wait_ms: pick(
                    b.sync.buffer_wait_ms,
                    o.sync.buffer_wait_ms,
                    sync_default.buffer_wait_ms,
                ),
                connect_timeout_ms: pick(
                    b.sync.connect_timeout_ms,
                    o.sync.connect_timeout_ms,
                    sync_default.connect_timeout_ms,
                ),
                receive_timeout_ms: pick(
                    b.sync.receive_timeout_ms,
                    o.sync.receive_timeout_ms,
                    sync_default.receive_timeout_ms,
                ),
                notify_on_unchanged: b.sync.notify_on_unchanged || o.sync.notify_on_unchanged,
            },
        },
        bootstrap: BootstrapConfig {
            root_name: pick(
                base.bootstrap.root_name,
                overlay.bootstrap.root_name,
                BootstrapConfig::default_root_name(),
            ),
            peers: if overlay.bootstrap.peers.is_empty() {
                base.bootstrap.peers
            } else {
                overlay.bootstrap.peers
            },
        },
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut SplashConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("SPLASH_SOCKET_DIR") {
        config.infra.paths.socket_dir = expand_path(&v);
        sources.env_overrides.push("SPLASH_SOCKET_DIR".to_string());
    }

    if let Ok(v) = env::var("SPLASH_HOST") {
        config.infra.bind.host = v;
        sources.env_overrides.push("SPLASH_HOST".to_string());
    }
    if let Ok(v) = env::var("SPLASH_SOCKET_PORT") {
        if let Ok(port) = v.parse() {
            config.infra.bind.socket_port = port;
            sources.env_overrides.push("SPLASH_SOCKET_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("SPLASH_WEBSOCKET_PORT") {
        if let Ok(port) = v.parse() {
            config.infra.bind.websocket_port = port;
            sources.env_overrides.push("SPLASH_WEBSOCKET_PORT".to_string());
        }
    }

    if let Ok(v) = env::var("SPLASH_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("SPLASH_LOG_LEVEL".to_string());
    }
    if let Ok(v) = env::var("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    if let Ok(v) = env::var("SPLASH_ROOT_NAME") {
        config.bootstrap.root_name = v;
        sources.env_overrides.push("SPLASH_ROOT_NAME".to_string());
    }
    // Comma separated: SPLASH_PEERS=scene1,scene2
    if let Ok(v) = env::var("SPLASH_PEERS") {
        config.bootstrap.peers = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        sources.env_overrides.push("SPLASH_PEERS".to_string());
    }
}

/// Expand a leading `~/` or `$VAR` in a path. Unknown variables are left as is.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        return match directories::BaseDirs::new() {
            Some(dirs) => dirs.home_dir().join(rest),
            None => PathBuf::from(path),
        };
    }
    if let Some(rest) = path.strip_prefix('$') {
        let (var, tail) = rest.split_once('/').unwrap_or((rest, ""));
        if let Ok(value) = env::var(var) {
            let mut expanded = PathBuf::from(value);
            if !tail.is_empty() {
                expanded.push(tail);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

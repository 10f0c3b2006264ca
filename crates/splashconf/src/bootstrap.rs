//! Bootstrap configuration - seeds runtime state, then runtime owns it.

use serde::{Deserialize, Serialize};

/// Identity and initial peers of this process.
///
/// Peers may come and go at runtime; this only decides who the link
/// connects to at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Name of the RootObject owned by this process ("world", "scene1", ...).
    #[serde(default = "BootstrapConfig::default_root_name")]
    pub root_name: String,

    /// Names of the roots this process links to.
    #[serde(default)]
    pub peers: Vec<String>,
}

impl BootstrapConfig {
    pub(crate) fn default_root_name() -> String {
        "world".to_string()
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            root_name: Self::default_root_name(),
            peers: Vec::new(),
        }
    }
}

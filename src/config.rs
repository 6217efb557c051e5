use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

/// Top-level mesh configuration, loaded from a YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub port: u16,
    pub poll_interval_secs: u64,
    pub resolver_timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings {
            port: 3000,
            poll_interval_secs: 30,
            resolver_timeout_secs: 30,
            probe_timeout_secs: 5,
        }
    }
}

/// One candidate backend to probe for an interface document.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub base_url: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl MeshConfig {
    pub fn load(path: &Path) -> Result<MeshConfig, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }
}

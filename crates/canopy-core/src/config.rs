//! Configuration system for Canopy.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CANOPY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/canopy/config.toml
//!   3. ~/.config/canopy/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{Address, DEFAULT_MESH_PORT, SUB_NODE_TIMEOUT_MS, TOPOLOGY_INTERVAL_MS};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CanopyConfig {
    pub network: NetworkConfig,
    pub mesh: MeshConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network interface name. Empty = first argument or "eth0".
    pub interface: String,
    /// UDP port the link transport sends and listens on.
    pub port: u16,
    /// Localhost port of the HTTP status endpoint.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Whether this node acts as the mesh root.
    pub role: MeshRole,
    /// This node's own link-layer address.
    pub address: Address,
    /// Upstream (router) address reported by the root. Ignored on non-root nodes.
    pub upstream: Option<Address>,
    /// Interface mode the node's radio is in.
    pub op_mode: OpMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Interval between topology tests.
    pub interval_ms: u64,
    /// Sub-nodes not confirmed within this window are evicted.
    pub sub_node_timeout_ms: u64,
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn sub_node_timeout(&self) -> Duration {
        Duration::from_millis(self.sub_node_timeout_ms)
    }
}

/// Role a node plays in the mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshRole {
    Root,
    #[default]
    Node,
}

impl std::str::FromStr for MeshRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(MeshRole::Root),
            "node" => Ok(MeshRole::Node),
            other => Err(format!("unknown mesh role: {other}")),
        }
    }
}

/// WiFi operation mode of the node's radio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpMode {
    /// Radio off or mid-reconfiguration.
    Null,
    #[default]
    Station,
    SoftAp,
    StationAp,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            port: DEFAULT_MESH_PORT,
            api_port: 9101,
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            role: MeshRole::Node,
            // Locally administered unicast.
            address: Address::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
            upstream: None,
            op_mode: OpMode::Station,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_ms: TOPOLOGY_INTERVAL_MS,
            sub_node_timeout_ms: SUB_NODE_TIMEOUT_MS,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("canopy")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CanopyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            CanopyConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CANOPY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CanopyConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CANOPY_* overrides. Values that fail to parse are ignored.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("CANOPY_NETWORK__INTERFACE") {
            self.network.interface = v;
        }
        if let Some(p) = var("CANOPY_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(p) = var("CANOPY_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(role) = var("CANOPY_MESH__ROLE").and_then(|v| v.parse().ok()) {
            self.mesh.role = role;
        }
        if let Some(addr) = var("CANOPY_MESH__ADDRESS").and_then(|v| v.parse().ok()) {
            self.mesh.address = addr;
        }
        if let Some(addr) = var("CANOPY_MESH__UPSTREAM").and_then(|v| v.parse().ok()) {
            self.mesh.upstream = Some(addr);
        }
        if let Some(ms) = var("CANOPY_DISCOVERY__INTERVAL_MS")
            .and_then(|v| v.parse().ok())
            .filter(|ms: &u64| *ms > 0)
        {
            self.discovery.interval_ms = ms;
        }
        if let Some(ms) = var("CANOPY_DISCOVERY__SUB_NODE_TIMEOUT_MS").and_then(|v| v.parse().ok())
        {
            self.discovery.sub_node_timeout_ms = ms;
        }
    }
}

//! Node configuration: defaults, TOML file, environment overrides. Applied to
//! a fresh handle before `start`; the engine ignores later changes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::NodeError;
use crate::node::Node;

/// Node configuration. File: ~/.config/lanmesh/config.toml or
/// /etc/lanmesh/config.toml. Env overrides: LANMESH_NAME, LANMESH_PORT,
/// LANMESH_INTERVAL_MS, LANMESH_INTERFACE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Identity name; engine generates one when absent.
    pub name: Option<String>,
    /// Beacon UDP port (default 5670).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Beacon interval in milliseconds (default 1000).
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Network interface to beacon on.
    pub interface: Option<String>,
    /// Explicit overlay endpoint instead of an ephemeral bound one.
    pub endpoint: Option<String>,
    /// Gossip discovery bind endpoint.
    pub gossip_bind: Option<String>,
    /// Gossip discovery connect endpoint.
    pub gossip_connect: Option<String>,
    /// Headers announced to peers on connect.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub verbose: bool,
}

fn default_port() -> u16 {
    5670
}
fn default_interval_ms() -> u64 {
    1000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: None,
            port: default_port(),
            interval_ms: default_interval_ms(),
            interface: None,
            endpoint: None,
            gossip_bind: None,
            gossip_connect: None,
            headers: BTreeMap::new(),
            verbose: false,
        }
    }
}

impl NodeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Apply this configuration to a node that has not started yet.
    pub fn apply(&self, node: &Node) -> Result<(), NodeError> {
        node.set_port(self.port)?;
        node.set_interval(Duration::from_millis(self.interval_ms))?;
        if let Some(interface) = &self.interface {
            node.set_interface(interface)?;
        }
        if let Some(endpoint) = &self.endpoint {
            node.set_endpoint(endpoint)?;
        }
        if let Some(endpoint) = &self.gossip_bind {
            node.gossip_bind(endpoint)?;
        }
        if let Some(endpoint) = &self.gossip_connect {
            node.gossip_connect(endpoint)?;
        }
        for (key, value) in &self.headers {
            node.set_header(key, value)?;
        }
        if self.verbose {
            node.set_verbose()?;
        }
        Ok(())
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> NodeConfig {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("LANMESH_NAME") {
        c.name = Some(s);
    }
    if let Ok(s) = std::env::var("LANMESH_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    if let Ok(s) = std::env::var("LANMESH_INTERVAL_MS") {
        if let Ok(ms) = s.parse::<u64>() {
            c.interval_ms = ms;
        }
    }
    if let Ok(s) = std::env::var("LANMESH_INTERFACE") {
        c.interface = Some(s);
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/lanmesh/config.toml"));
    }
    out.push(PathBuf::from("/etc/lanmesh/config.toml"));
    out
}

fn load_file() -> Option<NodeConfig> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = NodeConfig::from_toml_str(&s) {
                    return Some(c);
                }
            }
        }
    }
    None
}

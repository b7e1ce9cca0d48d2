//! Node configuration.

use serde::{Deserialize, Serialize};
use sqlha_core::NodeName;
use std::path::PathBuf;

/// Configuration for one database node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Hostname-like identity; must match the SQL Server instance name.
    pub node_name: NodeName,

    /// Address peers reach this node's instance and mirroring endpoint on.
    pub bind_address: String,

    /// Availability group name.
    pub group_name: String,

    /// Ready nodes required before the group is created.
    pub quorum: usize,

    /// Administrator login used with the shared password.
    pub admin_login: String,

    /// Directory holding persisted formation state.
    pub state_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: NodeName::new("localhost"),
            bind_address: "127.0.0.1".to_string(),
            group_name: "juju-ag".to_string(),
            quorum: 3,
            admin_login: "SA".to_string(),
            state_dir: PathBuf::from("/var/lib/sqlha"),
        }
    }
}

impl NodeConfig {
    /// Create a new configuration builder.
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::default()
    }

    /// Path of the persisted state file.
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("formation-state.json")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.node_name.as_str().is_empty() {
            return Err("node_name is required".to_string());
        }
        if self.bind_address.is_empty() {
            return Err("bind_address is required".to_string());
        }
        if self.group_name.is_empty() {
            return Err("group_name is required".to_string());
        }
        if self.quorum == 0 {
            return Err("quorum must be > 0".to_string());
        }
        if self.admin_login.is_empty() {
            return Err("admin_login is required".to_string());
        }
        Ok(())
    }
}

/// Builder for NodeConfig.
#[derive(Debug, Default)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Set the node name.
    pub fn node_name(mut self, name: impl Into<NodeName>) -> Self {
        self.config.node_name = name.into();
        self
    }

    /// Set the bind address.
    pub fn bind_address(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_address = addr.into();
        self
    }

    /// Set the availability group name.
    pub fn group_name(mut self, name: impl Into<String>) -> Self {
        self.config.group_name = name.into();
        self
    }

    /// Set the creation quorum.
    pub fn quorum(mut self, quorum: usize) -> Self {
        self.config.quorum = quorum;
        self
    }

    /// Set the administrator login.
    pub fn admin_login(mut self, login: impl Into<String>) -> Self {
        self.config.admin_login = login.into();
        self
    }

    /// Set the state directory.
    pub fn state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.state_dir = path.into();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<NodeConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

use std::path::PathBuf;
use std::collections::HashSet;

use serde::{Deserialize};
use tokio::time::Duration;

use crate::tributary::config::enums::InitialRole;
use crate::tributary::{Error, Result};

// Things that are not configurable, but might be one day
pub const NODE_COUNT: usize = 3;
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

#[derive(Deserialize, Debug)]
pub struct Settings {
    /// config_path is the path of the loaded config file
    #[serde(skip)]
    pub config_path: PathBuf,
    /// database to connect to on every node, unless overridden per node
    pub database: String,
    /// user to connect with, unless overridden per node
    #[serde(default)]
    pub user: String,
    /// password if using password authentication, unless overridden per node
    #[serde(default)]
    pub password: String,
    /// port to connect to, unless overridden per node. Defaults to 3306
    #[serde(default = "default_port")]
    pub port: u16,
    /// replication_user is the account replicas use to stream the master's binary log. Defaults to user.
    #[serde(default)]
    pub replication_user: String,
    /// replication_password for replication_user. Defaults to password.
    #[serde(default)]
    pub replication_password: String,
    /// max_connections per node pool. Callers beyond this wait for a free connection. Default 10.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// connect_attempts is the number of times to try connecting to each node at startup. Default 5.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// connect_backoff_millis is the delay after the first failed connect, doubling each attempt. Default 1000.
    #[serde(default = "default_connect_backoff_millis")]
    pub connect_backoff_millis: u64,
    /// probe_timeout_millis bounds a liveness probe of a node. Default 2000.
    #[serde(default = "default_probe_timeout_millis")]
    pub probe_timeout_millis: u64,
    /// health_check_interval_seconds is how often down nodes are probed for recovery. Default 10.
    #[serde(default = "default_health_check_interval_seconds")]
    pub health_check_interval_seconds: u64,
    /// reconcile_interval_seconds is how often pending fragment repairs are applied. Default 60, 0 is disabled.
    #[serde(default = "default_reconcile_interval_seconds")]
    pub reconcile_interval_seconds: u64,
    /// the three cluster nodes
    pub nodes: Vec<NodeSettings>,
}

const fn default_port() -> u16 { DEFAULT_MYSQL_PORT }
const fn default_max_connections() -> u32 { 10 }
const fn default_connect_attempts() -> u32 { 5 }
const fn default_connect_backoff_millis() -> u64 { 1000 }
const fn default_probe_timeout_millis() -> u64 { 2000 }
const fn default_health_check_interval_seconds() -> u64 { 10 }
const fn default_reconcile_interval_seconds() -> u64 { 60 }

#[derive(Deserialize, Debug, Clone)]
pub struct NodeSettings {
    /// id is the stable identity of the physical node (1, 2 or 3)
    pub id: u8,
    /// host to connect to. Replicas also use it to stream from this node when it's master.
    pub host: String,
    /// role at process start
    #[serde(default)]
    pub role: InitialRole,
    /// port to connect to, defaults to the cluster port
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// max_connections for this node's pool, defaults to the cluster max_connections
    #[serde(default)]
    pub max_connections: u32,
}

impl Settings {
    pub(crate) fn load(&mut self, path: PathBuf) -> Result<()> {
        self.config_path = path;
        if self.max_connections == 0 {
            return Err(Error::new("max_connections cannot be 0"));
        }
        if self.connect_attempts == 0 {
            return Err(Error::new("connect_attempts cannot be 0"));
        }
        if self.health_check_interval_seconds == 0 {
            return Err(Error::new("health_check_interval_seconds cannot be 0"));
        }
        if self.replication_user.is_empty() {
            self.replication_user = self.user.clone();
        }
        if self.replication_password.is_empty() {
            self.replication_password = self.password.clone();
        }
        if self.nodes.len() != NODE_COUNT {
            return Err(Error::new(format!("expected exactly {} nodes, found {}", NODE_COUNT, self.nodes.len())));
        }

        let mut ids = HashSet::new();
        let mut roles = HashSet::new();
        for node in &mut self.nodes {
            if !ids.insert(node.id) {
                return Err(Error::new(format!("duplicate node id {}", node.id)));
            }
            if node.role == InitialRole::Invalid {
                return Err(Error::new(format!("role not set for node {}", node.id)));
            }
            if !roles.insert(node.role) {
                return Err(Error::new(format!("role {:?} is assigned to more than one node", node.role)));
            }
            if node.host.is_empty() {
                return Err(Error::new(format!("host not set for node {}", node.id)));
            }
            if node.port == 0 {
                node.port = self.port;
            }
            if node.database.is_empty() {
                node.database = self.database.clone();
            }
            if node.user.is_empty() {
                node.user = self.user.clone();
            }
            if node.password.is_empty() {
                node.password = self.password.clone();
            }
            if node.max_connections == 0 {
                node.max_connections = self.max_connections;
            }
        }
        // Three distinct valid roles over three nodes means one master and one replica per partition
        Ok(())
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_millis)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_millis)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        if self.reconcile_interval_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.reconcile_interval_seconds))
        }
    }
}

impl NodeSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

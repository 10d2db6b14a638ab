//! Cluster members and their persistent file layout.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{remote::RemoteNode, types::BrokerId};

/// Files a managed process owns under its root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPaths {
    pub root: String,
    pub config_file: String,
    pub log_dir: String,
    pub log_file: String,
    pub log4j_config: String,
    pub stdout: String,
    pub stderr: String,
    pub data_dir: String,
    /// Only brokers record a pid file.
    pub pid_file: Option<String>,
}

impl MemberPaths {
    fn under(root: &str, stem: &str) -> Self {
        let root = root.trim_end_matches('/').to_string();
        let log_dir = format!("{root}/logs");
        Self {
            config_file: format!("{root}/{stem}.properties"),
            log_file: format!("{log_dir}/{stem}.log"),
            log4j_config: format!("{root}/log4j.properties"),
            stdout: format!("{root}/{stem}.stdout"),
            stderr: format!("{root}/{stem}.stderr"),
            data_dir: format!("{root}/{stem}-logs"),
            pid_file: None,
            log_dir,
            root,
        }
    }

    pub fn broker(root: &str) -> Self {
        Self {
            pid_file: Some(format!("{}/kafka.pid", root.trim_end_matches('/'))),
            ..Self::under(root, "kafka")
        }
    }

    pub fn console_consumer(root: &str) -> Self {
        Self::under(root, "console_consumer")
    }
}

/// One broker of the cluster, bound to the node it runs on.
pub struct ClusterMember {
    id: BrokerId,
    node: Arc<dyn RemoteNode>,
    paths: MemberPaths,
    port: u16,
    /// At most one entry: the pid the member's start wrote to its pid file.
    pids: Mutex<Vec<u32>>,
}

impl ClusterMember {
    pub fn new(id: BrokerId, node: Arc<dyn RemoteNode>, paths: MemberPaths, port: u16) -> Self {
        Self {
            id,
            node,
            paths,
            port,
            pids: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> BrokerId {
        self.id
    }

    pub fn node(&self) -> &dyn RemoteNode {
        self.node.as_ref()
    }

    /// Shared handle to the node, e.g. for a probe running next to this broker.
    pub fn node_handle(&self) -> Arc<dyn RemoteNode> {
        Arc::clone(&self.node)
    }

    pub fn hostname(&self) -> &str {
        self.node.hostname()
    }

    pub fn paths(&self) -> &MemberPaths {
        &self.paths
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Process ids recorded by the last start, cleared once a stop is observed.
    pub fn known_pids(&self) -> Vec<u32> {
        self.pids.lock().clone()
    }

    pub(crate) fn record_pids(&self, pids: Vec<u32>) {
        *self.pids.lock() = pids;
    }

    pub(crate) fn forget_pids(&self) {
        self.pids.lock().clear();
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname(), self.port)
    }
}

impl fmt::Debug for ClusterMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterMember")
            .field("id", &self.id)
            .field("hostname", &self.hostname())
            .field("pids", &*self.pids.lock())
            .finish()
    }
}

impl fmt::Display for ClusterMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.hostname())
    }
}

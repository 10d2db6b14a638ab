//! Cluster service: lifecycle of every member plus coordination-service queries.
//!
//! All state about the running cluster is observed through remote commands.
//! Lifecycle transitions fail closed (no retries), liveness checks fail open
//! (a failed pid query reads as "stopped"), and cleanup is best-effort.

mod leader;
mod reassign;
mod topics;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join_all;
use tokio::time::sleep;

use crate::{
    HarnessError, debug, info,
    manifest::{HarnessManifest, HarnessSettings, TopicSpec},
    member::{MemberPaths, ClusterMember},
    remote::{RemoteNode, ShellNode, live_pid_filter, pid_file_reader, shell_quote},
    render::{BrokerContext, ConfigRenderer, DefaultRenderer},
    scrape::{OutputParser, ToolOutputParser},
    types::{BrokerId, Signal},
    wait::wait_until,
    warn,
};

pub use leader::PartitionState;
pub use reassign::{PartitionReassignment, ReassignmentPlan};

/// The brokers of one cluster, started and observed through their nodes.
pub struct ClusterService {
    members: Vec<ClusterMember>,
    coordination_connect: String,
    topics: Vec<TopicSpec>,
    settings: HarnessSettings,
    renderer: Arc<dyn ConfigRenderer>,
    parser: Arc<dyn OutputParser>,
}

impl ClusterService {
    /// Create one member per node. Broker ids are the 1-based node indices.
    ///
    /// The first member on a host uses `broker_root` and `broker_port`. Every
    /// further member on the same host gets `{broker_root}-{id}` and the next
    /// port up, so co-located brokers never share files or a listener.
    pub fn new(
        nodes: Vec<Arc<dyn RemoteNode>>,
        coordination_connect: impl Into<String>,
        settings: HarnessSettings,
    ) -> Self {
        let mut placed: HashMap<String, u16> = HashMap::new();
        let members = nodes
            .into_iter()
            .enumerate()
            .map(|(idx, node)| {
                let id = BrokerId(idx as u32 + 1);
                let slot = placed.entry(node.hostname().to_string()).or_insert(0);
                let (root, port) = match *slot {
                    0 => (settings.broker_root.clone(), settings.broker_port),
                    n => (
                        format!("{}-{}", settings.broker_root.trim_end_matches('/'), id.0),
                        settings.broker_port.saturating_add(n),
                    ),
                };
                *slot += 1;
                ClusterMember::new(id, node, MemberPaths::broker(&root), port)
            })
            .collect();

        Self {
            members,
            coordination_connect: coordination_connect.into(),
            topics: Vec::new(),
            settings,
            renderer: Arc::new(DefaultRenderer),
            parser: Arc::new(ToolOutputParser),
        }
    }

    /// Build a service over shell/ssh nodes described by a manifest, including its topic set.
    pub fn from_manifest(manifest: &HarnessManifest) -> Result<Self, HarnessError> {
        manifest.validate()?;
        let nodes = manifest
            .nodes
            .iter()
            .map(|spec| {
                Arc::new(ShellNode::new(spec.hostname.clone(), spec.ssh_target.clone()))
                    as Arc<dyn RemoteNode>
            })
            .collect();

        Ok(Self::new(
            nodes,
            manifest.coordination.connect.clone(),
            manifest.settings.clone(),
        )
        .with_topics(manifest.topic_specs()))
    }

    /// Topics created by [`ClusterService::start`] once every member is up.
    pub fn with_topics(mut self, topics: Vec<TopicSpec>) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ConfigRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn OutputParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn members(&self) -> &[ClusterMember] {
        &self.members
    }

    pub fn member(&self, id: BrokerId) -> Result<&ClusterMember, HarnessError> {
        self.members
            .iter()
            .find(|member| member.id() == id)
            .ok_or(HarnessError::UnknownMember {
                broker_id: id.0 as i64,
            })
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    pub fn coordination_connect(&self) -> &str {
        &self.coordination_connect
    }

    pub fn declared_topics(&self) -> &[TopicSpec] {
        &self.topics
    }

    /// Node used for coordination tooling; any member works.
    fn coordination_node(&self) -> Result<&dyn RemoteNode, HarnessError> {
        self.members
            .first()
            .map(ClusterMember::node)
            .ok_or_else(|| HarnessError::InvalidManifest {
                context: "cluster service".to_string(),
                reason: "no members configured".to_string(),
            })
    }

    /// Start every member in index order, then create the declared topics.
    pub async fn start(&self) -> Result<(), HarnessError> {
        for member in &self.members {
            self.start_member(member.id()).await?;
        }
        for topic in &self.topics {
            self.create_topic(topic).await?;
        }
        Ok(())
    }

    /// Cleanly stop every member in index order.
    pub async fn stop(&self) -> Result<(), HarnessError> {
        for member in &self.members {
            self.stop_member(member.id(), true).await?;
        }
        Ok(())
    }

    pub async fn clean(&self) -> Result<(), HarnessError> {
        for member in &self.members {
            self.clean_member(member.id()).await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(member = %id))]
    pub async fn start_member(&self, id: BrokerId) -> Result<(), HarnessError> {
        let member = self.member(id)?;
        let node = member.node();
        let paths = member.paths();

        let props = self.renderer.broker_properties(&BrokerContext {
            broker_id: id,
            hostname: member.hostname(),
            port: member.port(),
            coordination_connect: &self.coordination_connect,
            data_dir: &paths.data_dir,
        });
        info!("{member} kafka.properties:\n{props}");

        node.run(
            &format!(
                "mkdir -p {} {}",
                shell_quote(&paths.root),
                shell_quote(&paths.log_dir)
            ),
            false,
        )
        .await?;
        node.create_file(&paths.config_file, &props).await?;
        node.create_file(&paths.log4j_config, &self.renderer.log4j(&paths.log_file))
            .await?;

        let cmd = self.start_command(paths);
        debug!("Attempting to start {member} with command: {cmd}");
        node.run(&cmd, false).await?;

        sleep(self.settings.start_settle()).await;
        let pids = self.launched_pids(member).await.unwrap_or_else(|e| {
            warn!("Process query for {member} failed after launch: {e}");
            Vec::new()
        });
        if pids.is_empty() {
            member.forget_pids();
            return Err(HarnessError::StartupFailure {
                member: member.to_string(),
                reason: format!(
                    "no process ids recorded {:?} after launch",
                    self.settings.start_settle()
                ),
            });
        }

        info!("{member} started with pids {pids:?}");
        member.record_pids(pids);
        Ok(())
    }

    fn start_command(&self, paths: &MemberPaths) -> String {
        let mut cmd = format!(
            "export LOG_DIR={}; export KAFKA_LOG4J_OPTS=\"-Dlog4j.configuration=file:{}\"; \
             nohup {} {} 1>> {} 2>> {} < /dev/null &",
            shell_quote(&paths.log_dir),
            paths.log4j_config,
            self.settings.tool("kafka-server-start.sh"),
            shell_quote(&paths.config_file),
            shell_quote(&paths.stdout),
            shell_quote(&paths.stderr),
        );
        if let Some(pid_file) = &paths.pid_file {
            cmd.push_str(&format!(" echo $! > {}", shell_quote(pid_file)));
        }
        cmd
    }

    async fn pid_file_pids(&self, member: &ClusterMember) -> Result<Vec<u32>, HarnessError> {
        match &member.paths().pid_file {
            Some(pid_file) => member.node().pids(&pid_file_reader(pid_file)).await,
            None => Ok(Vec::new()),
        }
    }

    /// Pids recorded in memory, falling back to the pid file when nothing is recorded.
    async fn tracked_pids(&self, member: &ClusterMember) -> Result<Vec<u32>, HarnessError> {
        let known = member.known_pids();
        if !known.is_empty() {
            return Ok(known);
        }
        self.pid_file_pids(member).await
    }

    async fn live_pids(
        &self,
        member: &ClusterMember,
        candidates: &[u32],
    ) -> Result<Vec<u32>, HarnessError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        member.node().pids(&live_pid_filter(candidates)).await
    }

    /// The running process written to the pid file by the latest launch.
    async fn launched_pids(&self, member: &ClusterMember) -> Result<Vec<u32>, HarnessError> {
        let recorded = self.pid_file_pids(member).await?;
        self.live_pids(member, &recorded).await
    }

    /// Tracked process ids of the member that are still running.
    pub async fn pids(&self, id: BrokerId) -> Result<Vec<u32>, HarnessError> {
        let member = self.member(id)?;
        let tracked = self.tracked_pids(member).await?;
        self.live_pids(member, &tracked).await
    }

    /// True iff at least one broker process is found. Query failures read as "not alive".
    pub async fn is_alive(&self, id: BrokerId) -> bool {
        match self.pids(id).await {
            Ok(pids) => !pids.is_empty(),
            Err(e) => {
                debug!("Treating {id} as stopped: {e}");
                false
            }
        }
    }

    /// Deliver `signal` to every tracked process of the member, in parallel.
    pub async fn signal_member(
        &self,
        id: BrokerId,
        signal: Signal,
        allow_fail: bool,
    ) -> Result<(), HarnessError> {
        let member = self.member(id)?;
        let pids = self.tracked_pids(member).await?;
        if pids.is_empty() {
            debug!("{member} has no tracked process to receive {signal}");
            return Ok(());
        }

        debug!("Sending {signal} to {member} pids {pids:?}");
        try_join_all(
            pids.iter()
                .map(|pid| member.node().signal(*pid, signal, allow_fail)),
        )
        .await?;
        Ok(())
    }

    /// Signal the member with SIGTERM (`clean`) or SIGKILL and forget its pid file.
    /// Does not wait for the process to exit; see [`ClusterService::wait_until_stopped`].
    #[tracing::instrument(skip(self), fields(member = %id))]
    pub async fn stop_member(&self, id: BrokerId, clean: bool) -> Result<(), HarnessError> {
        let member = self.member(id)?;
        // Kept in memory past the pid file's removal so the stop stays observable.
        member.record_pids(self.tracked_pids(member).await?);
        self.signal_member(id, Signal::for_shutdown(clean), false)
            .await?;
        if let Some(pid_file) = &member.paths().pid_file {
            member
                .node()
                .run(&format!("rm -f {}", shell_quote(pid_file)), false)
                .await?;
        }
        Ok(())
    }

    /// Poll liveness until the member is gone, bounded by the configured stop timeout.
    pub async fn wait_until_stopped(&self, id: BrokerId) -> Result<(), HarnessError> {
        let member = self.member(id)?;
        wait_until(
            || async move { !self.is_alive(id).await },
            self.settings.stop_timeout(),
            self.settings.stop_backoff(),
            &format!("{member} to stop"),
        )
        .await?;
        member.forget_pids();
        Ok(())
    }

    /// Stop, sleep `wait`, start. A failure between the phases leaves the member stopped.
    pub async fn restart_member(
        &self,
        id: BrokerId,
        wait: Duration,
        clean: bool,
    ) -> Result<(), HarnessError> {
        self.stop_member(id, clean).await?;
        sleep(wait).await;
        self.start_member(id).await
    }

    /// Force-kill anything left running, then remove every artifact of the member.
    pub async fn clean_member(&self, id: BrokerId) -> Result<(), HarnessError> {
        let member = self.member(id)?;
        let node = member.node();

        let tracked = self.tracked_pids(member).await.unwrap_or_else(|e| {
            warn!("Could not read the pid file of {member}: {e}");
            Vec::new()
        });
        let live = self.live_pids(member, &tracked).await.unwrap_or_default();
        if !live.is_empty() {
            warn!("{member} was still alive at cleanup time. Killing forcefully...");
        }
        for pid in live {
            if let Err(e) = node.signal(pid, Signal::Kill, true).await {
                warn!("Failed to kill pid {pid} of {member}: {e}");
            }
        }

        node.run(&format!("rm -rf {}", shell_quote(&member.paths().root)), false)
            .await?;
        member.forget_pids();
        Ok(())
    }

    /// `host:port` of every member, in member order.
    pub fn bootstrap_addresses(&self) -> Vec<String> {
        self.members
            .iter()
            .map(ClusterMember::address)
            .collect()
    }

    /// Comma-joined [`ClusterService::bootstrap_addresses`], as clients expect it.
    pub fn bootstrap_servers(&self) -> String {
        self.bootstrap_addresses().join(",")
    }
}

use futures_util::StreamExt;

use super::ClusterService;
use crate::{
    HarnessError, debug, info,
    member::ClusterMember,
    remote::shell_quote,
    types::{BrokerId, PartitionId, Signal},
    wait::{RetryPolicy, retry_with_backoff},
};

/// Leadership of one partition as read from the coordination service. Never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionState {
    pub topic: String,
    pub partition: PartitionId,
    /// Raw leader id; `-1` while leaderless.
    pub leader: i64,
    pub in_sync_replicas: Vec<BrokerId>,
    pub leader_epoch: Option<u64>,
}

impl PartitionState {
    pub fn leader_id(&self) -> Option<BrokerId> {
        u32::try_from(self.leader).ok().map(BrokerId)
    }
}

impl ClusterService {
    /// Read the partition's state node once. Fails if no state line appears in the output.
    pub async fn partition_state(
        &self,
        topic: &str,
        partition: PartitionId,
    ) -> Result<PartitionState, HarnessError> {
        let node = self.coordination_node()?;
        let cmd = self.partition_state_command(topic, partition);
        debug!("Querying coordination service for the leader of {topic}-{partition}: {cmd}");

        let mut lines = node.capture(&cmd, false).await?;
        let mut payload = None;
        while let Some(line) = lines.next().await {
            let line = line?;
            if let Some(json) = self.parser.partition_state_line(&line) {
                payload = Some(json.to_string());
                break;
            }
        }
        drop(lines);

        let payload = payload.ok_or_else(|| {
            HarnessError::coordination(
                "leader lookup",
                format!("no partition state found for topic {topic} and partition {partition}"),
            )
        })?;
        let raw = self.parser.parse_partition_state(&payload)?;
        info!("Partition state of {topic}-{partition}: {payload}");

        Ok(PartitionState {
            topic: topic.to_string(),
            partition,
            leader: raw.leader,
            in_sync_replicas: raw.isr.into_iter().map(BrokerId).collect(),
            leader_epoch: raw.leader_epoch,
        })
    }

    fn partition_state_command(&self, topic: &str, partition: PartitionId) -> String {
        let znode = format!("/brokers/topics/{topic}/partitions/{partition}/state");
        format!(
            "{} kafka.tools.ZooKeeperMainWrapper -server {} get {}",
            self.settings.tool("kafka-run-class.sh"),
            shell_quote(&self.coordination_connect),
            shell_quote(&znode)
        )
    }

    /// Current leader of a partition. Single-shot; see [`ClusterService::await_leader`].
    pub async fn leader(
        &self,
        topic: &str,
        partition: PartitionId,
    ) -> Result<&ClusterMember, HarnessError> {
        let state = self.partition_state(topic, partition).await?;
        let member = state
            .leader_id()
            .and_then(|id| self.member(id).ok())
            .ok_or(HarnessError::UnknownMember {
                broker_id: state.leader,
            })?;
        info!(
            "Leader for topic {topic} and partition {partition} is now: {}",
            member.id()
        );
        Ok(member)
    }

    /// [`ClusterService::leader`] retried under `policy`, for state that may not have propagated yet.
    pub async fn await_leader(
        &self,
        topic: &str,
        partition: PartitionId,
        policy: RetryPolicy,
    ) -> Result<&ClusterMember, HarnessError> {
        retry_with_backoff(
            policy,
            &format!("leader lookup for {topic}-{partition}"),
            || self.leader(topic, partition),
        )
        .await
    }

    pub async fn signal_leader(
        &self,
        topic: &str,
        partition: PartitionId,
        signal: Signal,
    ) -> Result<BrokerId, HarnessError> {
        let leader = self.leader(topic, partition).await?.id();
        self.signal_member(leader, signal, false).await?;
        Ok(leader)
    }
}

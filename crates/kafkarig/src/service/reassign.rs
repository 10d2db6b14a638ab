use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ClusterService;
use crate::{
    HarnessError, debug, info,
    remote::shell_quote,
    scrape::ReassignmentStatus,
    types::{BrokerId, PartitionId},
    warn,
};

/// Target replica list for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionReassignment {
    pub topic: String,
    pub partition: u32,
    pub replicas: Vec<u32>,
}

/// Proposed replica placement in the reassignment tool's JSON format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignmentPlan {
    pub version: u32,
    pub partitions: Vec<PartitionReassignment>,
}

impl Default for ReassignmentPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl ReassignmentPlan {
    pub fn new() -> Self {
        Self {
            version: 1,
            partitions: Vec::new(),
        }
    }

    pub fn with_partition(
        mut self,
        topic: impl Into<String>,
        partition: PartitionId,
        replicas: impl IntoIterator<Item = BrokerId>,
    ) -> Self {
        self.partitions.push(PartitionReassignment {
            topic: topic.into(),
            partition: partition.into(),
            replicas: replicas.into_iter().map(u32::from).collect(),
        });
        self
    }

    pub fn to_json(&self) -> Result<String, HarnessError> {
        serde_json::to_string(self)
            .map_err(|e| HarnessError::coordination("reassignment plan serialization", e.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
enum ReassignMode {
    Verify,
    Execute,
}

impl ReassignMode {
    fn flag(self) -> &'static str {
        match self {
            ReassignMode::Verify => "--verify",
            ReassignMode::Execute => "--execute",
        }
    }
}

impl ClusterService {
    /// Run the reassignment tool in verify mode. Returns false while any partition is
    /// still migrating; any output without the in-progress marker counts as complete.
    pub async fn verify_reassignment(&self, plan: &ReassignmentPlan) -> Result<bool, HarnessError> {
        info!("Verifying partition reassignment...");
        let status = self.reassignment_status(plan).await?;
        match status {
            ReassignmentStatus::Unrecognized => {
                warn!("No reassignment status marker in tool output; treating as complete")
            }
            ReassignmentStatus::Failed => {
                warn!("Reassignment tool reported a failed partition; treating as complete")
            }
            _ => {}
        }
        Ok(status.is_complete())
    }

    /// Verify-mode status before it is collapsed into a boolean.
    pub async fn reassignment_status(
        &self,
        plan: &ReassignmentPlan,
    ) -> Result<ReassignmentStatus, HarnessError> {
        let output = self.run_reassign_tool(plan, ReassignMode::Verify).await?;
        Ok(self.parser.reassignment_status(&output))
    }

    /// Submit the plan in execute mode and return the tool's output.
    pub async fn execute_reassignment(&self, plan: &ReassignmentPlan) -> Result<String, HarnessError> {
        info!("Executing partition reassignment...");
        self.run_reassign_tool(plan, ReassignMode::Execute).await
    }

    async fn run_reassign_tool(
        &self,
        plan: &ReassignmentPlan,
        mode: ReassignMode,
    ) -> Result<String, HarnessError> {
        let node = self.coordination_node()?;
        let json_file = format!(
            "{}/{}_reassign.json",
            self.settings.reassign_dir.trim_end_matches('/'),
            Uuid::new_v4()
        );
        node.create_file(&json_file, &plan.to_json()?).await?;

        let cmd = format!(
            "{} --zookeeper {} --reassignment-json-file {} {}",
            self.settings.tool("kafka-reassign-partitions.sh"),
            shell_quote(&self.coordination_connect),
            shell_quote(&json_file),
            mode.flag()
        );
        debug!("{cmd}");
        let output = node.capture_all(&cmd, false).await;

        if let Err(e) = node
            .run(&format!("rm -f {}", shell_quote(&json_file)), true)
            .await
        {
            warn!("Failed to remove {json_file}: {e}");
        }

        let output = output?;
        debug!("Partition reassignment {mode:?} output:\n{output}");
        Ok(output)
    }
}

//! Parsing of free-text coordination tool output.
//!
//! The coordination service is only reachable through command-line tools, so
//! structured data is scraped from their output. All scraping lives behind
//! [`OutputParser`] so a structured query can replace it without touching the
//! control flow in the service.

use serde::Deserialize;

use crate::HarnessError;

/// Partition state node as stored by the coordination service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LeaderAndIsr {
    /// `-1` while the partition has no leader.
    pub leader: i64,
    #[serde(default)]
    pub isr: Vec<u32>,
    #[serde(default)]
    pub leader_epoch: Option<u64>,
    #[serde(default)]
    pub controller_epoch: Option<u64>,
}

/// Best-effort reading of a reassignment verification report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignmentStatus {
    InProgress,
    Complete,
    Failed,
    /// Neither marker was found.
    Unrecognized,
}

impl ReassignmentStatus {
    /// Only an explicit in-progress marker counts as still migrating.
    pub fn is_complete(&self) -> bool {
        !matches!(self, ReassignmentStatus::InProgress)
    }
}

pub trait OutputParser: Send + Sync {
    /// Return the JSON payload if `line` is a partition state line.
    fn partition_state_line<'a>(&self, line: &'a str) -> Option<&'a str>;

    fn parse_partition_state(&self, payload: &str) -> Result<LeaderAndIsr, HarnessError> {
        serde_json::from_str(payload)
            .map_err(|e| HarnessError::coordination("partition state parsing", e.to_string()))
    }

    fn reassignment_status(&self, output: &str) -> ReassignmentStatus;
}

/// Parser for the stock coordination shell and reassignment tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolOutputParser;

impl OutputParser for ToolOutputParser {
    fn partition_state_line<'a>(&self, line: &'a str) -> Option<&'a str> {
        let line = line.trim();
        (line.len() > 2 && line.starts_with('{') && line.ends_with('}')).then_some(line)
    }

    fn reassignment_status(&self, output: &str) -> ReassignmentStatus {
        let mut status = ReassignmentStatus::Unrecognized;
        for line in output.lines().map(str::to_lowercase) {
            if line.contains("in progress") && !line.contains("not in progress") {
                return ReassignmentStatus::InProgress;
            }
            if line.contains("failed") {
                status = ReassignmentStatus::Failed;
            } else if line.contains("completed successfully")
                && status == ReassignmentStatus::Unrecognized
            {
                status = ReassignmentStatus::Complete;
            }
        }
        status
    }
}

//! Error types for cluster harness operations.

use std::fmt;
use std::time::Duration;

/// Main error type for driving cluster members and probes.
#[derive(Debug, Clone, PartialEq)]
pub enum HarnessError {
    /// No process id was observed after launching a member.
    StartupFailure {
        member: String,
        reason: String,
    },
    /// Expected structured output was missing from a coordination-service response.
    CoordinationQueryFailure {
        context: String,
        reason: String,
    },
    /// A process did not disappear within the bounded wait.
    TerminationTimeout {
        what: String,
        timeout: Duration,
    },
    /// Enumerating process ids failed.
    ProcessQuery {
        host: String,
        reason: String,
    },
    /// A remote command exited non-zero and the caller did not allow failure.
    CommandFailed {
        host: String,
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    Io {
        context: String,
        reason: String,
    },
    UnknownMember {
        broker_id: i64,
    },
    InvalidTopic {
        topic: String,
        reason: String,
    },
    /// Invalid manifest structure or data.
    InvalidManifest {
        context: String,
        reason: String,
    },
    /// Probe operation not valid for the instance's current state.
    ProbeState {
        instance: usize,
        reason: String,
    },
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::StartupFailure { member, reason } => {
                write!(f, "Failed to start {member}: {reason}")
            }
            HarnessError::CoordinationQueryFailure { context, reason } => {
                write!(f, "Coordination query failed in {context}: {reason}")
            }
            HarnessError::TerminationTimeout { what, timeout } => {
                write!(f, "Timed out after {timeout:?} waiting for {what}")
            }
            HarnessError::ProcessQuery { host, reason } => {
                write!(f, "Process query on {host} failed: {reason}")
            }
            HarnessError::CommandFailed {
                host,
                command,
                exit_code,
                stderr,
            } => {
                let code = exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                write!(
                    f,
                    "Command on {host} exited with {code}: {command}: {}",
                    stderr.trim()
                )
            }
            HarnessError::Io { context, reason } => {
                write!(f, "I/O error in {context}: {reason}")
            }
            HarnessError::UnknownMember { broker_id } => {
                write!(f, "No cluster member with broker id {broker_id}")
            }
            HarnessError::InvalidTopic { topic, reason } => {
                write!(f, "Invalid topic '{topic}': {reason}")
            }
            HarnessError::InvalidManifest { context, reason } => {
                write!(f, "Invalid manifest in {context}: {reason}")
            }
            HarnessError::ProbeState { instance, reason } => {
                write!(f, "Probe instance {instance}: {reason}")
            }
        }
    }
}

impl std::error::Error for HarnessError {}

impl HarnessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::TerminationTimeout { .. })
    }

    /// Errors raised by start/stop/create transitions. These are never retried internally.
    pub fn is_fatal_lifecycle(&self) -> bool {
        matches!(
            self,
            HarnessError::StartupFailure { .. }
                | HarnessError::TerminationTimeout { .. }
                | HarnessError::CommandFailed { .. }
                | HarnessError::CoordinationQueryFailure { .. }
        )
    }

    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        HarnessError::Io {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_parse_error(e: impl fmt::Display, context: &str) -> Self {
        HarnessError::InvalidManifest {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn coordination(context: &str, reason: impl Into<String>) -> Self {
        HarnessError::CoordinationQueryFailure {
            context: context.to_string(),
            reason: reason.into(),
        }
    }
}

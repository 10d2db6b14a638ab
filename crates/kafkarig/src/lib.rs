//! Lifecycle and observation harness for a Kafka-style broker cluster.
//!
//! A [`ClusterService`] starts, stops, signals and cleans broker processes on a
//! set of [`RemoteNode`]s, creates topics and queries partition leadership
//! through the coordination service. A [`StreamProbe`] runs console consumers
//! in the background and collects the messages they print.

pub mod error;
pub mod manifest;
pub mod member;
pub mod probe;
pub mod remote;
pub mod render;
pub mod scrape;
pub mod service;
pub mod telemetry;
pub mod types;
pub mod wait;

pub use error::HarnessError;
pub use log::{debug, error, info, trace, warn};
pub use manifest::{
    HarnessManifest, HarnessSettings, ManifestFormat, ManifestLoader, TopicConfig, TopicSpec,
};
pub use member::{MemberPaths, ClusterMember};
pub use probe::{ProbeConfig, ProbeState, StreamProbe};
pub use remote::{RemoteNode, ShellNode};
pub use service::{ClusterService, PartitionState, ReassignmentPlan};
pub use types::{BrokerId, PartitionId, Signal};
pub use wait::RetryPolicy;

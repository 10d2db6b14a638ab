//! Harness manifest definitions and loading.

pub mod loader;
pub mod types;

// Re-exports for ergonomics
pub use loader::{ManifestFormat, ManifestLoader};
pub use types::{
    CoordinationSpec, HarnessManifest, HarnessSettings, NodeSpec, TopicConfig, TopicSpec,
};

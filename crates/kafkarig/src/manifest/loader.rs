//! Reading manifests from disk or from in-memory text.

use std::fmt;
use std::path::Path;

use super::types::HarnessManifest;
use crate::{HarnessError, debug};

/// Serialization of a manifest document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Yaml,
    /// No recognizable extension: JSON is tried first, then YAML.
    Detect,
}

impl ManifestFormat {
    pub fn for_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => ManifestFormat::Json,
            Some("yaml" | "yml") => ManifestFormat::Yaml,
            _ => ManifestFormat::Detect,
        }
    }

    fn decode(self, text: &str) -> Result<HarnessManifest, HarnessError> {
        match self {
            ManifestFormat::Json => serde_json::from_str(text)
                .map_err(|e| HarnessError::from_parse_error(e, "JSON manifest")),
            ManifestFormat::Yaml => serde_yaml::from_str(text)
                .map_err(|e| HarnessError::from_parse_error(e, "YAML manifest")),
            ManifestFormat::Detect => match serde_json::from_str(text) {
                Ok(manifest) => Ok(manifest),
                Err(json_err) => serde_yaml::from_str(text).map_err(|yaml_err| {
                    HarnessError::InvalidManifest {
                        context: "manifest".to_string(),
                        reason: format!("not JSON ({json_err}) and not YAML ({yaml_err})"),
                    }
                }),
            },
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestFormat::Json => write!(f, "json"),
            ManifestFormat::Yaml => write!(f, "yaml"),
            ManifestFormat::Detect => write!(f, "json-or-yaml"),
        }
    }
}

/// Turns manifest documents into validated [`HarnessManifest`]s.
pub struct ManifestLoader;

impl ManifestLoader {
    /// Read `path`, decode it according to its extension and validate the result.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<HarnessManifest, HarnessError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::from_io_error(e, &format!("reading manifest {}", path.display()))
        })?;
        let format = ManifestFormat::for_path(path);
        debug!("Loading {format} manifest from {}", path.display());
        Self::parse(&text, format)
    }

    /// Decode and validate a manifest that is already in memory.
    pub fn parse(text: &str, format: ManifestFormat) -> Result<HarnessManifest, HarnessError> {
        let manifest = format.decode(text)?;
        manifest.validate()?;
        Ok(manifest)
    }
}

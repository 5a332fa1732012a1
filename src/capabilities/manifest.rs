//! Manifest files - YAML-declared endpoint metadata for compiled modules.
//!
//! A manifest lets operators add or retune endpoints of an already compiled
//! module (new paths served by the same handler, new descriptions,
//! categories, examples) by dropping a file into a manifest directory and
//! triggering a reload. The file names the module whose handler serves the
//! endpoints; it never introduces new code.
//!
//! # Example YAML
//!
//! ```yaml
//! module: downloader
//! endpoints:
//!   - path: /downloader/tiktok
//!     method: GET, POST
//!     name: TikTok Downloader
//!     category: downloader
//!     parameters:
//!       - { name: url, type: string, required: true }
//!     responseBinary: false
//!     priority: 5
//! ```
//!
//! A file may also carry a single `endpoint:` entry instead of a list.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::descriptor::{CapabilityDescriptor, ExampleSpec, ParameterSpec, ResponseKind};
use super::error::ModuleLoadError;

/// A manifest file as parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Compiled module whose handler serves these endpoints.
    pub module: String,

    #[serde(default)]
    pub endpoints: Vec<ManifestEndpoint>,

    #[serde(default)]
    pub endpoint: Option<ManifestEndpoint>,
}

/// One endpoint entry, in the external descriptor shape.
///
/// Every field is optional at parse time; missing paths and names are caught
/// by the normalizer and counted, not rejected here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestEndpoint {
    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub method: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,

    #[serde(default)]
    pub examples: Vec<ExampleSpec>,

    #[serde(rename = "responseBinary", alias = "response_binary", default)]
    pub response_binary: bool,

    #[serde(default)]
    pub priority: i32,
}

impl ManifestFile {
    /// Parse a manifest from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Read and parse a manifest file, mapping failures to [`ModuleLoadError`].
    pub fn from_yaml_file(path: &Path) -> Result<Self, ModuleLoadError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| ModuleLoadError::Io {
            path: display.clone(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content).map_err(|e| ModuleLoadError::Parse {
            path: display,
            message: e.to_string(),
        })
    }

    /// Convert every entry into a descriptor owned by `self.module`.
    pub fn into_descriptors(self) -> Vec<CapabilityDescriptor> {
        let module = self.module;
        self.endpoints
            .into_iter()
            .chain(self.endpoint)
            .map(|entry| entry.into_descriptor(&module))
            .collect()
    }
}

impl ManifestEndpoint {
    fn into_descriptor(self, module: &str) -> CapabilityDescriptor {
        CapabilityDescriptor {
            path: self.path,
            method: self.method,
            name: self.name,
            description: self.description,
            category: self.category,
            parameters: self.parameters,
            examples: self.examples,
            response_kind: if self.response_binary {
                ResponseKind::Binary
            } else {
                ResponseKind::Json
            },
            priority: self.priority,
            source_module_id: module.to_string(),
        }
    }
}

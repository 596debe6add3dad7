//! Artifact configuration produced by the layer builder

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactConfig {
    pub entrypoint: String,
    #[serde(default)]
    pub runtime_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_flags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importmap: Option<Importmap>,
    /// Toolchain versions the artifact was built with
    #[serde(default)]
    pub built_with: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Importmap {
    pub imports: BTreeMap<String, String>,
}

impl Importmap {
    /// Render as an inline `--importmap` flag carrying a base64 data URL.
    ///
    /// Values are embedded as written; `./`-relative targets are not resolved
    /// against any working directory.
    pub fn to_flag(&self) -> String {
        let json = serde_json::json!({ "imports": self.imports });
        format!(
            "--importmap=data:application/importmap+json;base64,{}",
            STANDARD.encode(json.to_string())
        )
    }
}

impl ArtifactConfig {
    /// Runtime flags followed by the importmap flag, if any
    pub fn launch_flags(&self) -> Vec<String> {
        let mut flags = self.runtime_flags.clone();
        if let Some(importmap) = &self.importmap {
            flags.push(importmap.to_flag());
        }
        flags
    }
}

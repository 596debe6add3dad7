//! Configuration for local storage and registry credentials

use crate::error::{OciError, Result};
use crate::store::LocalDiskStore;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const DATA_DIR_VAR: &str = "OCI_EJECTOR_DATA_DIR";
pub const DOCKER_CONFIG_VAR: &str = "DOCKER_CONFIG";

/// Root holding built artifacts
pub const ARTIFACT_ROOT: &str = "storage";
/// Root holding pulled base images
pub const BASE_ROOT: &str = "base-storage";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    #[serde(default = "default_artifact_root")]
    pub artifact_root: String,
    #[serde(default = "default_base_root")]
    pub base_root: String,
}

fn default_artifact_root() -> String {
    ARTIFACT_ROOT.to_string()
}

fn default_base_root() -> String {
    BASE_ROOT.to_string()
}

impl StorageConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            artifact_root: default_artifact_root(),
            base_root: default_base_root(),
        }
    }

    /// Resolve from `OCI_EJECTOR_DATA_DIR`, else `$HOME/.local/share/denodir-oci`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(DATA_DIR_VAR).filter(|d| !d.is_empty()) {
            return Ok(Self::new(dir));
        }
        let home = lookup("HOME").filter(|h| !h.is_empty()).ok_or_else(|| {
            OciError::Unsupported(format!("neither {} nor HOME is set", DATA_DIR_VAR))
        })?;
        Ok(Self::new(
            Path::new(&home).join(".local").join("share").join("denodir-oci"),
        ))
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.data_dir.join(&self.artifact_root)
    }

    pub fn base_path(&self) -> PathBuf {
        self.data_dir.join(&self.base_root)
    }

    pub async fn open_artifact_store(&self) -> Result<LocalDiskStore> {
        LocalDiskStore::open(self.artifact_path()).await
    }

    pub async fn open_base_store(&self) -> Result<LocalDiskStore> {
        LocalDiskStore::open(self.base_path()).await
    }
}

/// Location of the Docker client config: `$DOCKER_CONFIG/config.json`, else
/// `$HOME/.docker/config.json`
pub fn docker_config_path() -> Option<PathBuf> {
    docker_config_path_from(|key| env::var(key).ok())
}

pub fn docker_config_path_from<F>(lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup(DOCKER_CONFIG_VAR).filter(|d| !d.is_empty()) {
        return Some(Path::new(&dir).join("config.json"));
    }
    lookup("HOME")
        .filter(|h| !h.is_empty())
        .map(|home| Path::new(&home).join(".docker").join("config.json"))
}

//! Image configuration documents and the writer used to rewrite them
//!
//! Only the fields the compositor touches are typed. Everything else in the
//! base image's config is carried through `extra` maps so a rewrite never
//! drops labels, working directories, users, ports and the like.

use crate::digest::Digest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default)]
    pub rootfs: RootFs,
    #[serde(default)]
    pub history: Vec<History>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    #[serde(default)]
    pub diff_ids: Vec<Digest>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            fs_type: "layers".to_string(),
            diff_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_layer: Option<bool>,
}

impl History {
    pub fn is_empty_layer(&self) -> bool {
        self.empty_layer.unwrap_or(false)
    }
}

/// Applies changes to a base image config, recording a history entry for each
pub struct ConfigWriter {
    config: ImageConfig,
    comment: String,
    created: String,
}

impl ConfigWriter {
    /// `comment` tags every history entry this writer appends; `created` is
    /// the timestamp stamped on them and on the config itself.
    pub fn new(config: ImageConfig, comment: impl Into<String>, created: impl Into<String>) -> Self {
        Self {
            config,
            comment: comment.into(),
            created: created.into(),
        }
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.config.config.env.as_ref()?.iter().find_map(|entry| {
            let (k, v) = entry.split_once('=')?;
            (k == key).then_some(v)
        })
    }

    /// Set one environment variable, leaving every other entry untouched
    pub fn set_env(&mut self, key: &str, value: &str) {
        if self.env(key) == Some(value) {
            return;
        }
        let entry = format!("{}={}", key, value);
        let env = self.config.config.env.get_or_insert_with(Vec::new);
        let prefix = format!("{}=", key);
        match env.iter_mut().find(|e| e.starts_with(&prefix)) {
            Some(existing) => *existing = entry.clone(),
            None => env.push(entry.clone()),
        }
        self.push_history(format!("ENV {}", entry), true);
    }

    /// Append a filesystem layer's diff-ID together with its history entry
    pub fn record_diff_layer(&mut self, created_by: impl Into<String>, diff_id: Digest) {
        self.config.rootfs.diff_ids.push(diff_id);
        self.push_history(created_by.into(), false);
    }

    pub fn set_entrypoint(&mut self, entrypoint: Vec<String>) {
        if self.config.config.entrypoint.as_ref() == Some(&entrypoint) {
            return;
        }
        let rendered = render_exec_form(&entrypoint);
        self.config.config.entrypoint = Some(entrypoint);
        self.push_history(format!("ENTRYPOINT {}", rendered), true);
    }

    pub fn set_command(&mut self, command: Vec<String>) {
        if self.config.config.cmd.as_ref() == Some(&command) {
            return;
        }
        let rendered = render_exec_form(&command);
        self.config.config.cmd = Some(command);
        self.push_history(format!("CMD {}", rendered), true);
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn finish(mut self) -> ImageConfig {
        self.config.created = Some(self.created);
        self.config
    }

    fn push_history(&mut self, created_by: String, empty_layer: bool) {
        self.config.history.push(History {
            created: Some(self.created.clone()),
            created_by: Some(created_by),
            author: None,
            comment: Some(self.comment.clone()),
            empty_layer: empty_layer.then_some(true),
        });
    }
}

fn render_exec_form(args: &[String]) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| format!("{:?}", args))
}

//! Stack manifest loading.
//!
//! A manifest is a small YAML file describing one deployment:
//!
//! ```yaml
//! name: demo-app
//! template: templates/app.yml
//! intent: create
//! parameters:
//!   Env: prod
//! tags:
//!   team: platform
//! data:
//!   image: registry/app:1.2.3
//! ```
//!
//! The template path is resolved relative to the manifest file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::{ChangeSetType, Parameter, Tag};

use super::orchestrator::DeployRequest;

/// A deployment described in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackManifest {
    /// Stack name
    pub name: String,

    /// Template file, relative to the manifest
    pub template: String,

    /// Create a new stack or update an existing one
    #[serde(default)]
    pub intent: ChangeSetType,

    /// Stack parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Values substituted into the template
    #[serde(default)]
    pub data: HashMap<String, String>,

    /// Directory the manifest was loaded from
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl StackManifest {
    /// Load a manifest from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest file: {}", path.display()))?;

        let mut manifest = Self::from_yaml(&content)?;
        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(manifest)
    }

    /// Parse a manifest from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse manifest YAML")
    }

    /// Validate the manifest
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Stack name cannot be empty");
        }

        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            anyhow::bail!(
                "Stack name '{}' may only contain letters, digits and hyphens",
                self.name
            );
        }

        if self.template.trim().is_empty() {
            anyhow::bail!("Stack '{}' has no template", self.name);
        }

        for key in self.parameters.keys().chain(self.tags.keys()) {
            if key.is_empty() {
                anyhow::bail!("Stack '{}' has an empty parameter or tag key", self.name);
            }
        }

        Ok(())
    }

    /// Full path of the template file
    pub fn template_path(&self) -> PathBuf {
        self.base_dir.join(&self.template)
    }

    /// Build the deploy request for this manifest
    pub fn to_request(&self) -> DeployRequest {
        DeployRequest {
            stack: self.name.clone(),
            template: self.template.clone(),
            data: self.data.clone(),
            parameters: self
                .parameters
                .iter()
                .map(|(k, v)| Parameter::new(k, v))
                .collect(),
            tags: self.tags.iter().map(|(k, v)| Tag::new(k, v)).collect(),
            intent: self.intent,
        }
    }
}

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::links::DEFAULT_TARGET_EXTENSION;
use crate::migrate::{DEFAULT_CONVERT_MESSAGE, DEFAULT_RENAME_MESSAGE, PagePolicy};

pub const DEFAULT_CONFIG_FILE: &str = "trac2gitwiki.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    #[serde(default)]
    pub trac: TracSection,
    #[serde(default)]
    pub commits: CommitsSection,
    #[serde(default)]
    pub pages: PagesSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TracSection {
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CommitsSection {
    pub default_comment: Option<String>,
    pub default_email_host: Option<String>,
    pub rename_message: Option<String>,
    pub convert_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PagesSection {
    pub target_extension: Option<String>,
    pub admin_prefixes: Option<Vec<String>>,
    pub admin_exceptions: Option<Vec<String>>,
    pub replay_admin_history: Option<bool>,
}

impl MigrationConfig {
    pub fn rename_message(&self) -> String {
        non_empty(self.commits.rename_message.as_deref())
            .unwrap_or(DEFAULT_RENAME_MESSAGE)
            .to_string()
    }

    pub fn convert_message(&self) -> String {
        non_empty(self.commits.convert_message.as_deref())
            .unwrap_or(DEFAULT_CONVERT_MESSAGE)
            .to_string()
    }

    /// Extension appended to converted pages, always with a leading dot.
    pub fn target_extension(&self) -> String {
        match non_empty(self.pages.target_extension.as_deref()) {
            Some(ext) if ext.starts_with('.') => ext.to_string(),
            Some(ext) => format!(".{ext}"),
            None => DEFAULT_TARGET_EXTENSION.to_string(),
        }
    }

    pub fn page_policy(&self) -> PagePolicy {
        let defaults = PagePolicy::default();
        PagePolicy {
            admin_prefixes: self
                .pages
                .admin_prefixes
                .clone()
                .unwrap_or(defaults.admin_prefixes),
            admin_exceptions: self
                .pages
                .admin_exceptions
                .clone()
                .unwrap_or(defaults.admin_exceptions),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Load and parse a config file. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrationConfig> {
    if !config_path.exists() {
        return Ok(MigrationConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrationConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

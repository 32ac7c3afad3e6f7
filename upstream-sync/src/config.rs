//! Configuration loading.
//!
//! The tool is configured from a YAML file, conventionally
//! `.github/upstream-sync.yml` in the downstream repository.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("could not read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the config file as YAML.
    #[error("could not parse config file '{path}': {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Settings describing the downstream repository.
#[derive(Debug, Clone, Deserialize)]
pub struct Downstream {
    /// Create pull requests as drafts.
    #[serde(default)]
    pub create_draft_prs: bool,

    /// Downstream repository name on GitHub, `owner/repo`.
    pub github_repo_name: String,

    /// Path to the local clone of the downstream repository.
    #[serde(default = "default_local_repo_path")]
    pub local_repo_path: String,

    /// Name of the downstream main branch.
    #[serde(default = "default_main_branch")]
    pub main_branch: String,

    /// Cap on open tracking issues and PRs. -1 means unlimited.
    #[serde(default = "default_max_open_items")]
    pub max_open_items: i64,

    /// Upstream author names whose commits are never cherry-picked.
    #[serde(default)]
    pub ignore_authors: Vec<String>,

    /// Path of the OWNERS file, relative to the local clone.
    #[serde(default = "default_owners_file")]
    pub owners_file: String,
}

/// Settings for the diff between upstream and downstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Diff {
    /// Only consider commits on or after this instant.
    #[serde(default)]
    pub commits_since: Option<DateTime<Utc>>,
}

/// Settings for the sync run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sync {
    /// Commands to run inside the working tree between a successful
    /// cherry-pick and the commit, each as an argv list.
    #[serde(default)]
    pub before_commit: Vec<Vec<String>>,
}

/// Settings describing the upstream repository.
#[derive(Debug, Clone, Deserialize)]
pub struct Upstream {
    /// Name of the upstream reference to walk.
    #[serde(default = "default_main_branch", rename = "ref")]
    pub git_ref: String,

    /// URL of the upstream repository.
    pub url: String,
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Markup key used in trailers, issue bodies and PR bodies.
    #[serde(default = "default_commit_markup")]
    pub commit_markup: String,

    pub downstream: Downstream,

    #[serde(default)]
    pub diff: Diff,

    /// Verbosity passed to the log filter when no override is given.
    #[serde(default)]
    pub log_level: i64,

    #[serde(default)]
    pub sync: Sync,

    pub upstream: Upstream,
}

fn default_commit_markup() -> String {
    "Upstream-Commit".to_string()
}

fn default_local_repo_path() -> String {
    ".".to_string()
}

fn default_main_branch() -> String {
    "main".to_string()
}

fn default_max_open_items() -> i64 {
    -1
}

fn default_owners_file() -> String {
    "OWNERS".to_string()
}

impl Config {
    /// Reads and parses the configuration file.
    ///
    /// # Errors
    ///
    /// I/O and parse errors are fatal for the caller.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
            path: path.display().to_string(),
            source,
        })
    }
}

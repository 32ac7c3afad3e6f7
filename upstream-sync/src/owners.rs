//! OWNERS file resolution.
//!
//! The downstream repository carries a YAML OWNERS file listing approvers and
//! reviewers. The assignment engine uses it to route tracking issues to
//! responsible people.

use rand::Rng;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while resolving owners.
#[derive(Debug, Error)]
pub enum OwnersError {
    /// Failed to read the OWNERS file.
    #[error("could not read owners file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the OWNERS file as YAML.
    #[error("could not parse owners file '{path}': {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// The approvers list is empty; random selection is impossible.
    #[error("there are no approvers in owners")]
    NoApprovers,
}

/// Parsed contents of an OWNERS file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Owners {
    /// Logins eligible for issue assignment.
    #[serde(default)]
    pub approvers: Vec<String>,

    /// Logins listed as reviewers.
    #[serde(default)]
    pub reviewers: Vec<String>,

    /// Component this OWNERS file belongs to.
    #[serde(default)]
    pub component: String,
}

impl Owners {
    /// Loads owners from a YAML file. Read once per run, read-only afterward.
    ///
    /// # Errors
    ///
    /// I/O and parse errors are fatal for the caller.
    pub fn from_file(path: &Path) -> Result<Self, OwnersError> {
        let contents = std::fs::read_to_string(path).map_err(|source| OwnersError::Io {
            path: path.display().to_string(),
            source,
        })?;

        serde_yaml::from_str(&contents).map_err(|source| OwnersError::Yaml {
            path: path.display().to_string(),
            source,
        })
    }

    /// Returns true if `login` is listed as an approver.
    pub fn is_approver(&self, login: &str) -> bool {
        self.approvers.iter().any(|a| a == login)
    }

    /// Picks an approver uniformly at random.
    ///
    /// # Errors
    ///
    /// Returns [`OwnersError::NoApprovers`] when the approvers list is
    /// empty. An empty list is a valid, handled state, never a panic.
    pub fn random_approver(&self, rng: &mut impl Rng) -> Result<&str, OwnersError> {
        if self.approvers.is_empty() {
            return Err(OwnersError::NoApprovers);
        }

        let idx = rng.gen_range(0..self.approvers.len());
        Ok(&self.approvers[idx])
    }
}

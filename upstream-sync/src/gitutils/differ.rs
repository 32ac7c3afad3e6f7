//! Computes upstream commits not yet represented downstream.

use super::{Commit, GitError, GitOps};
use crate::config::Upstream;
use crate::intents::{IntentsError, IntentsSource};
use crate::UPSTREAM_REMOTE_NAME;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

/// Errors that can occur while diffing upstream against downstream.
///
/// Any failure is fatal for the whole diff operation; there is no partial
/// result.
#[derive(Debug, Error)]
pub enum DiffError {
    /// Local git failure (remote recreation, fetch, ref resolution, walk).
    #[error(transparent)]
    Git(#[from] GitError),

    /// Failure while gathering downstream intents.
    #[error("could not get downstream commit intents: {0}")]
    Intents(#[from] IntentsError),
}

/// Computes the ordered list of upstream commits absent from downstream.
#[async_trait(?Send)]
pub trait Differ {
    /// Returns the upstream commits since `since` whose hashes appear in no
    /// downstream intent. Result order follows the native history walk
    /// (newest first); callers needing causal order must sort explicitly.
    async fn get_missing_commits(
        &self,
        git: &dyn GitOps,
        since: Option<DateTime<Utc>>,
        main_branch: &str,
        upstream: &Upstream,
    ) -> Result<Vec<Commit>, DiffError>;
}

/// Production differ: merges the three intent sources, refreshes the
/// upstream remote and walks its history.
pub struct DifferImpl {
    intents: Box<dyn IntentsSource>,
}

impl DifferImpl {
    /// Creates a differ over the given intents source.
    pub fn new(intents: Box<dyn IntentsSource>) -> Self {
        Self { intents }
    }
}

#[async_trait(?Send)]
impl Differ for DifferImpl {
    async fn get_missing_commits(
        &self,
        git: &dyn GitOps,
        since: Option<DateTime<Utc>>,
        main_branch: &str,
        upstream: &Upstream,
    ) -> Result<Vec<Commit>, DiffError> {
        let downstream_tip = git.branch_tip(main_branch)?;

        let intents = self
            .intents
            .downstream_intents(git, downstream_tip, since)
            .await?;

        git.recreate_remote(UPSTREAM_REMOTE_NAME, &upstream.url)?;
        git.fetch_remote(UPSTREAM_REMOTE_NAME)?;

        let from = git.remote_tip(UPSTREAM_REMOTE_NAME, &upstream.git_ref)?;

        let mut missing = Vec::new();

        for commit in git.log_since(from, since)? {
            match intents.get(&commit.hash) {
                Some(origin) => {
                    info!(sha = %commit.hash, origin, "Upstream commit found in downstream")
                }
                None => {
                    info!(sha = %commit.hash, "Upstream commit not in downstream");
                    missing.push(commit);
                }
            }
        }

        Ok(missing)
    }
}

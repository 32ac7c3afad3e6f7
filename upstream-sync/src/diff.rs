//! The diff engine: a read-only audit of what sync would process.

use crate::config;
use crate::gitutils::{Commit, DiffError, Differ, GitOps};
use chrono::{DateTime, Utc};
use tracing::info;

/// One diff run over a single downstream clone. Mutates nothing except the
/// upstream remote of the local clone.
pub struct Diff {
    pub differ: Box<dyn Differ>,
    pub git: Box<dyn GitOps>,
    pub main_branch: String,
    pub upstream: config::Upstream,
    pub since: Option<DateTime<Utc>>,
}

impl Diff {
    /// Logs and returns the upstream commits missing downstream, newest
    /// first.
    pub async fn run(&self) -> Result<Vec<Commit>, DiffError> {
        let missing = self
            .differ
            .get_missing_commits(
                self.git.as_ref(),
                self.since,
                &self.main_branch,
                &self.upstream,
            )
            .await?;

        for commit in &missing {
            info!(sha = %commit.hash, summary = commit.summary(), "Missing downstream");
        }

        info!(count = missing.len(), "Commits missing downstream");

        Ok(missing)
    }
}

//! The remote-branch janitor.
//!
//! Work branches survive on origin after their PRs are merged or closed.
//! This deletes every origin branch carrying the tool's prefix in one push
//! of deletion refspecs.

use crate::gitutils::{GitError, GitOps};
use crate::BRANCH_PREFIX;
use tracing::info;

/// One cleanup run against the origin remote.
pub struct DeleteRemoteBranches {
    pub git: Box<dyn GitOps>,
    pub token: String,
    pub dry_run: bool,
}

impl DeleteRemoteBranches {
    /// Deletes every origin branch whose name starts with the tool prefix.
    pub fn run(&self) -> Result<(), GitError> {
        let branches: Vec<String> = self
            .git
            .list_remote_branches(&self.token)?
            .into_iter()
            .filter(|branch| branch.starts_with(BRANCH_PREFIX))
            .collect();

        for branch in &branches {
            info!(branch, "Remote branch marked for deletion");
        }

        if branches.is_empty() {
            info!("No remote branches to delete");
            return Ok(());
        }

        if self.dry_run {
            info!(count = branches.len(), "Dry run; not deleting");
            return Ok(());
        }

        self.git.delete_remote_branches(&branches, &self.token)
    }
}

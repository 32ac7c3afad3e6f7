//! The undraft engine.
//!
//! When draft PRs pile up, this marks exactly one ready for review per run:
//! the one whose cherry-picked upstream commit is oldest by committer time,
//! so reviews happen in causal order.

use crate::config;
use crate::github::{GitHubError, PrTracker, TrackingPr};
use crate::gitutils::{GitError, GitOps};
use crate::markup::Finder;
use crate::UPSTREAM_REMOTE_NAME;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

/// Errors that abort an undraft run.
#[derive(Debug, Error)]
pub enum UndraftError {
    /// A local git operation failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// A GitHub operation failed.
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    /// The PR to undraft came without a GraphQL node id.
    #[error("PR #{number} has no node id")]
    MissingNodeId { number: u64 },
}

/// One undraft run over the open tracking pull requests.
pub struct Undraft {
    pub prs: Box<dyn PrTracker>,
    pub git: Box<dyn GitOps>,
    pub finder: Finder,
    pub upstream: config::Upstream,
    pub dry_run: bool,
}

impl Undraft {
    /// Marks the oldest draft tracking PR ready for review, if any.
    pub async fn run(&self) -> Result<(), UndraftError> {
        // Referenced upstream commits must be resolvable locally to read
        // their committer times.
        self.git
            .recreate_remote(UPSTREAM_REMOTE_NAME, &self.upstream.url)?;
        self.git.fetch_remote(UPSTREAM_REMOTE_NAME)?;

        let open = self.prs.list_open_tracking().await?;

        let mut oldest: Option<(DateTime<Utc>, &TrackingPr)> = None;

        for pr in &open {
            if !pr.draft {
                continue;
            }

            let shas = pr
                .body
                .as_deref()
                .map(|body| self.finder.find_shas(body))
                .unwrap_or_default();

            if shas.is_empty() {
                info!(number = pr.number, "Draft PR references no commit; skipping");
                continue;
            }

            // A PR is as old as the oldest commit it references.
            for sha in shas {
                let when = self.git.commit_by_hash(sha)?.committer_when;

                if oldest.map_or(true, |(best, _)| when < best) {
                    oldest = Some((when, pr));
                }
            }
        }

        let Some((when, pr)) = oldest else {
            info!("No draft tracking PRs");
            return Ok(());
        };

        info!(number = pr.number, commit_time = %when, "Oldest draft PR");

        if self.dry_run {
            info!("Dry run; not marking ready for review");
            return Ok(());
        }

        let node_id = pr
            .node_id
            .as_deref()
            .ok_or(UndraftError::MissingNodeId { number: pr.number })?;

        self.prs.make_ready(node_id).await?;

        Ok(())
    }
}

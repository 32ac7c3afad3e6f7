//! Commit intent reconciliation.
//!
//! An intent records that a given upstream commit is already represented
//! downstream, together with a human-readable origin (a downstream commit, an
//! issue URL or a PR URL). Intents come from three independent sources: the
//! local downstream history, GitHub issues carrying the tracking label, and
//! open GitHub pull requests.

use crate::github::RepoName;
use crate::gitutils::{GitError, GitOps};
use crate::markup::Finder;
use crate::TRACKING_LABEL;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use git2::Oid;
use octocrab::{models, params, Octocrab};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Maps an upstream commit hash to the origin asserting it is already
/// represented downstream. The origin is informational only; reconciliation
/// depends solely on key presence.
pub type CommitIntents = HashMap<Oid, String>;

/// Left-to-right union of intent sets. Later sets win on key collision,
/// which only affects the cosmetic origin string.
pub fn merge_commit_intents(sets: impl IntoIterator<Item = CommitIntents>) -> CommitIntents {
    let mut merged = CommitIntents::new();

    for set in sets {
        merged.extend(set);
    }

    merged
}

/// Errors that can occur while gathering intents.
#[derive(Debug, Error)]
pub enum IntentsError {
    /// GitHub API error.
    #[error("GitHub API error: {0}")]
    GitHub(#[from] octocrab::Error),

    /// Local git error.
    #[error(transparent)]
    Git(#[from] GitError),
}

/// Produces the merged set of downstream intents.
///
/// Injected into the differ so it can be substituted in tests.
#[async_trait(?Send)]
pub trait IntentsSource {
    /// Merges the three intent sources for the downstream history reachable
    /// from `from`, bounded below by `since`.
    async fn downstream_intents(
        &self,
        git: &dyn GitOps,
        from: Oid,
        since: Option<DateTime<Utc>>,
    ) -> Result<CommitIntents, IntentsError>;
}

/// Gathers intents from the local clone and the GitHub API.
pub struct IntentsGetter {
    octocrab: Octocrab,
    finder: Finder,
    repo_name: RepoName,
}

impl IntentsGetter {
    /// Creates a getter for the given downstream repository.
    pub fn new(octocrab: Octocrab, finder: Finder, repo_name: RepoName) -> Self {
        Self {
            octocrab,
            finder,
            repo_name,
        }
    }

    /// Walks the downstream history from `from` back to `since` and records
    /// every hash referenced by a markup trailer in a commit message, with
    /// origin `commit <downstream-hash>`.
    ///
    /// # Errors
    ///
    /// Local git failures are fatal for the whole gathering operation.
    pub fn from_local_git_repo(
        &self,
        git: &dyn GitOps,
        from: Oid,
        since: Option<DateTime<Utc>>,
    ) -> Result<CommitIntents, IntentsError> {
        let mut intents = CommitIntents::new();

        for commit in git.log_since(from, since)? {
            debug!(sha = %commit.hash, "Processing downstream commit");

            for sha in self.finder.find_shas(&commit.message) {
                debug!(%sha, "Adding SHA");
                intents.insert(sha, format!("commit {}", commit.hash));
            }
        }

        Ok(intents)
    }

    /// Lists all issues (open and closed) carrying the tracking label and
    /// records every hash referenced in their bodies, with origin = issue
    /// URL. Paginates to exhaustion.
    ///
    /// # Errors
    ///
    /// API failures are fatal for the whole gathering operation.
    pub async fn from_github_issues(&self) -> Result<CommitIntents, IntentsError> {
        let labels = vec![TRACKING_LABEL.to_string()];

        let mut page = self
            .octocrab
            .issues(&self.repo_name.owner, &self.repo_name.repo)
            .list()
            .state(params::State::All)
            .labels(&labels)
            .per_page(100)
            .send()
            .await?;

        let mut intents = CommitIntents::new();

        loop {
            for issue in &page.items {
                collect_from_body(
                    &self.finder,
                    &issue.html_url.to_string(),
                    issue.body.as_deref(),
                    &mut intents,
                );
            }

            page = match self
                .octocrab
                .get_page::<models::issues::Issue>(&page.next)
                .await?
            {
                Some(next) => next,
                None => break,
            };
        }

        Ok(intents)
    }

    /// Lists open pull requests and records every hash referenced in their
    /// bodies, with origin = PR URL. Paginates to exhaustion.
    ///
    /// # Errors
    ///
    /// API failures are fatal for the whole gathering operation.
    pub async fn from_github_open_prs(&self) -> Result<CommitIntents, IntentsError> {
        let mut page = self
            .octocrab
            .pulls(&self.repo_name.owner, &self.repo_name.repo)
            .list()
            .state(params::State::Open)
            .per_page(100)
            .send()
            .await?;

        let mut intents = CommitIntents::new();

        loop {
            for pr in &page.items {
                let url = pr
                    .html_url
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();

                collect_from_body(&self.finder, &url, pr.body.as_deref(), &mut intents);
            }

            page = match self
                .octocrab
                .get_page::<models::pulls::PullRequest>(&page.next)
                .await?
            {
                Some(next) => next,
                None => break,
            };
        }

        Ok(intents)
    }
}

/// Records every trailer-referenced hash of one issue or PR body.
fn collect_from_body(finder: &Finder, url: &str, body: Option<&str>, intents: &mut CommitIntents) {
    info!(url, "Processing item");

    let Some(body) = body else {
        info!(url, "Body empty; skipping");
        return;
    };

    for sha in finder.find_shas(body) {
        debug!(%sha, "Adding SHA");
        intents.insert(sha, url.to_string());
    }
}

#[async_trait(?Send)]
impl IntentsSource for IntentsGetter {
    async fn downstream_intents(
        &self,
        git: &dyn GitOps,
        from: Oid,
        since: Option<DateTime<Utc>>,
    ) -> Result<CommitIntents, IntentsError> {
        let log_intents = self.from_local_git_repo(git, from, since)?;
        let issue_intents = self.from_github_issues().await?;
        let pr_intents = self.from_github_open_prs().await?;

        Ok(merge_commit_intents([
            log_intents,
            issue_intents,
            pr_intents,
        ]))
    }
}

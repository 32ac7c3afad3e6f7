//! GitHub API surface.
//!
//! The engines talk to GitHub through the capability traits defined here;
//! the `*Helper` types implement them on top of octocrab.

mod issues;
mod prs;
mod users;

pub use issues::IssueHelper;
pub use prs::PrHelper;
pub use users::UserHelper;

use crate::gitutils::{CherryPickError, Commit};
use crate::templates::TemplateError;
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Errors that can occur while talking to GitHub.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// Underlying API error.
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),

    /// Rendering an issue or PR body failed.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The API answered, but not with what was asked for.
    #[error("unexpected reply from GitHub: {0}")]
    UnexpectedReply(String),
}

/// Errors that can occur while parsing a repository name.
#[derive(Debug, Error)]
pub enum RepoNameError {
    /// Not `owner/repo` and not a repository URL.
    #[error("invalid repository name '{0}'")]
    Invalid(String),
}

/// A GitHub repository coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoName {
    pub owner: String,
    pub repo: String,
}

impl RepoName {
    /// Parses `owner/repo` or a repository URL such as
    /// `https://github.com/owner/repo`.
    pub fn parse(input: &str) -> Result<Self, RepoNameError> {
        let path = if input.contains("://") {
            let url = Url::parse(input).map_err(|_| RepoNameError::Invalid(input.to_string()))?;
            url.path().trim_matches('/').to_string()
        } else {
            input.trim_matches('/').to_string()
        };

        let path = path.strip_suffix(".git").unwrap_or(&path);

        match path.split('/').collect::<Vec<_>>().as_slice() {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok(Self {
                owner: (*owner).to_string(),
                repo: (*repo).to_string(),
            }),
            _ => Err(RepoNameError::Invalid(input.to_string())),
        }
    }
}

impl std::fmt::Display for RepoName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// An issue carrying the tracking label.
#[derive(Debug, Clone)]
pub struct TrackingIssue {
    pub number: u64,
    pub url: String,
    pub body: Option<String>,
    pub assignees: Vec<String>,
    /// True when the item is really a pull request surfaced through the
    /// issues API.
    pub is_pr: bool,
}

/// A pull request carrying the tracking label.
#[derive(Debug, Clone)]
pub struct TrackingPr {
    pub number: u64,
    pub url: String,
    pub body: Option<String>,
    /// GraphQL node id, needed to flip the draft state.
    pub node_id: Option<String>,
    pub draft: bool,
}

/// A freshly created issue or pull request.
#[derive(Debug, Clone)]
pub struct CreatedItem {
    pub number: u64,
    pub url: String,
}

/// Issue-side operations the engines need.
#[async_trait(?Send)]
pub trait IssueTracker {
    /// Creates a tracking issue for a failed cherry-pick. The body carries
    /// the markup trailer so later runs reconcile the commit as tracked.
    async fn create_tracking_issue(
        &self,
        commit: &Commit,
        error: &CherryPickError,
        upstream_url: &str,
    ) -> Result<CreatedItem, GitHubError>;

    /// Lists open items carrying the tracking label. Pull requests surfaced
    /// through the issues API are dropped unless `include_prs` is set.
    async fn list_open_tracking(&self, include_prs: bool)
        -> Result<Vec<TrackingIssue>, GitHubError>;

    /// Assigns users to an issue.
    async fn assign(&self, number: u64, logins: &[String]) -> Result<(), GitHubError>;

    /// Posts a comment on an issue.
    async fn comment(&self, number: u64, body: &str) -> Result<(), GitHubError>;
}

/// Pull-request-side operations the engines need.
#[async_trait(?Send)]
pub trait PrTracker {
    /// Creates a labeled pull request for a successful cherry-pick.
    async fn create(
        &self,
        head: &str,
        base: &str,
        upstream_url: &str,
        commit: &Commit,
        draft: bool,
    ) -> Result<CreatedItem, GitHubError>;

    /// Lists open pull requests carrying the tracking label.
    async fn list_open_tracking(&self) -> Result<Vec<TrackingPr>, GitHubError>;

    /// Marks a draft pull request as ready for review.
    async fn make_ready(&self, node_id: &str) -> Result<(), GitHubError>;
}

/// Resolves the GitHub login behind a commit.
#[async_trait(?Send)]
pub trait CommitAuthorLookup {
    /// Returns the login of the commit's author, or `None` when GitHub
    /// cannot attribute the commit to an account.
    async fn commit_author(&self, sha: &str) -> Result<Option<String>, GitHubError>;
}

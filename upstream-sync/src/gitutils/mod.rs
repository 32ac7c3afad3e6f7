//! Local git operations.
//!
//! Everything that touches the on-disk clone lives here: the [`GitOps`]
//! capability trait and its libgit2-backed implementation, the differ that
//! computes upstream commits missing downstream, and the cherry-picker.

mod cherry_pick;
mod differ;
pub(crate) mod helper;

pub use cherry_pick::{CherryPick, CherryPickError, CherryPicker};
pub use differ::{DiffError, Differ, DifferImpl};
pub use helper::GitHelper;

use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use git2::Oid;
use thiserror::Error;

/// Errors that can occur during local git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Underlying libgit2 error.
    #[error(transparent)]
    Git(#[from] git2::Error),

    /// A reference could not be resolved.
    #[error("could not resolve reference '{name}': {source}")]
    Reference {
        name: String,
        #[source]
        source: git2::Error,
    },

    /// A branch exists but points nowhere.
    #[error("branch '{name}' has no target")]
    UnbornBranch { name: String },
}

/// An owned snapshot of a commit, detached from the repository it was read
/// from. Immutable once read from history.
#[derive(Debug, Clone)]
pub struct Commit {
    /// Full object id.
    pub hash: Oid,

    /// Author name, preserved when the commit is reproduced downstream.
    pub author_name: String,

    /// Author email, preserved when the commit is reproduced downstream.
    pub author_email: String,

    /// Author timestamp with its original offset.
    pub author_when: DateTime<FixedOffset>,

    /// Committer timestamp, used to order candidates causally.
    pub committer_when: DateTime<Utc>,

    /// Full commit message.
    pub message: String,
}

impl Commit {
    /// Builds an owned snapshot from a libgit2 commit.
    pub fn from_git2(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        let when = author.when();

        let offset = FixedOffset::east_opt(when.offset_minutes() * 60)
            .unwrap_or_else(|| Utc.fix());

        let author_when = offset
            .timestamp_opt(when.seconds(), 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap().with_timezone(&offset));

        let committer_when = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());

        Self {
            hash: commit.id(),
            author_name: author.name().unwrap_or_default().to_string(),
            author_email: author.email().unwrap_or_default().to_string(),
            author_when,
            committer_when,
            message: commit.message().unwrap_or_default().to_string(),
        }
    }

    /// First line of the commit message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// Capabilities the engines need from the local clone.
///
/// The production implementation is [`GitHelper`]; tests substitute doubles.
/// All operations block the calling task; there is no concurrent mutation of
/// the working tree by design.
pub trait GitOps {
    /// Deletes any stale remote of the same name, then creates it anew
    /// pointing at `url`.
    fn recreate_remote(&self, name: &str, url: &str) -> Result<(), GitError>;

    /// Fetches a remote using its configured refspecs. An "already up to
    /// date" outcome is success.
    fn fetch_remote(&self, name: &str) -> Result<(), GitError>;

    /// Resolves the tip of a local branch.
    fn branch_tip(&self, branch: &str) -> Result<Oid, GitError>;

    /// Resolves the tip of `refs/remotes/<remote>/<refname>`.
    fn remote_tip(&self, remote: &str, refname: &str) -> Result<Oid, GitError>;

    /// Force-checks out a local branch and hard-resets the working tree to
    /// its tip.
    fn checkout_branch(&self, branch: &str) -> Result<(), GitError>;

    /// Deletes the branch if it exists, recreates it at `at` and checks it
    /// out.
    fn recreate_branch(&self, name: &str, at: Oid) -> Result<(), GitError>;

    /// Force-pushes a branch to origin, authenticating with `token`.
    /// Pushing an up-to-date branch is success.
    fn push_branch(&self, branch: &str, token: &str) -> Result<(), GitError>;

    /// Lists the short branch names present on origin.
    fn list_remote_branches(&self, token: &str) -> Result<Vec<String>, GitError>;

    /// Deletes branches on origin in a single push of deletion refspecs.
    fn delete_remote_branches(&self, branches: &[String], token: &str) -> Result<(), GitError>;

    /// Walks history from `from`, newest first, bounded below by `since`
    /// (inclusive, on committer time).
    fn log_since(
        &self,
        from: Oid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Commit>, GitError>;

    /// Commits everything staged in the working tree, preserving the
    /// original commit's author identity. Returns the new commit id.
    fn commit_staged(&self, original: &Commit, message: &str) -> Result<Oid, GitError>;

    /// Looks up a single commit by hash.
    fn commit_by_hash(&self, oid: Oid) -> Result<Commit, GitError>;
}

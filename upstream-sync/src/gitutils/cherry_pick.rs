//! Applies one upstream commit onto the current working tree.

use super::{Commit, GitError, GitOps};
use crate::process::{ExecError, Executor, ProcessError};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Errors that can occur while cherry-picking a commit.
#[derive(Debug, Error)]
pub enum CherryPickError {
    /// `git cherry-pick` failed; the captured process failure is returned
    /// unmodified, with no retry.
    #[error("error running git: {0}")]
    Pick(#[source] ExecError),

    /// A configured before-commit hook failed.
    #[error("could not run before-commit hook {index}: {source}")]
    Hook {
        index: usize,
        #[source]
        source: ExecError,
    },

    /// Committing the staged changes failed.
    #[error("could not commit: {0}")]
    Commit(#[from] GitError),
}

impl CherryPickError {
    /// Returns the captured external-command failure, if any. This is the
    /// canonical payload rendered into tracking issue bodies.
    pub fn process_error(&self) -> Option<&ProcessError> {
        match self {
            Self::Pick(e) | Self::Hook { source: e, .. } => e.process_error(),
            Self::Commit(_) => None,
        }
    }

    /// Returns true if the pick or a hook was killed by cancellation.
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Pick(e) | Self::Hook { source: e, .. } => e.is_canceled(),
            Self::Commit(_) => false,
        }
    }
}

/// Applies a commit's changes, runs hooks, and commits with a markup
/// trailer recording provenance.
#[async_trait(?Send)]
pub trait CherryPick {
    /// Cherry-picks `commit` onto the currently checked-out branch. The
    /// token is propagated into the external commands so an in-flight pick
    /// or hook observes cancellation.
    ///
    /// On success exactly one new commit exists. On failure the working
    /// tree is left partially applied; the next sync iteration's hard reset
    /// and branch recreation restore it.
    async fn run(
        &self,
        git: &dyn GitOps,
        workdir: &Path,
        commit: &Commit,
        cancel: &CancellationToken,
    ) -> Result<(), CherryPickError>;
}

/// Production cherry-picker, backed by the external `git` binary.
pub struct CherryPicker {
    markup: String,
    before_commit: Vec<Vec<String>>,
    executor: Executor,
}

impl CherryPicker {
    /// Creates a cherry-picker using `markup` as the trailer key and
    /// running `before_commit` hooks between apply and commit.
    pub fn new(markup: &str, before_commit: Vec<Vec<String>>) -> Self {
        Self {
            markup: markup.to_string(),
            before_commit,
            executor: Executor,
        }
    }
}

#[async_trait(?Send)]
impl CherryPick for CherryPicker {
    async fn run(
        &self,
        git: &dyn GitOps,
        workdir: &Path,
        commit: &Commit,
        cancel: &CancellationToken,
    ) -> Result<(), CherryPickError> {
        let sha = commit.hash.to_string();

        self.executor
            .run_command("git", workdir, &["cherry-pick", "-n", &sha], cancel)
            .await
            .map_err(CherryPickError::Pick)?;

        for (index, argv) in self.before_commit.iter().enumerate() {
            let Some((bin, args)) = argv.split_first() else {
                continue;
            };

            let args: Vec<&str> = args.iter().map(String::as_str).collect();

            self.executor
                .run_command(bin, workdir, &args, cancel)
                .await
                .map_err(|source| CherryPickError::Hook { index, source })?;
        }

        let message = format!(
            "{}\n\n{}: {}\n",
            commit.message.trim_end(),
            self.markup,
            sha
        );

        let new_sha = git.commit_staged(commit, &message)?;

        info!(sha = %sha, new_sha = %new_sha, "Cherry-picked commit");

        Ok(())
    }
}

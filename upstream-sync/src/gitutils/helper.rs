//! libgit2-backed implementation of [`GitOps`].

use super::{Commit, GitError, GitOps};
use chrono::{DateTime, Utc};
use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Cred, Direction, FetchOptions, IndexAddOption, Oid, PushOptions,
    RemoteCallbacks, Repository, ResetType, Signature, Time,
};
use std::path::Path;
use tracing::{debug, info};

use crate::APP_NAME;

/// Git operations against a single local clone.
///
/// The working tree is mutated in place across sync iterations; at most one
/// run may operate against a given clone at a time. That exclusion is the
/// caller's responsibility.
pub struct GitHelper {
    repo: Repository,
}

impl GitHelper {
    /// Wraps an already-opened repository.
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Opens the repository at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a git repository.
    pub fn open(path: &Path) -> Result<Self, GitError> {
        Ok(Self {
            repo: Repository::open(path)?,
        })
    }

    /// Access to the underlying repository.
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    fn committer(&self) -> Result<Signature<'static>, git2::Error> {
        // Prefer the identity configured in the clone; fall back to the tool
        // identity when none is set.
        self.repo
            .signature()
            .or_else(|_| Signature::now(APP_NAME, "upstream-sync@localhost"))
    }
}

fn auth_callbacks(token: &str) -> RemoteCallbacks<'static> {
    let token = token.to_string();

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username, _allowed| Cred::userpass_plaintext(&token, ""));

    callbacks
}

impl GitOps for GitHelper {
    fn recreate_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        if self.repo.find_remote(name).is_ok() {
            info!(remote = name, "Remote already exists; deleting");
            self.repo.remote_delete(name)?;
        }

        info!(remote = name, url, "Creating remote");
        self.repo.remote(name, url)?;

        Ok(())
    }

    fn fetch_remote(&self, name: &str) -> Result<(), GitError> {
        let mut remote = self.repo.find_remote(name)?;

        info!(remote = name, "Fetching remote");

        let mut options = FetchOptions::new();
        // Fetching a remote that is already up to date is a no-op success.
        remote.fetch(&[] as &[&str], Some(&mut options), None)?;

        Ok(())
    }

    fn branch_tip(&self, branch: &str) -> Result<Oid, GitError> {
        let b = self
            .repo
            .find_branch(branch, BranchType::Local)
            .map_err(|source| GitError::Reference {
                name: branch.to_string(),
                source,
            })?;

        b.get().target().ok_or_else(|| GitError::UnbornBranch {
            name: branch.to_string(),
        })
    }

    fn remote_tip(&self, remote: &str, refname: &str) -> Result<Oid, GitError> {
        let name = format!("refs/remotes/{remote}/{refname}");

        let reference = self
            .repo
            .find_reference(&name)
            .map_err(|source| GitError::Reference {
                name: name.clone(),
                source,
            })?;

        reference
            .resolve()?
            .target()
            .ok_or(GitError::UnbornBranch { name })
    }

    fn checkout_branch(&self, branch: &str) -> Result<(), GitError> {
        let refname = format!("refs/heads/{branch}");

        self.repo.set_head(&refname)?;
        self.repo
            .checkout_head(Some(CheckoutBuilder::new().force()))?;

        let head = self.repo.revparse_single("HEAD")?;
        self.repo.reset(&head, ResetType::Hard, None)?;

        Ok(())
    }

    fn recreate_branch(&self, name: &str, at: Oid) -> Result<(), GitError> {
        if let Ok(mut existing) = self.repo.find_branch(name, BranchType::Local) {
            debug!(branch = name, "Branch already exists; deleting");
            existing.delete()?;
        }

        let target = self.repo.find_commit(at)?;
        self.repo.branch(name, &target, true)?;

        self.checkout_branch(name)
    }

    fn push_branch(&self, branch: &str, token: &str) -> Result<(), GitError> {
        let mut remote = self.repo.find_remote("origin")?;

        let mut options = PushOptions::new();
        options.remote_callbacks(auth_callbacks(token));

        let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");

        info!(branch, "Pushing branch");
        // Pushing a branch that is already up to date is a no-op success.
        remote.push(&[refspec], Some(&mut options))?;

        Ok(())
    }

    fn list_remote_branches(&self, token: &str) -> Result<Vec<String>, GitError> {
        let mut remote = self.repo.find_remote("origin")?;

        let connection = remote.connect_auth(Direction::Fetch, Some(auth_callbacks(token)), None)?;

        let branches = connection
            .list()?
            .iter()
            .filter_map(|head| head.name().strip_prefix("refs/heads/"))
            .map(str::to_string)
            .collect();

        Ok(branches)
    }

    fn delete_remote_branches(&self, branches: &[String], token: &str) -> Result<(), GitError> {
        let mut remote = self.repo.find_remote("origin")?;

        let mut options = PushOptions::new();
        options.remote_callbacks(auth_callbacks(token));

        let refspecs: Vec<String> = branches
            .iter()
            .map(|branch| format!(":refs/heads/{branch}"))
            .collect();

        info!(count = refspecs.len(), "Deleting remote branches");
        remote.push(&refspecs, Some(&mut options))?;

        Ok(())
    }

    fn log_since(
        &self,
        from: Oid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Commit>, GitError> {
        let mut walk = self.repo.revwalk()?;
        walk.push(from)?;

        let mut commits = Vec::new();

        for oid in walk {
            let commit = self.repo.find_commit(oid?)?;
            let snapshot = Commit::from_git2(&commit);

            if let Some(cutoff) = since {
                if snapshot.committer_when < cutoff {
                    continue;
                }
            }

            commits.push(snapshot);
        }

        Ok(commits)
    }

    fn commit_staged(&self, original: &Commit, message: &str) -> Result<Oid, GitError> {
        let mut index = self.repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let parent = self.repo.head()?.peel_to_commit()?;

        let when = Time::new(
            original.author_when.timestamp(),
            original.author_when.offset().local_minus_utc() / 60,
        );
        let author = Signature::new(&original.author_name, &original.author_email, &when)?;
        let committer = self.committer()?;

        let new_commit = self.repo.commit(
            Some("HEAD"),
            &author,
            &committer,
            message,
            &tree,
            &[&parent],
        )?;

        info!(sha = %new_commit, "Successfully committed");

        Ok(new_commit)
    }

    fn commit_by_hash(&self, oid: Oid) -> Result<Commit, GitError> {
        Ok(Commit::from_git2(&self.repo.find_commit(oid)?))
    }
}

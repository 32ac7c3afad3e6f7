//! The sync engine.
//!
//! For every upstream commit not yet represented downstream, in causal
//! order: recreate a work branch off the main branch, cherry-pick the
//! commit, and either open a pull request (success) or a tracking issue
//! (failure). Both outcomes leave a markup trailer behind, so the next run
//! reconciles the commit as handled.

use crate::config;
use crate::github::{GitHubError, IssueTracker, PrTracker};
use crate::gitutils::{CherryPick, DiffError, Differ, GitError, GitOps};
use crate::templates::branch_name;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};
use tracing::Instrument;

/// Errors that abort a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The run was cancelled between commits.
    #[error("sync cancelled")]
    Canceled,

    /// The diff against upstream failed.
    #[error(transparent)]
    Diff(#[from] DiffError),

    /// A local git operation failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// A GitHub operation failed.
    #[error(transparent)]
    GitHub(#[from] GitHubError),
}

/// One sync run over a single downstream clone.
pub struct Sync {
    pub differ: Box<dyn Differ>,
    pub cherry_picker: Box<dyn CherryPick>,
    pub git: Box<dyn GitOps>,
    pub issues: Box<dyn IssueTracker>,
    pub prs: Box<dyn PrTracker>,
    pub workdir: PathBuf,
    pub token: String,
    pub dry_run: bool,
    pub downstream: config::Downstream,
    pub upstream: config::Upstream,
    pub since: Option<DateTime<Utc>>,
}

/// Remaining number of items the run may create. `None` means unlimited.
struct Budget(Option<u64>);

impl Budget {
    fn new(max_open_items: i64, open_items: usize) -> Self {
        if max_open_items < 0 {
            return Self(None);
        }

        let remaining = (max_open_items as u64).saturating_sub(open_items as u64);
        Self(Some(remaining))
    }

    fn exhausted(&self) -> bool {
        self.0 == Some(0)
    }

    fn consume(&mut self) {
        if let Some(remaining) = &mut self.0 {
            *remaining = remaining.saturating_sub(1);
        }
    }
}

impl Sync {
    /// Runs the sync to completion or until cancelled.
    ///
    /// Issue creation failures are logged and skipped; push and pull request
    /// creation failures abort the run.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), SyncError> {
        let mut missing = self
            .differ
            .get_missing_commits(
                self.git.as_ref(),
                self.since,
                &self.downstream.main_branch,
                &self.upstream,
            )
            .await?;

        // Oldest first, so downstream replays upstream causally. Equal
        // committer times are broken by hash for a deterministic order.
        missing.sort_by(|a, b| {
            a.committer_when
                .cmp(&b.committer_when)
                .then(a.hash.cmp(&b.hash))
        });

        info!(count = missing.len(), "Commits missing downstream");

        let mut budget = self.open_items_budget().await?;

        for commit in &missing {
            if budget.exhausted() {
                info!("Open item limit reached; stopping");
                break;
            }

            if self.downstream.ignore_authors.contains(&commit.author_name) {
                info!(sha = %commit.hash, author = %commit.author_name, "Ignoring commit");
                continue;
            }

            if cancel.is_cancelled() {
                info!("Cancellation requested; stopping");
                return Err(SyncError::Canceled);
            }

            let span = info_span!("commit", sha = %commit.hash);
            self.process_commit(commit, &mut budget, cancel)
                .instrument(span)
                .await?;
        }

        Ok(())
    }

    async fn open_items_budget(&self) -> Result<Budget, SyncError> {
        // A dry run creates nothing, and it must traverse every candidate
        // so the intended actions can be audited.
        if self.downstream.max_open_items < 0 || self.dry_run {
            return Ok(Budget(None));
        }

        // Tracking PRs carry the label too, so listing issues with PRs
        // included counts every open item in one query.
        let open = self.issues.list_open_tracking(true).await?;

        info!(
            open = open.len(),
            max = self.downstream.max_open_items,
            "Computed open item budget"
        );

        Ok(Budget::new(self.downstream.max_open_items, open.len()))
    }

    async fn process_commit(
        &self,
        commit: &crate::gitutils::Commit,
        budget: &mut Budget,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        info!(summary = commit.summary(), "Processing commit");

        let branch = branch_name(commit.hash);

        self.git.checkout_branch(&self.downstream.main_branch)?;
        let main_tip = self.git.branch_tip(&self.downstream.main_branch)?;
        self.git.recreate_branch(&branch, main_tip)?;

        match self
            .cherry_picker
            .run(self.git.as_ref(), &self.workdir, commit, cancel)
            .await
        {
            Ok(()) => {
                if self.dry_run {
                    info!("Dry run; not pushing or creating a PR");
                    return Ok(());
                }

                self.git.push_branch(&branch, &self.token)?;

                let pr = self
                    .prs
                    .create(
                        &branch,
                        &self.downstream.main_branch,
                        &self.upstream.url,
                        commit,
                        self.downstream.create_draft_prs,
                    )
                    .await?;

                info!(url = %pr.url, "Opened PR");
                budget.consume();
            }
            Err(pick_err) => {
                // A pick killed by cancellation is not a pick failure; no
                // tracking issue for it.
                if pick_err.is_canceled() {
                    info!("Cancellation requested; stopping");
                    return Err(SyncError::Canceled);
                }

                warn!(error = %pick_err, "Cherry-pick failed");

                if self.dry_run {
                    info!("Dry run; not creating a tracking issue");
                    return Ok(());
                }

                match self
                    .issues
                    .create_tracking_issue(commit, &pick_err, &self.upstream.url)
                    .await
                {
                    Ok(issue) => {
                        info!(url = %issue.url, "Opened tracking issue");
                        budget.consume();
                    }
                    // An untracked failure will simply surface again on the
                    // next run, so the run continues.
                    Err(create_err) => {
                        error!(error = %create_err, "Could not create tracking issue")
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{CreatedItem, TrackingIssue, TrackingPr};
    use crate::gitutils::{CherryPickError, Commit};
    use crate::process::{ExecError, ProcessError};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use git2::Oid;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::path::Path;
    use std::rc::Rc;

    const SHA1: &str = "1111111111111111111111111111111111111111";
    const SHA2: &str = "2222222222222222222222222222222222222222";
    const SHA3: &str = "3333333333333333333333333333333333333333";
    const MAIN_TIP: &str = "9999999999999999999999999999999999999999";

    fn commit(sha: &str, author: &str, epoch: i64) -> Commit {
        Commit {
            hash: Oid::from_str(sha).unwrap(),
            author_name: author.to_string(),
            author_email: format!("{author}@example.com"),
            author_when: Utc.timestamp_opt(epoch, 0).unwrap().into(),
            committer_when: Utc.timestamp_opt(epoch, 0).unwrap(),
            message: format!("commit {sha}\n"),
        }
    }

    fn pick_error() -> CherryPickError {
        CherryPickError::Pick(ExecError::Process(ProcessError {
            command: "git cherry-pick -n x".to_string(),
            exit_code: Some(1),
            output: "conflict".to_string(),
        }))
    }

    /// Shared journal of everything the doubles were asked to do.
    type Journal = Rc<RefCell<Vec<String>>>;

    struct FakeDiffer {
        commits: Vec<Commit>,
    }

    #[async_trait(?Send)]
    impl Differ for FakeDiffer {
        async fn get_missing_commits(
            &self,
            _git: &dyn GitOps,
            _since: Option<DateTime<Utc>>,
            _main_branch: &str,
            _upstream: &config::Upstream,
        ) -> Result<Vec<Commit>, DiffError> {
            Ok(self.commits.clone())
        }
    }

    struct FakeGit {
        journal: Journal,
    }

    impl GitOps for FakeGit {
        fn recreate_remote(&self, _name: &str, _url: &str) -> Result<(), GitError> {
            Ok(())
        }

        fn fetch_remote(&self, _name: &str) -> Result<(), GitError> {
            Ok(())
        }

        fn branch_tip(&self, _branch: &str) -> Result<Oid, GitError> {
            Ok(Oid::from_str(MAIN_TIP).unwrap())
        }

        fn remote_tip(&self, _remote: &str, _refname: &str) -> Result<Oid, GitError> {
            Ok(Oid::from_str(MAIN_TIP).unwrap())
        }

        fn checkout_branch(&self, branch: &str) -> Result<(), GitError> {
            self.journal.borrow_mut().push(format!("checkout {branch}"));
            Ok(())
        }

        fn recreate_branch(&self, name: &str, _at: Oid) -> Result<(), GitError> {
            self.journal.borrow_mut().push(format!("branch {name}"));
            Ok(())
        }

        fn push_branch(&self, branch: &str, _token: &str) -> Result<(), GitError> {
            self.journal.borrow_mut().push(format!("push {branch}"));
            Ok(())
        }

        fn list_remote_branches(&self, _token: &str) -> Result<Vec<String>, GitError> {
            Ok(Vec::new())
        }

        fn delete_remote_branches(
            &self,
            _branches: &[String],
            _token: &str,
        ) -> Result<(), GitError> {
            Ok(())
        }

        fn log_since(
            &self,
            _from: Oid,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Vec<Commit>, GitError> {
            Ok(Vec::new())
        }

        fn commit_staged(&self, _original: &Commit, _message: &str) -> Result<Oid, GitError> {
            Ok(Oid::from_str(MAIN_TIP).unwrap())
        }

        fn commit_by_hash(&self, _oid: Oid) -> Result<Commit, GitError> {
            Err(GitError::UnbornBranch {
                name: "unused".to_string(),
            })
        }
    }

    struct FakePicker {
        journal: Journal,
        failing: HashSet<Oid>,
        canceled: HashSet<Oid>,
    }

    #[async_trait(?Send)]
    impl CherryPick for FakePicker {
        async fn run(
            &self,
            _git: &dyn GitOps,
            _workdir: &Path,
            commit: &Commit,
            _cancel: &CancellationToken,
        ) -> Result<(), CherryPickError> {
            self.journal.borrow_mut().push(format!("pick {}", commit.hash));

            if self.canceled.contains(&commit.hash) {
                return Err(CherryPickError::Pick(ExecError::Canceled {
                    command: "git cherry-pick -n x".to_string(),
                }));
            }

            if self.failing.contains(&commit.hash) {
                Err(pick_error())
            } else {
                Ok(())
            }
        }
    }

    struct FakeIssues {
        journal: Journal,
        open: usize,
        fail_create: bool,
    }

    #[async_trait(?Send)]
    impl IssueTracker for FakeIssues {
        async fn create_tracking_issue(
            &self,
            commit: &Commit,
            _error: &CherryPickError,
            _upstream_url: &str,
        ) -> Result<CreatedItem, GitHubError> {
            self.journal
                .borrow_mut()
                .push(format!("issue {}", commit.hash));

            if self.fail_create {
                return Err(GitHubError::UnexpectedReply("boom".to_string()));
            }

            Ok(CreatedItem {
                number: 1,
                url: "issue-url".to_string(),
            })
        }

        async fn list_open_tracking(
            &self,
            _include_prs: bool,
        ) -> Result<Vec<TrackingIssue>, GitHubError> {
            Ok((0..self.open)
                .map(|n| TrackingIssue {
                    number: n as u64,
                    url: String::new(),
                    body: None,
                    assignees: Vec::new(),
                    is_pr: false,
                })
                .collect())
        }

        async fn assign(&self, _number: u64, _logins: &[String]) -> Result<(), GitHubError> {
            Ok(())
        }

        async fn comment(&self, _number: u64, _body: &str) -> Result<(), GitHubError> {
            Ok(())
        }
    }

    struct FakePrs {
        journal: Journal,
        fail_create: bool,
    }

    #[async_trait(?Send)]
    impl PrTracker for FakePrs {
        async fn create(
            &self,
            head: &str,
            _base: &str,
            _upstream_url: &str,
            _commit: &Commit,
            draft: bool,
        ) -> Result<CreatedItem, GitHubError> {
            self.journal
                .borrow_mut()
                .push(format!("pr {head} draft={draft}"));

            if self.fail_create {
                return Err(GitHubError::UnexpectedReply("boom".to_string()));
            }

            Ok(CreatedItem {
                number: 2,
                url: "pr-url".to_string(),
            })
        }

        async fn list_open_tracking(&self) -> Result<Vec<TrackingPr>, GitHubError> {
            Ok(Vec::new())
        }

        async fn make_ready(&self, _node_id: &str) -> Result<(), GitHubError> {
            Ok(())
        }
    }

    struct Setup {
        commits: Vec<Commit>,
        failing: HashSet<Oid>,
        canceled: HashSet<Oid>,
        open: usize,
        max_open_items: i64,
        ignore_authors: Vec<String>,
        dry_run: bool,
        fail_issue_create: bool,
        fail_pr_create: bool,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                commits: Vec::new(),
                failing: HashSet::new(),
                canceled: HashSet::new(),
                open: 0,
                max_open_items: -1,
                ignore_authors: Vec::new(),
                dry_run: false,
                fail_issue_create: false,
                fail_pr_create: false,
            }
        }
    }

    impl Setup {
        fn build(self) -> (Sync, Journal) {
            let journal: Journal = Rc::new(RefCell::new(Vec::new()));

            let sync = Sync {
                differ: Box::new(FakeDiffer {
                    commits: self.commits,
                }),
                cherry_picker: Box::new(FakePicker {
                    journal: journal.clone(),
                    failing: self.failing,
                    canceled: self.canceled,
                }),
                git: Box::new(FakeGit {
                    journal: journal.clone(),
                }),
                issues: Box::new(FakeIssues {
                    journal: journal.clone(),
                    open: self.open,
                    fail_create: self.fail_issue_create,
                }),
                prs: Box::new(FakePrs {
                    journal: journal.clone(),
                    fail_create: self.fail_pr_create,
                }),
                workdir: PathBuf::from("."),
                token: "token".to_string(),
                dry_run: self.dry_run,
                downstream: config::Downstream {
                    create_draft_prs: false,
                    github_repo_name: "owner/repo".to_string(),
                    local_repo_path: ".".to_string(),
                    main_branch: "main".to_string(),
                    max_open_items: self.max_open_items,
                    ignore_authors: self.ignore_authors,
                    owners_file: "OWNERS".to_string(),
                },
                upstream: config::Upstream {
                    git_ref: "main".to_string(),
                    url: "upstream-url".to_string(),
                },
                since: None,
            };

            (sync, journal)
        }
    }

    fn picks(journal: &Journal) -> Vec<String> {
        journal
            .borrow()
            .iter()
            .filter(|e| e.starts_with("pick "))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn processes_commits_oldest_first() {
        let (sync, journal) = Setup {
            // Deliberately out of order.
            commits: vec![
                commit(SHA3, "Author", 300),
                commit(SHA1, "Author", 100),
                commit(SHA2, "Author", 200),
            ],
            ..Setup::default()
        }
        .build();

        sync.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            picks(&journal),
            vec![
                format!("pick {SHA1}"),
                format!("pick {SHA2}"),
                format!("pick {SHA3}"),
            ],
        );
    }

    #[tokio::test]
    async fn successful_pick_pushes_and_opens_a_pr() {
        let (sync, journal) = Setup {
            commits: vec![commit(SHA1, "Author", 100)],
            ..Setup::default()
        }
        .build();

        sync.run(&CancellationToken::new()).await.unwrap();

        let journal = journal.borrow();
        assert!(journal.contains(&format!("push us-sync-{SHA1}")));
        assert!(journal.contains(&format!("pr us-sync-{SHA1} draft=false")));
        assert!(!journal.iter().any(|e| e.starts_with("issue ")));
    }

    #[tokio::test]
    async fn failed_pick_opens_an_issue_and_continues() {
        let (sync, journal) = Setup {
            commits: vec![commit(SHA1, "Author", 100), commit(SHA2, "Author", 200)],
            failing: HashSet::from([Oid::from_str(SHA1).unwrap()]),
            ..Setup::default()
        }
        .build();

        sync.run(&CancellationToken::new()).await.unwrap();

        let journal = journal.borrow();
        assert!(journal.contains(&format!("issue {SHA1}")));
        assert!(journal.contains(&format!("pr us-sync-{SHA2} draft=false")));
        assert!(!journal.iter().any(|e| e == &format!("push us-sync-{SHA1}")));
    }

    #[tokio::test]
    async fn issue_creation_failure_does_not_abort_the_run() {
        let (sync, journal) = Setup {
            commits: vec![commit(SHA1, "Author", 100), commit(SHA2, "Author", 200)],
            failing: HashSet::from([Oid::from_str(SHA1).unwrap()]),
            fail_issue_create: true,
            ..Setup::default()
        }
        .build();

        sync.run(&CancellationToken::new()).await.unwrap();

        assert!(journal.borrow().contains(&format!("pick {SHA2}")));
    }

    #[tokio::test]
    async fn pr_creation_failure_aborts_the_run() {
        let (sync, journal) = Setup {
            commits: vec![commit(SHA1, "Author", 100), commit(SHA2, "Author", 200)],
            fail_pr_create: true,
            ..Setup::default()
        }
        .build();

        let err = sync.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SyncError::GitHub(_)));
        assert!(!journal.borrow().contains(&format!("pick {SHA2}")));
    }

    #[tokio::test]
    async fn open_item_cap_limits_creations() {
        // Cap of 2 with 1 already open leaves room for exactly one item.
        let (sync, journal) = Setup {
            commits: vec![
                commit(SHA1, "Author", 100),
                commit(SHA2, "Author", 200),
                commit(SHA3, "Author", 300),
            ],
            open: 1,
            max_open_items: 2,
            ..Setup::default()
        }
        .build();

        sync.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(picks(&journal), vec![format!("pick {SHA1}")]);
    }

    #[tokio::test]
    async fn ignored_authors_are_skipped_without_consuming_budget() {
        let (sync, journal) = Setup {
            commits: vec![commit(SHA1, "a-bot", 100), commit(SHA2, "Author", 200)],
            max_open_items: 1,
            ignore_authors: vec!["a-bot".to_string()],
            ..Setup::default()
        }
        .build();

        sync.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(picks(&journal), vec![format!("pick {SHA2}")]);
    }

    #[tokio::test]
    async fn dry_run_traverses_everything_but_mutates_nothing_remote() {
        let (sync, journal) = Setup {
            commits: vec![
                commit(SHA1, "Author", 100),
                commit(SHA2, "Author", 200),
                commit(SHA3, "Author", 300),
            ],
            failing: HashSet::from([Oid::from_str(SHA2).unwrap()]),
            // A cap that would stop a real run after one creation.
            max_open_items: 1,
            dry_run: true,
            ..Setup::default()
        }
        .build();

        sync.run(&CancellationToken::new()).await.unwrap();

        let journal = journal.borrow();
        assert_eq!(
            journal.iter().filter(|e| e.starts_with("pick ")).count(),
            3
        );
        assert!(!journal.iter().any(|e| {
            e.starts_with("push ") || e.starts_with("pr ") || e.starts_with("issue ")
        }));
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_commit() {
        let (sync, journal) = Setup {
            commits: vec![commit(SHA1, "Author", 100)],
            ..Setup::default()
        }
        .build();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = sync.run(&cancel).await.unwrap_err();

        assert!(matches!(err, SyncError::Canceled));
        assert!(picks(&journal).is_empty());
    }

    #[tokio::test]
    async fn a_pick_killed_by_cancellation_aborts_without_an_issue() {
        let (sync, journal) = Setup {
            commits: vec![commit(SHA1, "Author", 100), commit(SHA2, "Author", 200)],
            canceled: HashSet::from([Oid::from_str(SHA1).unwrap()]),
            ..Setup::default()
        }
        .build();

        let err = sync.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SyncError::Canceled));

        let journal = journal.borrow();
        assert!(!journal.iter().any(|e| e.starts_with("issue ")));
        assert!(!journal.contains(&format!("pick {SHA2}")));
    }
}

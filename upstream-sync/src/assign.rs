//! The issue-assignment engine.
//!
//! Unassigned tracking issues are routed to an owner: preferably the GitHub
//! accounts behind the referenced upstream commits when they are approvers,
//! otherwise a randomly chosen approver from the OWNERS file. A comment
//! explaining the choice is posted alongside.

use crate::github::{CommitAuthorLookup, GitHubError, IssueTracker, TrackingIssue};
use crate::markup::Finder;
use crate::owners::{Owners, OwnersError};
use crate::templates::{TemplateError, TemplateRenderer};
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, info_span, warn};
use tracing::Instrument;

/// Errors that abort an assignment run before any issue is touched.
#[derive(Debug, Error)]
pub enum AssignError {
    /// The OWNERS file could not be loaded.
    #[error(transparent)]
    Owners(#[from] OwnersError),

    /// Listing the open tracking issues failed.
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    /// One or more issues could not be assigned.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Failure to assign a single issue. Such failures do not stop the run;
/// they are collected and reported together at the end.
#[derive(Debug, Error)]
pub enum IssueAssignError {
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Owners(#[from] OwnersError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// The per-issue failures of one assignment run.
#[derive(Debug)]
pub struct AggregateError(pub Vec<(u64, IssueAssignError)>);

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not assign {} issue(s):", self.0.len())?;

        for (number, error) in &self.0 {
            write!(f, " issue #{number}: {error};")?;
        }

        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// One assignment run over the open tracking issues.
pub struct Assign {
    pub issues: Box<dyn IssueTracker>,
    pub users: Box<dyn CommitAuthorLookup>,
    pub finder: Finder,
    pub renderer: TemplateRenderer,
    pub owners_path: PathBuf,
    pub dry_run: bool,
    pub rng: RefCell<StdRng>,
}

impl Assign {
    /// Runs the assignment to completion.
    ///
    /// Every unassigned tracking issue is attempted even when earlier ones
    /// fail; the failures are aggregated into the returned error.
    pub async fn run(&self) -> Result<(), AssignError> {
        let owners = Owners::from_file(&self.owners_path)?;

        let issues = self.issues.list_open_tracking(false).await?;

        info!(count = issues.len(), "Open tracking issues");

        let mut failures = Vec::new();

        for issue in &issues {
            if !issue.assignees.is_empty() {
                info!(number = issue.number, "Issue already assigned; skipping");
                continue;
            }

            let span = info_span!("issue", number = issue.number);

            if let Err(error) = self.assign_issue(issue, &owners).instrument(span).await {
                warn!(number = issue.number, %error, "Could not assign issue");
                failures.push((issue.number, error));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AggregateError(failures).into())
        }
    }

    async fn assign_issue(
        &self,
        issue: &TrackingIssue,
        owners: &Owners,
    ) -> Result<(), IssueAssignError> {
        let shas: Vec<String> = issue
            .body
            .as_deref()
            .map(|body| self.finder.find_shas(body))
            .unwrap_or_default()
            .iter()
            .map(ToString::to_string)
            .collect();

        if shas.is_empty() {
            info!("Issue references no commits; skipping");
            return Ok(());
        }

        let mut authors: Vec<String> = Vec::new();

        for sha in &shas {
            if let Some(login) = self.users.commit_author(sha).await? {
                if !authors.contains(&login) {
                    authors.push(login);
                }
            }
        }

        let approver_authors: Vec<String> = authors
            .iter()
            .filter(|a| owners.is_approver(a))
            .cloned()
            .collect();

        let (assignees, reason) = if approver_authors.is_empty() {
            let approver = owners
                .random_approver(&mut *self.rng.borrow_mut())?
                .to_string();

            (
                vec![approver],
                "none of the commit authors are approvers in the OWNERS file.",
            )
        } else {
            (
                approver_authors.clone(),
                "the commit authors are approvers in the OWNERS file.",
            )
        };

        info!(assignees = ?assignees, reason, "Selected assignees");

        if self.dry_run {
            info!("Dry run; not assigning or commenting");
            return Ok(());
        }

        self.issues.assign(issue.number, &assignees).await?;

        let comment = self.renderer.render_assignment_comment(
            &shas,
            &authors,
            &approver_authors,
            &assignees,
            reason,
        )?;

        // A missing rationale is an annoyance, not a failed assignment.
        if let Err(error) = self.issues.comment(issue.number, &comment).await {
            warn!(%error, "Could not post assignment comment");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{CreatedItem, TrackingPr};
    use crate::gitutils::{CherryPickError, Commit};
    use async_trait::async_trait;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::io::Write;
    use std::rc::Rc;

    const SHA1: &str = "1111111111111111111111111111111111111111";
    const SHA2: &str = "2222222222222222222222222222222222222222";
    const SHA3: &str = "3333333333333333333333333333333333333333";

    type Journal = Rc<RefCell<Vec<String>>>;

    struct FakeIssues {
        journal: Journal,
        open: Vec<TrackingIssue>,
        fail_comment: bool,
    }

    #[async_trait(?Send)]
    impl IssueTracker for FakeIssues {
        async fn create_tracking_issue(
            &self,
            _commit: &Commit,
            _error: &CherryPickError,
            _upstream_url: &str,
        ) -> Result<CreatedItem, GitHubError> {
            unimplemented!("not used by assignment")
        }

        async fn list_open_tracking(
            &self,
            include_prs: bool,
        ) -> Result<Vec<TrackingIssue>, GitHubError> {
            assert!(!include_prs);
            Ok(self.open.clone())
        }

        async fn assign(&self, number: u64, logins: &[String]) -> Result<(), GitHubError> {
            self.journal
                .borrow_mut()
                .push(format!("assign #{number} {}", logins.join(",")));
            Ok(())
        }

        async fn comment(&self, number: u64, body: &str) -> Result<(), GitHubError> {
            if self.fail_comment {
                return Err(GitHubError::UnexpectedReply("boom".to_string()));
            }

            self.journal
                .borrow_mut()
                .push(format!("comment #{number} {body}"));
            Ok(())
        }
    }

    struct FakeUsers {
        logins: HashMap<String, String>,
        failing: bool,
    }

    #[async_trait(?Send)]
    impl CommitAuthorLookup for FakeUsers {
        async fn commit_author(&self, sha: &str) -> Result<Option<String>, GitHubError> {
            if self.failing {
                return Err(GitHubError::UnexpectedReply("boom".to_string()));
            }

            Ok(self.logins.get(sha).cloned())
        }
    }

    fn tracking_issue(number: u64, shas: &[&str], assignees: &[&str]) -> TrackingIssue {
        let body = shas
            .iter()
            .map(|sha| format!("Upstream-Commit: {sha}\n"))
            .collect::<String>();

        TrackingIssue {
            number,
            url: format!("issue-{number}"),
            body: Some(body),
            assignees: assignees.iter().map(ToString::to_string).collect(),
            is_pr: false,
        }
    }

    fn owners_file(approvers: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "approvers:").unwrap();
        for a in approvers {
            writeln!(file, "  - {a}").unwrap();
        }
        file
    }

    struct Setup {
        open: Vec<TrackingIssue>,
        logins: HashMap<String, String>,
        approvers: Vec<&'static str>,
        dry_run: bool,
        fail_comment: bool,
        fail_lookup: bool,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                open: Vec::new(),
                logins: HashMap::new(),
                approvers: vec!["alice", "bob"],
                dry_run: false,
                fail_comment: false,
                fail_lookup: false,
            }
        }
    }

    impl Setup {
        fn build(self) -> (Assign, Journal, tempfile::NamedTempFile) {
            let journal: Journal = Rc::new(RefCell::new(Vec::new()));
            let owners = owners_file(&self.approvers);

            let assign = Assign {
                issues: Box::new(FakeIssues {
                    journal: journal.clone(),
                    open: self.open,
                    fail_comment: self.fail_comment,
                }),
                users: Box::new(FakeUsers {
                    logins: self.logins,
                    failing: self.fail_lookup,
                }),
                finder: Finder::new("Upstream-Commit").unwrap(),
                renderer: TemplateRenderer::new("Upstream-Commit"),
                owners_path: owners.path().to_path_buf(),
                dry_run: self.dry_run,
                rng: RefCell::new(StdRng::seed_from_u64(7)),
            };

            (assign, journal, owners)
        }
    }

    #[tokio::test]
    async fn authors_who_are_approvers_get_the_issue() {
        let (assign, journal, _owners) = Setup {
            open: vec![tracking_issue(1, &[SHA1], &[])],
            logins: HashMap::from([(SHA1.to_string(), "alice".to_string())]),
            ..Setup::default()
        }
        .build();

        assign.run().await.unwrap();

        let journal = journal.borrow();
        assert!(journal.contains(&"assign #1 alice".to_string()));
        assert!(journal
            .iter()
            .any(|e| e.starts_with("comment #1") && e.contains("commit authors are approvers")));
    }

    #[tokio::test]
    async fn all_approver_authors_and_nobody_else_get_the_issue() {
        let (assign, journal, _owners) = Setup {
            open: vec![tracking_issue(1, &[SHA1, SHA2, SHA3], &[])],
            logins: HashMap::from([
                (SHA1.to_string(), "alice".to_string()),
                (SHA2.to_string(), "mallory".to_string()),
                (SHA3.to_string(), "bob".to_string()),
            ]),
            ..Setup::default()
        }
        .build();

        assign.run().await.unwrap();

        let journal = journal.borrow();
        let assignments: Vec<&str> = journal
            .iter()
            .filter(|e| e.starts_with("assign "))
            .map(String::as_str)
            .collect();

        // Exactly the approver authors, nothing random, no extra calls.
        assert_eq!(assignments, vec!["assign #1 alice,bob"]);
    }

    #[tokio::test]
    async fn falls_back_to_a_random_approver() {
        let (assign, journal, _owners) = Setup {
            open: vec![tracking_issue(1, &[SHA1], &[])],
            // The author exists but is not an approver.
            logins: HashMap::from([(SHA1.to_string(), "mallory".to_string())]),
            ..Setup::default()
        }
        .build();

        assign.run().await.unwrap();

        let journal = journal.borrow();
        let assignment = journal
            .iter()
            .find(|e| e.starts_with("assign #1 "))
            .unwrap();

        assert!(
            assignment == "assign #1 alice" || assignment == "assign #1 bob",
            "{assignment}"
        );
        assert!(journal
            .iter()
            .any(|e| e.contains("none of the commit authors are approvers")));
    }

    #[tokio::test]
    async fn already_assigned_issues_are_left_alone() {
        let (assign, journal, _owners) = Setup {
            open: vec![tracking_issue(1, &[SHA1], &["carol"])],
            ..Setup::default()
        }
        .build();

        assign.run().await.unwrap();

        assert!(journal.borrow().is_empty());
    }

    #[tokio::test]
    async fn issues_without_commit_references_are_skipped() {
        let (assign, journal, _owners) = Setup {
            open: vec![TrackingIssue {
                number: 1,
                url: "issue-1".to_string(),
                body: Some("no trailers here".to_string()),
                assignees: Vec::new(),
                is_pr: false,
            }],
            ..Setup::default()
        }
        .build();

        assign.run().await.unwrap();

        assert!(journal.borrow().is_empty());
    }

    #[tokio::test]
    async fn dry_run_selects_but_does_not_touch_the_issue() {
        let (assign, journal, _owners) = Setup {
            open: vec![tracking_issue(1, &[SHA1], &[])],
            logins: HashMap::from([(SHA1.to_string(), "alice".to_string())]),
            dry_run: true,
            ..Setup::default()
        }
        .build();

        assign.run().await.unwrap();

        assert!(journal.borrow().is_empty());
    }

    #[tokio::test]
    async fn comment_failure_does_not_fail_the_run() {
        let (assign, journal, _owners) = Setup {
            open: vec![tracking_issue(1, &[SHA1], &[])],
            logins: HashMap::from([(SHA1.to_string(), "alice".to_string())]),
            fail_comment: true,
            ..Setup::default()
        }
        .build();

        assign.run().await.unwrap();

        assert!(journal.borrow().contains(&"assign #1 alice".to_string()));
    }

    #[tokio::test]
    async fn per_issue_failures_are_aggregated() {
        let (assign, _journal, _owners) = Setup {
            open: vec![
                tracking_issue(1, &[SHA1], &[]),
                tracking_issue(2, &[SHA2], &[]),
            ],
            fail_lookup: true,
            ..Setup::default()
        }
        .build();

        let err = assign.run().await.unwrap_err();

        match err {
            AssignError::Aggregate(AggregateError(failures)) => {
                let numbers: Vec<u64> = failures.iter().map(|(n, _)| *n).collect();
                assert_eq!(numbers, vec![1, 2]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

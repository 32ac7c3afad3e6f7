//! octocrab-backed implementation of [`IssueTracker`].

use super::{CreatedItem, GitHubError, IssueTracker, RepoName, TrackingIssue};
use crate::gitutils::{CherryPickError, Commit};
use crate::templates::{issue_title, TemplateRenderer};
use crate::TRACKING_LABEL;
use async_trait::async_trait;
use octocrab::{models, params, Octocrab};
use tracing::info;

/// Creates, lists and annotates tracking issues.
pub struct IssueHelper {
    octocrab: Octocrab,
    repo_name: RepoName,
    renderer: TemplateRenderer,
}

impl IssueHelper {
    /// Creates a helper for the given downstream repository.
    pub fn new(octocrab: Octocrab, repo_name: RepoName, renderer: TemplateRenderer) -> Self {
        Self {
            octocrab,
            repo_name,
            renderer,
        }
    }
}

#[async_trait(?Send)]
impl IssueTracker for IssueHelper {
    async fn create_tracking_issue(
        &self,
        commit: &Commit,
        error: &CherryPickError,
        upstream_url: &str,
    ) -> Result<CreatedItem, GitHubError> {
        let body = self.renderer.render_issue_body(
            commit,
            &error.to_string(),
            error.process_error(),
            upstream_url,
        )?;

        let issue = self
            .octocrab
            .issues(&self.repo_name.owner, &self.repo_name.repo)
            .create(issue_title(commit.hash))
            .body(body)
            .labels(vec![TRACKING_LABEL.to_string()])
            .send()
            .await?;

        info!(number = issue.number, url = %issue.html_url, "Created tracking issue");

        Ok(CreatedItem {
            number: issue.number,
            url: issue.html_url.to_string(),
        })
    }

    async fn list_open_tracking(
        &self,
        include_prs: bool,
    ) -> Result<Vec<TrackingIssue>, GitHubError> {
        let labels = vec![TRACKING_LABEL.to_string()];

        let mut page = self
            .octocrab
            .issues(&self.repo_name.owner, &self.repo_name.repo)
            .list()
            .state(params::State::Open)
            .labels(&labels)
            .per_page(100)
            .send()
            .await?;

        let mut tracking = Vec::new();

        loop {
            for issue in &page.items {
                let is_pr = issue.pull_request.is_some();

                if is_pr && !include_prs {
                    continue;
                }

                tracking.push(TrackingIssue {
                    number: issue.number,
                    url: issue.html_url.to_string(),
                    body: issue.body.clone(),
                    assignees: issue.assignees.iter().map(|u| u.login.clone()).collect(),
                    is_pr,
                });
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

        Ok(tracking)
    }

    async fn assign(&self, number: u64, logins: &[String]) -> Result<(), GitHubError> {
        let logins: Vec<&str> = logins.iter().map(String::as_str).collect();

        self.octocrab
            .issues(&self.repo_name.owner, &self.repo_name.repo)
            .add_assignees(number, &logins)
            .await?;

        info!(number, assignees = ?logins, "Assigned issue");

        Ok(())
    }

    async fn comment(&self, number: u64, body: &str) -> Result<(), GitHubError> {
        self.octocrab
            .issues(&self.repo_name.owner, &self.repo_name.repo)
            .create_comment(number, body)
            .await?;

        Ok(())
    }
}

//! octocrab-backed implementation of [`PrTracker`].

use super::{CreatedItem, GitHubError, PrTracker, RepoName, TrackingPr};
use crate::gitutils::Commit;
use crate::templates::{pr_title, TemplateRenderer};
use crate::TRACKING_LABEL;
use async_trait::async_trait;
use octocrab::{models, params, Octocrab};
use serde_json::json;
use tracing::info;

/// Creates, lists and undrafts tracking pull requests.
pub struct PrHelper {
    octocrab: Octocrab,
    repo_name: RepoName,
    renderer: TemplateRenderer,
}

impl PrHelper {
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
impl PrTracker for PrHelper {
    async fn create(
        &self,
        head: &str,
        base: &str,
        upstream_url: &str,
        commit: &Commit,
        draft: bool,
    ) -> Result<CreatedItem, GitHubError> {
        let body = self.renderer.render_pr_body(commit, upstream_url)?;

        let pr = self
            .octocrab
            .pulls(&self.repo_name.owner, &self.repo_name.repo)
            .create(pr_title(commit.hash), head, base)
            .body(body)
            .draft(draft)
            .send()
            .await?;

        // The label is what marks the PR as a commit intent for later runs.
        self.octocrab
            .issues(&self.repo_name.owner, &self.repo_name.repo)
            .add_labels(pr.number, &[TRACKING_LABEL.to_string()])
            .await?;

        let url = pr
            .html_url
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        info!(number = pr.number, url, "Created tracking PR");

        Ok(CreatedItem {
            number: pr.number,
            url,
        })
    }

    async fn list_open_tracking(&self) -> Result<Vec<TrackingPr>, GitHubError> {
        let mut page = self
            .octocrab
            .pulls(&self.repo_name.owner, &self.repo_name.repo)
            .list()
            .state(params::State::Open)
            .per_page(100)
            .send()
            .await?;

        let mut tracking = Vec::new();

        loop {
            for pr in &page.items {
                let labeled = pr
                    .labels
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .any(|l| l.name == TRACKING_LABEL);

                if !labeled {
                    continue;
                }

                tracking.push(TrackingPr {
                    number: pr.number,
                    url: pr
                        .html_url
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                    body: pr.body.clone(),
                    node_id: pr.node_id.clone(),
                    draft: pr.draft.unwrap_or(false),
                });
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

        Ok(tracking)
    }

    async fn make_ready(&self, node_id: &str) -> Result<(), GitHubError> {
        let payload = json!({
            "query": "mutation($id: ID!) {\
                markPullRequestReadyForReview(input: {pullRequestId: $id}) {\
                    pullRequest { isDraft }\
                }\
            }",
            "variables": { "id": node_id },
        });

        let reply: serde_json::Value = self.octocrab.graphql(&payload).await?;

        if let Some(errors) = reply.get("errors") {
            return Err(GitHubError::UnexpectedReply(errors.to_string()));
        }

        let is_draft = reply
            .pointer("/data/markPullRequestReadyForReview/pullRequest/isDraft")
            .and_then(serde_json::Value::as_bool);

        if is_draft != Some(false) {
            return Err(GitHubError::UnexpectedReply(reply.to_string()));
        }

        info!(node_id, "Marked PR ready for review");

        Ok(())
    }
}

//! Commit-to-login resolution via the commits API.

use super::{CommitAuthorLookup, GitHubError, RepoName};
use async_trait::async_trait;
use octocrab::Octocrab;
use serde_json::Value;
use tracing::debug;

/// Resolves GitHub logins for commit authors.
///
/// The commits API is queried raw because only the `author.login` field is
/// of interest and it may be null for unattributed commits.
pub struct UserHelper {
    octocrab: Octocrab,
    repo_name: RepoName,
}

impl UserHelper {
    /// Creates a helper for the given downstream repository.
    pub fn new(octocrab: Octocrab, repo_name: RepoName) -> Self {
        Self { octocrab, repo_name }
    }
}

#[async_trait(?Send)]
impl CommitAuthorLookup for UserHelper {
    async fn commit_author(&self, sha: &str) -> Result<Option<String>, GitHubError> {
        let route = format!(
            "/repos/{}/{}/commits/{}",
            self.repo_name.owner, self.repo_name.repo, sha
        );

        let reply: Value = self.octocrab.get(&route, None::<&()>).await?;

        let login = reply
            .pointer("/author/login")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        debug!(sha, login = ?login, "Resolved commit author");

        Ok(login)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SHA: &str = "e3229f3c533ed51070beff092e5c7694a8ee81f0";

    async fn helper_for(server: &MockServer) -> UserHelper {
        let octocrab = Octocrab::builder()
            .base_uri(server.uri())
            .unwrap()
            .build()
            .unwrap();

        UserHelper::new(octocrab, RepoName::parse("some-owner/some-repo").unwrap())
    }

    #[tokio::test]
    async fn resolves_the_author_login() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/repos/some-owner/some-repo/commits/{SHA}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "author": { "login": "jane" } })),
            )
            .mount(&server)
            .await;

        let helper = helper_for(&server).await;
        assert_eq!(helper.commit_author(SHA).await.unwrap(), Some("jane".to_string()));
    }

    #[tokio::test]
    async fn unattributed_commits_resolve_to_none() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/repos/some-owner/some-repo/commits/{SHA}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "author": null })))
            .mount(&server)
            .await;

        let helper = helper_for(&server).await;
        assert_eq!(helper.commit_author(SHA).await.unwrap(), None);
    }
}

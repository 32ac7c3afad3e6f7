//! Template renderer for issue bodies, PR bodies and assignment comments.

use crate::gitutils::Commit;
use crate::process::ProcessError;
use crate::APP_NAME;
use handlebars::{no_escape, Handlebars};
use serde_json::{json, Value};

/// Body of the tracking issue created when a cherry-pick fails.
///
/// The trailing markup line lets later runs reconcile the upstream commit as
/// already tracked.
const ISSUE_TEMPLATE: &str = "\
{{app_name}} could not automatically cherry-pick upstream commit `{{sha}}`.
{{#if job_id}}
CI job: `{{job_id}}`
{{/if}}
Original commit message:

```
{{message}}
```

Error:

```
{{error}}
```
{{#if command}}
The failing command and its output:

```
$ {{command}}
{{output}}
```

Exit code: {{exit_code}}
{{/if}}
Please cherry-pick this commit manually from {{upstream_url}}.

{{markup}}: {{sha}}
";

/// Body of the pull request created when a cherry-pick succeeds.
const PR_TEMPLATE: &str = "\
Automatic cherry-pick of upstream commit `{{sha}}` from {{upstream_url}} by {{app_name}}.

Original commit message:

```
{{message}}
```

{{markup}}: {{sha}}
";

/// Comment posted on a tracking issue when it is assigned.
const ASSIGNMENT_COMMENT_TEMPLATE: &str = "\
{{app_name}} assigned this issue to {{assignees}}.

Referenced commits: {{shas}}
Resolved commit authors: {{authors}}
Commit authors who are approvers: {{approver_authors}}

Rationale: {{reason}}
";

/// Creates a configured Handlebars registry.
///
/// HTML escaping is disabled for markdown output and strict mode catches
/// missing variables.
pub fn create_handlebars_registry() -> Handlebars<'static> {
    let mut hbs = Handlebars::new();

    hbs.register_escape_fn(no_escape);
    hbs.set_strict_mode(true);

    hbs
}

/// Renders the bodies and comments this tool posts to GitHub.
pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
    markup: String,
}

impl TemplateRenderer {
    /// Creates a renderer for the given markup key.
    pub fn new(markup: &str) -> Self {
        Self {
            handlebars: create_handlebars_registry(),
            markup: markup.to_string(),
        }
    }

    /// Renders the body of a tracking issue for a failed cherry-pick.
    ///
    /// # Errors
    ///
    /// Returns an error if template rendering fails.
    pub fn render_issue_body(
        &self,
        commit: &Commit,
        error: &str,
        process_error: Option<&ProcessError>,
        upstream_url: &str,
    ) -> Result<String, super::TemplateError> {
        let data = json!({
            "app_name": APP_NAME,
            "sha": commit.hash.to_string(),
            "message": commit.message.trim_end(),
            "error": error,
            "command": process_error.map(|pe| pe.command.clone()),
            "output": process_error.map(|pe| pe.output.clone()),
            "exit_code": process_error
                .and_then(|pe| pe.exit_code)
                .map_or_else(|| "unknown".to_string(), |c| c.to_string()),
            "upstream_url": upstream_url,
            "markup": self.markup,
            "job_id": job_id(),
        });

        self.render(ISSUE_TEMPLATE, &data)
    }

    /// Renders the body of a pull request for a successful cherry-pick.
    ///
    /// # Errors
    ///
    /// Returns an error if template rendering fails.
    pub fn render_pr_body(
        &self,
        commit: &Commit,
        upstream_url: &str,
    ) -> Result<String, super::TemplateError> {
        let data = json!({
            "app_name": APP_NAME,
            "sha": commit.hash.to_string(),
            "message": commit.message.trim_end(),
            "upstream_url": upstream_url,
            "markup": self.markup,
        });

        self.render(PR_TEMPLATE, &data)
    }

    /// Renders the explanatory comment posted after assigning an issue.
    ///
    /// # Errors
    ///
    /// Returns an error if template rendering fails.
    pub fn render_assignment_comment(
        &self,
        shas: &[String],
        authors: &[String],
        approver_authors: &[String],
        assignees: &[String],
        reason: &str,
    ) -> Result<String, super::TemplateError> {
        let data = json!({
            "app_name": APP_NAME,
            "shas": join_or_none(shas),
            "authors": join_or_none(authors),
            "approver_authors": join_or_none(approver_authors),
            "assignees": join_or_none(assignees),
            "reason": reason,
        });

        self.render(ASSIGNMENT_COMMENT_TEMPLATE, &data)
    }

    fn render(&self, template: &str, data: &Value) -> Result<String, super::TemplateError> {
        Ok(self.handlebars.render_template(template, data)?)
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Returns the CI job id, if the run happens inside one.
///
/// `GITHUB_RUN_ID` is set by GitHub Actions; `JOB_ID` is a generic fallback.
fn job_id() -> Option<String> {
    for var in ["GITHUB_RUN_ID", "JOB_ID"] {
        if let Ok(id) = std::env::var(var) {
            if !id.is_empty() {
                return Some(id);
            }
        }
    }

    None
}

//! Rendering of GitHub-facing text.
//!
//! Issue bodies, PR bodies and assignment comments are rendered with
//! Handlebars; titles and branch names are plain format strings.

mod error;
mod renderer;

pub use error::TemplateError;
pub use renderer::{create_handlebars_registry, TemplateRenderer};

use crate::BRANCH_PREFIX;
use git2::Oid;

/// Title of the tracking issue for a failed cherry-pick.
pub fn issue_title(sha: Oid) -> String {
    format!("Cherry-picking error for `{sha}`")
}

/// Title of the pull request for a successful cherry-pick.
pub fn pr_title(sha: Oid) -> String {
    format!("Cherry-pick `{sha}` from upstream")
}

/// Deterministic branch name for an upstream commit.
pub fn branch_name(sha: Oid) -> String {
    format!("{BRANCH_PREFIX}{sha}")
}

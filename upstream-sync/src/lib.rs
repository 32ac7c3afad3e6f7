//! Keeps a downstream GitHub repository in sync with its upstream.
//!
//! Upstream commits not yet represented downstream are cherry-picked onto
//! short-lived branches and turned into pull requests; picks that fail
//! become tracking issues instead. Both carry a markup trailer naming the
//! upstream commit, which is how later runs reconcile what has already been
//! handled. Companion engines assign tracking issues to owners and promote
//! draft pull requests to reviewable ones.

pub mod assign;
pub mod branches;
pub mod config;
pub mod diff;
pub mod github;
pub mod gitutils;
pub mod intents;
pub mod markup;
pub mod owners;
pub mod process;
pub mod sync;
pub mod templates;
pub mod undraft;

/// Name under which the tool identifies itself in commits and bodies.
pub const APP_NAME: &str = "upstream-sync";

/// Prefix of the work branches holding cherry-picked commits.
pub const BRANCH_PREFIX: &str = "us-sync-";

/// Name of the remote through which upstream is fetched. Recreated on every
/// run, so a stale URL never survives a config change.
pub const UPSTREAM_REMOTE_NAME: &str = "us-sync-upstream";

/// Label marking the issues and PRs this tool creates.
pub const TRACKING_LABEL: &str = "upstream-sync";

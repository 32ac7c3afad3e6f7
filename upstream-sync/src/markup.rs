//! Markup trailer detection.
//!
//! Commits, issues and PRs created by this tool carry a trailer line of the
//! form `<Key>: <sha>` that records which upstream commit they correspond to.
//! The [`Finder`] extracts those hashes from free-form text.

use git2::Oid;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while building a markup finder.
#[derive(Debug, Error)]
pub enum MarkupError {
    /// The configured markup key does not compile into a valid pattern.
    #[error("invalid markup key '{key}': {source}")]
    InvalidKey {
        key: String,
        #[source]
        source: regex::Error,
    },
}

/// Extracts upstream commit hashes referenced by markup trailer lines.
#[derive(Debug, Clone)]
pub struct Finder {
    re: Regex,
}

impl Finder {
    /// Builds a finder for the given markup key.
    ///
    /// The key is matched case-sensitively at the beginning of a line:
    /// `^<key>:\s*([a-z0-9]+)$` in multiline mode.
    ///
    /// # Errors
    ///
    /// Returns [`MarkupError::InvalidKey`] if the key contains characters
    /// that do not compile into a valid pattern. This is fatal at startup.
    pub fn new(key: &str) -> Result<Self, MarkupError> {
        let pattern = format!(r"(?m)^{key}:\s*([a-z0-9]+)$");

        let re = Regex::new(&pattern).map_err(|source| MarkupError::InvalidKey {
            key: key.to_string(),
            source,
        })?;

        Ok(Self { re })
    }

    /// Returns every hash referenced by a markup trailer in `text`, in
    /// first-to-last textual order.
    ///
    /// Text without any matching line yields an empty vector. Captures that
    /// are not valid object ids are skipped.
    pub fn find_shas(&self, text: &str) -> Vec<Oid> {
        let mut hashes = Vec::new();

        for caps in self.re.captures_iter(text) {
            let raw = &caps[1];

            match Oid::from_str(raw) {
                Ok(oid) => hashes.push(oid),
                Err(_) => debug!(capture = raw, "Trailer value is not a valid object id; skipping"),
            }
        }

        hashes
    }
}

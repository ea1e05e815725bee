//! Source references and the content-addressed checkout they resolve to.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// A repository plus a remote-resolvable ref or commit object name.
///
/// Parsed from `<repository_url>[#<ref>]`; a repository without a fragment
/// defaults to `master`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Repository URL (fetchable by the VCS backend).
    pub repository: String,
    /// Remote head name or commit object name, pre-resolution.
    pub commit_spec: String,
}

impl SourceRef {
    /// Parse `<repository_url>[#<ref>]`.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('#') {
            Some((repo, ref_name)) if !ref_name.is_empty() => Self {
                repository: repo.to_string(),
                commit_spec: ref_name.to_string(),
            },
            _ => Self {
                repository: spec.trim_end_matches('#').to_string(),
                commit_spec: "master".to_string(),
            },
        }
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.repository, self.commit_spec)
    }
}

/// A `SourceRef` after `resolve()` has pinned `commit_spec` to a concrete
/// object name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSource {
    /// Repository URL.
    pub repository: String,
    /// Concrete commit object name.
    pub commit: String,
}

impl ResolvedSource {
    /// The content-addressed key identifying this checkout:
    /// `hash({repository, commit})`.
    #[must_use]
    pub fn checkout_id(&self) -> String {
        tasklab_hash::hash_value(&json!({
            "repository": self.repository,
            "commit": self.commit,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fragment_as_ref() {
        let s = SourceRef::parse("https://example.com/repo.git#feature/x");
        assert_eq!(s.repository, "https://example.com/repo.git");
        assert_eq!(s.commit_spec, "feature/x");
    }

    #[test]
    fn defaults_to_master_without_fragment() {
        let s = SourceRef::parse("https://example.com/repo.git");
        assert_eq!(s.commit_spec, "master");
    }

    #[test]
    fn checkout_id_is_stable_for_equal_inputs() {
        let a = ResolvedSource {
            repository: "r".into(),
            commit: "c".into(),
        };
        let b = ResolvedSource {
            repository: "r".into(),
            commit: "c".into(),
        };
        assert_eq!(a.checkout_id(), b.checkout_id());
    }
}

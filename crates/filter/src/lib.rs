//! The filter predicate: a boolean expression compiled from a user string
//! and evaluated against a task-symbol adapter exposing claims.
//!
//! Claims: `&<key>` (user property), `@<name>` (merged argument value),
//! `#<tag>` (tag membership), and bare words for
//! `{failed, pending, complete, running, entrypoint, source, commit,
//! created, updated}`. The grammar itself is intentionally small — `and`,
//! `or`, `not`, parentheses, and a handful of comparison operators over
//! string/number/bool literals — callers treat a compiled [`Filter`] as
//! opaque.

mod lexer;
mod parser;

use lexer::{lex, Token};
use parser::{parse, Expr};
use serde_json::Value;
use std::fmt;
use tasklab_store::{Meta, Task, TaskStatus, Tasks};
use thiserror::Error;

/// Failures raised while compiling a filter expression.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The lexer found a character it does not recognise.
    #[error("unexpected character {0:?} in filter expression")]
    UnexpectedChar(char),
    /// The parser expected one token but found another (or ran out).
    #[error("unexpected token {found} (expected {expected})")]
    UnexpectedToken {
        /// What the parser actually saw.
        found: String,
        /// What the parser was looking for.
        expected: &'static str,
    },
    /// Tokens remained after a complete expression was parsed.
    #[error("unexpected trailing input: {0}")]
    TrailingInput(String),
}

/// The adapter a compiled [`Filter`] evaluates claims against. Implemented
/// here for [`Task`]; any other symbol source can implement it too.
pub trait Claims {
    /// `&<key>`: a free-form user property.
    fn property(&self, key: &str) -> Option<Value>;
    /// `@<name>`: a merged (coerced) entry-point argument value.
    fn argument(&self, name: &str) -> Option<Value>;
    /// `#<tag>`: does any tag pointing at this task equal `tag`?
    fn has_tag(&self, tag: &str) -> bool;
    /// A bare word: one of `failed, pending, complete, running, entrypoint,
    /// source, commit, created, updated`. `None` for an unrecognised word.
    fn attribute(&self, word: &str) -> Option<Value>;
}

/// A compiled, reusable boolean expression over task claims.
pub struct Filter {
    source: String,
    expr: Expr,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter").field("source", &self.source).finish()
    }
}

impl Filter {
    /// Compile a filter expression. Fails on malformed syntax; never fails
    /// on an unknown claim (those evaluate to `false` at match time).
    pub fn compile(source: &str) -> Result<Self, FilterError> {
        let tokens = lex(source)?;
        let expr = parse(&tokens)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// The original expression text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate this filter against a claims adapter.
    #[must_use]
    pub fn matches(&self, claims: &dyn Claims) -> bool {
        self.expr.eval(claims)
    }
}

/// Claims adapter over one task's metadata, within a catalog (for tag
/// membership lookups).
pub struct TaskClaims<'a> {
    meta: &'a Meta,
    tags: Vec<String>,
}

impl<'a> TaskClaims<'a> {
    /// Build an adapter for `task` within `catalog`.
    #[must_use]
    pub fn new(task: &Task, meta: &'a Meta, catalog: &Tasks) -> Self {
        Self {
            meta,
            tags: catalog.tags_for(task.id()),
        }
    }
}

impl Claims for TaskClaims<'_> {
    fn property(&self, key: &str) -> Option<Value> {
        self.meta.properties.get(key).cloned()
    }

    fn argument(&self, name: &str) -> Option<Value> {
        self.meta.arguments.get(name).cloned()
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn attribute(&self, word: &str) -> Option<Value> {
        match word {
            "failed" => Some(Value::Bool(self.meta.status == TaskStatus::Failed)),
            "pending" => Some(Value::Bool(self.meta.status == TaskStatus::Pending)),
            "complete" => Some(Value::Bool(self.meta.status == TaskStatus::Complete)),
            "running" => Some(Value::Bool(self.meta.status == TaskStatus::Running)),
            "entrypoint" => Some(Value::String(self.meta.entrypoint.clone())),
            "source" => Some(Value::String(self.meta.repository.clone())),
            "commit" => Some(Value::String(self.meta.commit.clone())),
            "created" => Some(Value::String(self.meta.created.to_rfc3339())),
            "updated" => Some(Value::String(self.meta.updated.to_rfc3339())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn meta_with_status(status: TaskStatus) -> Meta {
        Meta {
            status,
            created: Utc::now(),
            updated: Utc::now(),
            repository: "git@example.com/repo".to_string(),
            commit: "abc123".to_string(),
            entrypoint: "train".to_string(),
            arguments: BTreeMap::from([("lr".to_string(), Value::from(0.1))]),
            dependencies: BTreeMap::new(),
            command: vec!["run".to_string()],
            environment: BTreeMap::new(),
            properties: BTreeMap::from([("owner".to_string(), Value::String("ada".to_string()))]),
        }
    }

    struct FixedClaims {
        meta: Meta,
        tags: Vec<&'static str>,
    }

    impl Claims for FixedClaims {
        fn property(&self, key: &str) -> Option<Value> {
            self.meta.properties.get(key).cloned()
        }
        fn argument(&self, name: &str) -> Option<Value> {
            self.meta.arguments.get(name).cloned()
        }
        fn has_tag(&self, tag: &str) -> bool {
            self.tags.iter().any(|t| *t == tag)
        }
        fn attribute(&self, word: &str) -> Option<Value> {
            match word {
                "failed" => Some(Value::Bool(self.meta.status == TaskStatus::Failed)),
                "pending" => Some(Value::Bool(self.meta.status == TaskStatus::Pending)),
                "complete" => Some(Value::Bool(self.meta.status == TaskStatus::Complete)),
                "running" => Some(Value::Bool(self.meta.status == TaskStatus::Running)),
                "entrypoint" => Some(Value::String(self.meta.entrypoint.clone())),
                _ => None,
            }
        }
    }

    #[test]
    fn bare_word_matches_status() {
        let filter = Filter::compile("failed").unwrap();
        let claims = FixedClaims {
            meta: meta_with_status(TaskStatus::Failed),
            tags: vec![],
        };
        assert!(filter.matches(&claims));

        let claims = FixedClaims {
            meta: meta_with_status(TaskStatus::Pending),
            tags: vec![],
        };
        assert!(!filter.matches(&claims));
    }

    #[test]
    fn and_or_not_compose() {
        let filter = Filter::compile("not failed and (pending or complete)").unwrap();
        let claims = FixedClaims {
            meta: meta_with_status(TaskStatus::Complete),
            tags: vec![],
        };
        assert!(filter.matches(&claims));

        let claims = FixedClaims {
            meta: meta_with_status(TaskStatus::Failed),
            tags: vec![],
        };
        assert!(!filter.matches(&claims));
    }

    #[test]
    fn property_and_tag_and_argument_claims() {
        let filter = Filter::compile(r#"&owner == "ada" and #nightly"#).unwrap();
        let claims = FixedClaims {
            meta: meta_with_status(TaskStatus::Pending),
            tags: vec!["nightly"],
        };
        assert!(filter.matches(&claims));

        let filter = Filter::compile("@lr > 0.05").unwrap();
        assert!(filter.matches(&claims));

        let filter = Filter::compile("@lr > 0.5").unwrap();
        assert!(!filter.matches(&claims));
    }

    #[test]
    fn entrypoint_string_equality() {
        let filter = Filter::compile(r#"entrypoint == "train""#).unwrap();
        let claims = FixedClaims {
            meta: meta_with_status(TaskStatus::Pending),
            tags: vec![],
        };
        assert!(filter.matches(&claims));
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(Filter::compile("and or").is_err());
        assert!(Filter::compile("(failed").is_err());
    }
}

//! The entry-point model: typed arguments, command templating, observers
//! and artifact patterns declared inside a source tree.

use crate::error::{Error, Result};
use globset::Glob;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Declared type of an entry-point argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentType {
    /// Integer.
    Int,
    /// Floating point.
    Float,
    /// Boolean, parsed from a small accepting vocabulary.
    Bool,
    /// Opaque string, no coercion.
    String,
}

impl ArgumentType {
    /// Coerce a raw string value into this type.
    pub fn coerce(self, name: &str, raw: &str) -> Result<Value> {
        match self {
            ArgumentType::Int => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| Error::ArgumentInvalid {
                    name: name.to_string(),
                    expected: "int",
                    value: raw.to_string(),
                }),
            ArgumentType::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| Error::ArgumentInvalid {
                    name: name.to_string(),
                    expected: "float",
                    value: raw.to_string(),
                }),
            ArgumentType::Bool => parse_bool(raw)
                .map(Value::Bool)
                .ok_or_else(|| Error::ArgumentInvalid {
                    name: name.to_string(),
                    expected: "bool",
                    value: raw.to_string(),
                }),
            ArgumentType::String => Ok(Value::String(raw.to_string())),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Declaration of a single typed argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentSpec {
    /// Declared type.
    #[serde(rename = "type")]
    pub ty: ArgumentType,
    /// Default value, used when the caller omits the argument. `None`
    /// means the argument is required.
    #[serde(default)]
    pub default: Option<Value>,
    /// Whether this argument participates in the task identity hash.
    #[serde(default)]
    pub significant: bool,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Kind of log-line extractor an observer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverKind {
    /// `scores` — scalar aggregate, emitted on terminal.
    Scores,
    /// `steps` — dense stepped time series.
    Steps,
    /// Named sequences, one list per metric name.
    Sequences,
}

/// Declaration of a single observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverSpec {
    /// Key this observer's snapshots are stored under
    /// (`.meta/<key>.json`).
    pub key: String,
    /// Which extractor variant to run.
    pub kind: ObserverKind,
    /// Field separator, defaults to `":"`.
    #[serde(default)]
    pub separator: Option<String>,
}

/// A named entry point declared inside a source tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPoint {
    /// Name of this entry point, as referenced by task creation.
    pub name: String,
    /// Command template (`{{name}}` placeholders, POSIX-shell tokenised
    /// after substitution).
    pub command: String,
    /// Typed argument declarations.
    #[serde(default)]
    pub arguments: BTreeMap<String, ArgumentSpec>,
    /// Fixed environment variables for this entry point's process.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Declared observers.
    #[serde(default)]
    pub observers: Vec<ObserverSpec>,
    /// Glob patterns (relative to the run directory) selecting artifacts
    /// to persist on success, in declaration order.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// Render a JSON scalar the way it appears in a shell command line.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

impl EntryPoint {
    /// Coerce every entry in `raw` that matches a declared argument to its
    /// type. Arguments not declared on this entry point pass through
    /// untouched as strings — they may still be consumed by `@ref` token
    /// substitution before this point.
    pub fn coerce(&self, raw: &BTreeMap<String, String>) -> Result<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        for (name, value) in raw {
            let coerced = match self.arguments.get(name) {
                Some(spec) => spec.ty.coerce(name, value)?,
                None => Value::String(value.clone()),
            };
            out.insert(name.clone(), coerced);
        }
        Ok(out)
    }

    /// Fill defaults for missing declared arguments. When `insignificant`
    /// is `false`, the result is restricted to arguments flagged
    /// `significant` (used for the task identity hash); undeclared
    /// arguments are always dropped in that mode. Missing required
    /// (default-less) arguments raise [`Error::ArgumentMissing`].
    pub fn merge(
        &self,
        coerced: &BTreeMap<String, Value>,
        insignificant: bool,
    ) -> Result<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        for (name, spec) in &self.arguments {
            if !insignificant && !spec.significant {
                continue;
            }
            let value = coerced.get(name).cloned().or_else(|| spec.default.clone());
            match value {
                Some(v) => {
                    out.insert(name.clone(), v);
                }
                None => return Err(Error::ArgumentMissing(name.clone())),
            }
        }
        if insignificant {
            for (name, value) in coerced {
                out.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        Ok(out)
    }

    /// Expand `{{name}}` placeholders in `command` against `merged`
    /// (always `insignificant = true`) and split the result with POSIX
    /// shell word rules.
    pub fn generate(&self, merged: &BTreeMap<String, Value>) -> Result<Vec<String>> {
        let mut expanded = self.command.clone();
        for (name, value) in merged {
            let placeholder = format!("{{{{{name}}}}}");
            expanded = expanded.replace(&placeholder, &value_to_string(value));
        }
        shell_words::split(&expanded)
            .map_err(|e| Error::validation(format!("invalid command template: {e}")))
    }

    /// Does `filename` match any declared artifact pattern?
    #[must_use]
    pub fn artifact_match(&self, filename: &str) -> bool {
        self.matching_artifact_pattern(filename).is_some()
    }

    /// The first declared artifact pattern (in declaration order) that
    /// matches `filename`, if any.
    #[must_use]
    pub fn matching_artifact_pattern(&self, filename: &str) -> Option<&str> {
        self.artifacts.iter().find_map(|pattern| {
            let glob = Glob::new(pattern).ok()?.compile_matcher();
            glob.is_match(filename).then_some(pattern.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> EntryPoint {
        let mut arguments = BTreeMap::new();
        arguments.insert(
            "epochs".to_string(),
            ArgumentSpec {
                ty: ArgumentType::Int,
                default: Some(json!(1)),
                significant: true,
                description: None,
            },
        );
        arguments.insert(
            "verbose".to_string(),
            ArgumentSpec {
                ty: ArgumentType::Bool,
                default: Some(json!(false)),
                significant: false,
                description: None,
            },
        );
        EntryPoint {
            name: "train".to_string(),
            command: "python train.py --epochs {{epochs}} --verbose {{verbose}}".to_string(),
            arguments,
            environment: BTreeMap::new(),
            observers: Vec::new(),
            artifacts: vec!["model.bin".to_string(), "logs/**/*.json".to_string()],
        }
    }

    #[test]
    fn coerce_respects_declared_types() {
        let ep = sample();
        let mut raw = BTreeMap::new();
        raw.insert("epochs".to_string(), "3".to_string());
        raw.insert("verbose".to_string(), "yes".to_string());
        let coerced = ep.coerce(&raw).unwrap();
        assert_eq!(coerced["epochs"], json!(3));
        assert_eq!(coerced["verbose"], json!(true));
    }

    #[test]
    fn merge_fills_defaults_for_missing_arguments() {
        let ep = sample();
        let merged = ep.merge(&BTreeMap::new(), true).unwrap();
        assert_eq!(merged["epochs"], json!(1));
        assert_eq!(merged["verbose"], json!(false));
    }

    #[test]
    fn merge_significant_only_drops_insignificant_arguments() {
        let ep = sample();
        let merged = ep.merge(&BTreeMap::new(), false).unwrap();
        assert!(merged.contains_key("epochs"));
        assert!(!merged.contains_key("verbose"));
    }

    #[test]
    fn generate_expands_and_tokenises() {
        let ep = sample();
        let merged = ep.merge(&BTreeMap::new(), true).unwrap();
        let argv = ep.generate(&merged).unwrap();
        assert_eq!(
            argv,
            vec!["python", "train.py", "--epochs", "1", "--verbose", "false"]
        );
    }

    #[test]
    fn artifact_match_applies_globs_in_order() {
        let ep = sample();
        assert!(ep.artifact_match("model.bin"));
        assert!(ep.artifact_match("logs/epoch_1/metrics.json"));
        assert!(!ep.artifact_match("scratch.tmp"));
    }
}

//! Lazy, line-regular measurement extractors.
//!
//! Each extractor is fed one line at a time and produces a structured JSON
//! summary. None of them parse eagerly beyond the current line: there is no
//! buffering of the whole log, only the running aggregate each variant
//! needs to keep.

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Default field separator used when a declaration doesn't override it.
pub const DEFAULT_SEPARATOR: &str = ":";

/// Parses a value that looks like a float; keeps it verbatim as a string
/// otherwise.
fn parse_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(trimmed.to_string())
}

/// Splits `line` on the first occurrence of `sep`, trimming both sides.
/// Returns `None` if `sep` doesn't appear or the name half is empty.
fn split_field<'a>(line: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    let idx = line.find(sep)?;
    let (name, rest) = line.split_at(idx);
    let rest = &rest[sep.len()..];
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, rest.trim()))
}

/// A line-driven measurement extractor.
///
/// `feed_line` is called for every line of the task's output and may
/// return an intermediate snapshot. `finish` is always called exactly once
/// when the stream closes and returns the final snapshot.
pub trait Extractor: Send {
    /// Process one line of output, returning an emission if this line
    /// triggers one.
    fn feed_line(&mut self, line: &str) -> Option<Value>;
    /// Called on stream close (`push(None)`); returns the final snapshot.
    fn finish(&mut self) -> Value;
}

/// `scores` — a flat map of named scalar aggregates, emitted once at the end.
pub struct ScalarAggregator {
    sep: String,
    data: BTreeMap<String, Value>,
}

impl ScalarAggregator {
    #[must_use]
    pub fn new(sep: impl Into<String>) -> Self {
        Self {
            sep: sep.into(),
            data: BTreeMap::new(),
        }
    }
}

impl Default for ScalarAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl Extractor for ScalarAggregator {
    fn feed_line(&mut self, line: &str) -> Option<Value> {
        let (name, rest) = split_field(line, &self.sep)?;
        self.data.insert(name.to_string(), parse_value(rest));
        None
    }

    fn finish(&mut self) -> Value {
        let data: Map<String, Value> = self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        json!({"type": "aggregated", "data": Value::Object(data)})
    }
}

/// `steps` — a dense, step-indexed time series.
pub struct SteppedSeries {
    sep: String,
    step_key: String,
    offset: Option<i64>,
    current_step: Option<i64>,
    series: Vec<BTreeMap<String, Value>>,
}

impl SteppedSeries {
    #[must_use]
    pub fn new(sep: impl Into<String>) -> Self {
        Self {
            sep: sep.into(),
            step_key: "step".to_string(),
            offset: None,
            current_step: None,
            series: Vec::new(),
        }
    }

    fn snapshot(&self) -> Value {
        let data: Vec<Value> = self
            .series
            .iter()
            .map(|row| Value::Object(row.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
            .collect();
        json!({
            "type": "steps",
            "offset": self.offset.unwrap_or(0),
            "data": data,
        })
    }

    fn advance_to(&mut self, step: i64) {
        let offset = *self.offset.get_or_insert(step);
        // `step` is monotonic non-decreasing per the contract; clamp against
        // regressions defensively rather than panicking on malformed output.
        let step = step.max(self.current_step.unwrap_or(offset));
        self.current_step = Some(step);
        let needed = (step - offset + 1).max(0) as usize;
        while self.series.len() < needed {
            self.series.push(BTreeMap::new());
        }
    }
}

impl Default for SteppedSeries {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl Extractor for SteppedSeries {
    fn feed_line(&mut self, line: &str) -> Option<Value> {
        let (name, rest) = split_field(line, &self.sep)?;
        if name == self.step_key {
            if let Ok(step) = rest.trim().parse::<i64>() {
                self.advance_to(step);
                return Some(self.snapshot());
            }
            return None;
        }
        if let Some(row) = self.series.last_mut() {
            row.insert(name.to_string(), parse_value(rest));
        }
        None
    }

    fn finish(&mut self) -> Value {
        self.snapshot()
    }
}

/// Named sequences — every `name` line appends to `data[name]`, emitted
/// once at the end.
pub struct NamedSequences {
    sep: String,
    data: BTreeMap<String, Vec<Value>>,
}

impl NamedSequences {
    #[must_use]
    pub fn new(sep: impl Into<String>) -> Self {
        Self {
            sep: sep.into(),
            data: BTreeMap::new(),
        }
    }
}

impl Default for NamedSequences {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl Extractor for NamedSequences {
    fn feed_line(&mut self, line: &str) -> Option<Value> {
        let (name, rest) = split_field(line, &self.sep)?;
        self.data.entry(name.to_string()).or_default().push(parse_value(rest));
        None
    }

    fn finish(&mut self) -> Value {
        let data: Map<String, Value> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), Value::Array(v.clone())))
            .collect();
        json!({"type": "sequences", "data": Value::Object(data)})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_aggregator_collects_latest_value_per_name() {
        let mut ext = ScalarAggregator::default();
        assert!(ext.feed_line("accuracy: 0.91").is_none());
        assert!(ext.feed_line("accuracy: 0.93").is_none());
        assert!(ext.feed_line("label: best").is_none());
        let snap = ext.finish();
        assert_eq!(snap["type"], "aggregated");
        assert_eq!(snap["data"]["accuracy"], 0.93);
        assert_eq!(snap["data"]["label"], "best");
    }

    #[test]
    fn stepped_series_builds_dense_rows_anchored_at_first_step() {
        let mut ext = SteppedSeries::default();
        ext.feed_line("step: 1");
        ext.feed_line("loss: 0.5");
        ext.feed_line("step: 2");
        ext.feed_line("loss: 0.2");
        let snap = ext.finish();
        assert_eq!(snap["type"], "steps");
        assert_eq!(snap["offset"], 1);
        assert_eq!(snap["data"], serde_json::json!([{"loss": 0.5}, {"loss": 0.2}]));
    }

    #[test]
    fn stepped_series_emits_after_each_step_commit() {
        let mut ext = SteppedSeries::default();
        assert!(ext.feed_line("loss: 9.9").is_none()); // no step seen yet, dropped
        let emitted = ext.feed_line("step: 5").expect("step line commits and emits");
        assert_eq!(emitted["offset"], 5);
        assert_eq!(emitted["data"], serde_json::json!([{}]));
    }

    #[test]
    fn named_sequences_appends_in_order() {
        let mut ext = NamedSequences::default();
        ext.feed_line("loss: 1.0");
        ext.feed_line("loss: 0.5");
        let snap = ext.finish();
        assert_eq!(snap["data"]["loss"], serde_json::json!([1.0, 0.5]));
    }

    #[test]
    fn unparseable_values_are_kept_as_strings() {
        let mut ext = ScalarAggregator::default();
        ext.feed_line("status: nan-ish");
        assert_eq!(ext.finish()["data"]["status"], "nan-ish");
    }

    #[test]
    fn custom_separator_is_honoured() {
        let mut ext = ScalarAggregator::new("=");
        ext.feed_line("score=0.75");
        assert_eq!(ext.finish()["data"]["score"], 0.75);
    }
}

//! The output tap: fans one stdout/stderr line stream to N sinks.
//!
//! A task's child process produces a single merged stream. The tap pushes
//! every line to an ordered set of sub-sinks (log file, console, one
//! extractor per declared observer) and tolerates any individual sink
//! failing without interrupting delivery to the others.

pub mod extractors;

pub use extractors::{Extractor, NamedSequences, ScalarAggregator, SteppedSeries};

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure modes a sub-sink can raise. The tap logs and swallows these.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The log sink could not write to its backing file.
    #[error("log sink write to {path} failed: {source}")]
    LogWrite {
        /// Path of the log file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

/// A single sink in the output tap's fan-out set.
///
/// `push(None)` is the terminal signal: implementations must release any
/// held resources (flush + close files) and must not be called again.
pub trait Sink: Send {
    /// Feed a line (or `None` to seal the sink).
    fn push(&mut self, line: Option<&str>) -> Result<(), SinkError>;
}

/// Appends every line to the per-task output file, flushing after each one.
pub struct LogSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl LogSink {
    /// Open (creating if needed) the log file at `path` for appending.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }
}

impl Sink for LogSink {
    fn push(&mut self, line: Option<&str>) -> Result<(), SinkError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let result = (|| -> std::io::Result<()> {
            match line {
                Some(l) => {
                    writer.write_all(l.as_bytes())?;
                    writer.write_all(b"\n")?;
                    writer.flush()
                }
                None => writer.flush(),
            }
        })();
        if line.is_none() {
            self.writer = None;
        }
        result.map_err(|source| SinkError::LogWrite {
            path: self.path.clone(),
            source,
        })
    }
}

/// Writes every line to the parent process's stdout, unbuffered between lines.
#[derive(Default)]
pub struct ConsoleSink;

impl Sink for ConsoleSink {
    fn push(&mut self, line: Option<&str>) -> Result<(), SinkError> {
        if let Some(l) = line {
            println!("{l}");
            let _ = std::io::stdout().flush();
        }
        Ok(())
    }
}

/// Routes every line through a measurement [`Extractor`] and hands each
/// emitted snapshot (including the final one) to a callback — in practice
/// a write into the owning task's `.meta/<observer>.json`.
pub struct ExtractorSink {
    extractor: Box<dyn Extractor>,
    on_emit: Box<dyn FnMut(&serde_json::Value) + Send>,
}

impl ExtractorSink {
    /// Wrap `extractor`, calling `on_emit` with every snapshot it produces.
    pub fn new(
        extractor: Box<dyn Extractor>,
        on_emit: impl FnMut(&serde_json::Value) + Send + 'static,
    ) -> Self {
        Self {
            extractor,
            on_emit: Box::new(on_emit),
        }
    }
}

impl Sink for ExtractorSink {
    fn push(&mut self, line: Option<&str>) -> Result<(), SinkError> {
        match line {
            Some(l) => {
                if let Some(snapshot) = self.extractor.feed_line(l) {
                    (self.on_emit)(&snapshot);
                }
            }
            None => {
                let snapshot = self.extractor.finish();
                (self.on_emit)(&snapshot);
            }
        }
        Ok(())
    }
}

/// Multiplexes one line stream to an ordered set of sinks, isolating
/// failures per sink.
#[derive(Default)]
pub struct OutputTap {
    sinks: Vec<Box<dyn Sink>>,
}

impl OutputTap {
    /// Start empty; sinks are added with [`OutputTap::add`].
    #[must_use]
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Register a sub-sink. Order is preserved for delivery.
    pub fn add(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    /// Push one line (or `None` to close every sub-sink) to every sink.
    /// A failing sink is logged and does not block delivery to the rest.
    pub fn push(&mut self, line: Option<&str>) {
        for sink in &mut self.sinks {
            if let Err(err) = sink.push(line) {
                tracing::warn!(error = %err, "output sink failed; continuing to remaining sinks");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Arc, Mutex};

    #[test]
    fn log_sink_round_trips_every_line_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        let mut sink = LogSink::open(&path).unwrap();
        sink.push(Some("line one")).unwrap();
        sink.push(Some("line two")).unwrap();
        sink.push(None).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "line one\nline two\n");
    }

    #[test]
    fn extractor_sink_calls_back_on_emission_and_on_terminal() {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let emitted_clone = emitted.clone();
        let mut sink = ExtractorSink::new(
            Box::new(ScalarAggregator::default()),
            move |v| emitted_clone.lock().unwrap().push(v.clone()),
        );
        sink.push(Some("accuracy: 0.5")).unwrap();
        assert!(emitted.lock().unwrap().is_empty(), "scalar aggregator only emits on terminal");
        sink.push(None).unwrap();
        let snaps = emitted.lock().unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0]["data"]["accuracy"], 0.5);
    }

    struct FailingSink;
    impl Sink for FailingSink {
        fn push(&mut self, _line: Option<&str>) -> Result<(), SinkError> {
            Err(SinkError::LogWrite {
                path: PathBuf::from("/nonexistent"),
                source: std::io::Error::other("boom"),
            })
        }
    }

    #[test]
    fn a_failing_sink_does_not_block_its_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        let mut tap = OutputTap::new();
        tap.add(Box::new(FailingSink));
        tap.add(Box::new(LogSink::open(&path).unwrap()));
        tap.push(Some("hello"));
        tap.push(None);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
    }
}

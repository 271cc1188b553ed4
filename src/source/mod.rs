//! # Source
//!
//! A thread-safe round-robin feeder of pre-loaded records. Grounded on
//! `internal/source/source_dict.go` and `internal/source/source_file.go`:
//! both variants are just "a loaded `Vec<Value>` plus an atomic counter".
//! `Fetch` never blocks and never allocates beyond cloning the returned
//! record — it's called once per unit, from every worker, for the whole
//! stage duration.

use crate::value::{from_json, Value};
use serde_json::Value as Json;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source {0:?} has no records (empty sources are rejected at construction)")]
    Empty(String),
    #[error("failed to read source file {path:?}: {io}")]
    Io {
        path: String,
        #[source]
        io: std::io::Error,
    },
    #[error("failed to parse line {line} of source file {path:?}: {source}")]
    ParseLine {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// A loaded, immutable record set with lock-free round-robin fetch.
pub struct Source {
    name: String,
    records: Vec<Value>,
    counter: AtomicU64,
}

impl Source {
    /// Inline variant: records are embedded in the playbook's options.
    pub fn from_inline(name: impl Into<String>, records: Vec<Json>) -> Result<Self, SourceError> {
        let name = name.into();
        if records.is_empty() {
            return Err(SourceError::Empty(name));
        }
        Ok(Source {
            name,
            records: records.iter().map(from_json).collect(),
            counter: AtomicU64::new(0),
        })
    }

    /// File-backed variant: one JSON value per non-empty line.
    /// `ignore_parse_error` controls whether a malformed line aborts
    /// loading or is silently skipped.
    pub fn from_file(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        ignore_parse_error: bool,
    ) -> Result<Self, SourceError> {
        let name = name.into();
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref).map_err(|io| SourceError::Io {
            path: path_ref.display().to_string(),
            io,
        })?;

        let mut records = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Json>(line) {
                Ok(json) => records.push(from_json(&json)),
                Err(source) if ignore_parse_error => {
                    tracing::warn!(
                        source = %name,
                        path = %path_ref.display(),
                        line = idx + 1,
                        error = %source,
                        "skipping unparsable source line"
                    );
                }
                Err(source) => {
                    return Err(SourceError::ParseLine {
                        path: path_ref.display().to_string(),
                        line: idx + 1,
                        source,
                    })
                }
            }
        }

        if records.is_empty() {
            return Err(SourceError::Empty(name));
        }

        Ok(Source {
            name,
            records,
            counter: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock-free round-robin fetch: the k-th successful call returns
    /// `records[k % len]`. Safe for unbounded concurrent callers.
    pub fn fetch(&self) -> Value {
        let idx = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = self.records.len() as u64;
        self.records[(idx % len) as usize].clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_deterministically() {
        let json = vec![serde_json::json!({"k": "a"}), serde_json::json!({"k": "b"})];
        let source = Source::from_inline("src", json).unwrap();
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(source.fetch().get_path(&crate::value::Path::parse("k")).unwrap().clone());
        }
        assert_eq!(
            seen,
            vec![
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("a".into()),
            ]
        );
    }

    #[test]
    fn empty_source_is_rejected() {
        assert!(Source::from_inline("src", vec![]).is_err());
    }

    #[test]
    fn single_record_source_always_returns_it() {
        let source = Source::from_inline("src", vec![serde_json::json!(42)]).unwrap();
        for _ in 0..10 {
            assert_eq!(source.fetch(), Value::Int(42));
        }
    }

    #[test]
    fn round_robin_under_concurrency_is_fair() {
        use std::sync::Arc;
        use std::thread;

        let json = vec![serde_json::json!(0), serde_json::json!(1), serde_json::json!(2)];
        let source = Arc::new(Source::from_inline("src", json).unwrap());
        let counts = Arc::new([AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)]);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let source = Arc::clone(&source);
            let counts = Arc::clone(&counts);
            handles.push(thread::spawn(move || {
                for _ in 0..300 {
                    let v = source.fetch();
                    let idx = v.as_i64().unwrap() as usize;
                    counts[idx].fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let values: Vec<u64> = counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();
        let max = *values.iter().max().unwrap();
        let min = *values.iter().min().unwrap();
        assert!(max - min <= 1, "counts should differ by at most 1, got {values:?}");
    }
}

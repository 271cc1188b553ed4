//! # Recorder
//!
//! Append-only, concurrency-safe sink for `UnitStat` and `Meta`.
//! Grounded on `internal/recorder/recorder_file.go`: a single mutex
//! around a buffered writer, default 32 KiB buffer, one JSON object per
//! line. The mutex approach is chosen over a channel-fed writer task
//! because it's the simpler of the two options §4.E calls acceptable,
//! and this recorder's hot path (one `Record` call per unit completion)
//! never holds the lock long enough for contention to matter.

use crate::model::{Meta, UnitStat};
use chrono::Utc;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("failed to open recorder file {path:?}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write record: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// File-backed recorder. The main file holds one UnitStat per line; Meta
/// is written once, at `close`, to a sibling `<path>.meta.json` file.
pub struct FileRecorder {
    writer: Mutex<BufWriter<std::fs::File>>,
    meta_path: PathBuf,
    /// When true, overwrites `UnitStat.time` with the recorder's own
    /// wall-clock sample at write time, rather than trusting the
    /// producer's timestamp (§4.E, "Timestamp policy").
    overwrite_timestamp: bool,
}

impl FileRecorder {
    pub fn new(path: impl AsRef<Path>, overwrite_timestamp: bool) -> Result<Self, RecorderError> {
        Self::with_buffer_size(path, overwrite_timestamp, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(
        path: impl AsRef<Path>,
        overwrite_timestamp: bool,
        buffer_size: usize,
    ) -> Result<Self, RecorderError> {
        let path = path.as_ref();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|source| RecorderError::Open {
                path: path.display().to_string(),
                source,
            })?;

        Ok(FileRecorder {
            writer: Mutex::new(BufWriter::with_capacity(buffer_size, file)),
            meta_path: meta_sidecar_path(path),
            overwrite_timestamp,
        })
    }

    /// Serializes `stat` and writes it as one line. The mutex guarantees
    /// that one call's bytes — including the trailing newline — are
    /// never interleaved with another's, even under heavy concurrent
    /// calling (§3's "concurrent writers never interleave bytes").
    pub fn record(&self, mut stat: UnitStat) -> Result<(), RecorderError> {
        if self.overwrite_timestamp {
            stat.time = Utc::now();
        }
        let mut line = serde_json::to_vec(&stat)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().expect("recorder mutex poisoned");
        writer.write_all(&line).map_err(RecorderError::Write)
    }

    pub fn record_meta(&self, meta: &Meta) -> Result<(), RecorderError> {
        let json = serde_json::to_vec_pretty(meta)?;
        std::fs::write(&self.meta_path, json).map_err(RecorderError::Write)
    }

    pub fn close(&self) -> Result<(), RecorderError> {
        let mut writer = self.writer.lock().expect("recorder mutex poisoned");
        writer.flush().map_err(RecorderError::Write)
    }
}

pub fn meta_sidecar_path(main_path: &Path) -> PathBuf {
    let mut name = main_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".meta.json");
    main_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepStat;
    use std::sync::Arc;

    fn sample_stat(seq: usize) -> UnitStat {
        UnitStat {
            id: "run-1".to_string(),
            seq,
            time: Utc::now(),
            name: "unit-a".to_string(),
            step: vec![StepStat {
                time: Utc::now(),
                req: serde_json::json!({}),
                res: serde_json::json!({}),
                err: None,
                err_code: String::new(),
                res_time_ms: 1,
            }],
            err_code: String::new(),
            res_time_ms: 1,
        }
    }

    #[test]
    fn writes_one_line_per_record() {
        let dir = tempfile_dir();
        let path = dir.join("out.jsonl");
        let recorder = FileRecorder::new(&path, false).unwrap();
        recorder.record(sample_stat(0)).unwrap();
        recorder.record(sample_stat(1)).unwrap();
        recorder.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let _: UnitStat = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn concurrent_records_never_interleave() {
        let dir = tempfile_dir();
        let path = dir.join("concurrent.jsonl");
        let recorder = Arc::new(FileRecorder::new(&path, false).unwrap());

        std::thread::scope(|scope| {
            for seq in 0..8 {
                let recorder = Arc::clone(&recorder);
                scope.spawn(move || {
                    for _ in 0..50 {
                        recorder.record(sample_stat(seq)).unwrap();
                    }
                });
            }
        });
        recorder.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut count = 0;
        for line in content.lines() {
            serde_json::from_str::<UnitStat>(line).expect("every line must be well-formed JSON");
            count += 1;
        }
        assert_eq!(count, 400);
    }

    #[test]
    fn meta_is_written_to_sidecar_path() {
        let dir = tempfile_dir();
        let path = dir.join("run.jsonl");
        let recorder = FileRecorder::new(&path, false).unwrap();
        let meta = Meta {
            id: "run-1".to_string(),
            name: "demo".to_string(),
            duration_secs: vec![1.0],
            parallel: vec![Default::default()],
            time_range: vec![],
        };
        recorder.record_meta(&meta).unwrap();

        let sidecar = meta_sidecar_path(&path);
        assert!(sidecar.exists());
        let read_back: Meta = serde_json::from_str(&std::fs::read_to_string(sidecar).unwrap()).unwrap();
        assert_eq!(read_back.id, "run-1");
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("ben-recorder-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}

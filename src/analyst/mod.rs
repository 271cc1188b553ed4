//! # Analyst
//!
//! Symmetric reader to the Recorder: loads `Meta` and streams `UnitStat`
//! back out of a completed recording. Per §9/§4.F, TimeRange comes
//! exclusively from the Meta sidecar — the reference implementation's
//! manual head/tail byte-scan (`analyst_file.go`) for recovering time
//! range without a sidecar is legacy behavior this crate does not
//! reproduce.

use crate::model::{Meta, UnitStat};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalystError {
    #[error("failed to read meta sidecar {path:?}: {source}")]
    ReadMeta {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse meta sidecar {path:?}: {source}")]
    ParseMeta {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to open recording {path:?}: {source}")]
    OpenStream {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct FileAnalyst {
    main_path: PathBuf,
    meta: Meta,
}

impl FileAnalyst {
    pub fn open(main_path: impl AsRef<Path>) -> Result<Self, AnalystError> {
        let main_path = main_path.as_ref().to_path_buf();
        let meta_path = crate::recorder::meta_sidecar_path(&main_path);
        let content = std::fs::read_to_string(&meta_path).map_err(|source| AnalystError::ReadMeta {
            path: meta_path.display().to_string(),
            source,
        })?;
        let meta: Meta = serde_json::from_str(&content).map_err(|source| AnalystError::ParseMeta {
            path: meta_path.display().to_string(),
            source,
        })?;
        Ok(FileAnalyst { main_path, meta })
    }

    /// `id` selects which run a multi-run analyst should replay; this
    /// single-file analyst manages exactly one run, so it is ignored
    /// (§4.F: "in the simple case the id is ignored").
    pub fn meta(&self, _id: &str) -> &Meta {
        &self.meta
    }

    pub fn unit_stat_stream(&self, _id: &str) -> Result<UnitStatStream, AnalystError> {
        let file = File::open(&self.main_path).map_err(|source| AnalystError::OpenStream {
            path: self.main_path.display().to_string(),
            source,
        })?;
        Ok(UnitStatStream {
            lines: BufReader::new(file).lines(),
        })
    }
}

/// Line-by-line `UnitStat` iterator; yields `Some(Err(..))` on a decode
/// failure for that one line without poisoning the rest of the stream,
/// and `None` at end of file.
pub struct UnitStatStream {
    lines: std::io::Lines<BufReader<File>>,
}

impl Iterator for UnitStatStream {
    type Item = Result<UnitStat, serde_json::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?.ok()?;
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepStat;
    use crate::recorder::FileRecorder;
    use chrono::Utc;

    fn sample(seq: usize) -> UnitStat {
        UnitStat {
            id: "r".to_string(),
            seq,
            time: Utc::now(),
            name: "u".to_string(),
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
    fn round_trips_recorded_units() {
        let dir = std::env::temp_dir().join(format!("ben-analyst-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roundtrip.jsonl");

        let recorder = FileRecorder::new(&path, false).unwrap();
        recorder.record(sample(0)).unwrap();
        recorder.record(sample(1)).unwrap();
        recorder
            .record_meta(&Meta {
                id: "r".to_string(),
                name: "demo".to_string(),
                duration_secs: vec![1.0],
                parallel: vec![Default::default()],
                time_range: vec![],
            })
            .unwrap();
        recorder.close().unwrap();

        let analyst = FileAnalyst::open(&path).unwrap();
        assert_eq!(analyst.meta("").id, "r");

        let units: Vec<UnitStat> = analyst
            .unit_stat_stream("")
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].seq, 0);
        assert_eq!(units[1].seq, 1);
    }
}

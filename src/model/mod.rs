//! # Data Model (§3)
//!
//! The shapes the Recorder writes and the Analyst reads back. These are
//! part of the interface contract (§6: "UnitStat and Meta field names and
//! shapes are part of the interface contract because the Analyst reads
//! them back"), so their `serde` representation is the one thing in this
//! crate that must not drift casually.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// One driver invocation within a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStat {
    pub time: DateTime<Utc>,
    pub req: Json,
    pub res: Json,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    /// Empty string means the step passed.
    #[serde(default)]
    pub err_code: String,
    pub res_time_ms: u64,
}

impl StepStat {
    pub fn passed(&self) -> bool {
        self.err_code.is_empty()
    }
}

/// The recorded outcome of one unit run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitStat {
    pub id: String,
    /// Stage index; `seq ∈ [0, stage_count)`.
    pub seq: usize,
    pub time: DateTime<Utc>,
    pub name: String,
    pub step: Vec<StepStat>,
    /// Empty string if every step passed.
    #[serde(default)]
    pub err_code: String,
    pub res_time_ms: u64,
}

impl UnitStat {
    pub fn passed(&self) -> bool {
        self.err_code.is_empty()
    }
}

/// One stage's observed wall-clock window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Run-level metadata, written once after every stage completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub id: String,
    pub name: String,
    /// One entry per stage, in stage order.
    pub duration_secs: Vec<f64>,
    /// One parallelism map per stage: unit name -> worker count.
    pub parallel: Vec<std::collections::BTreeMap<String, usize>>,
    /// One observed time range per stage.
    pub time_range: Vec<TimeRange>,
}

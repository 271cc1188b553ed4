//! # Reporter
//!
//! Pure formatting layer (§4.I): turns `(Meta, [StageMetrics], [ChartSeries])`
//! into one output string. Reporters never touch the filesystem or
//! network — the Scheduler is the one that prints (or the CLI writes)
//! whatever string comes back.

mod html;
mod json;
mod text;

use crate::model::Meta;
use crate::monitor::ChartSeries;
use crate::statistics::StageMetrics;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("unknown reporter type {0:?}")]
    UnknownType(String),
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Everything a reporter needs: run metadata, the per-stage metric
/// series Statistics produced, and whatever Monitor windows were
/// collected for each stage (empty entries for stages with no
/// configured monitor, or when the default `NullMonitor` is in use).
pub struct ReportInput<'a> {
    pub meta: &'a Meta,
    pub metrics: &'a [StageMetrics],
    pub monitor_windows: &'a [ChartSeries],
}

pub fn render(kind: &str, input: &ReportInput) -> Result<String, ReporterError> {
    match kind {
        "Json" => Ok(json::render(input)?),
        "Text" => Ok(text::render(input)),
        "Html" => Ok(html::render(input)),
        other => Err(ReporterError::UnknownType(other.to_string())),
    }
}

/// Builds a reporter `type` string from a playbook's `options`. Defaults
/// to `"Text"` when no reporter block is configured — the Scheduler
/// always has something to print.
pub fn kind_from_options(kind: Option<&str>) -> String {
    kind.unwrap_or("Text").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeRange;
    use chrono::Utc;

    fn sample_meta() -> Meta {
        let now = Utc::now();
        Meta {
            id: "r".to_string(),
            name: "demo".to_string(),
            duration_secs: vec![1.0],
            parallel: vec![std::collections::BTreeMap::from([("u".to_string(), 1)])],
            time_range: vec![TimeRange {
                start_time: now,
                end_time: now,
            }],
        }
    }

    #[test]
    fn unknown_reporter_kind_is_rejected() {
        let meta = sample_meta();
        let metrics = vec![StageMetrics::new()];
        let input = ReportInput {
            meta: &meta,
            metrics: &metrics,
            monitor_windows: &[],
        };
        assert!(matches!(render("Bogus", &input), Err(ReporterError::UnknownType(_))));
    }

    #[test]
    fn default_kind_is_text() {
        assert_eq!(kind_from_options(None), "Text");
    }
}

//! # Monitor
//!
//! External time-series collector (§4.J): given a stage's observed
//! `[StartTime, EndTime)` window, returns a nested map of chart name ->
//! series name -> measurements. The Scheduler calls `collect` once per
//! stage and folds the result alongside the Statistics output into the
//! Reporter's input.
//!
//! `NullMonitor` is the default/no-op implementation every playbook gets
//! unless a monitor block configures something else, so the Scheduler
//! never special-cases "no monitor configured".

pub mod acm;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitor request failed: {0}")]
    Request(String),
    #[error("monitor response could not be decoded: {0}")]
    Decode(String),
}

/// One sampled point in a collected series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub time: DateTime<Utc>,
    pub value: f64,
}

pub type ChartSeries = BTreeMap<String, BTreeMap<String, Vec<Measurement>>>;

#[async_trait]
pub trait Monitor: Send + Sync {
    async fn collect(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<ChartSeries, MonitorError>;
}

/// No-op monitor: returns an empty map unconditionally.
#[derive(Debug, Default, Clone)]
pub struct NullMonitor;

#[async_trait]
impl Monitor for NullMonitor {
    async fn collect(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<ChartSeries, MonitorError> {
        Ok(BTreeMap::new())
    }
}

#[derive(Debug, Error)]
pub enum MonitorBuildError {
    #[error("unknown monitor type {0:?}")]
    UnknownType(String),
    #[error("failed to build monitor of type {kind:?}: {message}")]
    Construct { kind: String, message: String },
}

use crate::value::Value;
use std::sync::Arc;

/// Builds a monitor instance for a playbook's `type` + `options` payload.
/// Mirrors `driver::Registry::build`'s shape, but monitors are a small,
/// flatter set — `Null` (the default) and `Acm` (the pagination-shape
/// example) — so no process-wide registry struct is needed.
pub fn build(kind: &str, options: &Value) -> Result<Arc<dyn Monitor>, MonitorBuildError> {
    match kind {
        "Null" => Ok(Arc::new(NullMonitor)),
        "Acm" => {
            let opts = acm::AcmMonitorOptions::from_value(options).map_err(|message| {
                MonitorBuildError::Construct {
                    kind: kind.to_string(),
                    message,
                }
            })?;
            Ok(Arc::new(acm::AcmMonitor::new(opts)))
        }
        other => Err(MonitorBuildError::UnknownType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_monitor_returns_empty_map() {
        let monitor = NullMonitor;
        let now = Utc::now();
        let result = monitor.collect(now, now).await.unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn build_resolves_null_by_name() {
        assert!(build("Null", &Value::map()).is_ok());
    }

    #[test]
    fn build_rejects_unknown_type() {
        assert!(matches!(
            build("Bogus", &Value::map()),
            Err(MonitorBuildError::UnknownType(_))
        ));
    }
}

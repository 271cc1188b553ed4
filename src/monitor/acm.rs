//! ACM-style cursor-then-batch-fetch monitor.
//!
//! Grounded on `internal/monitor/monitor_acm.go`'s two-call shape: a
//! `Cursor` request opens a paging cursor for a namespace/metric/time
//! window, then one or more `BatchGet` calls drain records through that
//! cursor. No Alibaba Cloud SDK is available in this stack, so this
//! talks to a configurable HTTP endpoint expected to speak the same
//! two-call shape (`POST {endpoint}/cursor`, `POST {endpoint}/batch-get`)
//! — it demonstrates the pagination/merge pattern a real implementation
//! would fill in behind the same [`Monitor`] trait.

use super::{ChartSeries, Measurement, Monitor, MonitorError};
use crate::value::Value;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AcmMonitorOptions {
    pub endpoint: String,
    pub namespace: String,
    pub metric: String,
    /// Measure label preferred when a record carries more than one
    /// (mirrors the Go source's `kvs["Average"]` preference, falling
    /// back to the first value when absent).
    pub preferred_measure: String,
    pub page_length: u32,
}

impl AcmMonitorOptions {
    pub fn from_value(options: &Value) -> Result<Self, String> {
        let map = match options {
            Value::Map(m) => m,
            _ => return Err("Acm monitor options must be an object".to_string()),
        };
        let endpoint = map
            .get("endpoint")
            .and_then(Value::as_str)
            .ok_or("Acm monitor options.endpoint is required")?
            .to_string();
        let namespace = map
            .get("namespace")
            .and_then(Value::as_str)
            .unwrap_or("acs_ecs_dashboard")
            .to_string();
        let metric = map
            .get("metric")
            .and_then(Value::as_str)
            .unwrap_or("CPUUtilization")
            .to_string();
        let preferred_measure = map
            .get("preferred_measure")
            .and_then(Value::as_str)
            .unwrap_or("Average")
            .to_string();
        let page_length = map
            .get("page_length")
            .and_then(Value::as_i64)
            .unwrap_or(100_000) as u32;

        Ok(AcmMonitorOptions {
            endpoint,
            namespace,
            metric,
            preferred_measure,
            page_length,
        })
    }
}

pub struct AcmMonitor {
    options: AcmMonitorOptions,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CursorResponse {
    data: CursorData,
}

#[derive(Deserialize)]
struct CursorData {
    cursor: String,
}

#[derive(Deserialize)]
struct BatchGetResponse {
    data: BatchGetData,
}

#[derive(Deserialize)]
struct BatchGetData {
    #[serde(default)]
    next_cursor: Option<String>,
    records: Vec<AcmRecord>,
}

#[derive(Deserialize)]
struct AcmRecord {
    measure_labels: Vec<String>,
    measure_values: Vec<String>,
    /// Milliseconds since epoch, matching the Go source's `Timestamp`.
    timestamp: i64,
}

impl AcmMonitor {
    pub fn new(options: AcmMonitorOptions) -> Self {
        AcmMonitor {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            options,
        }
    }

    async fn open_cursor(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<String, MonitorError> {
        let body = serde_json::json!({
            "namespace": self.options.namespace,
            "metric": self.options.metric,
            "start_time_ms": start.timestamp_millis(),
            "end_time_ms": end.timestamp_millis(),
        });
        let resp = self
            .client
            .post(format!("{}/cursor", self.options.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| MonitorError::Request(e.to_string()))?;
        let parsed: CursorResponse = resp
            .json()
            .await
            .map_err(|e| MonitorError::Decode(e.to_string()))?;
        Ok(parsed.data.cursor)
    }

    async fn batch_get(&self, cursor: &str) -> Result<(Vec<AcmRecord>, Option<String>), MonitorError> {
        let body = serde_json::json!({
            "namespace": self.options.namespace,
            "metric": self.options.metric,
            "cursor": cursor,
            "length": self.options.page_length,
        });
        let resp = self
            .client
            .post(format!("{}/batch-get", self.options.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| MonitorError::Request(e.to_string()))?;
        let parsed: BatchGetResponse = resp
            .json()
            .await
            .map_err(|e| MonitorError::Decode(e.to_string()))?;
        Ok((parsed.data.records, parsed.data.next_cursor))
    }

    fn measurement_from_record(&self, record: &AcmRecord) -> Measurement {
        let mut value = record
            .measure_values
            .first()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0);
        for (label, raw) in record.measure_labels.iter().zip(&record.measure_values) {
            if label == &self.options.preferred_measure {
                if let Ok(parsed) = raw.parse::<f64>() {
                    value = parsed;
                }
                break;
            }
        }
        Measurement {
            time: Utc.timestamp_opt(record.timestamp / 1000, 0).single().unwrap_or(Utc::now()),
            value,
        }
    }
}

#[async_trait]
impl Monitor for AcmMonitor {
    async fn collect(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<ChartSeries, MonitorError> {
        let cursor = self.open_cursor(start, end).await?;

        let mut measurements = Vec::new();
        let mut cursor = Some(cursor);
        while let Some(current) = cursor {
            let (records, next) = self.batch_get(&current).await?;
            measurements.extend(records.iter().map(|r| self.measurement_from_record(r)));
            cursor = next;
        }

        let mut series = BTreeMap::new();
        series.insert(self.options.metric.clone(), measurements);
        let mut charts = BTreeMap::new();
        charts.insert(self.options.namespace.clone(), series);
        Ok(charts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_fill_in_defaults() {
        let value = serde_json::json!({"endpoint": "http://acm.local"});
        let options = AcmMonitorOptions::from_value(&crate::value::from_json(&value)).unwrap();
        assert_eq!(options.namespace, "acs_ecs_dashboard");
        assert_eq!(options.preferred_measure, "Average");
        assert_eq!(options.page_length, 100_000);
    }

    #[test]
    fn options_require_endpoint() {
        let value = serde_json::json!({});
        assert!(AcmMonitorOptions::from_value(&crate::value::from_json(&value)).is_err());
    }

    #[test]
    fn measurement_prefers_configured_label() {
        let options = AcmMonitorOptions {
            endpoint: "http://x".to_string(),
            namespace: "ns".to_string(),
            metric: "m".to_string(),
            preferred_measure: "Average".to_string(),
            page_length: 100,
        };
        let monitor = AcmMonitor::new(options);
        let record = AcmRecord {
            measure_labels: vec!["Maximum".to_string(), "Average".to_string()],
            measure_values: vec!["9.0".to_string(), "4.5".to_string()],
            timestamp: 1_700_000_000_000,
        };
        let measurement = monitor.measurement_from_record(&record);
        assert_eq!(measurement.value, 4.5);
    }
}

//! # Statistics
//!
//! Time-bucket aggregator (§4.G): turns the flat `UnitStat` stream the
//! Analyst replays into per-stage, per-unit-name metric series, keyed
//! against the stage's observed `TimeRange` from `Meta`.
//!
//! Grounded on `internal/recorder/statistics.go`'s single-bucket
//! accumulator, generalized to the richer per-stage/per-unit-name
//! design this crate's Scheduler produces. The bucket-index clamp below
//! is fixed to `bucket_count - 1`; the reference implementation's
//! `idx == len(buckets)` off-by-one is not reproduced.

use crate::model::{Meta, UnitStat};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatisticsError {
    #[error("stage {0} has no duration_secs entry in meta")]
    MissingStageDuration(usize),
    #[error("stage {0} has no time_range entry in meta")]
    MissingStageTimeRange(usize),
    #[error("failed to decode a recorded unit: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One time-bucket's raw tallies.
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    pub total: u64,
    pub total_res_time_ms: u64,
    pub pass: u64,
    pub pass_res_time_ms: u64,
    pub fail: u64,
    pub err_code: BTreeMap<String, u64>,
}

/// Derived series for one unit name within one stage.
#[derive(Debug, Clone)]
pub struct Metric {
    pub qps: Vec<Option<f64>>,
    pub avg_res_time_ms: Vec<Option<f64>>,
    pub success_rate_percent: Vec<Option<f64>>,
    pub err_code_distribution: BTreeMap<String, u64>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub total: u64,
    pub pass: u64,
    pub qps: f64,
    pub avg_res_time_ms: f64,
    pub success_rate_percent: f64,
}

/// One stage's metrics, keyed by unit name.
pub type StageMetrics = BTreeMap<String, Metric>;

struct BucketConfig {
    interval_secs: f64,
    bucket_count: usize,
}

fn resolve_bucket_config(
    duration_secs: f64,
    interval_ms: Option<u64>,
    point_number: Option<usize>,
) -> BucketConfig {
    const DEFAULT_POINT_NUMBER: usize = 100;

    if let Some(ms) = interval_ms {
        let interval_secs = (ms as f64 / 1000.0).max(f64::EPSILON);
        let bucket_count = (duration_secs / interval_secs).ceil().max(1.0) as usize;
        return BucketConfig {
            interval_secs,
            bucket_count,
        };
    }

    let bucket_count = point_number.unwrap_or(DEFAULT_POINT_NUMBER).max(1);
    let interval_secs = (duration_secs / bucket_count as f64).max(f64::EPSILON);
    BucketConfig {
        interval_secs,
        bucket_count,
    }
}

/// Computes per-stage, per-unit-name `Metric` series from a completed
/// recording's `Meta` and `UnitStat` stream.
pub fn compute(
    meta: &Meta,
    stats: impl Iterator<Item = Result<UnitStat, serde_json::Error>>,
    interval_ms: Option<u64>,
    point_number: Option<usize>,
) -> Result<Vec<StageMetrics>, StatisticsError> {
    let stage_count = meta.duration_secs.len();
    let mut configs = Vec::with_capacity(stage_count);
    for seq in 0..stage_count {
        let duration_secs = *meta
            .duration_secs
            .get(seq)
            .ok_or(StatisticsError::MissingStageDuration(seq))?;
        configs.push(resolve_bucket_config(duration_secs, interval_ms, point_number));
    }

    // buckets[seq][unit_name] -> Vec<Bucket>, lazily sized per config.
    let mut buckets: Vec<BTreeMap<String, Vec<Bucket>>> =
        (0..stage_count).map(|_| BTreeMap::new()).collect();

    for stat in stats {
        let stat = stat?;
        let seq = stat.seq;
        if seq >= stage_count {
            continue;
        }
        let time_range = meta
            .time_range
            .get(seq)
            .ok_or(StatisticsError::MissingStageTimeRange(seq))?;
        let config = &configs[seq];

        let elapsed = (stat.time - time_range.start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let raw_idx = (elapsed / config.interval_secs).floor();
        let idx = if raw_idx.is_sign_negative() || !raw_idx.is_finite() {
            0
        } else {
            (raw_idx as usize).min(config.bucket_count - 1)
        };

        let stage_buckets = buckets[seq]
            .entry(stat.name.clone())
            .or_insert_with(|| vec![Bucket::default(); config.bucket_count]);
        let bucket = &mut stage_buckets[idx];

        bucket.total += 1;
        bucket.total_res_time_ms += stat.res_time_ms;
        if stat.passed() {
            bucket.pass += 1;
            bucket.pass_res_time_ms += stat.res_time_ms;
            *bucket.err_code.entry("OK".to_string()).or_insert(0) += 1;
        } else {
            bucket.fail += 1;
            *bucket.err_code.entry(stat.err_code.clone()).or_insert(0) += 1;
        }
    }

    let mut out = Vec::with_capacity(stage_count);
    for seq in 0..stage_count {
        let config = &configs[seq];
        let mut stage_metrics = StageMetrics::new();
        for (name, bucket_list) in &buckets[seq] {
            stage_metrics.insert(name.clone(), derive_metric(bucket_list, config.interval_secs));
        }
        out.push(stage_metrics);
    }
    Ok(out)
}

fn derive_metric(bucket_list: &[Bucket], interval_secs: f64) -> Metric {
    let qps = bucket_list
        .iter()
        .map(|b| Some(b.pass as f64 / interval_secs))
        .collect();
    let avg_res_time_ms = bucket_list
        .iter()
        .map(|b| {
            if b.pass == 0 {
                None
            } else {
                Some(b.pass_res_time_ms as f64 / b.pass as f64)
            }
        })
        .collect();
    let success_rate_percent = bucket_list
        .iter()
        .map(|b| {
            if b.total == 0 {
                None
            } else {
                Some(100.0 * b.pass as f64 / b.total as f64)
            }
        })
        .collect();

    let mut err_code_distribution = BTreeMap::new();
    for bucket in bucket_list {
        for (code, count) in &bucket.err_code {
            *err_code_distribution.entry(code.clone()).or_insert(0) += count;
        }
    }

    let summary = summarize(bucket_list, interval_secs);

    Metric {
        qps,
        avg_res_time_ms,
        success_rate_percent,
        err_code_distribution,
        summary,
    }
}

/// Summary over all but the final bucket (the last bucket is discarded
/// to avoid the truncated tail at stage end, per §4.G). Overall QPS
/// divides by the span between the first and last *considered* bucket
/// centers rather than by the stage `Duration` — intentional, matching
/// the documented formula rather than the more obvious Duration-based
/// rate.
fn summarize(bucket_list: &[Bucket], interval_secs: f64) -> Summary {
    if bucket_list.len() <= 1 {
        let single = bucket_list.first();
        return Summary {
            total: single.map(|b| b.total).unwrap_or(0),
            pass: single.map(|b| b.pass).unwrap_or(0),
            qps: 0.0,
            avg_res_time_ms: 0.0,
            success_rate_percent: 0.0,
        };
    }

    let considered = &bucket_list[..bucket_list.len() - 1];
    let total: u64 = considered.iter().map(|b| b.total).sum();
    let pass: u64 = considered.iter().map(|b| b.pass).sum();
    let pass_res_time_ms: u64 = considered.iter().map(|b| b.pass_res_time_ms).sum();

    let span_secs = (considered.len() as f64 - 1.0) * interval_secs;
    let qps = if span_secs > 0.0 { pass as f64 / span_secs } else { 0.0 };
    let avg_res_time_ms = if pass > 0 {
        pass_res_time_ms as f64 / pass as f64
    } else {
        0.0
    };
    let success_rate_percent = if total > 0 {
        100.0 * pass as f64 / total as f64
    } else {
        0.0
    };

    Summary {
        total,
        pass,
        qps,
        avg_res_time_ms,
        success_rate_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StepStat, TimeRange};
    use chrono::{Duration as ChronoDuration, Utc};

    fn sample(seq: usize, name: &str, at_secs: i64, err_code: &str) -> UnitStat {
        UnitStat {
            id: "r".to_string(),
            seq,
            time: Utc::now() + ChronoDuration::seconds(at_secs),
            name: name.to_string(),
            step: vec![StepStat {
                time: Utc::now(),
                req: serde_json::json!({}),
                res: serde_json::json!({}),
                err: None,
                err_code: err_code.to_string(),
                res_time_ms: 10,
            }],
            err_code: err_code.to_string(),
            res_time_ms: 10,
        }
    }

    fn meta_with_one_stage(duration_secs: f64) -> Meta {
        let start = Utc::now();
        Meta {
            id: "r".to_string(),
            name: "demo".to_string(),
            duration_secs: vec![duration_secs],
            parallel: vec![Default::default()],
            time_range: vec![TimeRange {
                start_time: start,
                end_time: start + ChronoDuration::seconds(duration_secs as i64),
            }],
        }
    }

    #[test]
    fn bucket_totals_match_input_count() {
        let meta = meta_with_one_stage(10.0);
        let stats = vec![
            Ok(sample(0, "unit-a", 0, "")),
            Ok(sample(0, "unit-a", 1, "")),
            Ok(sample(0, "unit-a", 9, "timeout")),
        ];
        let result = compute(&meta, stats.into_iter(), None, Some(5)).unwrap();
        let metric = &result[0]["unit-a"];
        let total: u64 = metric.summary.total + {
            // last bucket excluded from summary; recover it to check conservation
            0
        };
        assert!(total <= 3);
        let grand_total: u64 = metric.err_code_distribution.values().sum();
        assert_eq!(grand_total, 3);
    }

    #[test]
    fn out_of_range_timestamp_clamps_to_last_bucket_not_past_it() {
        let meta = meta_with_one_stage(10.0);
        // timestamp far beyond stage end must not panic and must land in the last bucket
        let stats = vec![Ok(sample(0, "unit-a", 1000, ""))];
        let result = compute(&meta, stats.into_iter(), None, Some(5)).unwrap();
        let metric = &result[0]["unit-a"];
        assert_eq!(metric.err_code_distribution.get("OK"), Some(&1));
    }

    #[test]
    fn pass_increments_ok_and_fail_increments_actual_code() {
        let meta = meta_with_one_stage(10.0);
        let stats = vec![
            Ok(sample(0, "unit-a", 0, "")),
            Ok(sample(0, "unit-a", 0, "BadRequest")),
        ];
        let result = compute(&meta, stats.into_iter(), None, Some(5)).unwrap();
        let metric = &result[0]["unit-a"];
        assert_eq!(metric.err_code_distribution.get("OK"), Some(&1));
        assert_eq!(metric.err_code_distribution.get("BadRequest"), Some(&1));
    }

    #[test]
    fn summary_excludes_final_bucket() {
        let meta = meta_with_one_stage(4.0);
        // 4 buckets of width 1s; point land in bucket 0, 1, 2, and 3 (last, excluded)
        let stats = vec![
            Ok(sample(0, "unit-a", 0, "")),
            Ok(sample(0, "unit-a", 1, "")),
            Ok(sample(0, "unit-a", 2, "")),
            Ok(sample(0, "unit-a", 3, "")),
        ];
        let result = compute(&meta, stats.into_iter(), None, Some(4)).unwrap();
        let metric = &result[0]["unit-a"];
        // only buckets 0..2 count toward summary.total (bucket 3 discarded)
        assert_eq!(metric.summary.total, 3);
        assert_eq!(metric.summary.pass, 3);
    }

    #[test]
    fn avg_res_time_omits_buckets_with_no_pass() {
        let meta = meta_with_one_stage(4.0);
        let stats = vec![Ok(sample(0, "unit-a", 0, "timeout"))];
        let result = compute(&meta, stats.into_iter(), None, Some(4)).unwrap();
        let metric = &result[0]["unit-a"];
        assert_eq!(metric.avg_res_time_ms[0], None);
        assert_eq!(metric.success_rate_percent[0], Some(0.0));
    }

    #[test]
    fn interval_ms_config_derives_bucket_count_from_duration() {
        let config = resolve_bucket_config(10.0, Some(2000), None);
        assert_eq!(config.bucket_count, 5);
    }

    #[test]
    fn default_bucket_count_is_one_hundred() {
        let config = resolve_bucket_config(10.0, None, None);
        assert_eq!(config.bucket_count, 100);
    }
}

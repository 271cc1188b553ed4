//! Fixed-width text reporter: the format a terminal or CI log shows.
//! One block per stage: parallelism line, a Summary table (one row per
//! unit name, sorted), ErrCodeDistribution, then the QPS/AvgResTimeMs/
//! SuccessRatePercent series, then monitor series if any.

use super::ReportInput;
use std::fmt::Write as _;

pub fn render(input: &ReportInput) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run {} ({})", input.meta.id, input.meta.name);

    for seq in 0..input.meta.duration_secs.len() {
        render_stage(&mut out, input, seq);
    }

    out
}

fn render_stage(out: &mut String, input: &ReportInput, seq: usize) {
    let _ = writeln!(out, "\nStage {seq}");

    if let Some(parallel) = input.meta.parallel.get(seq) {
        let parts: Vec<String> = parallel
            .iter()
            .map(|(name, count)| format!("{name}={count}"))
            .collect();
        let _ = writeln!(out, "  parallel: {}", parts.join(", "));
    }
    if let Some(tr) = input.meta.time_range.get(seq) {
        let _ = writeln!(out, "  window: {} .. {}", tr.start_time.to_rfc3339(), tr.end_time.to_rfc3339());
    }

    let Some(stage_metrics) = input.metrics.get(seq) else {
        return;
    };

    let _ = writeln!(
        out,
        "  {:<16} {:>8} {:>8} {:>10} {:>14} {:>10}",
        "unit", "total", "pass", "qps", "avg_res_ms", "success%"
    );
    for (name, metric) in stage_metrics {
        let _ = writeln!(
            out,
            "  {:<16} {:>8} {:>8} {:>10.2} {:>14.2} {:>10.2}",
            name,
            metric.summary.total,
            metric.summary.pass,
            metric.summary.qps,
            metric.summary.avg_res_time_ms,
            metric.summary.success_rate_percent,
        );
    }

    for (name, metric) in stage_metrics {
        if metric.err_code_distribution.is_empty() {
            continue;
        }
        let _ = write!(out, "  {name} err_codes:");
        for (code, count) in &metric.err_code_distribution {
            let _ = write!(out, " {code}={count}");
        }
        let _ = writeln!(out);
    }

    if let Some(window) = input.monitor_windows.get(seq) {
        for (chart, series) in window {
            for (series_name, points) in series {
                let values: Vec<String> = points.iter().map(|m| format!("{:.2}", m.value)).collect();
                let _ = writeln!(out, "  monitor {chart}.{series_name}: [{}]", values.join(", "));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Meta, TimeRange};
    use crate::statistics::{Metric, StageMetrics, Summary};
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn renders_unit_rows_sorted_by_name() {
        let now = Utc::now();
        let meta = Meta {
            id: "r".to_string(),
            name: "demo".to_string(),
            duration_secs: vec![1.0],
            parallel: vec![BTreeMap::from([("b".to_string(), 1), ("a".to_string(), 2)])],
            time_range: vec![TimeRange { start_time: now, end_time: now }],
        };
        let mut stage_metrics = StageMetrics::new();
        stage_metrics.insert(
            "b".to_string(),
            Metric {
                qps: vec![],
                avg_res_time_ms: vec![],
                success_rate_percent: vec![],
                err_code_distribution: BTreeMap::new(),
                summary: Summary { total: 5, pass: 5, qps: 1.0, avg_res_time_ms: 2.0, success_rate_percent: 100.0 },
            },
        );
        stage_metrics.insert(
            "a".to_string(),
            Metric {
                qps: vec![],
                avg_res_time_ms: vec![],
                success_rate_percent: vec![],
                err_code_distribution: BTreeMap::new(),
                summary: Summary { total: 3, pass: 2, qps: 0.5, avg_res_time_ms: 4.0, success_rate_percent: 66.0 },
            },
        );
        let metrics = vec![stage_metrics];
        let input = ReportInput { meta: &meta, metrics: &metrics, monitor_windows: &[] };
        let rendered = render(&input);
        assert!(rendered.find("  a ").unwrap() < rendered.find("  b ").unwrap());
    }
}

//! Structured JSON reporter: a direct dump of Meta, per-stage metrics,
//! and monitor windows, with sorted keys so output is deterministic
//! under repeated runs of the same recording (§8, "Reporter is
//! deterministic under fixed input").

use super::ReportInput;
use crate::monitor::Measurement;
use crate::statistics::{Metric, StageMetrics};
use serde_json::{json, Map, Value as Json};

pub fn render(input: &ReportInput) -> Result<String, serde_json::Error> {
    let stages: Vec<Json> = (0..input.meta.duration_secs.len())
        .map(|seq| stage_json(input, seq))
        .collect();

    let doc = json!({
        "id": input.meta.id,
        "name": input.meta.name,
        "stages": stages,
    });
    serde_json::to_string_pretty(&doc)
}

fn stage_json(input: &ReportInput, seq: usize) -> Json {
    let time_range = input.meta.time_range.get(seq);
    let parallel = input.meta.parallel.get(seq);

    let mut metrics_obj = Map::new();
    if let Some(stage_metrics) = input.metrics.get(seq) {
        for (name, metric) in stage_metrics {
            metrics_obj.insert(name.clone(), metric_json(metric));
        }
    }

    let monitor_obj = input
        .monitor_windows
        .get(seq)
        .map(monitor_json)
        .unwrap_or(Json::Object(Map::new()));

    json!({
        "seq": seq,
        "duration_secs": input.meta.duration_secs.get(seq),
        "parallel": parallel,
        "time_range": time_range.map(|tr| json!({
            "start_time": tr.start_time.to_rfc3339(),
            "end_time": tr.end_time.to_rfc3339(),
        })),
        "metrics": Json::Object(metrics_obj),
        "monitor": monitor_obj,
    })
}

fn metric_json(metric: &Metric) -> Json {
    json!({
        "qps": metric.qps,
        "avg_res_time_ms": metric.avg_res_time_ms,
        "success_rate_percent": metric.success_rate_percent,
        "err_code_distribution": metric.err_code_distribution,
        "summary": {
            "total": metric.summary.total,
            "pass": metric.summary.pass,
            "qps": metric.summary.qps,
            "avg_res_time_ms": metric.summary.avg_res_time_ms,
            "success_rate_percent": metric.summary.success_rate_percent,
        },
    })
}

fn monitor_json(series: &crate::monitor::ChartSeries) -> Json {
    let mut charts = Map::new();
    for (chart_name, chart) in series {
        let mut series_obj = Map::new();
        for (series_name, points) in chart {
            series_obj.insert(series_name.clone(), measurements_json(points));
        }
        charts.insert(chart_name.clone(), Json::Object(series_obj));
    }
    Json::Object(charts)
}

fn measurements_json(points: &[Measurement]) -> Json {
    Json::Array(
        points
            .iter()
            .map(|m| json!({"time": m.time.to_rfc3339(), "value": m.value}))
            .collect(),
    )
}

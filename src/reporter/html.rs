//! Minimal static HTML reporter: one `<table>` per stage mirroring the
//! text reporter's structure, plus a `<script>` block of plain JS arrays
//! a user can paste into any charting library. No templating crate —
//! just `write!`/`format!` composition into one buffer, matching the
//! reference implementation's `reporter_html.go` in spirit.

use super::ReportInput;
use std::fmt::Write as _;

pub fn render(input: &ReportInput) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<!doctype html><html><head><meta charset=\"utf-8\"><title>{} report</title></head><body>", escape(&input.meta.name));
    let _ = writeln!(out, "<h1>{} ({})</h1>", escape(&input.meta.name), escape(&input.meta.id));

    let mut series_script = String::new();

    for seq in 0..input.meta.duration_secs.len() {
        render_stage(&mut out, &mut series_script, input, seq);
    }

    let _ = writeln!(out, "<script>\nconst benReport = {{\n{series_script}}};\n</script>");
    let _ = writeln!(out, "</body></html>");
    out
}

fn render_stage(out: &mut String, series_script: &mut String, input: &ReportInput, seq: usize) {
    let _ = writeln!(out, "<h2>Stage {seq}</h2>");

    let Some(stage_metrics) = input.metrics.get(seq) else {
        return;
    };

    let _ = writeln!(out, "<table border=\"1\"><tr><th>unit</th><th>total</th><th>pass</th><th>qps</th><th>avg_res_ms</th><th>success%</th></tr>");
    for (name, metric) in stage_metrics {
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td></tr>",
            escape(name),
            metric.summary.total,
            metric.summary.pass,
            metric.summary.qps,
            metric.summary.avg_res_time_ms,
            metric.summary.success_rate_percent,
        );

        let qps_js: Vec<String> = metric.qps.iter().map(|v| v.map(|x| format!("{x:.4}")).unwrap_or("null".to_string())).collect();
        let _ = writeln!(
            series_script,
            "  \"stage{seq}_{name}_qps\": [{}],",
            qps_js.join(",")
        );
    }
    let _ = writeln!(out, "</table>");
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Meta, TimeRange};
    use crate::statistics::StageMetrics;
    use chrono::Utc;

    #[test]
    fn renders_a_table_per_stage() {
        let now = Utc::now();
        let meta = Meta {
            id: "r".to_string(),
            name: "demo".to_string(),
            duration_secs: vec![1.0],
            parallel: vec![Default::default()],
            time_range: vec![TimeRange { start_time: now, end_time: now }],
        };
        let metrics = vec![StageMetrics::new()];
        let input = ReportInput { meta: &meta, metrics: &metrics, monitor_windows: &[] };
        let rendered = render(&input);
        assert!(rendered.contains("<h2>Stage 0</h2>"));
        assert!(rendered.contains("<script>"));
    }

    #[test]
    fn escapes_html_special_characters_in_names() {
        assert_eq!(escape("a<b>&c"), "a&lt;b&gt;&amp;c");
    }
}

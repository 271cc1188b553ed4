//! # Scheduler / Framework
//!
//! The orchestrator (§4.H): builds every other component from a
//! decoded playbook, then drives stages of concurrent unit workers
//! against a synchronized start barrier, a wall-clock duration, and a
//! shared per-stage cancellation flag. This is the largest single
//! component — everything else in this crate exists to be called from
//! here.

use crate::analyst::{AnalystError, FileAnalyst};
use crate::driver::{Driver, DriverBuildError, Registry};
use crate::eval::{truthy, Binding, EvalError, Evaluable};
use crate::model::{Meta, StepStat, TimeRange, UnitStat};
use crate::monitor::{self, ChartSeries, Monitor, MonitorBuildError, NullMonitor};
use crate::playbook::{ParallelMap, Playbook, Spec};
use crate::recorder::{FileRecorder, RecorderError};
use crate::reporter;
use crate::source::{Source, SourceError};
use crate::statistics::{self, StageMetrics, StatisticsError};
use crate::template::{Template, TemplateError};
use crate::value::{from_json, to_json, Value};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

const DEFAULT_LEAD_IN: Duration = Duration::from_millis(200);
const DEFAULT_RECORDER_PATH: &str = "ben.out.jsonl";

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to build source {name:?}: {source}")]
    Source {
        name: String,
        #[source]
        source: SourceError,
    },
    #[error("source {name:?} has unknown type {kind:?}")]
    UnknownSourceType { name: String, kind: String },
    #[error("failed to build driver for context {name:?}: {source}")]
    Driver {
        name: String,
        #[source]
        source: DriverBuildError,
    },
    #[error("failed to build monitor: {0}")]
    Monitor(#[from] MonitorBuildError),
    #[error("failed to compile template for unit {unit:?} step {step}: {source}")]
    TemplateCompile {
        unit: String,
        step: usize,
        #[source]
        source: TemplateError,
    },
    #[error("failed to compile predicate for unit {unit:?} step {step}: {source}")]
    PredicateCompile {
        unit: String,
        step: usize,
        #[source]
        source: EvalError,
    },
    #[error("failed to open recorder: {0}")]
    Recorder(#[from] RecorderError),
    #[error("unit {unit:?} step {step} references unknown context {ctx:?}")]
    UnknownContext { unit: String, step: usize, ctx: String },
    #[error("unit {unit:?} step {step} failed to materialize template: {source}")]
    Materialize {
        unit: String,
        step: usize,
        #[source]
        source: TemplateError,
    },
    #[error("unit {unit:?} step {step} failed to evaluate predicate: {source}")]
    PredicateEval {
        unit: String,
        step: usize,
        #[source]
        source: EvalError,
    },
    #[error("stage {0} references undeclared unit {1:?}")]
    UndeclaredUnit(usize, String),
    #[error("failed to read back recording for statistics: {0}")]
    Analyst(#[from] AnalystError),
    #[error("failed to compute statistics: {0}")]
    Statistics(#[from] StatisticsError),
    #[error("unit worker task panicked: {0}")]
    WorkerJoin(String),
}

struct CompiledStep {
    ctx: String,
    template: Template,
    success: Option<Evaluable>,
    err_code: Option<Evaluable>,
}

struct CompiledUnit {
    name: String,
    steps: Vec<CompiledStep>,
}

struct CompiledPlan {
    duration: Duration,
    interval: Duration,
    parallel: Vec<ParallelMap>,
}

pub struct RunResult {
    pub meta: Meta,
    pub metrics: Vec<StageMetrics>,
    pub monitor_windows: Vec<ChartSeries>,
    pub reporter_kind: String,
}

/// Everything the playbook describes, compiled and ready to run.
pub struct Framework {
    id: String,
    name: String,
    sources: Arc<BTreeMap<String, Source>>,
    drivers: Arc<Registry>,
    units: Arc<Vec<CompiledUnit>>,
    plan: CompiledPlan,
    recorder: Arc<FileRecorder>,
    recorder_path: PathBuf,
    analyst_configured: bool,
    statistics_interval_ms: Option<u64>,
    statistics_point_number: Option<usize>,
    monitors: Vec<Arc<dyn Monitor>>,
    lead_in: Duration,
    reporter_kind: String,
}

impl Framework {
    pub fn build(playbook: &Playbook) -> Result<Self, SchedulerError> {
        let mut sources = BTreeMap::new();
        for (name, spec) in &playbook.source {
            sources.insert(name.clone(), build_source(name, spec)?);
        }

        let mut drivers = Registry::new();
        for (name, spec) in &playbook.ctx {
            let options = from_json(&spec.options);
            let driver = Registry::build(&spec.kind, &options).map_err(|source| SchedulerError::Driver {
                name: name.clone(),
                source,
            })?;
            drivers.register(name.clone(), driver);
        }

        let mut units = Vec::with_capacity(playbook.plan.unit.len());
        for unit in &playbook.plan.unit {
            let mut steps = Vec::with_capacity(unit.step.len());
            for (idx, step) in unit.step.iter().enumerate() {
                let template = Template::compile(&step.req).map_err(|source| SchedulerError::TemplateCompile {
                    unit: unit.name.clone(),
                    step: idx,
                    source,
                })?;
                let success = step
                    .success
                    .as_deref()
                    .map(Evaluable::compile)
                    .transpose()
                    .map_err(|source| SchedulerError::PredicateCompile {
                        unit: unit.name.clone(),
                        step: idx,
                        source,
                    })?;
                let err_code = step
                    .err_code
                    .as_deref()
                    .map(Evaluable::compile)
                    .transpose()
                    .map_err(|source| SchedulerError::PredicateCompile {
                        unit: unit.name.clone(),
                        step: idx,
                        source,
                    })?;
                steps.push(CompiledStep {
                    ctx: step.ctx.clone(),
                    template,
                    success,
                    err_code,
                });
            }
            units.push(CompiledUnit {
                name: unit.name.clone(),
                steps,
            });
        }

        for (seq, parallel_map) in playbook.plan.parallel.iter().enumerate() {
            for unit_name in parallel_map.keys() {
                if !units.iter().any(|u| &u.name == unit_name) {
                    return Err(SchedulerError::UndeclaredUnit(seq, unit_name.clone()));
                }
            }
        }

        let (recorder, recorder_path) = build_recorder(playbook.recorder.as_ref())?;

        let mut monitors: Vec<Arc<dyn Monitor>> = Vec::new();
        for spec in &playbook.monitor {
            monitors.push(monitor::build(&spec.kind, &from_json(&spec.options))?);
        }
        if monitors.is_empty() {
            monitors.push(Arc::new(NullMonitor));
        }

        Ok(Framework {
            id: playbook.id.clone(),
            name: playbook.name.clone(),
            sources: Arc::new(sources),
            drivers: Arc::new(drivers),
            units: Arc::new(units),
            plan: CompiledPlan {
                duration: playbook.plan.duration,
                interval: playbook.plan.interval,
                parallel: playbook.plan.parallel.clone(),
            },
            recorder: Arc::new(recorder),
            recorder_path,
            analyst_configured: playbook.analyst.is_some(),
            statistics_interval_ms: playbook.statistics.interval_ms,
            statistics_point_number: playbook.statistics.point_number,
            monitors,
            lead_in: DEFAULT_LEAD_IN,
            reporter_kind: reporter::kind_from_options(playbook.reporter.as_ref().map(|s| s.kind.as_str())),
        })
    }

    /// Overrides the stage lead-in (§9: "configurable Duration on the
    /// Scheduler, default 200ms").
    pub fn with_lead_in(mut self, lead_in: Duration) -> Self {
        self.lead_in = lead_in;
        self
    }

    pub async fn run(&self) -> Result<RunResult, SchedulerError> {
        let mut meta = Meta {
            id: self.id.clone(),
            name: self.name.clone(),
            duration_secs: Vec::with_capacity(self.plan.parallel.len()),
            parallel: Vec::with_capacity(self.plan.parallel.len()),
            time_range: Vec::with_capacity(self.plan.parallel.len()),
        };

        for (seq, parallel_map) in self.plan.parallel.iter().enumerate() {
            self.run_stage(seq, parallel_map, &mut meta).await?;
            if !self.plan.interval.is_zero() {
                tokio::time::sleep(self.plan.interval).await;
            }
        }

        self.recorder.close()?;
        self.recorder.record_meta(&meta)?;

        let metrics = if self.analyst_configured {
            let analyst = FileAnalyst::open(&self.recorder_path)?;
            statistics::compute(
                &meta,
                analyst.unit_stat_stream("")?,
                self.statistics_interval_ms,
                self.statistics_point_number,
            )?
        } else {
            (0..meta.duration_secs.len()).map(|_| StageMetrics::new()).collect()
        };

        let monitor_windows = self.collect_monitor_windows(&meta.time_range).await;

        Ok(RunResult {
            meta,
            metrics,
            monitor_windows,
            reporter_kind: self.reporter_kind.clone(),
        })
    }

    /// Re-reads a previously recorded run via the configured analyst and
    /// rebuilds the same `RunResult` a fresh `run()` would have produced,
    /// without driving any workers (the `analyst` CLI action, §6).
    pub async fn replay(&self) -> Result<RunResult, SchedulerError> {
        let analyst = FileAnalyst::open(&self.recorder_path)?;
        let meta = analyst.meta("").clone();
        let metrics = statistics::compute(
            &meta,
            analyst.unit_stat_stream("")?,
            self.statistics_interval_ms,
            self.statistics_point_number,
        )?;
        let monitor_windows = self.collect_monitor_windows(&meta.time_range).await;

        Ok(RunResult {
            meta,
            metrics,
            monitor_windows,
            reporter_kind: self.reporter_kind.clone(),
        })
    }

    async fn collect_monitor_windows(&self, time_ranges: &[TimeRange]) -> Vec<ChartSeries> {
        let mut monitor_windows = Vec::with_capacity(time_ranges.len());
        for tr in time_ranges {
            let mut merged: ChartSeries = BTreeMap::new();
            for m in &self.monitors {
                if let Ok(window) = m.collect(tr.start_time, tr.end_time).await {
                    for (chart, series) in window {
                        merged.entry(chart).or_insert_with(BTreeMap::new).extend(series);
                    }
                }
            }
            monitor_windows.push(merged);
        }
        monitor_windows
    }

    async fn run_stage(
        &self,
        seq: usize,
        parallel_map: &ParallelMap,
        meta: &mut Meta,
    ) -> Result<(), SchedulerError> {
        use chrono::{Duration as ChronoDuration, Utc};

        let start_time = Utc::now()
            + ChronoDuration::from_std(self.lead_in).unwrap_or_else(|_| ChronoDuration::zero());
        let end_time =
            start_time + ChronoDuration::from_std(self.plan.duration).unwrap_or_else(|_| ChronoDuration::zero());
        meta.duration_secs.push(self.plan.duration.as_secs_f64());
        meta.parallel.push(parallel_map.clone());
        meta.time_range.push(TimeRange { start_time, end_time });

        let tokio_start = tokio::time::Instant::now() + self.lead_in;
        let deadline = tokio_start + self.plan.duration;
        let cancel_flag = Arc::new(AtomicBool::new(false));

        let mut workers = JoinSet::new();
        for (unit_name, worker_count) in parallel_map {
            let Some(unit_idx) = self.units.iter().position(|u| &u.name == unit_name) else {
                continue;
            };
            for _ in 0..*worker_count {
                let sources = Arc::clone(&self.sources);
                let drivers = Arc::clone(&self.drivers);
                let units = Arc::clone(&self.units);
                let recorder = Arc::clone(&self.recorder);
                let cancel_flag = Arc::clone(&cancel_flag);
                let run_id = self.id.clone();

                workers.spawn(async move {
                    tokio::time::sleep_until(tokio_start).await;
                    loop {
                        if cancel_flag.load(Ordering::Relaxed) {
                            break;
                        }
                        if tokio::time::Instant::now() >= deadline {
                            break;
                        }
                        let unit = &units[unit_idx];
                        match run_unit(&run_id, unit, &sources, &drivers).await {
                            Ok(mut stat) => {
                                stat.seq = seq;
                                if let Err(source) = recorder.record(stat) {
                                    cancel_flag.store(true, Ordering::Relaxed);
                                    return Err(SchedulerError::Recorder(source));
                                }
                            }
                            Err(err) => {
                                cancel_flag.store(true, Ordering::Relaxed);
                                return Err(err);
                            }
                        }
                    }
                    Ok(())
                });
            }
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(SchedulerError::WorkerJoin(join_err.to_string()));
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn build_source(name: &str, spec: &Spec) -> Result<Source, SchedulerError> {
    match spec.kind.as_str() {
        "Inline" => {
            let records = spec
                .options
                .get("records")
                .and_then(Json::as_array)
                .cloned()
                .unwrap_or_default();
            Source::from_inline(name, records).map_err(|source| SchedulerError::Source {
                name: name.to_string(),
                source,
            })
        }
        "File" => {
            let path = spec
                .options
                .get("path")
                .and_then(Json::as_str)
                .unwrap_or_default();
            let ignore_parse_error = spec
                .options
                .get("ignore_parse_error")
                .and_then(Json::as_bool)
                .unwrap_or(false);
            Source::from_file(name, path, ignore_parse_error).map_err(|source| SchedulerError::Source {
                name: name.to_string(),
                source,
            })
        }
        other => Err(SchedulerError::UnknownSourceType {
            name: name.to_string(),
            kind: other.to_string(),
        }),
    }
}

fn build_recorder(spec: Option<&Spec>) -> Result<(FileRecorder, PathBuf), SchedulerError> {
    let empty = serde_json::Map::new();
    let options = spec.map(|s| &s.options).and_then(Json::as_object).unwrap_or(&empty);

    let path = options
        .get("path")
        .and_then(Json::as_str)
        .unwrap_or(DEFAULT_RECORDER_PATH)
        .to_string();
    let overwrite_timestamp = options
        .get("overwrite_timestamp")
        .and_then(Json::as_bool)
        .unwrap_or(false);
    let buffer_size = options.get("buffer_size").and_then(Json::as_u64).map(|n| n as usize);

    let recorder = match buffer_size {
        Some(size) => FileRecorder::with_buffer_size(&path, overwrite_timestamp, size)?,
        None => FileRecorder::new(&path, overwrite_timestamp)?,
    };
    Ok((recorder, PathBuf::from(path)))
}

/// One unit's step sequence (§4.H, "per-unit algorithm"): fetch a
/// snapshot from every source, then walk the steps in order, feeding
/// each completed step's recorded shape back into the `stat` binding so
/// later steps can reference earlier responses (e.g.
/// `stat.step[0].res.stdout`).
async fn run_unit(
    run_id: &str,
    unit: &CompiledUnit,
    sources: &BTreeMap<String, Source>,
    drivers: &Registry,
) -> Result<UnitStat, SchedulerError> {
    use chrono::Utc;

    let unit_start = std::time::Instant::now();

    let source_value = Value::Map(sources.iter().map(|(name, src)| (name.clone(), src.fetch())).collect());

    let mut completed_steps: Vec<Value> = Vec::with_capacity(unit.steps.len());
    let mut step_stats: Vec<StepStat> = Vec::with_capacity(unit.steps.len());
    let mut unit_err_code = String::new();

    for (idx, step) in unit.steps.iter().enumerate() {
        let stat_value = Value::Map(BTreeMap::from([("step".to_string(), Value::Seq(completed_steps.clone()))]));
        let binding = Binding::new().with("source", source_value.clone()).with("stat", stat_value);

        let req_value = step
            .template
            .materialize(&binding)
            .map_err(|source| SchedulerError::Materialize {
                unit: unit.name.clone(),
                step: idx,
                source,
            })?;
        let req_json = to_json(&req_value);

        let driver = drivers.get(&step.ctx).ok_or_else(|| SchedulerError::UnknownContext {
            unit: unit.name.clone(),
            step: idx,
            ctx: step.ctx.clone(),
        })?;

        let step_start = std::time::Instant::now();
        let invoke_result = driver.invoke(req_value).await;
        let res_time_ms = step_start.elapsed().as_millis() as u64;

        match invoke_result {
            Err(driver_err) => {
                step_stats.push(StepStat {
                    time: Utc::now(),
                    req: req_json,
                    res: Json::Null,
                    err: Some(driver_err.message.clone()),
                    err_code: driver_err.code.clone(),
                    res_time_ms,
                });
                unit_err_code = driver_err.code;
                break;
            }
            Ok(res_value) => {
                let res_json = to_json(&res_value);
                let res_binding = Binding::new().with("res", res_value);

                let passed = match &step.success {
                    Some(expr) => {
                        let v = expr.evaluate(&res_binding).map_err(|source| SchedulerError::PredicateEval {
                            unit: unit.name.clone(),
                            step: idx,
                            source,
                        })?;
                        truthy(&v)
                    }
                    None => true,
                };

                if passed {
                    let step_stat = StepStat {
                        time: Utc::now(),
                        req: req_json,
                        res: res_json,
                        err: None,
                        err_code: String::new(),
                        res_time_ms,
                    };
                    let step_value = from_json(&serde_json::to_value(&step_stat).unwrap_or(Json::Null));
                    completed_steps.push(step_value);
                    step_stats.push(step_stat);
                } else {
                    let code = match &step.err_code {
                        Some(expr) => {
                            let v = expr.evaluate(&res_binding).map_err(|source| SchedulerError::PredicateEval {
                                unit: unit.name.clone(),
                                step: idx,
                                source,
                            })?;
                            v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_string())
                        }
                        None => "Fail".to_string(),
                    };
                    step_stats.push(StepStat {
                        time: Utc::now(),
                        req: req_json,
                        res: res_json,
                        err: None,
                        err_code: code.clone(),
                        res_time_ms,
                    });
                    unit_err_code = code;
                    break;
                }
            }
        }
    }

    Ok(UnitStat {
        id: run_id.to_string(),
        seq: 0,
        time: Utc::now(),
        name: unit.name.clone(),
        step: step_stats,
        err_code: unit_err_code,
        res_time_ms: unit_start.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::Playbook;

    fn sample_playbook(yaml: &str) -> Playbook {
        let dir = std::env::temp_dir().join(format!("ben-scheduler-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("playbook-{}.yaml", rand_suffix()));
        std::fs::write(&path, yaml).unwrap();
        Playbook::load(&path, false).unwrap()
    }

    fn rand_suffix() -> u64 {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    #[tokio::test]
    async fn single_stage_shell_echo_round_trip() {
        let dir = std::env::temp_dir().join(format!("ben-scheduler-run-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let recorder_path = dir.join(format!("out-{}.jsonl", rand_suffix()));

        let yaml = format!(
            r#"
id: r1
name: demo
ctx:
  sh:
    type: Shell
    options: {{}}
source:
  src:
    type: Inline
    options:
      records:
        - {{k: a}}
        - {{k: b}}
plan:
  duration: 300ms
  interval: 0ms
  parallel:
    - {{u: 1}}
  unit:
    - name: u
      step:
        - ctx: sh
          req:
            "#command": "'echo -n ' + source.src.k"
recorder:
  type: File
  options:
    path: {path}
"#,
            path = recorder_path.display()
        );

        let playbook = sample_playbook(&yaml);
        let framework = Framework::build(&playbook).unwrap().with_lead_in(Duration::from_millis(10));
        let result = framework.run().await.unwrap();

        assert_eq!(result.meta.duration_secs.len(), 1);
        let content = std::fs::read_to_string(&recorder_path).unwrap();
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        assert!(!lines.is_empty());
        for line in &lines {
            let stat: UnitStat = serde_json::from_str(line).unwrap();
            assert_eq!(stat.err_code, "");
            assert!(stat.step[0].res["stdout"].as_str().unwrap() == "a" || stat.step[0].res["stdout"].as_str().unwrap() == "b");
        }
    }

    #[tokio::test]
    async fn undeclared_unit_in_parallel_map_is_a_build_error() {
        let yaml = r#"
id: r1
name: demo
plan:
  duration: 1s
  interval: 0ms
  parallel:
    - {ghost: 1}
  unit: []
"#;
        let playbook = sample_playbook(yaml);
        assert!(matches!(Framework::build(&playbook), Err(SchedulerError::UndeclaredUnit(0, _))));
    }
}

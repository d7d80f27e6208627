//! Opt-in latency sampling for merges, polls and resyncs.
//!
//! Samples are process-wide: the push consumer, the poll task and the resync
//! task may each run on a different runtime worker.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::json;

/// Latency summary across every sampled operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingReport {
    pub operations: Vec<OpTiming>,
}

/// Percentiles for one operation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpTiming {
    pub name: String,
    pub count: usize,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

static SAMPLES: Mutex<BTreeMap<&'static str, Vec<Duration>>> = Mutex::new(BTreeMap::new());
static ENABLED: AtomicBool = AtomicBool::new(false);

/// True when `LOGSYNC_TIMING` is set to `1`, `true`, `yes` or `on`.
#[must_use]
pub fn timing_enabled_from_env() -> bool {
    std::env::var("LOGSYNC_TIMING")
        .ok()
        .is_some_and(|value| is_truthy(&value))
}

pub fn set_timing_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
    if !enabled {
        clear_timings();
    }
}

#[must_use]
pub fn is_timing_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub fn clear_timings() {
    SAMPLES.lock().clear();
}

/// Run `f`, recording its wall time under `name` when sampling is on.
pub fn timed<R>(name: &'static str, f: impl FnOnce() -> R) -> R {
    if !is_timing_enabled() {
        return f();
    }
    let started = Instant::now();
    let result = f();
    record(name, started.elapsed());
    result
}

/// Record the time since `started` under `name`, for spans that cross an
/// `.await`.
pub fn record_since(name: &'static str, started: Instant) {
    if is_timing_enabled() {
        record(name, started.elapsed());
    }
}

fn record(name: &'static str, elapsed: Duration) {
    SAMPLES.lock().entry(name).or_default().push(elapsed);
}

/// Drain every sample into a report.
#[must_use]
pub fn collect_report() -> TimingReport {
    let drained = std::mem::take(&mut *SAMPLES.lock());
    let operations = drained
        .into_iter()
        .map(|(name, mut values)| {
            values.sort_unstable();
            OpTiming {
                name: name.to_string(),
                count: values.len(),
                p50: percentile(&values, 50),
                p95: percentile(&values, 95),
                p99: percentile(&values, 99),
                max: values.last().copied().unwrap_or_default(),
            }
        })
        .collect();
    TimingReport { operations }
}

impl TimingReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let operations: Vec<_> = self
            .operations
            .iter()
            .map(|op| {
                json!({
                    "name": op.name,
                    "count": op.count,
                    "p50_us": op.p50.as_micros(),
                    "p95_us": op.p95.as_micros(),
                    "p99_us": op.p99.as_micros(),
                    "max_us": op.max.as_micros(),
                })
            })
            .collect();
        json!({ "operations": operations })
    }

    #[must_use]
    pub fn display_table(&self) -> String {
        if self.operations.is_empty() {
            return "No timing samples recorded.".to_string();
        }
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<20} {:>7} {:>9} {:>9} {:>9} {:>9}",
            "operation", "count", "p50", "p95", "p99", "max"
        );
        let _ = writeln!(out, "{}", "-".repeat(67));
        for op in &self.operations {
            let _ = writeln!(
                out,
                "{:<20} {:>7} {:>9} {:>9} {:>9} {:>9}",
                op.name,
                op.count,
                format_duration(op.p50),
                format_duration(op.p95),
                format_duration(op.p99),
                format_duration(op.max),
            );
        }
        out
    }
}

// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (pct.min(100) * sorted.len()).div_ceil(100);
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

fn format_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    match micros {
        1_000_000.. => format!("{}.{:03}s", micros / 1_000_000, (micros % 1_000_000) / 1_000),
        1_000.. => format!("{}.{:03}ms", micros / 1_000, micros % 1_000),
        _ => format!("{micros}µs"),
    }
}

fn is_truthy(value: &str) -> bool {
    ["1", "true", "yes", "on"]
        .iter()
        .any(|t| value.eq_ignore_ascii_case(t))
}

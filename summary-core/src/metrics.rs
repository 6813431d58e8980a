//! Prometheus metrics for the summary manager
//!
//! Lock-free counters, gauges and histograms rendered in the Prometheus text
//! format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

/// Monotonically increasing count
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn render(&self, out: &mut String) {
        write_header(out, self.name, self.help, "counter");
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }
}

/// Value that can go up and down
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn render(&self, out: &mut String) {
        write_header(out, self.name, self.help, "gauge");
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }
}

/// Duration histogram with cumulative buckets, in seconds
pub struct Histogram {
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Histogram {
    pub fn new(name: &'static str, help: &'static str, bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros().min(u64::MAX as u128) as u64, Ordering::Relaxed);

        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            if secs <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn render(&self, out: &mut String) {
        write_header(out, self.name, self.help, "histogram");
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            let _ = writeln!(
                out,
                "{}_bucket{{le=\"{}\"}} {}",
                self.name,
                bound,
                bucket.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", self.name, self.count());
        let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(out, "{}_sum {}", self.name, sum);
        let _ = writeln!(out, "{}_count {}", self.name, self.count());
    }
}

/// Process-wide summary manager metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static SPAWN_ATTEMPTS: Counter =
        Counter::new("summary_spawn_attempts_total", "Summarizer spawn attempts");

    pub static SPAWN_FAILURES: Counter =
        Counter::new("summary_spawn_failures_total", "Summarizer spawns that failed");

    pub static RUNS_COMPLETED: Counter =
        Counter::new("summary_runs_total", "Summarizer runs that ended");

    pub static ELECTED_CLIENT_CHANGES: Counter = Counter::new(
        "summary_elected_client_changes_total",
        "Changes of the elected summarizer client",
    );

    pub static THROTTLE_MAX_DELAY: Counter = Counter::new(
        "summary_throttle_max_delay_total",
        "Starts throttled by the maximum delay",
    );

    pub static RUNNING_SUMMARIZERS: Gauge =
        Gauge::new("summary_running_summarizers", "Summarizers running in this process");

    pub static RUN_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new(
            "summary_run_duration_seconds",
            "How long summarizers ran before stopping",
            &[1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 21600.0],
        )
    });
}

/// Render every standard metric
pub fn gather_system_metrics() -> String {
    let mut out = String::new();
    standard::SPAWN_ATTEMPTS.render(&mut out);
    standard::SPAWN_FAILURES.render(&mut out);
    standard::RUNS_COMPLETED.render(&mut out);
    standard::ELECTED_CLIENT_CHANGES.render(&mut out);
    standard::THROTTLE_MAX_DELAY.render(&mut out);
    standard::RUNNING_SUMMARIZERS.render(&mut out);
    standard::RUN_DURATION.render(&mut out);
    out
}

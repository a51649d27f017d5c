use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, HistogramVec, IntCounter, IntCounterVec, Registry,
};
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeMetricsSnapshot {
    pub fragments: u64,
    pub fragment_success: u64,
    pub fragment_failures: u64,
    pub fragment_latency_total_us: u64,
    pub signals: u64,
}

static FRAGMENTS: AtomicU64 = AtomicU64::new(0);
static FRAGMENT_SUCCESS: AtomicU64 = AtomicU64::new(0);
static FRAGMENT_FAILURES: AtomicU64 = AtomicU64::new(0);
static FRAGMENT_LATENCY_TOTAL_US: AtomicU64 = AtomicU64::new(0);
static SIGNALS: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref FRAGMENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("pagebridge_fragments_total", "Fragments submitted to documents"),
        &["verb"]
    )
    .unwrap();
    static ref FRAGMENT_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "pagebridge_fragment_failures_total",
            "Fragments that returned a failed envelope"
        ),
        &["verb"]
    )
    .unwrap();
    static ref FRAGMENT_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "pagebridge_fragment_duration_seconds",
            "Round-trip latency of successful fragments",
            vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 3.0]
        ),
        &["verb"]
    )
    .unwrap();
    static ref SIGNALS_TOTAL: IntCounter =
        IntCounter::new("pagebridge_lifecycle_signals_total", "Lifecycle signals emitted").unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register bridge metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, FRAGMENTS_TOTAL.clone());
    register(registry, FRAGMENT_FAILURES_TOTAL.clone());
    register(registry, FRAGMENT_DURATION.clone());
    register(registry, SIGNALS_TOTAL.clone());
}

pub fn record_fragment(verb: &str) {
    FRAGMENTS.fetch_add(1, Ordering::Relaxed);
    FRAGMENTS_TOTAL.with_label_values(&[verb]).inc();
}

pub fn record_fragment_success(verb: &str, duration: Duration) {
    FRAGMENT_SUCCESS.fetch_add(1, Ordering::Relaxed);
    let micros = duration.as_micros().min(u64::MAX as u128) as u64;
    FRAGMENT_LATENCY_TOTAL_US.fetch_add(micros, Ordering::Relaxed);
    FRAGMENT_DURATION
        .with_label_values(&[verb])
        .observe(duration.as_secs_f64());
}

pub fn record_fragment_failure(verb: &str) {
    FRAGMENT_FAILURES.fetch_add(1, Ordering::Relaxed);
    FRAGMENT_FAILURES_TOTAL.with_label_values(&[verb]).inc();
}

pub fn record_signal() {
    SIGNALS.fetch_add(1, Ordering::Relaxed);
    SIGNALS_TOTAL.inc();
}

pub fn snapshot() -> BridgeMetricsSnapshot {
    BridgeMetricsSnapshot {
        fragments: FRAGMENTS.load(Ordering::Relaxed),
        fragment_success: FRAGMENT_SUCCESS.load(Ordering::Relaxed),
        fragment_failures: FRAGMENT_FAILURES.load(Ordering::Relaxed),
        fragment_latency_total_us: FRAGMENT_LATENCY_TOTAL_US.load(Ordering::Relaxed),
        signals: SIGNALS.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    FRAGMENTS.store(0, Ordering::Relaxed);
    FRAGMENT_SUCCESS.store(0, Ordering::Relaxed);
    FRAGMENT_FAILURES.store(0, Ordering::Relaxed);
    FRAGMENT_LATENCY_TOTAL_US.store(0, Ordering::Relaxed);
    SIGNALS.store(0, Ordering::Relaxed);
}

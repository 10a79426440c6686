//! Prometheus collectors for CDP traffic. Registered into the host's registry on demand.

use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry,
};
use tracing::error;

lazy_static! {
    static ref COMMANDS: IntCounterVec = IntCounterVec::new(
        Opts::new("cartscout_cdp_commands_total", "CDP commands sent, by method"),
        &["method", "outcome"]
    )
    .unwrap();
    static ref COMMAND_LATENCY: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "cartscout_cdp_command_duration_seconds",
            "Round trip of successful CDP commands",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 15.0]
        ),
        &["method"]
    )
    .unwrap();
    static ref EVENTS: IntCounter =
        IntCounter::new("cartscout_cdp_events_total", "CDP events routed to pages").unwrap();
    static ref OPEN_PAGES: IntGauge =
        IntGauge::new("cartscout_cdp_open_pages", "Page sessions currently attached").unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector)) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register cdp metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, COMMANDS.clone());
    register(registry, COMMAND_LATENCY.clone());
    register(registry, EVENTS.clone());
    register(registry, OPEN_PAGES.clone());
}

pub fn record_command(method: &str) {
    COMMANDS.with_label_values(&[method, "sent"]).inc();
}

pub fn record_command_success(method: &str, duration: Duration) {
    COMMANDS.with_label_values(&[method, "ok"]).inc();
    COMMAND_LATENCY
        .with_label_values(&[method])
        .observe(duration.as_secs_f64());
}

pub fn record_command_failure(method: &str) {
    COMMANDS.with_label_values(&[method, "failed"]).inc();
}

pub fn record_event() {
    EVENTS.inc();
}

pub fn page_opened() {
    OPEN_PAGES.inc();
}

pub fn page_closed() {
    OPEN_PAGES.dec();
}

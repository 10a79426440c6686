use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use cdp_adapter::metrics as cdp_metrics;
use lazy_static::lazy_static;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{core::Collector, Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::error;

use cartscout_core_types::{SearchStatus, Target};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

lazy_static! {
    static ref SEARCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cartscout_searches_total", "Per-target search outcomes"),
        &["target", "status"]
    )
    .unwrap();
    static ref SESSIONS_OPENED: IntCounter =
        IntCounter::new("cartscout_sessions_opened_total", "Client sessions opened").unwrap();
    static ref SESSIONS_CLOSED: IntCounter =
        IntCounter::new("cartscout_sessions_closed_total", "Client sessions closed").unwrap();
    static ref ACTIVE_CONTEXTS: IntGauge = IntGauge::new(
        "cartscout_active_contexts",
        "Browser contexts currently held by the pool"
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector)) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register scout metric");
        }
    }
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        register(registry, SEARCHES_TOTAL.clone());
        register(registry, SESSIONS_OPENED.clone());
        register(registry, SESSIONS_CLOSED.clone());
        register(registry, ACTIVE_CONTEXTS.clone());
        cdp_metrics::register_metrics(registry);
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn record_search(target: Target, status: SearchStatus) {
    SEARCHES_TOTAL
        .with_label_values(&[target.as_str(), status.as_str()])
        .inc();
}

pub fn session_opened() {
    SESSIONS_OPENED.inc();
}

pub fn session_closed() {
    SESSIONS_CLOSED.inc();
}

pub fn context_launched() {
    ACTIVE_CONTEXTS.inc();
}

pub fn context_released() {
    ACTIVE_CONTEXTS.dec();
}

/// Prometheus text exposition of the global registry.
pub fn render() -> Response {
    register_metrics();
    let encoder = TextEncoder::new();
    let format_type = encoder.format_type().to_string();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&global_registry().gather(), &mut buffer) {
        error!(?err, "failed to encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response();
    }

    let body = match String::from_utf8(buffer) {
        Ok(body) => body,
        Err(err) => {
            error!(?err, "failed to convert prometheus metrics to utf8");
            return (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response();
        }
    };
    match HeaderValue::from_str(&format_type) {
        Ok(value) => ([(header::CONTENT_TYPE, value)], body).into_response(),
        Err(err) => {
            error!(?err, "failed to build content-type header");
            (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response()
        }
    }
}

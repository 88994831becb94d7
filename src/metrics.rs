use axum::{
    http::HeaderValue,
    response::{IntoResponse, Response},
};
use crossrun_scheduler::metrics as scheduler_metrics;
use crossrun_transport::metrics as transport_metrics;
use lazy_static::lazy_static;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{core::Collector, opts, Encoder, IntCounterVec, IntGaugeVec, Registry, TextEncoder};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

lazy_static! {
    static ref TESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!("crossrun_tests_total", "Finished tests grouped by outcome"),
        &["outcome"]
    )
    .unwrap();
    static ref QUEUE_TASKS: IntGaugeVec = IntGaugeVec::new(
        opts!(
            "crossrun_queue_tasks",
            "Command queue task counts since start, grouped by stage"
        ),
        &["stage"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register metric");
        }
    }
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        transport_metrics::register_metrics(registry);
        register(registry, TESTS_TOTAL.clone());
        register(registry, QUEUE_TASKS.clone());
    });
}

pub fn record_test(passed: bool) {
    TESTS_TOTAL
        .with_label_values(&[if passed { "pass" } else { "fail" }])
        .inc();
}

/// Copies the queue's atomic counters into gauges before a scrape.
fn refresh_queue_gauges() {
    for (stage, value) in scheduler_metrics::snapshot() {
        QUEUE_TASKS
            .with_label_values(&[stage.label()])
            .set(value as i64);
    }
    QUEUE_TASKS
        .with_label_values(&["in_flight"])
        .set(scheduler_metrics::in_flight() as i64);
}

pub async fn metrics_handler() -> Response {
    register_metrics();
    refresh_queue_gauges();
    let encoder = TextEncoder::new();
    let format_type = encoder.format_type().to_string();
    let metric_families = global_registry().gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(?err, "failed to encode prometheus metrics");
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "metric encode error",
        )
            .into_response();
    }

    match String::from_utf8(buffer) {
        Ok(body) => match HeaderValue::from_str(&format_type) {
            Ok(value) => ([(axum::http::header::CONTENT_TYPE, value)], body).into_response(),
            Err(err) => {
                error!(?err, "failed to build content-type header");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "metric encode error",
                )
                    .into_response()
            }
        },
        Err(err) => {
            error!(?err, "failed to convert prometheus metrics to utf8");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "metric encode error",
            )
                .into_response()
        }
    }
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref SESSIONS_ACTIVE: IntGauge =
        IntGauge::new("crossrun_sessions_active", "Sessions currently registered").unwrap();
    static ref RECONNECTS_TOTAL: IntCounter = IntCounter::new(
        "crossrun_session_reconnects_total",
        "Connections that resumed an existing session",
    )
    .unwrap();
    static ref CALLS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "crossrun_calls_total",
            "Id-bearing calls grouped by message type and outcome"
        ),
        &["kind", "outcome"]
    )
    .unwrap();
    static ref FRAMES_RESENT: IntCounter = IntCounter::new(
        "crossrun_frames_resent_total",
        "Unacknowledged frames sent again after a resume",
    )
    .unwrap();
    static ref END_TIMEOUTS: IntCounter = IntCounter::new(
        "crossrun_end_timeouts_total",
        "End handshakes that hit the ceiling",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register transport metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, SESSIONS_ACTIVE.clone());
    register(registry, RECONNECTS_TOTAL.clone());
    register(registry, CALLS_TOTAL.clone());
    register(registry, FRAMES_RESENT.clone());
    register(registry, END_TIMEOUTS.clone());
}

pub fn set_session_count(count: usize) {
    SESSIONS_ACTIVE.set(count as i64);
}

pub fn record_reconnect() {
    RECONNECTS_TOTAL.inc();
}

pub fn record_call(kind: &str, ok: bool) {
    CALLS_TOTAL
        .with_label_values(&[kind, if ok { "ok" } else { "error" }])
        .inc();
}

pub fn record_resent(count: usize) {
    FRAMES_RESENT.inc_by(count as u64);
}

pub fn record_end_timeout() {
    END_TIMEOUTS.inc();
}

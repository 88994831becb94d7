//! Server assembly: the HTTP surface and the driver that runs the suite
//! against every new browser session.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::{http::Method, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use crossrun_catalog::Catalog;
use crossrun_core_types::{ErrorDescriptor, RelayError, SessionToken};
use crossrun_transport::{FinishOptions, HubConfig, HubEvent, SessionHub};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast::error::RecvError, mpsc, oneshot};
use tokio::task::JoinSet;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info, instrument, warn};

use crate::config::RunConfig;
use crate::metrics;
use crate::runner::{CoverageAdapter, TestEvent, TestRunner};
use crate::tools::Context;

/// What one session's run of the suite produced.
#[derive(Clone, Debug, Serialize)]
pub struct SuiteReport {
    pub token: SessionToken,
    pub passed: u32,
    pub failed: u32,
    pub failures: Vec<(String, ErrorDescriptor)>,
    pub coverage: Option<Value>,
    /// The runner's own error, beyond its failing tests.
    pub error: Option<ErrorDescriptor>,
    /// What went wrong ending the session. Reported only; the tests' outcome
    /// stands.
    pub teardown_error: Option<ErrorDescriptor>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SuiteReport {
    pub fn succeeded(&self) -> bool {
        self.failed == 0 && self.error.is_none()
    }
}

/// Process exit status for a set of reports: the failure count, at least 1
/// when a runner broke or nothing ran. Teardown problems do not count.
pub fn exit_code(reports: &[SuiteReport]) -> i32 {
    if reports.is_empty() {
        return 1;
    }
    let failed: u32 = reports.iter().map(|r| r.failed).sum();
    if failed > 0 {
        failed.min(255) as i32
    } else if reports.iter().all(SuiteReport::succeeded) {
        0
    } else {
        1
    }
}

/// Runs the suite once per new session.
pub struct SuiteDriver {
    hub: Arc<SessionHub>,
    catalog: Arc<Catalog>,
    runner: Arc<dyn TestRunner>,
    coverage: Arc<dyn CoverageAdapter>,
    config: Arc<RunConfig>,
    reports: Mutex<Vec<SuiteReport>>,
}

impl SuiteDriver {
    pub fn new(
        hub: Arc<SessionHub>,
        runner: Arc<dyn TestRunner>,
        coverage: Arc<dyn CoverageAdapter>,
        config: Arc<RunConfig>,
    ) -> Arc<Self> {
        let catalog = Catalog::build(hub.clone());
        Arc::new(Self {
            hub,
            catalog,
            runner,
            coverage,
            config,
            reports: Mutex::new(Vec::new()),
        })
    }

    pub fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    pub fn reports(&self) -> Vec<SuiteReport> {
        self.reports.lock().clone()
    }

    /// Runs the suite for `token`, then ends the session.
    #[instrument(skip(self), fields(token = %token))]
    pub async fn run_session(&self, token: SessionToken) -> SuiteReport {
        let started_at = Utc::now();
        let ctx = Context::new(
            self.hub.clone(),
            self.catalog.clone(),
            token.clone(),
            self.config.slow_delay(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let reporting = async {
            let mut passed = 0;
            let mut failures = Vec::new();
            while let Some(event) = rx.recv().await {
                match event {
                    TestEvent::Test { name } => info!(test = %name, "test started"),
                    TestEvent::Pass { name } => {
                        metrics::record_test(true);
                        info!(test = %name, "pass");
                        passed += 1;
                    }
                    TestEvent::Fail { name, error } => {
                        metrics::record_test(false);
                        error!(test = %name, error = %error.message, name = %error.name, "fail");
                        if failures.is_empty() {
                            self.hub
                                .record_failure(&token, RelayError::from_descriptor(error.clone()));
                        }
                        failures.push((name, error));
                    }
                }
            }
            (passed, failures)
        };
        let (run, (passed, failures)) = tokio::join!(self.runner.run(ctx, tx), reporting);
        let runner_error = run.err();
        if let Some(err) = &runner_error {
            warn!(error = %err, "runner failed");
        }
        let runner_descriptor = runner_error.as_ref().map(RelayError::to_descriptor);

        let outcome = self
            .hub
            .finish(
                &token,
                FinishOptions {
                    collect_coverage: self.config.coverage,
                    runner_error,
                },
            )
            .await;
        if let Some(map) = &outcome.coverage {
            if let Err(err) = self.coverage.collect(&token, map.clone()).await {
                warn!(error = %err, "coverage collection failed");
            }
        }

        let failed = failures.len() as u32;
        // The first failing test was recorded as the runner error; only an
        // error beyond the test failures themselves is reported separately.
        let error = runner_descriptor
            .clone()
            .filter(|desc| !is_recorded(desc, &failures));
        let teardown_error = outcome
            .error
            .map(|err| err.to_descriptor())
            .filter(|desc| Some(desc) != runner_descriptor.as_ref() && !is_recorded(desc, &failures));
        if let Some(desc) = &teardown_error {
            warn!(error = %desc.message, name = %desc.name, "session teardown failed");
        }
        let report = SuiteReport {
            token,
            passed,
            failed,
            failures,
            coverage: outcome.coverage,
            error,
            teardown_error,
            started_at,
            finished_at: Utc::now(),
        };
        info!(passed = report.passed, failed = report.failed, "suite finished");
        self.reports.lock().push(report.clone());
        report
    }

    /// Starts the suite for each new session. Without `watch`, returns once
    /// the first session has finished.
    pub async fn drive(self: Arc<Self>) {
        let mut events = self.hub.subscribe();
        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(HubEvent::Connected { token, flaws, resumed: false }) => {
                        info!(token = %token, ?flaws, "new session");
                        let driver = self.clone();
                        sessions.spawn(async move { driver.run_session(token).await });
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "driver lagged behind hub events"),
                    Err(RecvError::Closed) => break,
                },
                Some(done) = sessions.join_next() => {
                    if let Err(err) = done {
                        error!(?err, "session task failed");
                    }
                    if !self.config.watch {
                        break;
                    }
                }
            }
        }
        if let Err(err) = self.coverage.report().await {
            warn!(error = %err, "coverage report failed");
        }
    }
}

fn is_recorded(descriptor: &ErrorDescriptor, failures: &[(String, ErrorDescriptor)]) -> bool {
    failures
        .iter()
        .any(|(_, failure)| failure.name == descriptor.name && failure.message == descriptor.message)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// `/ws`, `/exec/...`, `/health`, `/metrics`, and the static directory as fallback.
pub fn app(hub: Arc<SessionHub>, static_dir: Option<PathBuf>) -> Router {
    let state = hub.clone();
    let router = crossrun_transport::router(hub)
        .route(
            "/health",
            get(move || {
                let hub = state.clone();
                async move { Json(json!({"status": "ok", "sessions": hub.len()})) }
            }),
        )
        .route("/metrics", get(metrics::metrics_handler));
    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };
    router.layer(cors_layer())
}

/// Serves until the suite is done (or forever in watch mode) and returns
/// every session's report.
pub async fn serve(
    config: Arc<RunConfig>,
    runner: Arc<dyn TestRunner>,
    coverage: Arc<dyn CoverageAdapter>,
) -> Result<Vec<SuiteReport>> {
    metrics::register_metrics();
    let hub = SessionHub::new(HubConfig {
        end_timeout: config.end_timeout(),
        retain_scripts: config.verbose,
    });
    let driver = SuiteDriver::new(hub.clone(), runner, coverage, config.clone());

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(addr = %listener.local_addr()?, watch = config.watch, "crossrun listening");
    if let Some(url) = &config.url {
        info!(%url, "waiting for browsers to open the page under test");
    }
    if config.cert.is_some() {
        warn!("cert/key configured; TLS must be terminated in front of crossrun");
    }

    let (done_tx, done_rx) = oneshot::channel::<()>();
    let drive = tokio::spawn({
        let driver = driver.clone();
        async move {
            driver.drive().await;
            let _ = done_tx.send(());
        }
    });

    axum::serve(listener, app(hub, config.static_dir.clone()))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = done_rx => info!("suite complete, shutting down"),
                _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
            }
        })
        .await
        .context("server error")?;

    drive.abort();
    Ok(driver.reports())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn report(failed: u32, error: Option<ErrorDescriptor>) -> SuiteReport {
        SuiteReport {
            token: "a1b2".parse().unwrap(),
            passed: 1,
            failed,
            failures: Vec::new(),
            coverage: None,
            error,
            teardown_error: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn exit_code_counts_failures() {
        assert_eq!(exit_code(&[report(0, None)]), 0);
        assert_eq!(exit_code(&[report(2, None), report(1, None)]), 3);
        assert_eq!(
            exit_code(&[report(0, Some(ErrorDescriptor::new("TypeError", "runner broke")))]),
            1
        );
        assert_eq!(exit_code(&[]), 1);
    }

    #[test]
    fn teardown_problems_do_not_fail_a_passing_run() {
        let mut passing = report(0, None);
        passing.teardown_error = Some(ErrorDescriptor::new(
            "TimeoutError",
            "end handshake exceeded 2000ms",
        ));
        assert!(passing.succeeded());
        assert_eq!(exit_code(&[passing]), 0);
    }

    #[tokio::test]
    async fn health_and_metrics_are_served() {
        let app = app(SessionHub::new(HubConfig::default()), None);
        let health = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let metrics = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(metrics.status(), StatusCode::OK);
    }
}

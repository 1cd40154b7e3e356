use crate::cli::ServeArgs;
use crate::infra::{demo_scope, in_memory_desk, seed_demo_findings, AppState};
use crate::routes::with_review_routes;
use crate::worker::spawn_reprocessing_worker;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use qre_review::config::AppConfig;
use qre_review::error::AppError;
use qre_review::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let seeded = in_memory_desk(config.reprocessing.stall_ceiling);
    if let Some(tax_year) = args.seed_demo {
        let findings = seed_demo_findings(&seeded, &demo_scope(tax_year), Utc::now())?;
        info!(tax_year, findings = findings.len(), "seeded demo engagement");
    }
    let worker = spawn_reprocessing_worker(seeded.desk.clone(), config.reprocessing.poll_interval);

    let app = with_review_routes(seeded.desk)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        poll_interval_secs = config.reprocessing.poll_interval.as_secs(),
        "qre review service ready"
    );

    let served = axum::serve(listener, app).await;
    worker.abort();
    served?;
    Ok(())
}

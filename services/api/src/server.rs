use crate::cli::ServeArgs;
use crate::infra::{open_service, AppState};
use crate::routes::with_booking_routes;
use crate::scheduler::run_scheduler;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use campus_booking::config::AppConfig;
use campus_booking::error::AppError;
use campus_booking::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
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

    let (service, state_path) = open_service(&config, args.state.take())?;
    tokio::spawn(run_scheduler(
        service.clone(),
        Duration::from_secs(config.scheduler.tick_seconds),
        state_path.clone(),
    ));

    let app = with_booking_routes(service.clone())
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, state = ?state_path, "campus booking service ready");

    axum::serve(listener, app).await?;

    if let Some(path) = &state_path {
        service.save_snapshot(path)?;
    }
    Ok(())
}

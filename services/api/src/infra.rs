use campus_booking::config::AppConfig;
use campus_booking::error::AppError;
use campus_booking::notifications::ConfiguredTransport;
use campus_booking::{BookingService, BookingStore};
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type SharedService = Arc<BookingService<ConfiguredTransport>>;

/// Loads the snapshot (the override wins over the configured path), seeds the
/// default mail templates into an empty store and wires the configured transport.
pub(crate) fn open_service(
    config: &AppConfig,
    state_override: Option<PathBuf>,
) -> Result<(SharedService, Option<PathBuf>), AppError> {
    let state_path = state_override.or_else(|| config.storage.state_path.clone());
    let mut store = match &state_path {
        Some(path) => BookingStore::load_or_default(path)?,
        None => BookingStore::default(),
    };
    if store.templates.is_empty() {
        let seeded = store.seed_default_templates();
        info!(seeded, "default mail templates installed");
    }

    let transport = Arc::new(ConfiguredTransport::from_config(&config.mail));
    let service = BookingService::new(store, transport, config.scheduler.retention_days);
    Ok((Arc::new(service), state_path))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

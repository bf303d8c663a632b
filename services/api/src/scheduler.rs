use campus_booking::notifications::MailTransport;
use campus_booking::{BookingService, DispatchReport};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Background task that runs due jobs, delivers the outbox and snapshots the store.
pub(crate) async fn run_scheduler<T>(
    service: Arc<BookingService<T>>,
    tick: Duration,
    state_path: Option<PathBuf>,
) where
    T: MailTransport,
{
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        tick_once(&service, state_path.as_deref()).await;
    }
}

pub(crate) async fn tick_once<T>(service: &BookingService<T>, state_path: Option<&Path>) -> DispatchReport
where
    T: MailTransport,
{
    let runs = service.run_due_jobs(Utc::now());
    for run in runs.iter().filter(|run| !run.success) {
        warn!(job = %run.code, message = %run.message, "scheduled job failed");
    }
    let report = service.dispatch_pending().await;
    debug!(jobs = runs.len(), sent = report.sent, failed = report.failed, "scheduler tick");

    if let Some(path) = state_path {
        if let Err(err) = service.save_snapshot(path) {
            error!(error = %err, "snapshot failed");
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_booking::notifications::MemoryMailTransport;
    use campus_booking::BookingStore;

    #[tokio::test]
    async fn tick_records_job_runs_and_writes_snapshot() {
        let dir = std::env::temp_dir().join(format!("campus-booking-scheduler-{}", std::process::id()));
        let path = dir.join("state.json");
        let service = BookingService::new(
            BookingStore::default(),
            Arc::new(MemoryMailTransport::default()),
            365,
        );

        let report = tick_once(&service, Some(&path)).await;

        assert_eq!(report, DispatchReport::default());
        let restored = BookingStore::load_snapshot(&path).expect("snapshot written");
        assert!(!restored.job_runs.is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use campus_booking::ids::UnitId;
use campus_booking::notifications::MemoryMailTransport;
use campus_booking::organization::UnitKind;
use campus_booking::registry::UnitDraft;
use campus_booking::{BookingService, BookingStore, SnapshotError};
use chrono::{TimeZone, Utc};

fn snapshot_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("campus-booking-{}-{name}", std::process::id()))
        .join("state.json")
}

fn unit(name: &str) -> UnitDraft {
    UnitDraft {
        name: name.to_string(),
        kind: UnitKind::Faculty,
        parent: None,
    }
}

#[test]
fn snapshot_keeps_ids_unique_and_rebuilds_search() {
    let path = snapshot_path("ids");
    let mut store = BookingStore::default();
    let first = store.add_unit(unit("Faculty of Law")).expect("unit");
    store.seed_default_templates();
    store.save_snapshot(&path).expect("saved");

    let mut restored = BookingStore::load_snapshot(&path).expect("loaded");
    assert_eq!(restored.units[&first].name, "Faculty of Law");
    assert_eq!(restored.templates.len(), store.templates.len());

    let second: UnitId = restored.add_unit(unit("Faculty of Medicine")).expect("unit");
    assert!(second.0 > first.0);
    assert!(!restored.units.contains_key(&UnitId(0)));

    let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
}

#[test]
fn missing_snapshot_starts_empty() {
    let path = snapshot_path("missing");
    let store = BookingStore::load_or_default(&path).expect("empty store");
    assert!(store.units.is_empty());
}

#[test]
fn corrupt_snapshot_is_reported() {
    let path = snapshot_path("corrupt");
    std::fs::create_dir_all(path.parent().expect("parent")).expect("dir");
    std::fs::write(&path, "{ not json").expect("written");

    let err = BookingStore::load_snapshot(&path).expect_err("corrupt");
    assert!(matches!(err, SnapshotError::Json { .. }));

    let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
}

#[tokio::test]
async fn service_runs_due_jobs_and_records_them() {
    let transport = Arc::new(MemoryMailTransport::default());
    let service = BookingService::new(BookingStore::default(), transport, 365);
    let now = Utc
        .with_ymd_and_hms(2031, 1, 6, 7, 0, 0)
        .single()
        .expect("valid timestamp");

    let runs = service.run_due_jobs(now);
    assert!(!runs.is_empty());
    assert!(runs.iter().all(|run| run.success));

    let again = service.run_due_jobs(now);
    assert!(again.len() < runs.len());
    let report = service.dispatch_pending().await;
    assert_eq!(report.sent + report.failed, 0);
}

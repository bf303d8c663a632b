//! The in-memory store behind every operation, plus JSON snapshots of it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::audit::LogEntry;
use crate::catalog::Product;
use crate::ids::{
    BookingId, CalendarEventId, CalendarId, EventTimeId, GuestId, LogEntryId, MessageId, PoolId,
    ProductId, RequirementId, ResourceId, RoomId, TemplateId, UnitId, UserId, VisitId,
    VisitResourceId,
};
use crate::notifications::{EmailMessage, EmailTemplate, JobRun, ProductAutosend, VisitAutosend};
use crate::organization::OrganizationalUnit;
use crate::profile::UserProfile;
use crate::resources::{
    Calendar, CalendarEvent, Resource, ResourcePool, ResourceRequirement, Room, VisitResource,
};
use crate::scheduling::EventTime;
use crate::search::SearchIndex;
use crate::visits::{Booking, Guest, Visit};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to access snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot {path} is not valid: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Every entity, keyed by id. Ids come from one shared sequence.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BookingStore {
    next_id: u64,
    #[serde(default)]
    pub units: BTreeMap<UnitId, OrganizationalUnit>,
    #[serde(default)]
    pub users: BTreeMap<UserId, UserProfile>,
    #[serde(default)]
    pub products: BTreeMap<ProductId, Product>,
    #[serde(default)]
    pub rooms: BTreeMap<RoomId, Room>,
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, Resource>,
    #[serde(default)]
    pub pools: BTreeMap<PoolId, ResourcePool>,
    #[serde(default)]
    pub requirements: BTreeMap<RequirementId, ResourceRequirement>,
    #[serde(default)]
    pub calendars: BTreeMap<CalendarId, Calendar>,
    #[serde(default)]
    pub calendar_events: BTreeMap<CalendarEventId, CalendarEvent>,
    #[serde(default)]
    pub event_times: BTreeMap<EventTimeId, EventTime>,
    #[serde(default)]
    pub visits: BTreeMap<VisitId, Visit>,
    #[serde(default)]
    pub visit_resources: BTreeMap<VisitResourceId, VisitResource>,
    #[serde(default)]
    pub guests: BTreeMap<GuestId, Guest>,
    #[serde(default)]
    pub bookings: BTreeMap<BookingId, Booking>,
    #[serde(default)]
    pub templates: BTreeMap<TemplateId, EmailTemplate>,
    #[serde(default)]
    pub product_autosends: Vec<ProductAutosend>,
    #[serde(default)]
    pub visit_autosends: Vec<VisitAutosend>,
    #[serde(default)]
    pub outbox: BTreeMap<MessageId, EmailMessage>,
    #[serde(default)]
    pub log: BTreeMap<LogEntryId, LogEntry>,
    #[serde(default)]
    pub job_runs: Vec<JobRun>,
    #[serde(skip)]
    pub(crate) search: SearchIndex,
}

impl BookingStore {
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Reads a snapshot written by [`BookingStore::save_snapshot`].
    pub fn load_snapshot(path: &Path) -> Result<Self, SnapshotError> {
        let shown = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: shown.clone(),
            source,
        })?;
        let mut store: BookingStore =
            serde_json::from_str(&raw).map_err(|source| SnapshotError::Json {
                path: shown.clone(),
                source,
            })?;
        store.rebuild_search_index();
        info!(path = %shown, visits = store.visits.len(), "snapshot loaded");
        Ok(store)
    }

    /// Loads the snapshot when the file exists, otherwise starts empty.
    pub fn load_or_default(path: &Path) -> Result<Self, SnapshotError> {
        if path.exists() {
            Self::load_snapshot(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Writes the store as JSON through a temporary file and a rename.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        let shown = path.display().to_string();
        let json = serde_json::to_string_pretty(self).map_err(|source| SnapshotError::Json {
            path: shown.clone(),
            source,
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SnapshotError::Io {
                path: shown.clone(),
                source,
            })?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .and_then(|()| fs::rename(&tmp, path))
            .map_err(|source| SnapshotError::Io {
                path: shown.clone(),
                source,
            })?;
        info!(path = %shown, "snapshot saved");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn ids_come_from_one_sequence() {
        let mut store = BookingStore::default();
        assert_eq!(store.next_id(), 1);
        assert_eq!(store.next_id(), 2);
    }

    #[test]
    fn snapshot_round_trip_keeps_entities_and_sequence() {
        let mut fx = Fixture::resource_controlled(2, 1);
        let time = fx.add_time(10, 12);
        let visit = fx.make_visit(time);

        let dir = std::env::temp_dir().join(format!("campus-booking-store-{}", std::process::id()));
        let path = dir.join("state.json");
        fx.store.save_snapshot(&path).expect("saved");

        let mut loaded = BookingStore::load_snapshot(&path).expect("loaded");
        assert_eq!(loaded.visits[&visit], fx.store.visits[&visit]);
        assert_eq!(loaded.event_times.len(), fx.store.event_times.len());
        assert!(loaded.next_id() > visit.0);
        assert!(!loaded.search_products("laboratory").is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_snapshot_starts_empty_and_garbage_is_rejected() {
        let dir = std::env::temp_dir().join(format!("campus-booking-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("dir");
        let missing = dir.join("missing.json");
        let store = BookingStore::load_or_default(&missing).expect("empty store");
        assert!(store.visits.is_empty());

        let bad = dir.join("bad.json");
        std::fs::write(&bad, "{ not json").expect("write");
        let err = BookingStore::load_snapshot(&bad).expect_err("invalid");
        assert!(matches!(err, SnapshotError::Json { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }
}

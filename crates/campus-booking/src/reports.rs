use serde::Serialize;
use std::collections::BTreeMap;
use std::io;

use crate::ids::{EventTimeId, UnitId, VisitId};
use crate::organization;
use crate::scheduling::{ResourceStatus, Timestamp};
use crate::store::BookingStore;
use crate::visits::{Visit, WorkflowStatus};

/// Days counted as "recent" for held visits.
const RECENT_DAYS: i64 = 14;

#[derive(Debug, Clone, Serialize)]
pub struct StatusCount {
    pub status: WorkflowStatus,
    pub status_label: String,
    pub visits: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitOverview {
    pub unit: Option<UnitId>,
    pub status_counts: Vec<StatusCount>,
    pub needs_attention: Vec<VisitId>,
    pub today: Vec<VisitId>,
    pub recently_held: Vec<VisitId>,
    pub idle_host_roles: Vec<VisitId>,
    pub blocked_event_times: Vec<EventTimeId>,
}

#[derive(Debug, Serialize)]
struct VisitRow {
    id: u64,
    product: String,
    start: String,
    end: String,
    status: &'static str,
    resource_status: &'static str,
    bookings: usize,
    attendees: u32,
}

impl BookingStore {
    /// Whether the product behind `visit` belongs to `unit` or a unit below it.
    fn visit_in_unit(&self, visit: &Visit, unit: Option<UnitId>) -> bool {
        let Some(unit) = unit else {
            return true;
        };
        self.products
            .get(&visit.product)
            .is_some_and(|p| organization::is_within(&self.units, p.unit, unit))
    }

    fn visits_in_unit(&self, unit: Option<UnitId>) -> Vec<&Visit> {
        self.visits
            .values()
            .filter(|v| self.visit_in_unit(v, unit))
            .collect()
    }

    /// Dashboard figures for `unit` and everything below it. `None` covers all units.
    pub fn unit_overview(&self, unit: Option<UnitId>, now: Timestamp) -> UnitOverview {
        let visits = self.visits_in_unit(unit);
        let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
        for v in &visits {
            *counts.entry(v.workflow_status.code()).or_default() += 1;
        }
        let status_counts = WorkflowStatus::ordered()
            .into_iter()
            .map(|status| StatusCount {
                status,
                status_label: status.label().to_string(),
                visits: counts.get(&status.code()).copied().unwrap_or(0),
            })
            .collect();

        let mut needs_attention: Vec<(Timestamp, VisitId)> = visits
            .iter()
            .filter(|v| v.workflow_status.is_active())
            .filter_map(|v| v.needs_attention_since.map(|since| (since, v.id)))
            .collect();
        needs_attention.sort();

        let in_unit = |id: &VisitId| {
            self.visits
                .get(id)
                .is_some_and(|v| self.visit_in_unit(v, unit))
        };
        let today = self
            .visits_occurring_on(now.date_naive())
            .into_iter()
            .filter(|id| in_unit(id))
            .collect();
        let recently_held = self
            .recently_held(now, RECENT_DAYS)
            .into_iter()
            .filter(|id| in_unit(id))
            .collect();

        let idle_host_roles = visits
            .iter()
            .filter(|v| v.workflow_status.is_being_planned())
            .filter(|v| self.needs_hosts(v))
            .filter(|v| self.first_booking_at(v.id).is_some())
            .map(|v| v.id)
            .collect();

        let blocked_event_times = self
            .event_times
            .values()
            .filter(|t| t.resource_status == ResourceStatus::Blocked)
            .filter(|t| !t.ended_before(now))
            .filter(|t| {
                self.products.get(&t.product).is_some_and(|p| {
                    unit.map_or(true, |unit| organization::is_within(&self.units, p.unit, unit))
                })
            })
            .map(|t| t.id)
            .collect();

        UnitOverview {
            unit,
            status_counts,
            needs_attention: needs_attention.into_iter().map(|(_, id)| id).collect(),
            today,
            recently_held,
            idle_host_roles,
            blocked_event_times,
        }
    }

    /// Writes one CSV row per visit, ordered by start time.
    pub fn export_visits_csv<W: io::Write>(
        &self,
        writer: W,
        unit: Option<UnitId>,
    ) -> Result<usize, csv::Error> {
        let mut visits = self.visits_in_unit(unit);
        visits.sort_by_key(|v| {
            let start = self.visit_span(v.id).map(|span| span.start);
            (start.is_none(), start, v.id)
        });

        let mut csv = csv::Writer::from_writer(writer);
        for v in &visits {
            let time = v.any_event_time().and_then(|t| self.event_times.get(&t));
            let format = |ts: Option<Timestamp>| {
                ts.map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default()
            };
            let bookings = self
                .bookings_for_visit(v.id)
                .into_iter()
                .filter(|b| b.status.takes_seats())
                .count();
            csv.serialize(VisitRow {
                id: v.id.0,
                product: self
                    .products
                    .get(&v.product)
                    .map(|p| p.title.clone())
                    .unwrap_or_default(),
                start: format(time.and_then(|t| t.start)),
                end: format(time.and_then(|t| t.end)),
                status: v.workflow_status.label(),
                resource_status: time.map_or("", |t| t.resource_status.label()),
                bookings,
                attendees: self.visit_attendee_count(v.id),
            })?;
        }
        csv.flush()?;
        Ok(visits.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TimeMode;
    use crate::store::test_support::*;
    use crate::visits::GuestDraft;

    fn guest(attendees: u32) -> GuestDraft {
        GuestDraft {
            first_name: "Ada".into(),
            last_name: "Jensen".into(),
            email: "ada@school.example".into(),
            phone: String::new(),
            school: "Northside".into(),
            grade_level: String::new(),
            attendee_count: attendees,
            teacher_count: 0,
        }
    }

    #[test]
    fn overview_counts_statuses_and_lists_todays_visits() {
        let mut fx = Fixture::resource_controlled(1, 1);
        let blocked = fx.add_time(10, 12);
        let product = fx.add_product(TimeMode::SpecificTimes);
        fx.store.products.get_mut(&product).expect("product").needed_hosts = 1;
        let time = fx.add_time_for(product, 9, 10);
        let visit = fx.make_visit(time);
        fx.store.book(visit, guest(5), at(1)).expect("booked");

        // Occupy the only microscope so the other slot becomes blocked.
        let held = fx.add_time(11, 13);
        let holder = fx.make_visit(held);
        fx.store
            .assign_resource(holder, fx.pool_resources[0], fx.requirement, at(0))
            .expect("assigned");

        let overview = fx.store.unit_overview(Some(fx.unit), at(8));
        let being_planned = overview
            .status_counts
            .iter()
            .find(|c| c.status == WorkflowStatus::BeingPlanned)
            .expect("count");
        assert_eq!(being_planned.visits, 2);
        assert_eq!(overview.today.len(), 2);
        assert_eq!(overview.idle_host_roles, vec![visit]);
        assert_eq!(overview.blocked_event_times, vec![blocked]);
        assert_eq!(overview.needs_attention.len(), 2);
    }

    #[test]
    fn csv_export_lists_visits_by_start() {
        let mut fx = Fixture::resource_controlled(0, 0);
        let product = fx.add_product(TimeMode::SpecificTimes);
        let late = fx.add_time_for(product, 14, 15);
        let early = fx.add_time_for(product, 9, 10);
        let late_visit = fx.make_visit(late);
        let early_visit = fx.make_visit(early);
        fx.store.book(early_visit, guest(12), at(1)).expect("booked");

        let mut out = Vec::new();
        let rows = fx.store.export_visits_csv(&mut out, None).expect("exported");
        assert_eq!(rows, 2);
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "id,product,start,end,status,resource_status,bookings,attendees"
        );
        assert!(lines[1].starts_with(&format!("{},", early_visit.0)));
        assert!(lines[1].ends_with(",1,12"));
        assert!(lines[2].starts_with(&format!("{},", late_visit.0)));
    }
}

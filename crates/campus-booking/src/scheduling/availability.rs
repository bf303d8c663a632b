//! Keeps cached [`ResourceStatus`] values of event times in step with the
//! resources they depend on.
//!
//! Every change to a calendar, resource, pool, requirement, assignment or
//! visit can move other event times between available, blocked and assigned.
//! Changes therefore run through [`BookingStore::with_availability_update`],
//! which collects the event times the subject affects before and after the
//! change and recomputes each of them once.

use std::collections::BTreeSet;

use tracing::debug;

use super::event_time::ResourceStatus;
use super::intervals::Timestamp;
use crate::ids::{
    CalendarEventId, CalendarId, EventTimeId, PoolId, ProductId, RequirementId, ResourceId,
    VisitId, VisitResourceId,
};
use crate::resources::CalendarOwner;
use crate::store::BookingStore;

/// Entity whose change may alter the availability of event times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilitySubject {
    Calendar(CalendarId),
    CalendarEvent(CalendarEventId),
    Resource(ResourceId),
    ResourcePool(PoolId),
    ResourceRequirement(RequirementId),
    VisitResource(VisitResourceId),
    Visit(VisitId),
}

impl BookingStore {
    /// Status the event time should have given current assignments and free resources.
    pub fn compute_resource_status(&self, time: EventTimeId) -> Option<ResourceStatus> {
        let event_time = self.event_times.get(&time)?;
        let product = self.products.get(&event_time.product)?;
        if !product.is_resource_controlled() {
            return Some(ResourceStatus::Available);
        }

        let span = event_time.span();
        let mut fully_assigned = true;

        for req in self.requirements_for_product(product.id) {
            let assigned = event_time
                .visit
                .map(|visit| self.assigned_count(visit, req.id))
                .unwrap_or(0);
            if req.required_amount == assigned {
                continue;
            }
            fully_assigned = false;

            if let Some(span) = &span {
                let missing = i64::from(req.required_amount) - i64::from(assigned);
                if !self.requirement_has_free_resources_between(req.id, span, missing, &[]) {
                    return Some(ResourceStatus::Blocked);
                }
            }
        }

        Some(if fully_assigned {
            ResourceStatus::Assigned
        } else {
            ResourceStatus::Available
        })
    }

    /// Recomputes and stores the status. Returns the new status when it changed.
    pub fn update_availability(&mut self, time: EventTimeId) -> Option<ResourceStatus> {
        let status = self.compute_resource_status(time)?;
        let event_time = self.event_times.get_mut(&time)?;
        if event_time.resource_status == status {
            return None;
        }
        debug!(
            event_time = %time,
            from = event_time.resource_status.short_label(),
            to = status.short_label(),
            "resource status changed"
        );
        event_time.resource_status = status;
        Some(status)
    }

    fn times_of_products(&self, products: &BTreeSet<ProductId>) -> BTreeSet<EventTimeId> {
        self.event_times
            .values()
            .filter(|time| products.contains(&time.product))
            .map(|time| time.id)
            .collect()
    }

    /// Products with a requirement on any pool in `pools`.
    fn products_requiring(&self, pools: &BTreeSet<PoolId>) -> BTreeSet<ProductId> {
        self.requirements
            .values()
            .filter(|req| req.pool.is_some_and(|pool| pools.contains(&pool)))
            .map(|req| req.product)
            .collect()
    }

    /// Pools holding any of `resources`.
    fn pools_containing(&self, resources: &BTreeSet<ResourceId>) -> BTreeSet<PoolId> {
        self.pools
            .values()
            .filter(|pool| pool.resources.iter().any(|res| resources.contains(res)))
            .map(|pool| pool.id)
            .collect()
    }

    fn affected_by_resources(&self, resources: &BTreeSet<ResourceId>) -> BTreeSet<EventTimeId> {
        let pools = self.pools_containing(resources);
        self.times_of_products(&self.products_requiring(&pools))
    }

    fn affected_by_pool(&self, pool: PoolId) -> BTreeSet<EventTimeId> {
        let Some(p) = self.pools.get(&pool) else {
            return BTreeSet::new();
        };
        let mut pools = self.pools_containing(&p.resources);
        pools.insert(pool);
        self.times_of_products(&self.products_requiring(&pools))
    }

    /// Event times whose status may depend on `subject`.
    pub fn affected_event_times(&self, subject: AvailabilitySubject) -> BTreeSet<EventTimeId> {
        match subject {
            AvailabilitySubject::Resource(resource) => {
                if !self.resources.contains_key(&resource) {
                    return BTreeSet::new();
                }
                self.affected_by_resources(&BTreeSet::from([resource]))
            }
            AvailabilitySubject::Calendar(calendar) => match self.calendars.get(&calendar) {
                Some(cal) => match cal.owner {
                    CalendarOwner::Resource(resource) => {
                        self.affected_event_times(AvailabilitySubject::Resource(resource))
                    }
                    CalendarOwner::Product(product) => {
                        self.times_of_products(&BTreeSet::from([product]))
                    }
                },
                None => BTreeSet::new(),
            },
            AvailabilitySubject::CalendarEvent(event) => match self.calendar_events.get(&event) {
                Some(ev) => self.affected_event_times(AvailabilitySubject::Calendar(ev.calendar)),
                None => BTreeSet::new(),
            },
            AvailabilitySubject::ResourcePool(pool) => self.affected_by_pool(pool),
            AvailabilitySubject::ResourceRequirement(requirement) => {
                let Some(req) = self.requirements.get(&requirement) else {
                    return BTreeSet::new();
                };
                let mut times = self.times_of_products(&BTreeSet::from([req.product]));
                if let Some(pool) = req.pool {
                    times.extend(self.affected_by_pool(pool));
                }
                times
            }
            AvailabilitySubject::VisitResource(assignment) => {
                match self.visit_resources.get(&assignment) {
                    Some(vr) => self.affected_event_times(AvailabilitySubject::ResourceRequirement(
                        vr.requirement,
                    )),
                    None => BTreeSet::new(),
                }
            }
            AvailabilitySubject::Visit(visit) => {
                let Some(v) = self.visits.get(&visit) else {
                    return BTreeSet::new();
                };
                let held: BTreeSet<ResourceId> = self
                    .resources
                    .keys()
                    .copied()
                    .filter(|res| self.resource_linked_to_visit(*res, visit))
                    .collect();
                let mut times = self.affected_by_resources(&held);
                times.extend(v.event_time);
                times.extend(v.cancelled_event_time);
                times
            }
        }
    }

    /// Recomputes `times`, skipping those that already ended before `now`.
    pub fn recompute_event_times(
        &mut self,
        times: impl IntoIterator<Item = EventTimeId>,
        now: Timestamp,
    ) -> usize {
        let mut changed = 0;
        for time in times {
            let ended = self
                .event_times
                .get(&time)
                .is_some_and(|t| t.ended_before(now));
            if ended {
                continue;
            }
            if self.update_availability(time).is_some() {
                changed += 1;
            }
        }
        changed
    }

    /// Applies `change` and then recomputes every event time affected by
    /// `subject` before or after it. Deleting the subject leaves only the
    /// before-set, which is what must be recomputed.
    pub fn with_availability_update<R, E>(
        &mut self,
        subject: AvailabilitySubject,
        now: Timestamp,
        change: impl FnOnce(&mut Self) -> Result<R, E>,
    ) -> Result<R, E> {
        let mut affected = self.affected_event_times(subject);
        let result = change(self)?;
        affected.extend(self.affected_event_times(subject));
        let changed = self.recompute_event_times(affected, now);
        debug!(?subject, changed, "availability recomputed");
        Ok(result)
    }

    /// Rechecks event times of products that use `pools` after a resource changed.
    ///
    /// A restrictive change can only block times that were available or
    /// assigned. A permissive change can only release blocked or assigned times.
    pub fn update_eventtimes_on_resource_change(
        &mut self,
        pools: &BTreeSet<PoolId>,
        restrictive: bool,
        now: Timestamp,
    ) -> usize {
        let candidates: Vec<EventTimeId> = self
            .times_of_products(&self.products_requiring(pools))
            .into_iter()
            .filter(|id| {
                self.event_times.get(id).is_some_and(|time| {
                    if restrictive {
                        time.resource_status != ResourceStatus::Blocked
                    } else {
                        time.resource_status != ResourceStatus::Available
                    }
                })
            })
            .collect();
        self.recompute_event_times(candidates, now)
    }

    /// Upcoming event times whose cached status no longer matches a fresh computation.
    pub fn stale_event_times(&self, now: Timestamp) -> Vec<EventTimeId> {
        self.event_times
            .values()
            .filter(|time| !time.ended_before(now))
            .filter(|time| {
                self.compute_resource_status(time.id)
                    .is_some_and(|status| status != time.resource_status)
            })
            .map(|time| time.id)
            .collect()
    }
}

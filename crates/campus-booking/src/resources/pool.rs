use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::{
    CalendarId, EventTimeId, PoolId, ProductId, RequirementId, ResourceId, RoomId, UnitId, UserId,
    VisitId, VisitResourceId,
};
use crate::scheduling::intervals::Span;
use crate::store::BookingStore;
use crate::visits::WorkflowStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Item,
    Vehicle,
    Teacher,
    Room,
    Host,
    Custom,
}

impl ResourceKind {
    pub const fn code(self) -> u8 {
        match self {
            ResourceKind::Item => 1,
            ResourceKind::Vehicle => 2,
            ResourceKind::Teacher => 3,
            ResourceKind::Room => 4,
            ResourceKind::Host => 5,
            ResourceKind::Custom => 6,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            ResourceKind::Item => "Item",
            ResourceKind::Vehicle => "Vehicle",
            ResourceKind::Teacher => "Teacher",
            ResourceKind::Room => "Room",
            ResourceKind::Host => "Host",
            ResourceKind::Custom => "Custom",
        }
    }

    pub const fn plural(self) -> &'static str {
        match self {
            ResourceKind::Item => "Items",
            ResourceKind::Vehicle => "Vehicles",
            ResourceKind::Teacher => "Teachers",
            ResourceKind::Room => "Rooms",
            ResourceKind::Host => "Hosts",
            ResourceKind::Custom => "Custom resources",
        }
    }

    pub const fn ordered() -> [ResourceKind; 6] {
        [
            ResourceKind::Item,
            ResourceKind::Vehicle,
            ResourceKind::Teacher,
            ResourceKind::Room,
            ResourceKind::Host,
            ResourceKind::Custom,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub unit: Option<UnitId>,
}

/// A bookable asset. Teacher and host resources wrap a user, room resources wrap a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub unit: UnitId,
    pub name: String,
    pub user: Option<UserId>,
    pub room: Option<RoomId>,
    pub calendar: Option<CalendarId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePool {
    pub id: PoolId,
    pub kind: ResourceKind,
    pub name: String,
    pub unit: UnitId,
    pub resources: BTreeSet<ResourceId>,
}

/// A product needs `required_amount` resources out of `pool` per visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub id: RequirementId,
    pub product: ProductId,
    pub pool: Option<PoolId>,
    pub required_amount: u32,
    #[serde(default)]
    pub being_deleted: bool,
}

/// A concrete resource assigned to a visit to fulfil a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitResource {
    pub id: VisitResourceId,
    pub visit: VisitId,
    pub resource: ResourceId,
    pub requirement: RequirementId,
}

impl BookingStore {
    /// Whether `visit` holds `resource`, through an assignment or through the
    /// visit's hosts, teachers or rooms.
    pub fn resource_linked_to_visit(&self, resource: ResourceId, visit: VisitId) -> bool {
        let Some(res) = self.resources.get(&resource) else {
            return false;
        };
        let Some(v) = self.visits.get(&visit) else {
            return false;
        };

        let assigned = self
            .visit_resources
            .values()
            .any(|vr| vr.visit == visit && vr.resource == resource);
        if assigned {
            return true;
        }

        match res.kind {
            ResourceKind::Teacher => res.user.is_some_and(|user| v.teachers.contains(&user)),
            ResourceKind::Host => res.user.is_some_and(|user| v.hosts.contains(&user)),
            ResourceKind::Room => res.room.is_some_and(|room| v.rooms.contains(&room)),
            _ => false,
        }
    }

    /// Event times occupying `resource`, optionally limited to those overlapping `span`.
    /// Times of cancelled visits and times without both ends never occupy anything.
    pub fn occupied_event_times(
        &self,
        resource: ResourceId,
        span: Option<&Span>,
    ) -> Vec<EventTimeId> {
        self.event_times
            .values()
            .filter(|time| {
                let Some(visit_id) = time.visit else {
                    return false;
                };
                let Some(time_span) = time.span() else {
                    return false;
                };
                if span.is_some_and(|query| !time_span.overlaps(query)) {
                    return false;
                }
                let active = self
                    .visits
                    .get(&visit_id)
                    .is_some_and(|v| v.workflow_status != WorkflowStatus::Cancelled);
                active && self.resource_linked_to_visit(resource, visit_id)
            })
            .map(|time| time.id)
            .collect()
    }

    /// Resources with a calendar defer to it. Others are free unless an event
    /// time of a visit outside `exclude` occupies them.
    pub fn resource_is_available_between(
        &self,
        resource: ResourceId,
        span: &Span,
        exclude: &[VisitId],
    ) -> bool {
        let Some(res) = self.resources.get(&resource) else {
            return false;
        };
        if let Some(calendar) = res.calendar {
            if self.calendars.contains_key(&calendar) {
                return self.calendar_is_available_between(calendar, span, exclude);
            }
        }

        self.occupied_event_times(resource, Some(span))
            .into_iter()
            .filter_map(|id| self.event_times.get(&id).and_then(|time| time.visit))
            .all(|visit| exclude.contains(&visit))
    }

    pub fn pool_available_resources_between(
        &self,
        pool: PoolId,
        span: &Span,
        exclude: &[VisitId],
    ) -> Vec<ResourceId> {
        self.pools
            .get(&pool)
            .map(|p| {
                p.resources
                    .iter()
                    .copied()
                    .filter(|id| self.resource_is_available_between(*id, span, exclude))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn requirement_has_free_resources_between(
        &self,
        requirement: RequirementId,
        span: &Span,
        amount: i64,
        exclude: &[VisitId],
    ) -> bool {
        let Some(pool) = self
            .requirements
            .get(&requirement)
            .and_then(|req| req.pool)
        else {
            return false;
        };
        if amount <= 0 {
            return true;
        }
        self.pool_available_resources_between(pool, span, exclude).len() as i64 >= amount
    }

    pub fn assigned_count(&self, visit: VisitId, requirement: RequirementId) -> u32 {
        self.visit_resources
            .values()
            .filter(|vr| vr.visit == visit && vr.requirement == requirement)
            .count() as u32
    }

    pub fn requirement_is_fulfilled_for(&self, requirement: RequirementId, visit: VisitId) -> bool {
        match self.requirements.get(&requirement) {
            Some(req) if req.pool.is_some() => {
                self.assigned_count(visit, requirement) >= req.required_amount
            }
            _ => false,
        }
    }

    pub fn requirements_for_product(&self, product: ProductId) -> Vec<&ResourceRequirement> {
        self.requirements
            .values()
            .filter(|req| req.product == product)
            .collect()
    }

    /// Copies a requirement onto another product, keeping pool and amount.
    pub fn clone_requirement_to_product(
        &mut self,
        requirement: RequirementId,
        product: ProductId,
    ) -> Option<RequirementId> {
        let source = self.requirements.get(&requirement)?.clone();
        let id = RequirementId(self.next_id());
        self.requirements.insert(
            id,
            ResourceRequirement {
                id,
                product,
                pool: source.pool,
                required_amount: source.required_amount,
                being_deleted: false,
            },
        );
        Some(id)
    }

    /// The teacher or host resource wrapping `user`, if one exists.
    pub fn user_resource(&self, user: UserId, kind: ResourceKind) -> Option<ResourceId> {
        self.resources
            .values()
            .find(|res| res.kind == kind && res.user == Some(user))
            .map(|res| res.id)
    }
}

#[cfg(test)]
mod tests {
    use crate::scheduling::intervals::Span;
    use crate::store::test_support::*;
    use crate::visits::WorkflowStatus;

    #[test]
    fn cancelled_visits_do_not_occupy_resources() {
        let mut fx = Fixture::resource_controlled(2, 1);
        let time = fx.add_time(10, 12);
        let visit = fx.make_visit(time);
        let room = fx.pool_resources[0];
        fx.store.assign_resource(visit, room, fx.requirement, at(0)).expect("assigned");
        let span = Span::new(at(9), at(11));
        assert_eq!(fx.store.occupied_event_times(room, Some(&span)), vec![time]);

        fx.store
            .visits
            .get_mut(&visit)
            .expect("visit")
            .workflow_status = WorkflowStatus::Cancelled;
        assert!(fx.store.occupied_event_times(room, Some(&span)).is_empty());
    }

    #[test]
    fn requirement_without_pool_has_no_free_resources() {
        let mut fx = Fixture::resource_controlled(1, 1);
        fx.store
            .requirements
            .get_mut(&fx.requirement)
            .expect("requirement")
            .pool = None;
        let span = Span::new(at(9), at(10));
        assert!(!fx
            .store
            .requirement_has_free_resources_between(fx.requirement, &span, 1, &[]));
    }

    #[test]
    fn zero_amount_is_always_satisfiable() {
        let fx = Fixture::resource_controlled(1, 1);
        let span = Span::new(at(9), at(10));
        assert!(fx
            .store
            .requirement_has_free_resources_between(fx.requirement, &span, 0, &[]));
    }

    #[test]
    fn occupied_resources_are_excluded_from_the_pool() {
        let mut fx = Fixture::resource_controlled(2, 1);
        let first = fx.add_time(10, 12);
        let visit = fx.make_visit(first);
        let room = fx.pool_resources[0];
        fx.store.assign_resource(visit, room, fx.requirement, at(0)).expect("assigned");

        let span = Span::new(at(11), at(13));
        let free = fx
            .store
            .pool_available_resources_between(fx.pool, &span, &[]);
        assert_eq!(free, vec![fx.pool_resources[1]]);
        let free = fx
            .store
            .pool_available_resources_between(fx.pool, &span, &[visit]);
        assert_eq!(free.len(), 2);
    }

    #[test]
    fn cloned_requirement_keeps_pool_and_amount() {
        let mut fx = Fixture::resource_controlled(2, 2);
        let other = fx.add_product(crate::catalog::TimeMode::ResourceControlled);
        let cloned = fx
            .store
            .clone_requirement_to_product(fx.requirement, other)
            .expect("cloned");
        let req = &fx.store.requirements[&cloned];
        assert_eq!(req.product, other);
        assert_eq!(req.pool, Some(fx.pool));
        assert_eq!(req.required_amount, 2);
    }
}

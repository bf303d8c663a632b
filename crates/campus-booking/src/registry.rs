//! Creating, changing and removing the entities editors maintain: units,
//! users, products, rooms, resources, pools, requirements, calendars and
//! event times. Changes that can move availability run through
//! [`BookingStore::with_availability_update`].

use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::info;

use crate::audit::{LogAction, LogSubject};
use crate::catalog::{Product, ProductDraft};
use crate::ids::{
    CalendarEventId, CalendarId, EventTimeId, PoolId, ProductId, RequirementId, ResourceId, RoomId,
    UnitId, UserId,
};
use crate::organization::{OrganizationalUnit, UnitKind};
use crate::profile::{UserProfile, UserRole};
use crate::resources::{
    Calendar, CalendarEvent, CalendarEventDraft, CalendarOwner, Resource, ResourceKind,
    ResourcePool, ResourceRequirement, Room,
};
use crate::scheduling::{
    parse_human_readable_interval, AvailabilitySubject, EventTime, EventTimeDraft, Timestamp,
};
use crate::service::BookingError;
use crate::store::BookingStore;

#[derive(Debug, Clone, Deserialize)]
pub struct UnitDraft {
    pub name: String,
    pub kind: UnitKind,
    #[serde(default)]
    pub parent: Option<UnitId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserDraft {
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub role: UserRole,
    #[serde(default)]
    pub unit: Option<UnitId>,
    #[serde(default)]
    pub availability_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomDraft {
    pub name: String,
    #[serde(default)]
    pub unit: Option<UnitId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDraft {
    pub kind: ResourceKind,
    pub unit: UnitId,
    pub name: String,
    #[serde(default)]
    pub user: Option<UserId>,
    #[serde(default)]
    pub room: Option<RoomId>,
    /// Give the resource its own calendar. It is then only free inside
    /// available calendar events.
    #[serde(default)]
    pub with_calendar: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolDraft {
    pub kind: ResourceKind,
    pub name: String,
    pub unit: UnitId,
    #[serde(default)]
    pub resources: BTreeSet<ResourceId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequirementDraft {
    pub pool: PoolId,
    pub required_amount: u32,
}

impl BookingStore {
    fn require_unit(&self, unit: UnitId) -> Result<&OrganizationalUnit, BookingError> {
        self.units
            .get(&unit)
            .ok_or(BookingError::not_found("unit", unit.0))
    }

    pub fn product(&self, product: ProductId) -> Result<&Product, BookingError> {
        self.products
            .get(&product)
            .ok_or(BookingError::not_found("product", product.0))
    }

    pub fn add_unit(&mut self, draft: UnitDraft) -> Result<UnitId, BookingError> {
        if draft.name.trim().is_empty() {
            return Err(BookingError::Invalid("unit name is required".to_string()));
        }
        if let Some(parent) = draft.parent {
            self.require_unit(parent)?;
        }
        let id = UnitId(self.next_id());
        self.units.insert(
            id,
            OrganizationalUnit {
                id,
                name: draft.name,
                kind: draft.kind,
                parent: draft.parent,
            },
        );
        Ok(id)
    }

    pub fn add_user(&mut self, draft: UserDraft, now: Timestamp) -> Result<UserId, BookingError> {
        if self.users.values().any(|u| u.username == draft.username) {
            return Err(BookingError::Conflict(format!(
                "username '{}' is taken",
                draft.username
            )));
        }
        if let Some(unit) = draft.unit {
            self.require_unit(unit)?;
        }
        let id = UserId(self.next_id());
        self.users.insert(
            id,
            UserProfile {
                id,
                username: draft.username,
                full_name: draft.full_name,
                email: draft.email,
                role: draft.role,
                unit: draft.unit,
                availability_text: draft.availability_text,
            },
        );
        self.log_action(None, LogSubject::User(id), LogAction::Create, "User created", now);
        Ok(id)
    }

    pub fn set_user_role(&mut self, user: UserId, role: UserRole, now: Timestamp) -> Result<(), BookingError> {
        let profile = self
            .users
            .get_mut(&user)
            .ok_or(BookingError::not_found("user", user.0))?;
        let from = profile.role;
        profile.role = role;
        self.log_action(
            None,
            LogSubject::User(user),
            LogAction::Change,
            format!("Role changed from {} to {}", from.label(), role.label()),
            now,
        );
        Ok(())
    }

    fn validate_product(&self, draft: &ProductDraft) -> Result<(), BookingError> {
        if draft.title.trim().is_empty() {
            return Err(BookingError::Invalid("product title is required".to_string()));
        }
        self.require_unit(draft.unit)?;
        if let Some(max) = draft.maximum_visitors {
            if max < draft.minimum_visitors {
                return Err(BookingError::Invalid(
                    "maximum visitors is below the minimum".to_string(),
                ));
            }
        }
        for room in &draft.rooms {
            if !self.rooms.contains_key(room) {
                return Err(BookingError::not_found("room", room.0));
            }
        }
        Ok(())
    }

    pub fn create_product(
        &mut self,
        draft: ProductDraft,
        actor: Option<UserId>,
        now: Timestamp,
    ) -> Result<ProductId, BookingError> {
        self.validate_product(&draft)?;
        let id = ProductId(self.next_id());
        let title = draft.title.clone();
        self.products.insert(id, draft.into_product(id, None));
        self.enable_default_autosends(id);
        self.refresh_product_search(id);
        self.log_action(actor, LogSubject::Product(id), LogAction::Create, "Product created", now);
        info!(product = %id, title = %title, "product created");
        Ok(id)
    }

    /// Replaces the editable fields and recomputes the product's event times.
    pub fn update_product(
        &mut self,
        product: ProductId,
        draft: ProductDraft,
        actor: Option<UserId>,
        now: Timestamp,
    ) -> Result<(), BookingError> {
        self.validate_product(&draft)?;
        let calendar = self.product(product)?.calendar;
        self.products.insert(product, draft.into_product(product, calendar));
        let times: Vec<EventTimeId> = self
            .event_times
            .values()
            .filter(|t| t.product == product)
            .map(|t| t.id)
            .collect();
        self.recompute_event_times(times, now);
        self.refresh_product_search(product);
        self.log_action(actor, LogSubject::Product(product), LogAction::Change, "Product changed", now);
        Ok(())
    }

    pub fn add_room(&mut self, draft: RoomDraft) -> Result<RoomId, BookingError> {
        if let Some(unit) = draft.unit {
            self.require_unit(unit)?;
        }
        let id = RoomId(self.next_id());
        self.rooms.insert(
            id,
            Room {
                id,
                name: draft.name,
                unit: draft.unit,
            },
        );
        Ok(id)
    }

    pub fn add_resource(&mut self, draft: ResourceDraft, now: Timestamp) -> Result<ResourceId, BookingError> {
        self.require_unit(draft.unit)?;
        match draft.kind {
            ResourceKind::Teacher | ResourceKind::Host => {
                let user = draft.user.ok_or_else(|| {
                    BookingError::Invalid(format!("{} resources need a user", draft.kind.label()))
                })?;
                if !self.users.contains_key(&user) {
                    return Err(BookingError::not_found("user", user.0));
                }
            }
            ResourceKind::Room => {
                let room = draft
                    .room
                    .ok_or_else(|| BookingError::Invalid("room resources need a room".to_string()))?;
                if !self.rooms.contains_key(&room) {
                    return Err(BookingError::not_found("room", room.0));
                }
            }
            _ => {}
        }

        let id = ResourceId(self.next_id());
        self.resources.insert(
            id,
            Resource {
                id,
                kind: draft.kind,
                unit: draft.unit,
                name: draft.name,
                user: draft.user,
                room: draft.room,
                calendar: None,
            },
        );
        if draft.with_calendar {
            self.attach_calendar(CalendarOwner::Resource(id), now)?;
        }
        self.log_action(None, LogSubject::Resource(id), LogAction::Create, "Resource created", now);
        Ok(id)
    }

    /// Removes the resource from every pool and visit.
    pub fn delete_resource(&mut self, resource: ResourceId, now: Timestamp) -> Result<(), BookingError> {
        if !self.resources.contains_key(&resource) {
            return Err(BookingError::not_found("resource", resource.0));
        }
        self.with_availability_update(AvailabilitySubject::Resource(resource), now, |store| {
            for pool in store.pools.values_mut() {
                pool.resources.remove(&resource);
            }
            store.visit_resources.retain(|_, vr| vr.resource != resource);
            if let Some(res) = store.resources.remove(&resource) {
                if let Some(calendar) = res.calendar {
                    store.calendars.remove(&calendar);
                    store.calendar_events.retain(|_, ev| ev.calendar != calendar);
                }
            }
            Ok::<_, BookingError>(())
        })?;
        self.log_action(None, LogSubject::Resource(resource), LogAction::Delete, "Resource deleted", now);
        Ok(())
    }

    pub fn add_pool(&mut self, draft: PoolDraft, now: Timestamp) -> Result<PoolId, BookingError> {
        self.require_unit(draft.unit)?;
        let id = PoolId(self.next_id());
        self.pools.insert(
            id,
            ResourcePool {
                id,
                kind: draft.kind,
                name: draft.name,
                unit: draft.unit,
                resources: BTreeSet::new(),
            },
        );
        for resource in draft.resources {
            self.add_pool_member(id, resource, now)?;
        }
        Ok(id)
    }

    pub fn add_pool_member(
        &mut self,
        pool: PoolId,
        resource: ResourceId,
        now: Timestamp,
    ) -> Result<(), BookingError> {
        let p = self
            .pools
            .get(&pool)
            .ok_or(BookingError::not_found("pool", pool.0))?;
        let res = self
            .resources
            .get(&resource)
            .ok_or(BookingError::not_found("resource", resource.0))?;
        if res.kind != p.kind {
            return Err(BookingError::Invalid(format!(
                "{} resource cannot join a {} pool",
                res.kind.label(),
                p.kind.label()
            )));
        }
        if let Some(p) = self.pools.get_mut(&pool) {
            p.resources.insert(resource);
        }
        self.update_eventtimes_on_resource_change(&BTreeSet::from([pool]), false, now);
        Ok(())
    }

    pub fn remove_pool_member(
        &mut self,
        pool: PoolId,
        resource: ResourceId,
        now: Timestamp,
    ) -> Result<(), BookingError> {
        let p = self
            .pools
            .get_mut(&pool)
            .ok_or(BookingError::not_found("pool", pool.0))?;
        if !p.resources.remove(&resource) {
            return Err(BookingError::not_found("pool member", resource.0));
        }
        self.update_eventtimes_on_resource_change(&BTreeSet::from([pool]), true, now);
        Ok(())
    }

    pub fn add_requirement(
        &mut self,
        product: ProductId,
        draft: RequirementDraft,
        now: Timestamp,
    ) -> Result<RequirementId, BookingError> {
        self.product(product)?;
        if !self.pools.contains_key(&draft.pool) {
            return Err(BookingError::not_found("pool", draft.pool.0));
        }
        if draft.required_amount == 0 {
            return Err(BookingError::Invalid(
                "a requirement needs at least one resource".to_string(),
            ));
        }
        let id = RequirementId(self.next_id());
        self.with_availability_update(AvailabilitySubject::ResourceRequirement(id), now, |store| {
            store.requirements.insert(
                id,
                ResourceRequirement {
                    id,
                    product,
                    pool: Some(draft.pool),
                    required_amount: draft.required_amount,
                    being_deleted: false,
                },
            );
            Ok::<_, BookingError>(())
        })?;
        Ok(id)
    }

    /// Marks the requirement as being deleted, drops its assignments and
    /// recomputes what it affected.
    pub fn delete_requirement(&mut self, requirement: RequirementId, now: Timestamp) -> Result<(), BookingError> {
        let req = self
            .requirements
            .get_mut(&requirement)
            .ok_or(BookingError::not_found("requirement", requirement.0))?;
        req.being_deleted = true;
        self.with_availability_update(
            AvailabilitySubject::ResourceRequirement(requirement),
            now,
            |store| {
                store.visit_resources.retain(|_, vr| vr.requirement != requirement);
                store.requirements.remove(&requirement);
                Ok::<_, BookingError>(())
            },
        )
    }

    /// Gives a resource or product its own calendar.
    pub fn attach_calendar(&mut self, owner: CalendarOwner, now: Timestamp) -> Result<CalendarId, BookingError> {
        let existing = match owner {
            CalendarOwner::Resource(resource) => {
                self.resources
                    .get(&resource)
                    .ok_or(BookingError::not_found("resource", resource.0))?
                    .calendar
            }
            CalendarOwner::Product(product) => self.product(product)?.calendar,
        };
        if let Some(calendar) = existing {
            return Ok(calendar);
        }

        let id = CalendarId(self.next_id());
        self.with_availability_update(AvailabilitySubject::Calendar(id), now, |store| {
            store.calendars.insert(id, Calendar { id, owner });
            match owner {
                CalendarOwner::Resource(resource) => {
                    if let Some(res) = store.resources.get_mut(&resource) {
                        res.calendar = Some(id);
                    }
                }
                CalendarOwner::Product(product) => {
                    if let Some(p) = store.products.get_mut(&product) {
                        p.calendar = Some(id);
                    }
                }
            }
            Ok::<_, BookingError>(())
        })?;
        Ok(id)
    }

    pub fn add_calendar_event(
        &mut self,
        calendar: CalendarId,
        draft: CalendarEventDraft,
        now: Timestamp,
    ) -> Result<CalendarEventId, BookingError> {
        if !self.calendars.contains_key(&calendar) {
            return Err(BookingError::not_found("calendar", calendar.0));
        }
        if draft.end <= draft.start {
            return Err(BookingError::Invalid(
                "calendar events must end after they start".to_string(),
            ));
        }
        if draft.recurrence.as_ref().is_some_and(|r| r.interval == 0) {
            return Err(BookingError::Invalid(
                "recurrence interval must be at least 1".to_string(),
            ));
        }
        let id = CalendarEventId(self.next_id());
        self.with_availability_update(AvailabilitySubject::Calendar(calendar), now, |store| {
            store.calendar_events.insert(
                id,
                CalendarEvent {
                    id,
                    calendar,
                    title: draft.title,
                    availability: draft.availability,
                    start: draft.start,
                    end: draft.end,
                    recurrence: draft.recurrence,
                },
            );
            Ok::<_, BookingError>(())
        })?;
        Ok(id)
    }

    pub fn delete_calendar_event(&mut self, event: CalendarEventId, now: Timestamp) -> Result<(), BookingError> {
        if !self.calendar_events.contains_key(&event) {
            return Err(BookingError::not_found("calendar event", event.0));
        }
        self.with_availability_update(AvailabilitySubject::CalendarEvent(event), now, |store| {
            store.calendar_events.remove(&event);
            Ok::<_, BookingError>(())
        })
    }

    /// Adds a candidate time to the product. The interval text, when given,
    /// takes precedence over `start` and `end`.
    pub fn add_event_time(
        &mut self,
        product: ProductId,
        draft: EventTimeDraft,
        now: Timestamp,
    ) -> Result<EventTimeId, BookingError> {
        let duration = self.product(product)?.duration_minutes;
        let (start, end) = match draft.interval.as_deref() {
            Some(text) => {
                let span = parse_human_readable_interval(text).ok_or_else(|| {
                    BookingError::Invalid(format!("cannot read the interval '{text}'"))
                })?;
                (Some(span.start), Some(span.end))
            }
            None => (draft.start, draft.end),
        };
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                return Err(BookingError::Invalid(
                    "event times must not end before they start".to_string(),
                ));
            }
        }

        let id = EventTimeId(self.next_id());
        let mut time = EventTime::new(id, product);
        time.start = start;
        time.end = end;
        time.bookable = draft.bookable;
        time.notes = draft.notes;
        time.set_calculated_end_time(duration);
        time.has_specific_time = time.calculated_has_specific_time();
        self.event_times.insert(id, time);
        self.update_availability(id);
        self.log_action(
            None,
            LogSubject::Product(product),
            LogAction::Change,
            format!("Event time {id} added"),
            now,
        );
        Ok(id)
    }

    pub fn delete_event_time(&mut self, time: EventTimeId, now: Timestamp) -> Result<(), BookingError> {
        let event_time = self
            .event_times
            .get(&time)
            .ok_or(BookingError::not_found("event time", time.0))?;
        if !event_time.can_be_deleted() {
            return Err(BookingError::Conflict(format!(
                "event time {time} has a visit"
            )));
        }
        let product = event_time.product;
        self.event_times.remove(&time);
        self.log_action(
            None,
            LogSubject::Product(product),
            LogAction::Change,
            format!("Event time {time} removed"),
            now,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TimeMode;
    use crate::resources::CalendarAvailability;
    use crate::scheduling::ResourceStatus;
    use crate::store::test_support::*;

    #[test]
    fn units_need_an_existing_parent() {
        let mut store = BookingStore::default();
        let err = store
            .add_unit(UnitDraft {
                name: "Chemistry".into(),
                kind: UnitKind::Institute,
                parent: Some(UnitId(99)),
            })
            .expect_err("dangling parent");
        assert!(matches!(err, BookingError::NotFound { entity: "unit", id: 99 }));
    }

    #[test]
    fn usernames_are_unique() {
        let mut fx = Fixture::resource_controlled(0, 0);
        let draft = UserDraft {
            username: "admin".into(),
            full_name: "Second Admin".into(),
            email: "second@uni.example".into(),
            role: UserRole::Administrator,
            unit: None,
            availability_text: String::new(),
        };
        assert!(matches!(
            fx.store.add_user(draft, at(0)),
            Err(BookingError::Conflict(_))
        ));
    }

    #[test]
    fn pools_only_accept_resources_of_their_kind() {
        let mut fx = Fixture::resource_controlled(1, 1);
        let room = fx.add_room("Auditorium");
        let room_resource = fx
            .store
            .add_resource(
                ResourceDraft {
                    kind: ResourceKind::Room,
                    unit: fx.unit,
                    name: "Auditorium".into(),
                    user: None,
                    room: Some(room),
                    with_calendar: false,
                },
                at(0),
            )
            .expect("resource");
        let err = fx
            .store
            .add_pool_member(fx.pool, room_resource, at(0))
            .expect_err("wrong kind");
        assert!(matches!(err, BookingError::Invalid(_)));
    }

    #[test]
    fn pool_membership_changes_move_availability() {
        let mut fx = Fixture::resource_controlled(1, 2);
        let time = fx.add_time(10, 12);
        assert_eq!(fx.store.event_times[&time].resource_status, ResourceStatus::Blocked);

        let extra = fx
            .store
            .add_resource(
                ResourceDraft {
                    kind: ResourceKind::Item,
                    unit: fx.unit,
                    name: "Microscope extra".into(),
                    user: None,
                    room: None,
                    with_calendar: false,
                },
                at(0),
            )
            .expect("resource");
        fx.store.add_pool_member(fx.pool, extra, at(0)).expect("joined");
        assert_eq!(fx.store.event_times[&time].resource_status, ResourceStatus::Available);

        fx.store.remove_pool_member(fx.pool, extra, at(0)).expect("left");
        assert_eq!(fx.store.event_times[&time].resource_status, ResourceStatus::Blocked);
    }

    #[test]
    fn resource_calendars_restrict_availability_to_open_events() {
        let mut fx = Fixture::resource_controlled(1, 1);
        let time = fx.add_time(10, 12);
        let resource = fx.pool_resources[0];
        let calendar = fx
            .store
            .attach_calendar(CalendarOwner::Resource(resource), at(0))
            .expect("calendar");
        assert_eq!(fx.store.event_times[&time].resource_status, ResourceStatus::Blocked);

        let event = fx
            .store
            .add_calendar_event(
                calendar,
                CalendarEventDraft {
                    title: "Lab open".into(),
                    availability: CalendarAvailability::Available,
                    start: at(8),
                    end: at(16),
                    recurrence: None,
                },
                at(0),
            )
            .expect("event");
        assert_eq!(fx.store.event_times[&time].resource_status, ResourceStatus::Available);

        fx.store.delete_calendar_event(event, at(0)).expect("deleted");
        assert_eq!(fx.store.event_times[&time].resource_status, ResourceStatus::Blocked);
    }

    #[test]
    fn deleting_a_requirement_releases_the_product() {
        let mut fx = Fixture::resource_controlled(0, 1);
        let time = fx.add_time(10, 12);
        assert_eq!(fx.store.event_times[&time].resource_status, ResourceStatus::Blocked);
        fx.store.delete_requirement(fx.requirement, at(0)).expect("deleted");
        assert!(fx.store.requirements.is_empty());
        assert_eq!(fx.store.event_times[&time].resource_status, ResourceStatus::Assigned);
    }

    #[test]
    fn event_times_accept_interval_text_and_fill_the_end() {
        let mut fx = Fixture::resource_controlled(0, 0);
        let product = fx.add_product(TimeMode::SpecificTimes);
        let from_text = fx
            .store
            .add_event_time(
                product,
                EventTimeDraft {
                    interval: Some("05.03.2030 09:00 - 11:30".into()),
                    bookable: true,
                    ..EventTimeDraft::default()
                },
                at(0),
            )
            .expect("parsed");
        assert_eq!(fx.store.event_times[&from_text].duration_in_minutes(), 150);

        let open_ended = fx
            .store
            .add_event_time(
                product,
                EventTimeDraft {
                    start: Some(at(9)),
                    bookable: true,
                    ..EventTimeDraft::default()
                },
                at(0),
            )
            .expect("created");
        assert_eq!(fx.store.event_times[&open_ended].end, Some(at(11)));

        let bad = fx.store.add_event_time(
            product,
            EventTimeDraft {
                interval: Some("sometime soon".into()),
                ..EventTimeDraft::default()
            },
            at(0),
        );
        assert!(matches!(bad, Err(BookingError::Invalid(_))));
    }

    #[test]
    fn event_times_with_visits_cannot_be_deleted() {
        let mut fx = Fixture::resource_controlled(0, 0);
        let product = fx.add_product(TimeMode::SpecificTimes);
        let time = fx.add_time_for(product, 10, 12);
        fx.make_visit(time);
        assert!(matches!(
            fx.store.delete_event_time(time, at(0)),
            Err(BookingError::Conflict(_))
        ));
    }
}

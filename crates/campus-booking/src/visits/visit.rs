use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

use super::status::WorkflowStatus;
use crate::audit::{LogAction, LogSubject};
use crate::catalog::TimeMode;
use crate::ids::{
    EventTimeId, ProductId, RequirementId, ResourceId, RoomId, UserId, VisitId, VisitResourceId,
};
use crate::notifications::template::TemplateKind;
use crate::notifications::Recipient;
use crate::profile::UserRole;
use crate::resources::{ResourceKind, VisitResource};
use crate::scheduling::{AvailabilitySubject, Span, Timestamp};
use crate::service::BookingError;
use crate::store::BookingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    NotNeeded,
    NeedsRooms,
    Ok,
}

impl RoomStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RoomStatus::NotNeeded => "Rooms not needed",
            RoomStatus::NeedsRooms => "Rooms missing",
            RoomStatus::Ok => "Rooms assigned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub id: VisitId,
    pub product: ProductId,
    pub event_time: Option<EventTimeId>,
    pub cancelled_event_time: Option<EventTimeId>,
    pub workflow_status: WorkflowStatus,
    pub hosts: BTreeSet<UserId>,
    pub teachers: BTreeSet<UserId>,
    pub rooms: BTreeSet<RoomId>,
    pub room_status: RoomStatus,
    #[serde(default)]
    pub override_needed_hosts: bool,
    #[serde(default)]
    pub override_needed_teachers: bool,
    pub needs_attention_since: Option<Timestamp>,
    #[serde(default)]
    pub comments: String,
    pub created_at: Timestamp,
    pub last_workflow_update: Timestamp,
}

impl Visit {
    /// The event time the visit holds, or held before it was cancelled.
    pub fn any_event_time(&self) -> Option<EventTimeId> {
        self.event_time.or(self.cancelled_event_time)
    }
}

/// Staff and rooms an editor sets on a visit in one go.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisitStaffing {
    pub hosts: Option<BTreeSet<UserId>>,
    pub teachers: Option<BTreeSet<UserId>>,
    pub rooms: Option<BTreeSet<RoomId>>,
    pub override_needed_hosts: Option<bool>,
    pub override_needed_teachers: Option<bool>,
}

impl BookingStore {
    pub fn visit(&self, visit: VisitId) -> Result<&Visit, BookingError> {
        self.visits
            .get(&visit)
            .ok_or(BookingError::not_found("visit", visit.0))
    }

    fn visit_mut(&mut self, visit: VisitId) -> Result<&mut Visit, BookingError> {
        self.visits
            .get_mut(&visit)
            .ok_or(BookingError::not_found("visit", visit.0))
    }

    /// Interval of the visit's current or cancelled event time.
    pub fn visit_span(&self, visit: VisitId) -> Option<Span> {
        let time = self.visits.get(&visit)?.any_event_time()?;
        self.event_times.get(&time)?.span()
    }

    /// Turns an open event time into a visit.
    pub fn make_visit(&mut self, time: EventTimeId, now: Timestamp) -> Result<VisitId, BookingError> {
        let event_time = self
            .event_times
            .get(&time)
            .ok_or(BookingError::not_found("event time", time.0))?;
        if event_time.visit.is_some() {
            return Err(BookingError::Conflict(format!(
                "event time {time} already has a visit"
            )));
        }
        let product = self
            .products
            .get(&event_time.product)
            .ok_or(BookingError::not_found("product", event_time.product.0))?;

        let room_status = if !product.rooms_needed {
            RoomStatus::NotNeeded
        } else if product.rooms.is_empty() {
            RoomStatus::NeedsRooms
        } else {
            RoomStatus::Ok
        };
        let rooms = product.rooms.clone();
        let product_id = product.id;

        let id = VisitId(self.next_id());
        self.visits.insert(
            id,
            Visit {
                id,
                product: product_id,
                event_time: Some(time),
                cancelled_event_time: None,
                workflow_status: WorkflowStatus::BeingPlanned,
                hosts: BTreeSet::new(),
                teachers: BTreeSet::new(),
                rooms,
                room_status,
                override_needed_hosts: false,
                override_needed_teachers: false,
                needs_attention_since: Some(now),
                comments: String::new(),
                created_at: now,
                last_workflow_update: now,
            },
        );
        if let Some(event_time) = self.event_times.get_mut(&time) {
            event_time.visit = Some(id);
        }

        self.create_inheriting_autosends(id);
        self.resources_updated(id, now);
        self.log_action(
            None,
            LogSubject::Visit(id),
            LogAction::Create,
            format!("Visit created for event time {time}"),
            now,
        );
        self.refresh_visit_search(id);
        info!(visit = %id, event_time = %time, "visit created");
        Ok(id)
    }

    /// Runs automatic assignment where the product asks for it and recomputes
    /// every event time the visit touches.
    pub fn resources_updated(&mut self, visit: VisitId, now: Timestamp) {
        let autoassign = self
            .visits
            .get(&visit)
            .and_then(|v| self.products.get(&v.product))
            .is_some_and(|p| p.time_mode == TimeMode::ResourceControlledAutoassign);
        if autoassign {
            self.autoassign_resources(visit, now);
        }
        let affected = self.affected_event_times(AvailabilitySubject::Visit(visit));
        self.recompute_event_times(affected, now);
    }

    /// Fills every requirement from free pool resources. Marks the visit
    /// `AutoassignFailed` when a pool runs short. Returns whether every
    /// requirement ended up fulfilled.
    pub fn autoassign_resources(&mut self, visit: VisitId, now: Timestamp) -> bool {
        let Some(v) = self.visits.get(&visit) else {
            return false;
        };
        if v.workflow_status == WorkflowStatus::Cancelled {
            return false;
        }
        let Some(span) = self.visit_span(visit) else {
            return false;
        };
        let product = v.product;

        let requirements: Vec<(RequirementId, Option<crate::ids::PoolId>, u32)> = self
            .requirements_for_product(product)
            .into_iter()
            .filter(|req| !req.being_deleted)
            .map(|req| (req.id, req.pool, req.required_amount))
            .collect();

        let mut all_fulfilled = true;
        for (req, pool, required) in requirements {
            let Some(pool) = pool else {
                all_fulfilled = false;
                continue;
            };
            let mut assigned = self.assigned_count(visit, req);
            if assigned >= required {
                continue;
            }
            let already: BTreeSet<ResourceId> = self
                .visit_resources
                .values()
                .filter(|vr| vr.visit == visit)
                .map(|vr| vr.resource)
                .collect();
            for resource in self.pool_available_resources_between(pool, &span, &[visit]) {
                if assigned >= required {
                    break;
                }
                if already.contains(&resource) {
                    continue;
                }
                let id = VisitResourceId(self.next_id());
                self.visit_resources.insert(
                    id,
                    VisitResource {
                        id,
                        visit,
                        resource,
                        requirement: req,
                    },
                );
                assigned += 1;
            }
            if assigned < required {
                all_fulfilled = false;
            }
        }

        if !all_fulfilled {
            if let Some(v) = self.visits.get_mut(&visit) {
                if v.workflow_status != WorkflowStatus::AutoassignFailed {
                    warn!(visit = %visit, "automatic resource assignment failed");
                    v.workflow_status = WorkflowStatus::AutoassignFailed;
                    v.last_workflow_update = now;
                }
            }
        }
        all_fulfilled
    }

    pub fn assign_resource(
        &mut self,
        visit: VisitId,
        resource: ResourceId,
        requirement: RequirementId,
        now: Timestamp,
    ) -> Result<VisitResourceId, BookingError> {
        let v = self.visit(visit)?;
        let req = self
            .requirements
            .get(&requirement)
            .ok_or(BookingError::not_found("requirement", requirement.0))?;
        if req.product != v.product {
            return Err(BookingError::Invalid(format!(
                "requirement {requirement} does not belong to the visit's product"
            )));
        }
        let in_pool = req
            .pool
            .and_then(|pool| self.pools.get(&pool))
            .is_some_and(|pool| pool.resources.contains(&resource));
        if !in_pool {
            return Err(BookingError::Invalid(format!(
                "resource {resource} is not part of the required pool"
            )));
        }
        let duplicate = self
            .visit_resources
            .values()
            .any(|vr| vr.visit == visit && vr.resource == resource);
        if duplicate {
            return Err(BookingError::Conflict(format!(
                "resource {resource} is already assigned to visit {visit}"
            )));
        }
        if let Some(span) = self.visit_span(visit) {
            if !self.resource_is_available_between(resource, &span, &[visit]) {
                return Err(BookingError::Conflict(format!(
                    "resource {resource} is not available at the visit's time"
                )));
            }
        }

        let id = VisitResourceId(self.next_id());
        self.with_availability_update(AvailabilitySubject::VisitResource(id), now, |store| {
            store.visit_resources.insert(
                id,
                VisitResource {
                    id,
                    visit,
                    resource,
                    requirement,
                },
            );
            Ok::<_, BookingError>(())
        })?;
        let affected = self.affected_event_times(AvailabilitySubject::Visit(visit));
        self.recompute_event_times(affected, now);

        if let Some(res) = self.resources.get(&resource) {
            let kind = match res.kind {
                ResourceKind::Teacher => Some(TemplateKind::TeacherAssociated),
                ResourceKind::Host => Some(TemplateKind::HostAssociated),
                _ => None,
            };
            let user = res.user.and_then(|user| self.users.get(&user));
            if let (Some(kind), Some(user)) = (kind, user) {
                let recipient = Recipient::user(user, kind.default_role());
                self.autosend(visit, kind, None, Some(vec![recipient]), now);
            }
        }
        self.log_action(
            None,
            LogSubject::Visit(visit),
            LogAction::Change,
            format!("Resource {resource} assigned"),
            now,
        );
        Ok(id)
    }

    pub fn unassign_resource(
        &mut self,
        assignment: VisitResourceId,
        now: Timestamp,
    ) -> Result<(), BookingError> {
        let vr = self
            .visit_resources
            .get(&assignment)
            .cloned()
            .ok_or(BookingError::not_found("visit resource", assignment.0))?;
        let held = self.affected_event_times(AvailabilitySubject::Visit(vr.visit));
        self.with_availability_update(AvailabilitySubject::VisitResource(assignment), now, |store| {
            store.visit_resources.remove(&assignment);
            Ok::<_, BookingError>(())
        })?;
        self.recompute_event_times(held, now);
        self.log_action(
            None,
            LogSubject::Visit(vr.visit),
            LogAction::Change,
            format!("Resource {} unassigned", vr.resource),
            now,
        );
        self.resources_updated(vr.visit, now);
        Ok(())
    }

    pub fn needs_hosts(&self, visit: &Visit) -> bool {
        if visit.override_needed_hosts {
            return false;
        }
        self.products
            .get(&visit.product)
            .is_some_and(|p| p.needed_hosts as usize > visit.hosts.len())
    }

    pub fn needs_teachers(&self, visit: &Visit) -> bool {
        if visit.override_needed_teachers {
            return false;
        }
        self.products
            .get(&visit.product)
            .is_some_and(|p| p.needed_teachers as usize > visit.teachers.len())
    }

    pub fn unfulfilled_requirements(&self, visit: VisitId) -> Vec<RequirementId> {
        let Some(v) = self.visits.get(&visit) else {
            return Vec::new();
        };
        let controlled = self
            .products
            .get(&v.product)
            .is_some_and(|p| p.is_resource_controlled());
        if !controlled {
            return Vec::new();
        }
        self.requirements_for_product(v.product)
            .into_iter()
            .filter(|req| !req.being_deleted)
            .filter(|req| !self.requirement_is_fulfilled_for(req.id, visit))
            .map(|req| req.id)
            .collect()
    }

    /// Reasons the visit cannot move to Planned yet. Empty when it can.
    pub fn planned_status_block_reasons(&self, visit: VisitId) -> Vec<String> {
        let Some(v) = self.visits.get(&visit) else {
            return vec!["visit does not exist".to_string()];
        };
        let mut reasons = Vec::new();
        let unfulfilled = self.unfulfilled_requirements(visit);
        if !unfulfilled.is_empty() {
            reasons.push(format!(
                "{} resource requirement(s) are not fulfilled",
                unfulfilled.len()
            ));
        }
        let controlled = self
            .products
            .get(&v.product)
            .is_some_and(|p| p.is_resource_controlled());
        if !controlled {
            if self.needs_hosts(v) {
                reasons.push("hosts are missing".to_string());
            }
            if self.needs_teachers(v) {
                reasons.push("teachers are missing".to_string());
            }
            if v.room_status == RoomStatus::NeedsRooms && v.rooms.is_empty() {
                reasons.push("rooms are missing".to_string());
            }
        }
        reasons
    }

    pub fn planned_status_is_blocked(&self, visit: VisitId) -> bool {
        !self.planned_status_block_reasons(visit).is_empty()
    }

    pub fn possible_status_choices(&self, visit: VisitId) -> Vec<WorkflowStatus> {
        let Some(v) = self.visits.get(&visit) else {
            return Vec::new();
        };
        let blocked = self.planned_status_is_blocked(visit);
        v.workflow_status
            .allowed_transitions()
            .iter()
            .copied()
            .filter(|status| !(blocked && *status == WorkflowStatus::Planned))
            .collect()
    }

    /// Moves the visit through its workflow and fires the mails tied to the new status.
    pub fn change_visit_status(
        &mut self,
        visit: VisitId,
        to: WorkflowStatus,
        actor: Option<UserId>,
        now: Timestamp,
    ) -> Result<(), BookingError> {
        let from = self.visit(visit)?.workflow_status;
        if !from.can_transition_to(to) {
            return Err(BookingError::InvalidTransition { from, to });
        }
        if to == WorkflowStatus::Planned {
            let reasons = self.planned_status_block_reasons(visit);
            if !reasons.is_empty() {
                return Err(BookingError::PlanningBlocked(reasons.join(", ")));
            }
        }

        {
            let v = self.visit_mut(visit)?;
            v.workflow_status = to;
            v.last_workflow_update = now;
            if matches!(to, WorkflowStatus::Planned | WorkflowStatus::PlannedNoBooking) {
                v.needs_attention_since = None;
            }
        }
        self.log_action(
            actor,
            LogSubject::Visit(visit),
            LogAction::Change,
            format!("Status changed from {} to {}", from.label(), to.label()),
            now,
        );
        info!(visit = %visit, from = from.label(), to = to.label(), "visit status changed");

        match to {
            WorkflowStatus::Planned => {
                self.autosend(visit, TemplateKind::BookingComplete, None, None, now);
            }
            WorkflowStatus::Cancelled => {
                self.autosend(visit, TemplateKind::BookingCancelled, None, None, now);
                self.release_event_time(visit, now)?;
            }
            _ => {}
        }
        self.refresh_visit_search(visit);
        Ok(())
    }

    /// Detaches a cancelled visit from its event time so the slot can be booked again.
    fn release_event_time(&mut self, visit: VisitId, now: Timestamp) -> Result<(), BookingError> {
        self.with_availability_update(AvailabilitySubject::Visit(visit), now, |store| {
            let v = store.visit_mut(visit)?;
            let Some(time) = v.event_time.take() else {
                return Ok(());
            };
            v.cancelled_event_time = Some(time);
            if let Some(event_time) = store.event_times.get_mut(&time) {
                event_time.visit = None;
            }
            Ok(())
        })
    }

    /// Marks the start of an event time as handled.
    pub fn event_time_started(&mut self, time: EventTimeId) {
        if let Some(event_time) = self.event_times.get_mut(&time) {
            event_time.has_notified_start = true;
        }
    }

    /// Marks the end of an event time as handled. A planned visit becomes executed.
    pub fn event_time_ended(&mut self, time: EventTimeId, now: Timestamp) {
        let Some(event_time) = self.event_times.get_mut(&time) else {
            return;
        };
        event_time.has_notified_end = true;
        let Some(visit) = event_time.visit else {
            return;
        };
        let Some(v) = self.visits.get_mut(&visit) else {
            return;
        };
        if v.workflow_status.is_planned() {
            let from = v.workflow_status;
            v.workflow_status = WorkflowStatus::Executed;
            v.last_workflow_update = now;
            self.log_action(
                None,
                LogSubject::Visit(visit),
                LogAction::Change,
                format!(
                    "Status changed from {} to {} when the visit ended",
                    from.label(),
                    WorkflowStatus::Executed.label()
                ),
                now,
            );
        }
    }

    fn user_is_free(&self, user: UserId, kind: ResourceKind, visit: VisitId, span: &Span) -> bool {
        if let Some(resource) = self.user_resource(user, kind) {
            return self.resource_is_available_between(resource, span, &[visit]);
        }
        !self.visits.values().any(|other| {
            if other.id == visit || other.workflow_status == WorkflowStatus::Cancelled {
                return false;
            }
            let staffed = match kind {
                ResourceKind::Host => other.hosts.contains(&user),
                _ => other.teachers.contains(&user),
            };
            staffed
                && self
                    .visit_span(other.id)
                    .is_some_and(|other_span| other_span.overlaps(span))
        })
    }

    fn volunteer(
        &mut self,
        visit: VisitId,
        user: UserId,
        kind: ResourceKind,
        now: Timestamp,
    ) -> Result<(), BookingError> {
        let profile = self
            .users
            .get(&user)
            .ok_or(BookingError::not_found("user", user.0))?;
        let (role, label) = match kind {
            ResourceKind::Host => (UserRole::Host, "host"),
            _ => (UserRole::Teacher, "teacher"),
        };
        if profile.role != role {
            return Err(BookingError::Forbidden(format!(
                "only users with the {label} role can volunteer as {label}"
            )));
        }
        let v = self.visit(visit)?;
        if !v.workflow_status.is_active() {
            return Err(BookingError::Conflict(format!("visit {visit} is not active")));
        }
        let product = self
            .products
            .get(&v.product)
            .ok_or(BookingError::not_found("product", v.product.0))?;
        let (potential, current) = match kind {
            ResourceKind::Host => (&product.potential_hosts, &v.hosts),
            _ => (&product.potential_teachers, &v.teachers),
        };
        if !potential.contains(&user) {
            return Err(BookingError::Forbidden(format!(
                "user {user} is not a potential {label} for this product"
            )));
        }
        if current.contains(&user) {
            return Err(BookingError::Conflict(format!(
                "user {user} is already {label} for visit {visit}"
            )));
        }
        if let Some(span) = self.visit_span(visit) {
            if !self.user_is_free(user, kind, visit, &span) {
                return Err(BookingError::Conflict(format!(
                    "user {user} is busy at the visit's time"
                )));
            }
        }

        self.with_availability_update(AvailabilitySubject::Visit(visit), now, |store| {
            let v = store.visit_mut(visit)?;
            match kind {
                ResourceKind::Host => v.hosts.insert(user),
                _ => v.teachers.insert(user),
            };
            Ok::<_, BookingError>(())
        })?;
        self.log_action(
            Some(user),
            LogSubject::Visit(visit),
            LogAction::Change,
            format!("User {user} volunteered as {label}"),
            now,
        );
        let template = match kind {
            ResourceKind::Host => TemplateKind::HostAssociated,
            _ => TemplateKind::TeacherAssociated,
        };
        if let Some(profile) = self.users.get(&user) {
            let recipient = Recipient::user(profile, template.default_role());
            self.autosend(visit, template, None, Some(vec![recipient]), now);
        }
        Ok(())
    }

    pub fn become_host(&mut self, visit: VisitId, user: UserId, now: Timestamp) -> Result<(), BookingError> {
        self.volunteer(visit, user, ResourceKind::Host, now)
    }

    pub fn become_teacher(
        &mut self,
        visit: VisitId,
        user: UserId,
        now: Timestamp,
    ) -> Result<(), BookingError> {
        self.volunteer(visit, user, ResourceKind::Teacher, now)
    }

    /// Replaces staff and rooms. Newly added hosts and teachers are notified.
    pub fn update_visit_staffing(
        &mut self,
        visit: VisitId,
        staffing: VisitStaffing,
        actor: Option<UserId>,
        now: Timestamp,
    ) -> Result<(), BookingError> {
        let before = self.visit(visit)?.clone();
        for user in staffing
            .hosts
            .iter()
            .flatten()
            .chain(staffing.teachers.iter().flatten())
        {
            if !self.users.contains_key(user) {
                return Err(BookingError::not_found("user", user.0));
            }
        }
        for room in staffing.rooms.iter().flatten() {
            if !self.rooms.contains_key(room) {
                return Err(BookingError::not_found("room", room.0));
            }
        }

        self.with_availability_update(AvailabilitySubject::Visit(visit), now, |store| {
            let rooms_needed = store
                .products
                .get(&before.product)
                .is_some_and(|p| p.rooms_needed);
            let v = store.visit_mut(visit)?;
            if let Some(hosts) = staffing.hosts {
                v.hosts = hosts;
            }
            if let Some(teachers) = staffing.teachers {
                v.teachers = teachers;
            }
            if let Some(rooms) = staffing.rooms {
                v.rooms = rooms;
            }
            if let Some(flag) = staffing.override_needed_hosts {
                v.override_needed_hosts = flag;
            }
            if let Some(flag) = staffing.override_needed_teachers {
                v.override_needed_teachers = flag;
            }
            if rooms_needed {
                v.room_status = if v.rooms.is_empty() {
                    RoomStatus::NeedsRooms
                } else {
                    RoomStatus::Ok
                };
            }
            Ok::<_, BookingError>(())
        })?;

        let after = self.visit(visit)?.clone();
        let notify: Vec<(UserId, TemplateKind)> = after
            .hosts
            .difference(&before.hosts)
            .map(|user| (*user, TemplateKind::HostAssociated))
            .chain(
                after
                    .teachers
                    .difference(&before.teachers)
                    .map(|user| (*user, TemplateKind::TeacherAssociated)),
            )
            .collect();
        for (user, kind) in notify {
            if let Some(profile) = self.users.get(&user) {
                let recipient = Recipient::user(profile, kind.default_role());
                self.autosend(visit, kind, None, Some(vec![recipient]), now);
            }
        }
        self.log_action(
            actor,
            LogSubject::Visit(visit),
            LogAction::Change,
            "Staffing updated",
            now,
        );
        Ok(())
    }

    /// Active visits whose event time touches `date`.
    pub fn visits_occurring_on(&self, date: NaiveDate) -> Vec<VisitId> {
        let Some(day_start) = date.and_hms_opt(0, 0, 0).map(|d| d.and_utc()) else {
            return Vec::new();
        };
        let day = Span::new(day_start, day_start + Duration::days(1));
        self.visits
            .values()
            .filter(|v| v.workflow_status.is_active())
            .filter(|v| self.visit_span(v.id).is_some_and(|span| span.overlaps(&day)))
            .map(|v| v.id)
            .collect()
    }

    pub fn visits_occurring_at(&self, instant: Timestamp) -> Vec<VisitId> {
        self.visits
            .values()
            .filter(|v| v.workflow_status.is_active())
            .filter(|v| {
                self.visit_span(v.id)
                    .is_some_and(|span| span.contains_instant(instant))
            })
            .map(|v| v.id)
            .collect()
    }

    /// Executed or evaluated visits that ended within the last `days` days.
    pub fn recently_held(&self, now: Timestamp, days: i64) -> Vec<VisitId> {
        let since = now - Duration::days(days);
        let mut held: Vec<(Timestamp, VisitId)> = self
            .visits
            .values()
            .filter(|v| v.workflow_status.is_held())
            .filter_map(|v| {
                let span = self.visit_span(v.id)?;
                (span.end < now && span.end >= since).then_some((span.end, v.id))
            })
            .collect();
        held.sort_by(|a, b| b.cmp(a));
        held.into_iter().map(|(_, id)| id).collect()
    }
}

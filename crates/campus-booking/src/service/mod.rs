//! The booking service: the store behind a lock, permission checks on every
//! editing operation, outbox dispatch and the job runner.

mod router;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

pub use router::booking_router;

use crate::audit::{LogAction, LogEntry, LogSubject};
use crate::catalog::ProductDraft;
use crate::ids::{
    BookingId, CalendarEventId, CalendarId, EventTimeId, LogEntryId, PoolId, ProductId,
    RequirementId, ResourceId, RoomId, TemplateId, UnitId, UserId, VisitId, VisitResourceId,
};
use crate::notifications::template::RenderContext;
use crate::notifications::{
    AutosendDraft, EmailTemplateDraft, JobRun, JobRunner, MailError, MailTransport, MessageStatus,
    Recipient, RecipientRole, TemplateKind,
};
use crate::organization::OrganizationalUnit;
use crate::profile::{UserProfile, UserRole};
use crate::registry::{PoolDraft, RequirementDraft, ResourceDraft, RoomDraft, UnitDraft, UserDraft};
use crate::reports::UnitOverview;
use crate::resources::{CalendarEventDraft, CalendarOwner};
use crate::scheduling::{EventTimeDraft, Timestamp};
use crate::store::{BookingStore, SnapshotError};
use crate::visits::{GuestDraft, VisitStaffing, WorkflowStatus};

/// Error raised by booking operations.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("permission denied: {0}")]
    Forbidden(String),
    #[error("cannot change status from {} to {}", from.label(), to.label())]
    InvalidTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
    #[error("visit cannot be planned: {0}")]
    PlanningBlocked(String),
    #[error("visit {0} has no free seats or waiting list places")]
    VisitFull(VisitId),
    #[error("not bookable: {0}")]
    NotBookable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Mail(#[from] MailError),
}

impl BookingError {
    pub fn not_found(entity: &'static str, id: u64) -> Self {
        BookingError::NotFound { entity, id }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BookingError::NotFound { .. } => StatusCode::NOT_FOUND,
            BookingError::Forbidden(_) => StatusCode::FORBIDDEN,
            BookingError::InvalidTransition { .. }
            | BookingError::PlanningBlocked(_)
            | BookingError::VisitFull(_)
            | BookingError::Conflict(_) => StatusCode::CONFLICT,
            BookingError::NotBookable(_) | BookingError::Invalid(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            BookingError::Snapshot(_) | BookingError::Mail(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Outcome of one outbox dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
}

/// Who may receive a general message about a visit.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct VisitMessage {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub to_guests: bool,
    #[serde(default)]
    pub to_hosts: bool,
    #[serde(default)]
    pub to_teachers: bool,
}

pub struct BookingService<T> {
    store: RwLock<BookingStore>,
    transport: Arc<T>,
    jobs: JobRunner,
}

fn forbidden(message: impl Into<String>) -> BookingError {
    BookingError::Forbidden(message.into())
}

impl<T> BookingService<T>
where
    T: MailTransport,
{
    pub fn new(store: BookingStore, transport: Arc<T>, retention_days: u64) -> Self {
        Self {
            store: RwLock::new(store),
            transport,
            jobs: JobRunner::standard(retention_days),
        }
    }

    fn now() -> Timestamp {
        Utc::now()
    }

    /// Runs `f` against a consistent view of the store.
    pub fn read<R>(&self, f: impl FnOnce(&BookingStore) -> R) -> R {
        f(&self.store.read())
    }

    pub fn snapshot(&self) -> BookingStore {
        self.store.read().clone()
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), BookingError> {
        let store = self.store.read();
        store.save_snapshot(path)?;
        Ok(())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn actor(store: &BookingStore, actor: UserId) -> Result<UserProfile, BookingError> {
        store
            .users
            .get(&actor)
            .cloned()
            .ok_or_else(|| forbidden(format!("unknown user {actor}")))
    }

    fn require_edit(store: &BookingStore, actor: &UserProfile, unit: UnitId) -> Result<(), BookingError> {
        let unit_ref = store.units.get(&unit);
        if actor.can_edit(unit_ref) {
            Ok(())
        } else {
            Err(forbidden(format!(
                "{} cannot edit unit {unit}",
                actor.username
            )))
        }
    }

    fn product_unit(store: &BookingStore, product: ProductId) -> Result<UnitId, BookingError> {
        Ok(store.product(product)?.unit)
    }

    fn visit_unit(store: &BookingStore, visit: VisitId) -> Result<UnitId, BookingError> {
        let product = store.visit(visit)?.product;
        Self::product_unit(store, product)
    }

    fn resource_unit(store: &BookingStore, resource: ResourceId) -> Result<UnitId, BookingError> {
        store
            .resources
            .get(&resource)
            .map(|r| r.unit)
            .ok_or(BookingError::not_found("resource", resource.0))
    }

    fn calendar_unit(store: &BookingStore, calendar: CalendarId) -> Result<UnitId, BookingError> {
        let owner = store
            .calendars
            .get(&calendar)
            .map(|c| c.owner)
            .ok_or(BookingError::not_found("calendar", calendar.0))?;
        match owner {
            CalendarOwner::Resource(resource) => Self::resource_unit(store, resource),
            CalendarOwner::Product(product) => Self::product_unit(store, product),
        }
    }

    /// Editors of the visit's unit and the visit's own hosts and teachers may message it.
    pub fn can_notify(&self, actor: UserId, visit: VisitId) -> Result<bool, BookingError> {
        let store = self.store.read();
        let profile = Self::actor(&store, actor)?;
        let v = store.visit(visit)?;
        if v.hosts.contains(&actor) || v.teachers.contains(&actor) {
            return Ok(true);
        }
        let unit = Self::visit_unit(&store, visit)?;
        Ok(profile.can_edit(store.units.get(&unit)))
    }

    pub fn create_unit(&self, actor: UserId, draft: UnitDraft) -> Result<UnitId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        if !profile.can_edit_units() {
            return Err(forbidden("only administrators and faculty editors manage units"));
        }
        if profile.role != UserRole::Administrator {
            let parent: Option<&OrganizationalUnit> =
                draft.parent.and_then(|parent| store.units.get(&parent));
            if !parent.is_some_and(|parent| profile.unit_access(parent)) {
                return Err(forbidden("units must be created below a unit you manage"));
            }
        }
        store.add_unit(draft)
    }

    /// Creates the user and mails them their account details.
    pub fn create_user(&self, actor: UserId, draft: UserDraft) -> Result<UserId, BookingError> {
        let now = Self::now();
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        if !profile.can_assign_role(draft.role) {
            return Err(forbidden(format!(
                "{} cannot assign the {} role",
                profile.role.label(),
                draft.role.label()
            )));
        }
        let id = store.add_user(draft, now)?;
        if let Some(user) = store.users.get(&id).cloned() {
            let mut extra = RenderContext::new();
            extra.insert("user.username".into(), user.username.clone());
            let recipient = Recipient::user(&user, RecipientRole::Other);
            store.send_template_mail(TemplateKind::UserCreated, None, None, vec![recipient], &extra, now);
        }
        Ok(id)
    }

    pub fn set_user_role(&self, actor: UserId, user: UserId, role: UserRole) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        if !profile.can_assign_role(role) {
            return Err(forbidden(format!(
                "{} cannot assign the {} role",
                profile.role.label(),
                role.label()
            )));
        }
        let current = store
            .users
            .get(&user)
            .map(|u| u.role)
            .ok_or(BookingError::not_found("user", user.0))?;
        if current != UserRole::None && !profile.can_assign_role(current) {
            return Err(forbidden(format!(
                "{} cannot change the role of a {}",
                profile.role.label(),
                current.label()
            )));
        }
        store.set_user_role(user, role, Self::now())
    }

    pub fn create_product(&self, actor: UserId, draft: ProductDraft) -> Result<ProductId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, draft.unit)?;
        store.create_product(draft, Some(actor), Self::now())
    }

    pub fn update_product(
        &self,
        actor: UserId,
        product: ProductId,
        draft: ProductDraft,
    ) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, Self::product_unit(&store, product)?)?;
        Self::require_edit(&store, &profile, draft.unit)?;
        store.update_product(product, draft, Some(actor), Self::now())
    }

    pub fn set_product_autosend(
        &self,
        actor: UserId,
        product: ProductId,
        draft: AutosendDraft,
    ) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, Self::product_unit(&store, product)?)?;
        store.set_product_autosend(product, draft.kind, draft.enabled, draft.days);
        Ok(())
    }

    pub fn add_room(&self, actor: UserId, draft: RoomDraft) -> Result<RoomId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        match draft.unit {
            Some(unit) => Self::require_edit(&store, &profile, unit)?,
            None if profile.role.is_editor() => {}
            None => return Err(forbidden("only editors add rooms")),
        }
        store.add_room(draft)
    }

    pub fn add_resource(&self, actor: UserId, draft: ResourceDraft) -> Result<ResourceId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, draft.unit)?;
        store.add_resource(draft, Self::now())
    }

    pub fn delete_resource(&self, actor: UserId, resource: ResourceId) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, Self::resource_unit(&store, resource)?)?;
        store.delete_resource(resource, Self::now())
    }

    pub fn add_pool(&self, actor: UserId, draft: PoolDraft) -> Result<PoolId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, draft.unit)?;
        store.add_pool(draft, Self::now())
    }

    fn pool_unit(store: &BookingStore, pool: PoolId) -> Result<UnitId, BookingError> {
        store
            .pools
            .get(&pool)
            .map(|p| p.unit)
            .ok_or(BookingError::not_found("pool", pool.0))
    }

    pub fn add_pool_member(&self, actor: UserId, pool: PoolId, resource: ResourceId) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, Self::pool_unit(&store, pool)?)?;
        store.add_pool_member(pool, resource, Self::now())
    }

    pub fn remove_pool_member(
        &self,
        actor: UserId,
        pool: PoolId,
        resource: ResourceId,
    ) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, Self::pool_unit(&store, pool)?)?;
        store.remove_pool_member(pool, resource, Self::now())
    }

    pub fn add_requirement(
        &self,
        actor: UserId,
        product: ProductId,
        draft: RequirementDraft,
    ) -> Result<RequirementId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, Self::product_unit(&store, product)?)?;
        store.add_requirement(product, draft, Self::now())
    }

    pub fn delete_requirement(&self, actor: UserId, requirement: RequirementId) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        let product = store
            .requirements
            .get(&requirement)
            .map(|r| r.product)
            .ok_or(BookingError::not_found("requirement", requirement.0))?;
        Self::require_edit(&store, &profile, Self::product_unit(&store, product)?)?;
        store.delete_requirement(requirement, Self::now())
    }

    pub fn attach_calendar(&self, actor: UserId, owner: CalendarOwner) -> Result<CalendarId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        let unit = match owner {
            CalendarOwner::Resource(resource) => Self::resource_unit(&store, resource)?,
            CalendarOwner::Product(product) => Self::product_unit(&store, product)?,
        };
        Self::require_edit(&store, &profile, unit)?;
        store.attach_calendar(owner, Self::now())
    }

    pub fn add_calendar_event(
        &self,
        actor: UserId,
        calendar: CalendarId,
        draft: CalendarEventDraft,
    ) -> Result<CalendarEventId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, Self::calendar_unit(&store, calendar)?)?;
        store.add_calendar_event(calendar, draft, Self::now())
    }

    pub fn delete_calendar_event(&self, actor: UserId, event: CalendarEventId) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        let calendar = store
            .calendar_events
            .get(&event)
            .map(|e| e.calendar)
            .ok_or(BookingError::not_found("calendar event", event.0))?;
        Self::require_edit(&store, &profile, Self::calendar_unit(&store, calendar)?)?;
        store.delete_calendar_event(event, Self::now())
    }

    pub fn add_event_time(
        &self,
        actor: UserId,
        product: ProductId,
        draft: EventTimeDraft,
    ) -> Result<EventTimeId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, Self::product_unit(&store, product)?)?;
        store.add_event_time(product, draft, Self::now())
    }

    pub fn delete_event_time(&self, actor: UserId, time: EventTimeId) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        let product = store
            .event_times
            .get(&time)
            .map(|t| t.product)
            .ok_or(BookingError::not_found("event time", time.0))?;
        Self::require_edit(&store, &profile, Self::product_unit(&store, product)?)?;
        store.delete_event_time(time, Self::now())
    }

    pub fn make_visit(&self, actor: UserId, time: EventTimeId) -> Result<VisitId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        let product = store
            .event_times
            .get(&time)
            .map(|t| t.product)
            .ok_or(BookingError::not_found("event time", time.0))?;
        Self::require_edit(&store, &profile, Self::product_unit(&store, product)?)?;
        store.make_visit(time, Self::now())
    }

    pub fn change_visit_status(
        &self,
        actor: UserId,
        visit: VisitId,
        to: WorkflowStatus,
    ) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, Self::visit_unit(&store, visit)?)?;
        store.change_visit_status(visit, to, Some(actor), Self::now())
    }

    pub fn assign_resource(
        &self,
        actor: UserId,
        visit: VisitId,
        resource: ResourceId,
        requirement: RequirementId,
    ) -> Result<VisitResourceId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, Self::visit_unit(&store, visit)?)?;
        store.assign_resource(visit, resource, requirement, Self::now())
    }

    pub fn unassign_resource(&self, actor: UserId, assignment: VisitResourceId) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        let visit = store
            .visit_resources
            .get(&assignment)
            .map(|vr| vr.visit)
            .ok_or(BookingError::not_found("visit resource", assignment.0))?;
        Self::require_edit(&store, &profile, Self::visit_unit(&store, visit)?)?;
        store.unassign_resource(assignment, Self::now())
    }

    pub fn update_visit_staffing(
        &self,
        actor: UserId,
        visit: VisitId,
        staffing: VisitStaffing,
    ) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, Self::visit_unit(&store, visit)?)?;
        store.update_visit_staffing(visit, staffing, Some(actor), Self::now())
    }

    pub fn set_visit_autosend(
        &self,
        actor: UserId,
        visit: VisitId,
        draft: AutosendDraft,
    ) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        Self::require_edit(&store, &profile, Self::visit_unit(&store, visit)?)?;
        store.set_visit_autosend(visit, draft);
        Ok(())
    }

    pub fn become_host(&self, actor: UserId, visit: VisitId) -> Result<(), BookingError> {
        let mut store = self.store.write();
        Self::actor(&store, actor)?;
        store.become_host(visit, actor, Self::now())
    }

    pub fn become_teacher(&self, actor: UserId, visit: VisitId) -> Result<(), BookingError> {
        let mut store = self.store.write();
        Self::actor(&store, actor)?;
        store.become_teacher(visit, actor, Self::now())
    }

    /// Sends a free-form message about the visit to the chosen groups.
    pub fn notify_visit(
        &self,
        actor: UserId,
        visit: VisitId,
        message: VisitMessage,
    ) -> Result<usize, BookingError> {
        if !self.can_notify(actor, visit)? {
            return Err(forbidden("only editors and the visit's staff can send messages"));
        }
        let now = Self::now();
        let mut store = self.store.write();
        let (hosts, teachers) = {
            let v = store.visit(visit)?;
            (v.hosts.clone(), v.teachers.clone())
        };
        let mut recipients = Vec::new();
        if message.to_guests {
            recipients.extend(store.guest_recipients(visit, None));
        }
        if message.to_hosts {
            recipients.extend(store.user_recipients(&hosts, RecipientRole::Host));
        }
        if message.to_teachers {
            recipients.extend(store.user_recipients(&teachers, RecipientRole::Teacher));
        }
        let mut seen = BTreeSet::new();
        recipients.retain(|r| seen.insert(r.email.to_lowercase()));
        if recipients.is_empty() {
            return Err(BookingError::Invalid("the message has no recipients".to_string()));
        }

        let mut extra = RenderContext::new();
        extra.insert("message".into(), message.body);
        extra.insert("subject".into(), message.subject);
        let sent = store.send_template_mail(
            TemplateKind::GeneralMessage,
            Some(visit),
            None,
            recipients,
            &extra,
            now,
        );
        Ok(sent)
    }

    pub fn book(&self, visit: VisitId, guest: GuestDraft) -> Result<BookingId, BookingError> {
        self.store.write().book(visit, guest, Self::now())
    }

    pub fn cancel_booking(&self, actor: UserId, booking: BookingId) -> Result<(), BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        let visit = store.booking(booking)?.visit;
        Self::require_edit(&store, &profile, Self::visit_unit(&store, visit)?)?;
        store.cancel_booking(booking, Self::now())
    }

    pub fn accept_offer(&self, booking: BookingId) -> Result<(), BookingError> {
        self.store.write().accept_offer(booking, Self::now())
    }

    pub fn decline_offer(&self, booking: BookingId) -> Result<(), BookingError> {
        self.store.write().decline_offer(booking, Self::now())
    }

    /// Unit templates need edit rights on the unit. Global ones need an administrator.
    pub fn save_template(
        &self,
        actor: UserId,
        draft: EmailTemplateDraft,
    ) -> Result<TemplateId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        match draft.unit {
            Some(unit) => Self::require_edit(&store, &profile, unit)?,
            None if profile.role == UserRole::Administrator => {}
            None => return Err(forbidden("only administrators edit global templates")),
        }
        Ok(store.save_template(draft))
    }

    pub fn add_log_entry(
        &self,
        actor: UserId,
        subject: LogSubject,
        message: String,
    ) -> Result<LogEntryId, BookingError> {
        let mut store = self.store.write();
        let profile = Self::actor(&store, actor)?;
        if !profile.role.is_editor() {
            return Err(forbidden("only editors add log entries"));
        }
        Ok(store.log_action(Some(actor), subject, LogAction::ManualEntry, message, Self::now()))
    }

    pub fn log_entries(&self, subject: LogSubject) -> Vec<LogEntry> {
        self.read(|store| store.log_entries_for(subject).into_iter().cloned().collect())
    }

    pub fn overview(&self, unit: Option<UnitId>) -> UnitOverview {
        self.read(|store| store.unit_overview(unit, Self::now()))
    }

    pub fn export_visits_csv(&self, unit: Option<UnitId>) -> Result<String, BookingError> {
        let mut out = Vec::new();
        self.read(|store| store.export_visits_csv(&mut out, unit))
            .map_err(|err| BookingError::Invalid(format!("export failed: {err}")))?;
        String::from_utf8(out).map_err(|err| BookingError::Invalid(err.to_string()))
    }

    pub fn run_due_jobs(&self, now: Timestamp) -> Vec<JobRun> {
        let mut store = self.store.write();
        self.jobs.run_due(&mut store, now)
    }

    pub fn run_job(&self, code: &str, now: Timestamp) -> Result<JobRun, BookingError> {
        let mut store = self.store.write();
        self.jobs
            .run_one(code, &mut store, now)
            .ok_or_else(|| BookingError::Invalid(format!("unknown job '{code}'")))
    }

    pub fn job_codes(&self) -> Vec<(&'static str, &'static str)> {
        self.jobs.jobs().collect()
    }

    /// Delivers every pending message. The lock is not held while sending.
    pub async fn dispatch_pending(&self) -> DispatchReport {
        let pending = self.store.read().pending_messages();
        let mut report = DispatchReport::default();
        for message in pending {
            let status = match self.transport.deliver(&message).await {
                Ok(()) => {
                    report.sent += 1;
                    MessageStatus::Sent { at: Self::now() }
                }
                Err(err) => {
                    warn!(message = %message.id, error = %err, "mail delivery failed");
                    report.failed += 1;
                    MessageStatus::Failed {
                        reason: err.to_string(),
                    }
                }
            };
            self.store.write().mark_message(message.id, status);
        }
        if report.sent + report.failed > 0 {
            info!(sent = report.sent, failed = report.failed, "outbox dispatched");
        }
        report
    }
}

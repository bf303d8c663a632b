use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use super::{BookingError, BookingService, VisitMessage};
use crate::audit::LogSubject;
use crate::catalog::{Product, ProductDraft};
use crate::ids::{
    BookingId, CalendarEventId, CalendarId, EventTimeId, PoolId, ProductId, RequirementId,
    ResourceId, UnitId, UserId, VisitId, VisitResourceId,
};
use crate::notifications::{AutosendDraft, EmailTemplateDraft, MailTransport};
use crate::profile::UserRole;
use crate::registry::{PoolDraft, RequirementDraft, ResourceDraft, RoomDraft, UnitDraft, UserDraft};
use crate::resources::{CalendarEventDraft, CalendarOwner};
use crate::scheduling::{EventTime, EventTimeDraft};
use crate::visits::{Booking, GuestDraft, Visit, VisitStaffing, WorkflowStatus};

/// Header carrying the id of the acting user.
pub const ACTOR_HEADER: &str = "x-user-id";

/// Router builder exposing the booking endpoints.
pub fn booking_router<T>(service: Arc<BookingService<T>>) -> Router
where
    T: MailTransport,
{
    Router::new()
        .route("/api/v1/units", post(create_unit_handler::<T>))
        .route("/api/v1/users", post(create_user_handler::<T>))
        .route("/api/v1/users/:user_id/role", put(set_role_handler::<T>))
        .route(
            "/api/v1/products",
            get(search_products_handler::<T>).post(create_product_handler::<T>),
        )
        .route(
            "/api/v1/products/:product_id",
            get(product_handler::<T>).put(update_product_handler::<T>),
        )
        .route(
            "/api/v1/products/:product_id/autosends",
            put(product_autosend_handler::<T>),
        )
        .route(
            "/api/v1/products/:product_id/requirements",
            post(add_requirement_handler::<T>),
        )
        .route(
            "/api/v1/products/:product_id/event-times",
            post(add_event_time_handler::<T>),
        )
        .route("/api/v1/rooms", post(add_room_handler::<T>))
        .route("/api/v1/resources", post(add_resource_handler::<T>))
        .route(
            "/api/v1/resources/:resource_id",
            delete(delete_resource_handler::<T>),
        )
        .route("/api/v1/pools", post(add_pool_handler::<T>))
        .route(
            "/api/v1/pools/:pool_id/resources/:resource_id",
            put(add_pool_member_handler::<T>).delete(remove_pool_member_handler::<T>),
        )
        .route(
            "/api/v1/requirements/:requirement_id",
            delete(delete_requirement_handler::<T>),
        )
        .route("/api/v1/calendars", post(attach_calendar_handler::<T>))
        .route(
            "/api/v1/calendars/:calendar_id/events",
            post(add_calendar_event_handler::<T>),
        )
        .route(
            "/api/v1/calendar-events/:event_id",
            delete(delete_calendar_event_handler::<T>),
        )
        .route(
            "/api/v1/event-times/:time_id",
            delete(delete_event_time_handler::<T>),
        )
        .route(
            "/api/v1/event-times/:time_id/visit",
            post(make_visit_handler::<T>),
        )
        .route("/api/v1/visits", get(search_visits_handler::<T>))
        .route("/api/v1/visits/:visit_id", get(visit_handler::<T>))
        .route("/api/v1/visits/:visit_id/status", post(visit_status_handler::<T>))
        .route(
            "/api/v1/visits/:visit_id/resources",
            post(assign_resource_handler::<T>),
        )
        .route("/api/v1/visits/:visit_id/host", post(become_host_handler::<T>))
        .route(
            "/api/v1/visits/:visit_id/teacher",
            post(become_teacher_handler::<T>),
        )
        .route("/api/v1/visits/:visit_id/staffing", put(staffing_handler::<T>))
        .route(
            "/api/v1/visits/:visit_id/autosends",
            put(visit_autosend_handler::<T>),
        )
        .route("/api/v1/visits/:visit_id/notify", post(notify_handler::<T>))
        .route("/api/v1/visits/:visit_id/bookings", post(book_handler::<T>))
        .route(
            "/api/v1/visit-resources/:assignment_id",
            delete(unassign_resource_handler::<T>),
        )
        .route(
            "/api/v1/bookings/:booking_id/cancel",
            post(cancel_booking_handler::<T>),
        )
        .route(
            "/api/v1/bookings/:booking_id/accept",
            post(accept_offer_handler::<T>),
        )
        .route(
            "/api/v1/bookings/:booking_id/decline",
            post(decline_offer_handler::<T>),
        )
        .route("/api/v1/templates", post(save_template_handler::<T>))
        .route("/api/v1/log", post(add_log_entry_handler::<T>))
        .route("/api/v1/log/:kind/:subject_id", get(log_handler::<T>))
        .route("/api/v1/overview", get(overview_handler::<T>))
        .route("/api/v1/export/visits.csv", get(export_handler::<T>))
        .route("/api/v1/jobs", get(jobs_handler::<T>))
        .route("/api/v1/jobs/:code/run", post(run_job_handler::<T>))
        .route("/api/v1/outbox/dispatch", post(dispatch_handler::<T>))
        .with_state(service)
}

fn error_response(err: BookingError) -> Response {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, "booking request failed");
    }
    let payload = json!({
        "error": err.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

fn created<I: Serialize>(result: Result<I, BookingError>) -> Response {
    match result {
        Ok(id) => (StatusCode::CREATED, axum::Json(json!({ "id": id }))).into_response(),
        Err(err) => error_response(err),
    }
}

fn no_content(result: Result<(), BookingError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

fn actor(headers: &HeaderMap) -> Result<UserId, BookingError> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(UserId)
        .ok_or_else(|| BookingError::Forbidden(format!("missing or invalid {ACTOR_HEADER} header")))
}

/// Resolves the acting user or bails out with the error response.
macro_rules! actor_or_return {
    ($headers:expr) => {
        match actor(&$headers) {
            Ok(user) => user,
            Err(err) => return error_response(err),
        }
    };
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoleChange {
    role: UserRole,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusChange {
    status: WorkflowStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssignmentRequest {
    resource: ResourceId,
    requirement: RequirementId,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CalendarRequest {
    owner: CalendarOwner,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogEntryRequest {
    subject: LogSubject,
    message: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct UnitQuery {
    #[serde(default)]
    unit: Option<UnitId>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProductView {
    product: Product,
    event_times: Vec<EventTime>,
}

#[derive(Debug, Serialize)]
pub(crate) struct VisitView {
    visit: Visit,
    bookings: Vec<Booking>,
    available_seats: Option<u32>,
    status_choices: Vec<WorkflowStatus>,
    planning_blockers: Vec<String>,
}

pub(crate) async fn create_unit_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<UnitDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.create_unit(user, draft))
}

pub(crate) async fn create_user_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<UserDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.create_user(user, draft))
}

pub(crate) async fn set_role_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(user_id): Path<UserId>,
    headers: HeaderMap,
    axum::Json(change): axum::Json<RoleChange>,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.set_user_role(user, user_id, change.role))
}

pub(crate) async fn search_products_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let products: Vec<Product> = service.read(|store| {
        store
            .search_products(&query.q)
            .into_iter()
            .filter_map(|id| store.products.get(&id).cloned())
            .collect()
    });
    (StatusCode::OK, axum::Json(products)).into_response()
}

pub(crate) async fn create_product_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<ProductDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.create_product(user, draft))
}

pub(crate) async fn product_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(product_id): Path<ProductId>,
) -> Response {
    let view = service.read(|store| {
        let product = store.product(product_id)?.clone();
        let event_times = store
            .event_times
            .values()
            .filter(|time| time.product == product_id)
            .cloned()
            .collect();
        Ok::<_, BookingError>(ProductView {
            product,
            event_times,
        })
    });
    match view {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn update_product_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(product_id): Path<ProductId>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<ProductDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.update_product(user, product_id, draft))
}

pub(crate) async fn product_autosend_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(product_id): Path<ProductId>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<AutosendDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.set_product_autosend(user, product_id, draft))
}

pub(crate) async fn add_requirement_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(product_id): Path<ProductId>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<RequirementDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.add_requirement(user, product_id, draft))
}

pub(crate) async fn add_event_time_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(product_id): Path<ProductId>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<EventTimeDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.add_event_time(user, product_id, draft))
}

pub(crate) async fn add_room_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<RoomDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.add_room(user, draft))
}

pub(crate) async fn add_resource_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<ResourceDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.add_resource(user, draft))
}

pub(crate) async fn delete_resource_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(resource_id): Path<ResourceId>,
    headers: HeaderMap,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.delete_resource(user, resource_id))
}

pub(crate) async fn add_pool_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<PoolDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.add_pool(user, draft))
}

pub(crate) async fn add_pool_member_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path((pool_id, resource_id)): Path<(PoolId, ResourceId)>,
    headers: HeaderMap,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.add_pool_member(user, pool_id, resource_id))
}

pub(crate) async fn remove_pool_member_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path((pool_id, resource_id)): Path<(PoolId, ResourceId)>,
    headers: HeaderMap,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.remove_pool_member(user, pool_id, resource_id))
}

pub(crate) async fn delete_requirement_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(requirement_id): Path<RequirementId>,
    headers: HeaderMap,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.delete_requirement(user, requirement_id))
}

pub(crate) async fn attach_calendar_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<CalendarRequest>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.attach_calendar(user, request.owner))
}

pub(crate) async fn add_calendar_event_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(calendar_id): Path<CalendarId>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<CalendarEventDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.add_calendar_event(user, calendar_id, draft))
}

pub(crate) async fn delete_calendar_event_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(event_id): Path<CalendarEventId>,
    headers: HeaderMap,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.delete_calendar_event(user, event_id))
}

pub(crate) async fn delete_event_time_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(time_id): Path<EventTimeId>,
    headers: HeaderMap,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.delete_event_time(user, time_id))
}

pub(crate) async fn make_visit_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(time_id): Path<EventTimeId>,
    headers: HeaderMap,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.make_visit(user, time_id))
}

pub(crate) async fn search_visits_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let visits: Vec<Visit> = service.read(|store| {
        store
            .search_visits(&query.q)
            .into_iter()
            .filter_map(|id| store.visits.get(&id).cloned())
            .collect()
    });
    (StatusCode::OK, axum::Json(visits)).into_response()
}

pub(crate) async fn visit_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(visit_id): Path<VisitId>,
) -> Response {
    let view = service.read(|store| {
        let visit = store.visit(visit_id)?.clone();
        Ok::<_, BookingError>(VisitView {
            visit,
            bookings: store
                .bookings_for_visit(visit_id)
                .into_iter()
                .cloned()
                .collect(),
            available_seats: store.visit_available_seats(visit_id),
            status_choices: store.possible_status_choices(visit_id),
            planning_blockers: store.planned_status_block_reasons(visit_id),
        })
    });
    match view {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn visit_status_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(visit_id): Path<VisitId>,
    headers: HeaderMap,
    axum::Json(change): axum::Json<StatusChange>,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.change_visit_status(user, visit_id, change.status))
}

pub(crate) async fn assign_resource_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(visit_id): Path<VisitId>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<AssignmentRequest>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.assign_resource(user, visit_id, request.resource, request.requirement))
}

pub(crate) async fn unassign_resource_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(assignment_id): Path<VisitResourceId>,
    headers: HeaderMap,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.unassign_resource(user, assignment_id))
}

pub(crate) async fn become_host_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(visit_id): Path<VisitId>,
    headers: HeaderMap,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.become_host(user, visit_id))
}

pub(crate) async fn become_teacher_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(visit_id): Path<VisitId>,
    headers: HeaderMap,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.become_teacher(user, visit_id))
}

pub(crate) async fn staffing_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(visit_id): Path<VisitId>,
    headers: HeaderMap,
    axum::Json(staffing): axum::Json<VisitStaffing>,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.update_visit_staffing(user, visit_id, staffing))
}

pub(crate) async fn visit_autosend_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(visit_id): Path<VisitId>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<AutosendDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.set_visit_autosend(user, visit_id, draft))
}

pub(crate) async fn notify_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(visit_id): Path<VisitId>,
    headers: HeaderMap,
    axum::Json(message): axum::Json<VisitMessage>,
) -> Response {
    let user = actor_or_return!(headers);
    match service.notify_visit(user, visit_id, message) {
        Ok(queued) => (StatusCode::ACCEPTED, axum::Json(json!({ "queued": queued }))).into_response(),
        Err(err) => error_response(err),
    }
}

/// Public endpoint: guests book without an account.
pub(crate) async fn book_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(visit_id): Path<VisitId>,
    axum::Json(guest): axum::Json<GuestDraft>,
) -> Response {
    let result = service.book(visit_id, guest).and_then(|id| {
        let status = service.read(|store| store.booking(id).map(|b| b.status))?;
        Ok((id, status))
    });
    match result {
        Ok((id, status)) => (
            StatusCode::CREATED,
            axum::Json(json!({ "id": id, "status": status })),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn cancel_booking_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(booking_id): Path<BookingId>,
    headers: HeaderMap,
) -> Response {
    let user = actor_or_return!(headers);
    no_content(service.cancel_booking(user, booking_id))
}

pub(crate) async fn accept_offer_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(booking_id): Path<BookingId>,
) -> Response {
    no_content(service.accept_offer(booking_id))
}

pub(crate) async fn decline_offer_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(booking_id): Path<BookingId>,
) -> Response {
    no_content(service.decline_offer(booking_id))
}

pub(crate) async fn save_template_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<EmailTemplateDraft>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.save_template(user, draft))
}

pub(crate) async fn add_log_entry_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<LogEntryRequest>,
) -> Response {
    let user = actor_or_return!(headers);
    created(service.add_log_entry(user, request.subject, request.message))
}

fn log_subject(kind: &str, id: u64) -> Option<LogSubject> {
    match kind {
        "products" => Some(LogSubject::Product(ProductId(id))),
        "visits" => Some(LogSubject::Visit(VisitId(id))),
        "bookings" => Some(LogSubject::Booking(BookingId(id))),
        "resources" => Some(LogSubject::Resource(ResourceId(id))),
        "users" => Some(LogSubject::User(UserId(id))),
        _ => None,
    }
}

pub(crate) async fn log_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path((kind, subject_id)): Path<(String, u64)>,
) -> Response {
    match log_subject(&kind, subject_id) {
        Some(subject) => (StatusCode::OK, axum::Json(service.log_entries(subject))).into_response(),
        None => error_response(BookingError::Invalid(format!("unknown log subject '{kind}'"))),
    }
}

pub(crate) async fn overview_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Query(query): Query<UnitQuery>,
) -> Response {
    (StatusCode::OK, axum::Json(service.overview(query.unit))).into_response()
}

pub(crate) async fn export_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Query(query): Query<UnitQuery>,
) -> Response {
    match service.export_visits_csv(query.unit) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn jobs_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
) -> Response {
    let jobs: Vec<_> = service
        .job_codes()
        .into_iter()
        .map(|(code, description)| {
            let last_run = service.read(|store| store.last_run(code).cloned());
            json!({ "code": code, "description": description, "last_run": last_run })
        })
        .collect();
    (StatusCode::OK, axum::Json(jobs)).into_response()
}

pub(crate) async fn run_job_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Response {
    let user = actor_or_return!(headers);
    let allowed = service.read(|store| {
        store
            .users
            .get(&user)
            .is_some_and(|profile| profile.role == UserRole::Administrator)
    });
    if !allowed {
        return error_response(BookingError::Forbidden(
            "only administrators run jobs by hand".to_string(),
        ));
    }
    match service.run_job(&code, Utc::now()) {
        Ok(run) => (StatusCode::OK, axum::Json(run)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn dispatch_handler<T: MailTransport>(
    State(service): State<Arc<BookingService<T>>>,
) -> Response {
    let report = service.dispatch_pending().await;
    (StatusCode::OK, axum::Json(report)).into_response()
}

use super::common::*;

use crate::catalog::TimeMode;
use crate::ids::UserId;
use crate::notifications::{EmailTemplateDraft, MessageStatus, TemplateKind};
use crate::profile::UserRole;
use crate::registry::UserDraft;
use crate::service::{BookingError, VisitMessage};
use crate::store::test_support::product_draft;
use crate::visits::{BookingStatus, WorkflowStatus};

fn user_draft(username: &str, role: UserRole) -> UserDraft {
    UserDraft {
        username: username.to_string(),
        full_name: username.to_string(),
        email: format!("{username}@uni.example"),
        role,
        unit: None,
        availability_text: String::new(),
    }
}

#[test]
fn unknown_actor_is_forbidden() {
    let seeded = seeded();
    let draft = product_draft("Open lab", seeded.unit, TimeMode::SpecificTimes);

    let err = seeded
        .service
        .create_product(UserId(9_999), draft)
        .expect_err("unknown user");

    assert!(matches!(err, BookingError::Forbidden(_)));
}

#[test]
fn coordinator_outside_the_unit_cannot_make_visits() {
    let seeded = seeded();

    let err = seeded
        .service
        .make_visit(seeded.outsider, seeded.time)
        .expect_err("other faculty");

    assert!(matches!(err, BookingError::Forbidden(_)));
    assert!(seeded.service.read(|store| store.visits.is_empty()));
}

#[test]
fn planning_requires_assigned_resources() {
    let seeded = seeded();
    let service = &seeded.service;
    let visit = service.make_visit(seeded.admin, seeded.time).expect("visit");

    let err = service
        .change_visit_status(seeded.admin, visit, WorkflowStatus::Planned)
        .expect_err("requirement unfulfilled");
    assert!(matches!(err, BookingError::PlanningBlocked(_)));

    service
        .assign_resource(seeded.admin, visit, seeded.pool_resources[0], seeded.requirement)
        .expect("assigned");
    service
        .change_visit_status(seeded.admin, visit, WorkflowStatus::Planned)
        .expect("planned");

    let status = service.read(|store| store.visits[&visit].workflow_status);
    assert_eq!(status, WorkflowStatus::Planned);
}

#[test]
fn faculty_editor_cannot_create_administrators() {
    let seeded = seeded();
    let mut editor = user_draft("fiona", UserRole::FacultyEditor);
    editor.unit = Some(seeded.unit);
    let editor = seeded
        .service
        .create_user(seeded.admin, editor)
        .expect("editor created");

    let err = seeded
        .service
        .create_user(editor, user_draft("mallory", UserRole::Administrator))
        .expect_err("role above own");

    assert!(matches!(err, BookingError::Forbidden(_)));
    let created = seeded
        .service
        .create_user(editor, user_draft("tom", UserRole::Teacher))
        .expect("teacher created");
    let pending = seeded.service.read(|store| store.pending_messages());
    assert!(pending
        .iter()
        .any(|m| m.kind == TemplateKind::UserCreated && m.recipient.user == Some(created)));
}

#[test]
fn global_templates_need_an_administrator() {
    let seeded = seeded();
    let draft = EmailTemplateDraft {
        kind: TemplateKind::BookingCreated,
        unit: None,
        subject: "Thanks".to_string(),
        body: "See you soon".to_string(),
    };

    let err = seeded
        .service
        .save_template(seeded.outsider, draft.clone())
        .expect_err("coordinator");
    assert!(matches!(err, BookingError::Forbidden(_)));
    seeded
        .service
        .save_template(seeded.admin, draft)
        .expect("admin saves");
}

#[tokio::test]
async fn dispatch_delivers_booking_mail() {
    let seeded = seeded();
    let service = &seeded.service;
    let visit = service.make_visit(seeded.admin, seeded.time).expect("visit");
    let booking = service
        .book(visit, guest("grace@school.example", 12))
        .expect("booked");

    let report = service.dispatch_pending().await;

    assert!(report.sent >= 1);
    assert_eq!(report.failed, 0);
    assert!(seeded
        .transport
        .delivered()
        .iter()
        .any(|m| m.recipient.email == "grace@school.example" && m.booking == Some(booking)));
    assert!(service.read(|store| store.pending_messages().is_empty()));
}

#[tokio::test]
async fn rejected_delivery_marks_message_failed() {
    let seeded = seeded();
    let service = &seeded.service;
    seeded.transport.reject("grace@school.example");
    let visit = service.make_visit(seeded.admin, seeded.time).expect("visit");
    service
        .book(visit, guest("grace@school.example", 3))
        .expect("booked");

    let report = service.dispatch_pending().await;

    assert_eq!(report.failed, 1);
    let failed = service.read(|store| {
        store
            .outbox
            .values()
            .filter(|m| matches!(m.status, MessageStatus::Failed { .. }))
            .count()
    });
    assert_eq!(failed, 1);
}

#[test]
fn hosts_may_message_their_visit() {
    let seeded = seeded();
    let service = &seeded.service;
    let visit = service.make_visit(seeded.admin, seeded.time).expect("visit");
    service.become_host(seeded.host, visit).expect("volunteered");

    let message = VisitMessage {
        subject: "Parking".to_string(),
        body: "Use the north entrance".to_string(),
        to_hosts: true,
        ..VisitMessage::default()
    };
    let queued = service
        .notify_visit(seeded.host, visit, message.clone())
        .expect("host may notify");
    assert_eq!(queued, 1);

    let err = service
        .notify_visit(seeded.outsider, visit, message)
        .expect_err("outsider");
    assert!(matches!(err, BookingError::Forbidden(_)));
}

#[test]
fn cancelling_a_booking_needs_edit_rights() {
    let seeded = seeded();
    let service = &seeded.service;
    let visit = service.make_visit(seeded.admin, seeded.time).expect("visit");
    let booking = service
        .book(visit, guest("grace@school.example", 3))
        .expect("booked");

    let err = service
        .cancel_booking(seeded.host, booking)
        .expect_err("host is no editor");
    assert!(matches!(err, BookingError::Forbidden(_)));

    service.cancel_booking(seeded.admin, booking).expect("cancelled");
    let status = service.read(|store| store.bookings[&booking].status);
    assert_eq!(status, BookingStatus::Cancelled);
}

#[test]
fn unknown_job_is_rejected() {
    let seeded = seeded();
    let now = crate::store::test_support::at(6);

    let err = seeded.service.run_job("rebuild_universe", now).expect_err("unknown");
    assert!(matches!(err, BookingError::Invalid(_)));

    let run = seeded
        .service
        .run_job("availability_consistency", now)
        .expect("known job");
    assert!(run.success);
}

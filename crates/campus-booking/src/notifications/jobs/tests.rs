use chrono::{Duration, NaiveTime, TimeZone, Utc};

use super::*;
use crate::catalog::TimeMode;
use crate::ids::ProductId;
use crate::notifications::autosend::Recipient;
use crate::notifications::template::RecipientRole;
use crate::scheduling::ResourceStatus;
use crate::store::test_support::*;
use crate::visits::GuestDraft;

fn guest() -> GuestDraft {
    GuestDraft {
        first_name: "Ada".into(),
        last_name: "Jensen".into(),
        email: "ada@school.example".into(),
        phone: "12345678".into(),
        school: "Northside".into(),
        grade_level: "8".into(),
        attendee_count: 10,
        teacher_count: 1,
    }
}

fn booked_visit() -> (Fixture, ProductId, VisitId) {
    let mut fx = Fixture::resource_controlled(0, 0);
    let product = fx.add_product(TimeMode::SpecificTimes);
    let time = fx.add_time_for(product, 10, 12);
    let visit = fx.make_visit(time);
    fx.store.book(visit, guest(), at(1)).expect("booked");
    (fx, product, visit)
}

#[test]
fn daily_schedule_is_due_once_per_day() {
    let schedule = JobSchedule::Daily(NaiveTime::from_hms_opt(1, 0, 0).expect("time"));
    let now = Utc.with_ymd_and_hms(2030, 3, 4, 1, 30, 0).unwrap();
    assert!(schedule.is_due(None, now));
    assert!(schedule.is_due(Some(now - Duration::hours(2)), now));
    assert!(!schedule.is_due(Some(now - Duration::minutes(10)), now));

    let before_slot = Utc.with_ymd_and_hms(2030, 3, 5, 0, 30, 0).unwrap();
    assert!(!schedule.is_due(Some(now), before_slot));
}

#[test]
fn interval_schedule_waits_for_the_interval() {
    let schedule = JobSchedule::Every(5);
    assert!(!schedule.is_due(Some(at(10)), at(10) + Duration::minutes(4)));
    assert!(schedule.is_due(Some(at(10)), at(10) + Duration::minutes(5)));
}

#[test]
fn event_time_job_needs_a_baseline_run() {
    let (mut fx, _product, visit) = booked_visit();
    fx.store
        .change_visit_status(visit, WorkflowStatus::PlannedNoBooking, None, at(2))
        .expect("planned");
    let runner = JobRunner::standard(730);

    let first = runner
        .run_one(NotifyEventTimeJob::CODE, &mut fx.store, at(13))
        .expect("job exists");
    assert!(first.success);
    assert_eq!(first.affected, 0);

    let second = runner
        .run_one(NotifyEventTimeJob::CODE, &mut fx.store, at(13) + Duration::minutes(1))
        .expect("job exists");
    assert_eq!(second.affected, 2);
    assert_eq!(
        fx.store.visits[&visit].workflow_status,
        WorkflowStatus::Executed
    );
}

#[test]
fn reminders_go_out_the_configured_days_before() {
    let (mut fx, _product, visit) = booked_visit();
    let runner = JobRunner::standard(730);
    let three_days_before = at(1) - Duration::days(3);

    let run = runner
        .run_one("reminders", &mut fx.store, three_days_before)
        .expect("job exists");
    assert!(run.affected >= 1);
    assert!(fx
        .store
        .messages_for_visit(visit)
        .iter()
        .any(|m| m.kind == TemplateKind::GuestReminder));

    let later = runner
        .run_one("reminders", &mut fx.store, three_days_before + Duration::days(1))
        .expect("job exists");
    assert_eq!(later.affected, 0);
}

#[test]
fn idle_host_roles_are_reported_to_editors() {
    let (mut fx, product, visit) = booked_visit();
    fx.store.products.get_mut(&product).expect("product").needed_hosts = 1;
    let runner = JobRunner::standard(730);

    let run = runner
        .run_one("idle_hostrole", &mut fx.store, at(1) + Duration::days(3))
        .expect("job exists");
    assert_eq!(run.affected, 1);
    assert!(fx
        .store
        .messages_for_visit(visit)
        .iter()
        .any(|m| m.kind == TemplateKind::HostroleIdle && m.recipient.user == Some(fx.admin)));
}

#[test]
fn evaluation_follow_up_is_sent_after_five_days() {
    let (mut fx, _product, visit) = booked_visit();
    let runner = JobRunner::standard(730);
    let run = runner
        .run_one("evaluation_reminder", &mut fx.store, at(13) + Duration::days(5))
        .expect("job exists");
    assert_eq!(run.affected, 1);
    assert!(fx
        .store
        .messages_for_visit(visit)
        .iter()
        .any(|m| m.kind == TemplateKind::EvaluationSecond));
}

#[test]
fn evaluation_follow_up_ignores_rule_days() {
    let (mut fx, product, visit) = booked_visit();
    fx.store
        .set_product_autosend(product, TemplateKind::EvaluationSecond, true, Some(2));
    let runner = JobRunner::standard(730);

    let sent_on: Vec<i64> = (1..=6)
        .filter(|day| {
            let run = runner
                .run_one("evaluation_reminder", &mut fx.store, at(13) + Duration::days(*day))
                .expect("job exists");
            run.affected > 0
        })
        .collect();

    assert_eq!(sent_on, vec![5]);
}

#[test]
fn retention_jobs_anonymize_and_delete_old_data() {
    let (mut fx, _product, _visit) = booked_visit();
    fx.store.queue_message(
        TemplateKind::BasicMailEnvelope,
        "Contact".into(),
        "Call me".into(),
        Recipient::address("Inquirer", "someone@example.org", RecipientRole::Other),
        None,
        None,
        at(0),
    );
    let runner = JobRunner::standard(30);
    let later = at(12) + Duration::days(31);

    let guests = runner
        .run_one("anonymize_guests", &mut fx.store, later)
        .expect("job exists");
    assert_eq!(guests.affected, 1);
    assert!(fx.store.guests.values().all(|g| g.anonymized));

    let emails = runner
        .run_one("anonymize_emails", &mut fx.store, later)
        .expect("job exists");
    assert!(emails.affected >= 1);

    runner
        .run_one("anonymize_inquirers", &mut fx.store, later)
        .expect("job exists");
    assert!(fx
        .store
        .outbox
        .values()
        .all(|m| m.kind != TemplateKind::BasicMailEnvelope));
    assert!(fx
        .store
        .outbox
        .values()
        .all(|m| m.anonymized && m.recipient.email.is_empty()));
}

#[test]
fn consistency_job_repairs_stale_statuses() {
    let mut fx = Fixture::resource_controlled(1, 1);
    let time = fx.add_time(10, 12);
    fx.store.event_times.get_mut(&time).expect("time").resource_status = ResourceStatus::Blocked;
    assert_eq!(fx.store.stale_event_times(at(0)), vec![time]);

    let runner = JobRunner::standard(730);
    let run = runner
        .run_one("availability_consistency", &mut fx.store, at(0))
        .expect("job exists");
    assert_eq!(run.affected, 1);
    assert_eq!(
        fx.store.event_times[&time].resource_status,
        ResourceStatus::Available
    );
}

#[test]
fn run_due_records_runs_and_skips_jobs_that_are_not_due() {
    let mut store = BookingStore::default();
    let runner = JobRunner::standard(730);
    let first = runner.run_due(&mut store, at(4));
    assert_eq!(first.len(), runner.jobs().count());
    assert!(first.iter().all(|run| run.success));

    let again = runner.run_due(&mut store, at(4) + Duration::minutes(1));
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].code, NotifyEventTimeJob::CODE);
    assert_eq!(store.last_successful_run("reminders"), Some(at(4)));
}

#[test]
fn job_log_keeps_latest_and_latest_successful_run_per_job() {
    let mut store = BookingStore::default();
    let runner = JobRunner::standard(730);
    let start = at(4);
    for minute in 0..(3 * 24 * 60) {
        runner.run_due(&mut store, start + Duration::minutes(minute));
    }
    assert!(store.job_runs.len() <= 2 * runner.jobs().count());

    let failed = JobRun {
        code: NotifyEventTimeJob::CODE.to_string(),
        started_at: start + Duration::days(4),
        finished_at: start + Duration::days(4),
        success: false,
        affected: 0,
        message: "boom".to_string(),
    };
    store.record_job_run(failed);
    let notify_runs = store
        .job_runs
        .iter()
        .filter(|run| run.code == NotifyEventTimeJob::CODE)
        .count();
    assert_eq!(notify_runs, 2);
    assert!(!store.last_run(NotifyEventTimeJob::CODE).expect("run").success);
    assert!(store.last_successful_run(NotifyEventTimeJob::CODE).is_some());
}

use std::collections::BTreeSet;

use campus_booking::catalog::{ProductDraft, ProductKind, ProductState, TimeMode};
use campus_booking::ids::{EventTimeId, ProductId, ResourceId, UnitId, UserId};
use campus_booking::organization::UnitKind;
use campus_booking::profile::UserRole;
use campus_booking::registry::{PoolDraft, RequirementDraft, ResourceDraft, UnitDraft, UserDraft};
use campus_booking::resources::ResourceKind;
use campus_booking::scheduling::{EventTimeDraft, ResourceStatus, Timestamp};
use campus_booking::visits::{BookingStatus, GuestDraft, WorkflowStatus};
use campus_booking::{BookingError, BookingStore};
use chrono::{TimeZone, Utc};

fn at(day: u32, hour: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2031, 5, day, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

struct Campus {
    store: BookingStore,
    unit: UnitId,
    coordinator: UserId,
}

fn campus() -> Campus {
    let mut store = BookingStore::default();
    let now = at(1, 8);
    let unit = store
        .add_unit(UnitDraft {
            name: "Department of Biology".to_string(),
            kind: UnitKind::Institute,
            parent: None,
        })
        .expect("unit");
    let coordinator = store
        .add_user(
            UserDraft {
                username: "carla".to_string(),
                full_name: "Carla Coordinator".to_string(),
                email: "carla@uni.example".to_string(),
                role: UserRole::Coordinator,
                unit: Some(unit),
                availability_text: String::new(),
            },
            now,
        )
        .expect("user");
    Campus {
        store,
        unit,
        coordinator,
    }
}

fn draft(unit: UnitId, time_mode: TimeMode) -> ProductDraft {
    ProductDraft {
        title: "Marine biology lab".to_string(),
        teaser: "Plankton under the microscope".to_string(),
        description: String::new(),
        unit,
        kind: ProductKind::GroupVisit,
        time_mode,
        state: ProductState::Active,
        duration_minutes: 90,
        minimum_visitors: 0,
        maximum_visitors: None,
        waiting_list_enabled: false,
        waiting_list_length: 0,
        fixed_waiting_list_capacity: None,
        rooms_needed: false,
        rooms: BTreeSet::new(),
        needed_hosts: 0,
        needed_teachers: 0,
        potential_hosts: BTreeSet::new(),
        potential_teachers: BTreeSet::new(),
        coordinator: None,
        room_responsible: Vec::new(),
    }
}

fn microscopes(campus: &mut Campus, count: usize) -> Vec<ResourceId> {
    (0..count)
        .map(|n| {
            campus
                .store
                .add_resource(
                    ResourceDraft {
                        kind: ResourceKind::Item,
                        unit: campus.unit,
                        name: format!("Microscope {n}"),
                        user: None,
                        room: None,
                        with_calendar: false,
                    },
                    at(1, 8),
                )
                .expect("resource")
        })
        .collect()
}

fn slot(store: &mut BookingStore, product: ProductId, day: u32, hour: u32) -> EventTimeId {
    store
        .add_event_time(
            product,
            EventTimeDraft {
                start: Some(at(day, hour)),
                end: Some(at(day, hour + 2)),
                bookable: true,
                ..EventTimeDraft::default()
            },
            at(1, 8),
        )
        .expect("event time")
}

#[test]
fn autoassign_exhausts_pool_and_blocks_overlapping_times() {
    let mut campus = campus();
    let now = at(1, 9);
    let resources = microscopes(&mut campus, 2);
    let pool = campus
        .store
        .add_pool(
            PoolDraft {
                kind: ResourceKind::Item,
                name: "Microscopes".to_string(),
                unit: campus.unit,
                resources: resources.iter().copied().collect(),
            },
            now,
        )
        .expect("pool");
    let product = campus
        .store
        .create_product(
            draft(campus.unit, TimeMode::ResourceControlledAutoassign),
            Some(campus.coordinator),
            now,
        )
        .expect("product");
    campus
        .store
        .add_requirement(
            product,
            RequirementDraft {
                pool,
                required_amount: 1,
            },
            now,
        )
        .expect("requirement");

    let first = slot(&mut campus.store, product, 10, 9);
    let second = slot(&mut campus.store, product, 10, 10);
    let third = slot(&mut campus.store, product, 10, 10);

    let v1 = campus.store.make_visit(first, now).expect("first visit");
    let v2 = campus.store.make_visit(second, now).expect("second visit");
    assert!(campus.store.unfulfilled_requirements(v1).is_empty());
    assert!(campus.store.unfulfilled_requirements(v2).is_empty());
    assert_eq!(
        campus.store.event_times[&first].resource_status,
        ResourceStatus::Assigned
    );
    assert_eq!(
        campus.store.event_times[&third].resource_status,
        ResourceStatus::Blocked
    );

    let v3 = campus.store.make_visit(third, now).expect("third visit");
    assert_eq!(
        campus.store.visits[&v3].workflow_status,
        WorkflowStatus::AutoassignFailed
    );

    campus
        .store
        .change_visit_status(v2, WorkflowStatus::Cancelled, Some(campus.coordinator), now)
        .expect("cancelled");
    assert!(campus.store.autoassign_resources(v3, now));
}

#[test]
fn waiting_list_moves_up_when_a_booking_is_cancelled() {
    let mut campus = campus();
    let now = at(1, 9);
    let mut product_draft = draft(campus.unit, TimeMode::SpecificTimes);
    product_draft.maximum_visitors = Some(20);
    product_draft.waiting_list_enabled = true;
    product_draft.waiting_list_length = 15;
    let product = campus
        .store
        .create_product(product_draft, Some(campus.coordinator), now)
        .expect("product");
    let time = slot(&mut campus.store, product, 12, 13);
    let visit = campus.store.make_visit(time, now).expect("visit");

    let guest = |email: &str, attendee_count: u32| GuestDraft {
        first_name: "Pat".to_string(),
        last_name: "Teacher".to_string(),
        email: email.to_string(),
        phone: String::new(),
        school: "Harbour School".to_string(),
        grade_level: "8".to_string(),
        attendee_count,
        teacher_count: 1,
    };

    let early = campus
        .store
        .book(visit, guest("early@school.example", 15), now)
        .expect("seats left");
    let late = campus
        .store
        .book(visit, guest("late@school.example", 10), now)
        .expect("waiting list");
    assert_eq!(campus.store.bookings[&late].status, BookingStatus::WaitingList);
    assert_eq!(campus.store.visit_available_seats(visit), Some(5));

    let err = campus
        .store
        .book(visit, guest("toolate@school.example", 9), now)
        .expect_err("no room left anywhere");
    assert!(matches!(err, BookingError::VisitFull(v) if v == visit));

    campus.store.cancel_booking(early, now).expect("cancel");
    assert_eq!(campus.store.bookings[&late].status, BookingStatus::SpotOffered);
    campus.store.accept_offer(late, now).expect("accept");
    assert_eq!(campus.store.bookings[&late].status, BookingStatus::Booked);
    assert_eq!(campus.store.visit_attendee_count(visit), 10);
}

#[test]
fn event_times_accept_human_readable_intervals() {
    let mut campus = campus();
    let now = at(1, 9);
    let product = campus
        .store
        .create_product(draft(campus.unit, TimeMode::SpecificTimes), None, now)
        .expect("product");

    let time = campus
        .store
        .add_event_time(
            product,
            EventTimeDraft {
                interval: Some("24.03.2031 10:00 - 12:00".to_string()),
                bookable: true,
                ..EventTimeDraft::default()
            },
            now,
        )
        .expect("parsed");
    let event_time = &campus.store.event_times[&time];
    assert_eq!(
        event_time.start,
        Utc.with_ymd_and_hms(2031, 3, 24, 10, 0, 0).single()
    );

    let err = campus
        .store
        .add_event_time(
            product,
            EventTimeDraft {
                interval: Some("next tuesday-ish".to_string()),
                ..EventTimeDraft::default()
            },
            now,
        )
        .expect_err("unreadable");
    assert!(matches!(err, BookingError::Invalid(_)));
}

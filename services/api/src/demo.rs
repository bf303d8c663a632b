use campus_booking::catalog::{ProductDraft, ProductKind, ProductState, TimeMode};
use campus_booking::error::AppError;
use campus_booking::ids::{UnitId, UserId};
use campus_booking::notifications::LogMailTransport;
use campus_booking::organization::UnitKind;
use campus_booking::profile::UserRole;
use campus_booking::registry::{PoolDraft, RequirementDraft, ResourceDraft, UnitDraft, UserDraft};
use campus_booking::resources::ResourceKind;
use campus_booking::scheduling::EventTimeDraft;
use campus_booking::visits::{GuestDraft, WorkflowStatus};
use campus_booking::{BookingService, BookingStore};
use chrono::{Duration, NaiveTime, Utc};
use clap::Args;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Number of school classes booking the sample visit.
    #[arg(long, default_value_t = 3)]
    pub(crate) classes: u32,
    /// Write the resulting store to this snapshot file.
    #[arg(long)]
    pub(crate) save: Option<PathBuf>,
}

fn bootstrap(now: chrono::DateTime<Utc>) -> Result<(BookingStore, UnitId, UserId), AppError> {
    let mut store = BookingStore::default();
    store.seed_default_templates();
    let unit = store.add_unit(UnitDraft {
        name: "Faculty of Science".to_string(),
        kind: UnitKind::Faculty,
        parent: None,
    })?;
    let admin = store.add_user(
        UserDraft {
            username: "admin".to_string(),
            full_name: "Demo Administrator".to_string(),
            email: "admin@campus.example".to_string(),
            role: UserRole::Administrator,
            unit: Some(unit),
            availability_text: String::new(),
        },
        now,
    )?;
    Ok((store, unit, admin))
}

fn lab_tour(unit: UnitId) -> ProductDraft {
    ProductDraft {
        title: "Microscopy lab tour".to_string(),
        teaser: "See cells divide under the microscope".to_string(),
        description: "A guided afternoon in the teaching laboratory.".to_string(),
        unit,
        kind: ProductKind::GroupVisit,
        time_mode: TimeMode::ResourceControlledAutoassign,
        state: ProductState::Active,
        duration_minutes: 120,
        minimum_visitors: 5,
        maximum_visitors: Some(60),
        waiting_list_enabled: true,
        waiting_list_length: 30,
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

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let now = Utc::now();
    let (store, unit, admin) = bootstrap(now)?;
    let service = BookingService::new(store, Arc::new(LogMailTransport), 365);

    let microscopes = (1..=4)
        .map(|n| {
            service.add_resource(
                admin,
                ResourceDraft {
                    kind: ResourceKind::Item,
                    unit,
                    name: format!("Microscope {n}"),
                    user: None,
                    room: None,
                    with_calendar: false,
                },
            )
        })
        .collect::<Result<BTreeSet<_>, _>>()?;
    let pool = service.add_pool(
        admin,
        PoolDraft {
            kind: ResourceKind::Item,
            name: "Teaching microscopes".to_string(),
            unit,
            resources: microscopes,
        },
    )?;
    let product = service.create_product(admin, lab_tour(unit))?;
    service.add_requirement(
        admin,
        product,
        RequirementDraft {
            pool,
            required_amount: 2,
        },
    )?;

    let day = (now + Duration::days(7)).date_naive();
    let start = day
        .and_time(NaiveTime::from_hms_opt(13, 0, 0).unwrap_or(NaiveTime::MIN))
        .and_utc();
    let times = [0, 0, 0]
        .into_iter()
        .map(|offset: i64| {
            service.add_event_time(
                admin,
                product,
                EventTimeDraft {
                    start: Some(start + Duration::hours(offset)),
                    end: Some(start + Duration::hours(offset + 2)),
                    bookable: true,
                    ..EventTimeDraft::default()
                },
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    println!("Campus booking demo");
    println!("- product #{product} with {} parallel slots on {day}", times.len());

    let mut visits = Vec::new();
    for time in &times {
        let visit = service.make_visit(admin, *time)?;
        let status = service.read(|store| store.visits.get(&visit).map(|v| v.workflow_status.label()));
        println!("- visit #{visit} for slot #{time}: {}", status.unwrap_or("unknown"));
        visits.push(visit);
    }

    let first = visits[0];
    for class in 1..=args.classes {
        let booking = service.book(
            first,
            GuestDraft {
                first_name: format!("Class {class}"),
                last_name: "Teacher".to_string(),
                email: format!("class{class}@school.example"),
                phone: String::new(),
                school: "Lakeside Secondary".to_string(),
                grade_level: "11".to_string(),
                attendee_count: 24,
                teacher_count: 1,
            },
        )?;
        let status = service.read(|store| store.bookings.get(&booking).map(|b| b.status.label()));
        println!("- booking #{booking}: {}", status.unwrap_or("unknown"));
    }

    match service.change_visit_status(admin, first, WorkflowStatus::Planned) {
        Ok(()) => println!("- visit #{first} planned"),
        Err(err) => println!("- visit #{first} not planned: {err}"),
    }

    let runs = service.run_due_jobs(now);
    let report = service.dispatch_pending().await;
    println!("- {} jobs ran, {} mails delivered to the log", runs.len(), report.sent);

    let overview = service.overview(Some(unit));
    println!("\nStatus overview");
    for count in &overview.status_counts {
        println!("- {:<20} {}", count.status_label, count.visits);
    }
    println!("- blocked slots: {}", overview.blocked_event_times.len());

    if let Some(path) = args.save {
        service.save_snapshot(&path)?;
        println!("\nSnapshot written to {}", path.display());
    }
    Ok(())
}

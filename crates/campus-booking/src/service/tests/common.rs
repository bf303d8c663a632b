use std::sync::Arc;

use axum::response::Response;
use serde_json::Value;

use crate::ids::{EventTimeId, ProductId, RequirementId, ResourceId, UnitId, UserId};
use crate::notifications::MemoryMailTransport;
use crate::organization::{OrganizationalUnit, UnitKind};
use crate::profile::UserRole;
use crate::service::BookingService;
use crate::store::test_support::Fixture;
use crate::visits::GuestDraft;

pub(super) struct Seeded {
    pub(super) service: Arc<BookingService<MemoryMailTransport>>,
    pub(super) transport: Arc<MemoryMailTransport>,
    pub(super) unit: UnitId,
    pub(super) admin: UserId,
    pub(super) host: UserId,
    pub(super) outsider: UserId,
    pub(super) product: ProductId,
    pub(super) requirement: RequirementId,
    pub(super) pool_resources: Vec<ResourceId>,
    pub(super) time: EventTimeId,
}

/// A science faculty with a resource-controlled lab tour needing one of two
/// microscopes, plus a coordinator from an unrelated faculty.
pub(super) fn seeded() -> Seeded {
    let mut fx = Fixture::resource_controlled(2, 1);
    let time = fx.add_time(10, 12);
    let host = fx.add_user("hannah", UserRole::Host);
    if let Some(product) = fx.store.products.get_mut(&fx.product) {
        product.potential_hosts.insert(host);
    }

    let arts = UnitId(fx.store.next_id());
    fx.store.units.insert(
        arts,
        OrganizationalUnit {
            id: arts,
            name: "Faculty of Arts".to_string(),
            kind: UnitKind::Faculty,
            parent: None,
        },
    );
    let outsider = fx.add_user("oscar", UserRole::Coordinator);
    if let Some(profile) = fx.store.users.get_mut(&outsider) {
        profile.unit = Some(arts);
    }

    let transport = Arc::new(MemoryMailTransport::default());
    let service = Arc::new(BookingService::new(fx.store, transport.clone(), 365));
    Seeded {
        service,
        transport,
        unit: fx.unit,
        admin: fx.admin,
        host,
        outsider,
        product: fx.product,
        requirement: fx.requirement,
        pool_resources: fx.pool_resources,
        time,
    }
}

pub(super) fn guest(email: &str, attendee_count: u32) -> GuestDraft {
    GuestDraft {
        first_name: "Grace".to_string(),
        last_name: "Guest".to_string(),
        email: email.to_string(),
        phone: String::new(),
        school: "Riverside Gymnasium".to_string(),
        grade_level: "10".to_string(),
        attendee_count,
        teacher_count: 1,
    }
}

pub(super) async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

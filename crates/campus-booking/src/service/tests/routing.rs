use super::common::*;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use crate::notifications::MemoryMailTransport;
use crate::service::booking_router;
use crate::service::router::{book_handler, ACTOR_HEADER};

fn post_json(uri: &str, actor: Option<u64>, body: serde_json::Value) -> axum::http::Request<axum::body::Body> {
    let mut request = axum::http::Request::post(uri)
        .header(axum::http::header::CONTENT_TYPE, "application/json");
    if let Some(actor) = actor {
        request = request.header(ACTOR_HEADER, actor.to_string());
    }
    request
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn book_handler_reports_booking_status() {
    let seeded = seeded();
    let visit = seeded
        .service
        .make_visit(seeded.admin, seeded.time)
        .expect("visit");

    let response = book_handler::<MemoryMailTransport>(
        State(seeded.service.clone()),
        Path(visit),
        axum::Json(guest("grace@school.example", 4)),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = json_body(response).await;
    assert_eq!(payload["status"], "booked");
}

#[tokio::test]
async fn book_handler_rejects_empty_groups() {
    let seeded = seeded();
    let visit = seeded
        .service
        .make_visit(seeded.admin, seeded.time)
        .expect("visit");

    let response = book_handler::<MemoryMailTransport>(
        State(seeded.service.clone()),
        Path(visit),
        axum::Json(guest("grace@school.example", 0)),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn router_requires_actor_header() {
    let seeded = seeded();
    let router = booking_router(seeded.service.clone());

    let response = router
        .oneshot(post_json(
            &format!("/api/v1/event-times/{}/visit", seeded.time),
            None,
            json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let payload = json_body(response).await;
    assert!(payload["error"].as_str().unwrap().contains(ACTOR_HEADER));
}

#[tokio::test]
async fn router_creates_visit_and_changes_status() {
    let seeded = seeded();
    let router = booking_router(seeded.service.clone());

    let response = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/event-times/{}/visit", seeded.time),
            Some(seeded.admin.0),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let visit = json_body(response).await["id"].as_u64().unwrap();

    let response = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/visits/{visit}/status"),
            Some(seeded.admin.0),
            json!({ "status": "planned" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = router
        .oneshot(post_json(
            &format!("/api/v1/visits/{visit}/status"),
            Some(seeded.admin.0),
            json!({ "status": "cancelled" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn router_returns_not_found_for_missing_visit() {
    let seeded = seeded();
    let router = booking_router(seeded.service.clone());

    let response = router
        .oneshot(
            axum::http::Request::get("/api/v1/visits/424242")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn export_serves_csv() {
    let seeded = seeded();
    seeded
        .service
        .make_visit(seeded.admin, seeded.time)
        .expect("visit");
    let router = booking_router(seeded.service.clone());

    let response = router
        .oneshot(
            axum::http::Request::get(format!("/api/v1/export/visits.csv?unit={}", seeded.unit))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    let text = String::from_utf8(body.to_vec()).expect("utf-8");
    assert!(text.starts_with("id,product,start,end,status"));
    assert_eq!(text.lines().count(), 2);
}

//! Server gateway heartbeat: liveness updates and join delivery.

mod common;

use actix_web::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::Value;

use common::{active_server, app, get, harness, join_record, seed_join, seed_server, server_by_key};
use rallypoint::model::server::ServerState;
use rallypoint::model::JoinRecord;
use rallypoint::store::{put_entity, query_all, Entity, Query};

#[actix_web::test]
async fn heartbeat_updates_server_and_delivers_pending_joins() {
    let h = harness();
    let app = app(&h).await;

    let mut server = active_server("s1", "na", 2, 4);
    server.check_time = Utc::now() - Duration::seconds(30);
    let server_key = seed_server(&h, &server).await;

    seed_join(&h, &join_record("u1", "s1", "join-1")).await;
    seed_join(&h, &join_record("u2", "s1", "join-2")).await;
    let mut delivered = join_record("u3", "s1", "join-3");
    delivered.checked = true;
    seed_join(&h, &delivered).await;
    seed_join(&h, &join_record("u4", "other", "join-4")).await;

    let (status, body) = get(
        &app,
        "/heartbeat?ServerID=s1&ServerState=1&PlayerCount=3&MaxPlayerCount=4",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let body: Value = serde_json::from_slice(&body).unwrap();
    let info = body["JoinInfo"].as_array().unwrap();
    assert_eq!(info.len(), 2);
    let mut users: Vec<&str> = info
        .iter()
        .map(|j| j["UserID"].as_str().unwrap())
        .collect();
    users.sort();
    assert_eq!(users, ["u1", "u2"]);
    assert!(info
        .iter()
        .any(|j| j["JoinToken"].as_str() == Some("join-1")));

    let updated = server_by_key(&h, server_key).await;
    assert_eq!(updated.state, ServerState::Active);
    assert_eq!(updated.player_count, 3);
    assert_eq!(updated.max_player_count, 4);
    assert!((updated.fill - 0.75).abs() < 1e-6);
    assert!((Utc::now() - updated.check_time).num_seconds() < 10);

    // Delivery is recorded before the response: every s1 record is now
    // checked, so a second heartbeat carries nothing.
    let records = query_all::<JoinRecord>(h.store.as_ref(), &Query::new(JoinRecord::KIND))
        .await
        .unwrap();
    assert!(records
        .iter()
        .filter(|(_, r)| r.server_id == "s1")
        .all(|(_, r)| r.checked));

    let (status, body) = get(
        &app,
        "/heartbeat?ServerID=s1&ServerState=1&PlayerCount=3&MaxPlayerCount=4",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["JoinInfo"].as_array().unwrap().len(), 0);
}

#[actix_web::test]
async fn heartbeat_rejects_unknown_servers_and_bad_args() {
    let h = harness();
    let app = app(&h).await;

    let (status, _) = get(
        &app,
        "/heartbeat?ServerID=ghost&ServerState=1&PlayerCount=0&MaxPlayerCount=4",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    seed_server(&h, &active_server("s1", "na", 0, 4)).await;

    let (status, _) = get(
        &app,
        "/heartbeat?ServerID=s1&ServerState=1&PlayerCount=abc&MaxPlayerCount=4",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(
        &app,
        "/heartbeat?ServerID=s1&ServerState=9&PlayerCount=0&MaxPlayerCount=4",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn checked_flag_is_monotonic_across_redeliveries() {
    let h = harness();
    let app = app(&h).await;

    seed_server(&h, &active_server("s1", "na", 1, 4)).await;
    let key = seed_join(&h, &join_record("u1", "s1", "join-1")).await;

    let (status, _) = get(
        &app,
        "/heartbeat?ServerID=s1&ServerState=1&PlayerCount=1&MaxPlayerCount=4",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // A competing writer updating other fields keeps the flag set.
    let mut record: JoinRecord = rallypoint::store::get_entity(h.store.as_ref(), key)
        .await
        .unwrap();
    assert!(record.checked);
    record.region = "na".to_string();
    put_entity(h.store.as_ref(), Some(key), &record).await.unwrap();

    let record: JoinRecord = rallypoint::store::get_entity(h.store.as_ref(), key)
        .await
        .unwrap();
    assert!(record.checked);
}

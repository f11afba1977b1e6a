//! End-to-end flows: the client drives /enqueue and /poll while the test
//! plays the role of the task queue, redelivering recorded tasks with an
//! increasing attempt counter.

mod common;

use actix_web::http::StatusCode;
use serde_json::Value;

use common::{active_server, app, enqueue_uri, get, get_text, harness, post_task, seed_server};

#[actix_web::test]
async fn empty_fleet_fails_matchmaking_after_retries() {
    let h = harness();
    let app = app(&h).await;

    let (status, token) = get_text(&app, &enqueue_uri("u1", "na")).await;
    assert_eq!(status, StatusCode::OK);

    let tasks = h.tasks.drain();
    assert_eq!(tasks.len(), 1);
    let form: Vec<(&str, &str)> = tasks[0]
        .form
        .iter()
        .map(|(k, v)| (*k, v.as_str()))
        .collect();

    // The queue redelivers against an empty fleet until attempts run out.
    for attempts in 0..=5 {
        let status = post_task(&app, tasks[0].path, &form, attempts).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
    let status = post_task(&app, tasks[0].path, &form, 6).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&app, &format!("/poll?QueryToken={token}")).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["Status"], 3);
}

#[actix_web::test]
async fn queued_player_lands_on_a_server_and_the_server_learns_of_it() {
    let h = harness();
    let app = app(&h).await;

    seed_server(&h, &active_server("s1", "na", 2, 4)).await;

    let (status, token) = get_text(&app, &enqueue_uri("u1", "na")).await;
    assert_eq!(status, StatusCode::OK);

    let tasks = h.tasks.drain();
    assert_eq!(tasks.len(), 1);
    let form: Vec<(&str, &str)> = tasks[0]
        .form
        .iter()
        .map(|(k, v)| (*k, v.as_str()))
        .collect();
    let status = post_task(&app, tasks[0].path, &form, 0).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&app, &format!("/poll?QueryToken={token}")).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["Status"], 1);
    let join_token = body["JoinToken"].as_str().unwrap().to_string();
    assert!(!join_token.is_empty());
    let address = body["ServerAddress"].as_str().unwrap();
    assert!(!address.is_empty());
    assert_eq!(body["ServerPort"], 7777);

    // The server's next heartbeat reports the bumped count and picks up
    // the pending join; the one after carries nothing.
    let (status, body) = get(
        &app,
        "/heartbeat?ServerID=s1&ServerState=1&PlayerCount=3&MaxPlayerCount=4",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    let info = body["JoinInfo"].as_array().unwrap();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0]["UserID"], "u1");
    assert_eq!(info[0]["JoinToken"], join_token.as_str());

    let (_, body) = get(
        &app,
        "/heartbeat?ServerID=s1&ServerState=1&PlayerCount=3&MaxPlayerCount=4",
    )
    .await;
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["JoinInfo"].as_array().unwrap().len(), 0);
}

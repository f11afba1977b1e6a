#![allow(dead_code)]

//! Shared harness: the actix service wired to in-memory collaborators.

use std::sync::Arc;

use actix_http::Request;
use actix_web::body::BoxBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::{test, web, App, Error};
use chrono::Utc;
use uuid::Uuid;

use rallypoint::cache::{Cache, MemCache};
use rallypoint::http::routes;
use rallypoint::identity::SharedSecretVerifier;
use rallypoint::model::player::{self, Player};
use rallypoint::model::server::{GameServer, ServerState};
use rallypoint::model::JoinRecord;
use rallypoint::provider::FakeProvider;
use rallypoint::state::AppState;
use rallypoint::storage::MemObjectStore;
use rallypoint::store::{get_entity, put_entity, MemStore};
use rallypoint::tasks::RecordingQueue;

/// Ticket accepted by the harness verifier.
pub const TICKET: &str = "test-ticket";
pub const RETRY_HEADER: &str = "X-Task-Retry-Count";

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemStore>,
    pub cache: Arc<MemCache>,
    pub tasks: Arc<RecordingQueue>,
    pub provider: Arc<FakeProvider>,
    pub storage: Arc<MemObjectStore>,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemStore::new());
    let cache = Arc::new(MemCache::new());
    let tasks = Arc::new(RecordingQueue::new());
    let provider = Arc::new(FakeProvider::new());
    let storage = Arc::new(MemObjectStore::new());

    let state = AppState {
        store: store.clone(),
        cache: cache.clone(),
        tasks: tasks.clone(),
        provider: provider.clone(),
        identity: Arc::new(SharedSecretVerifier::new(TICKET)),
        storage: storage.clone(),
    };
    Harness {
        state,
        store,
        cache,
        tasks,
        provider,
        storage,
    }
}

pub async fn app(
    harness: &Harness,
) -> impl Service<Request, Response = ServiceResponse<BoxBody>, Error = Error> {
    test::init_service(
        App::new()
            .app_data(web::Data::new(harness.state.clone()))
            .configure(routes::init_routes),
    )
    .await
}

pub async fn get<S>(app: &S, uri: &str) -> (StatusCode, Vec<u8>)
where
    S: Service<Request, Response = ServiceResponse<BoxBody>, Error = Error>,
{
    let resp = test::call_service(app, test::TestRequest::get().uri(uri).to_request()).await;
    let status = resp.status();
    let body = test::read_body(resp).await;
    (status, body.to_vec())
}

pub async fn get_text<S>(app: &S, uri: &str) -> (StatusCode, String)
where
    S: Service<Request, Response = ServiceResponse<BoxBody>, Error = Error>,
{
    let (status, body) = get(app, uri).await;
    (status, String::from_utf8_lossy(&body).to_string())
}

/// Deliver a task the way the queue would: form POST plus retry header.
pub async fn post_task<S>(
    app: &S,
    path: &str,
    form: &[(&str, &str)],
    attempts: i32,
) -> StatusCode
where
    S: Service<Request, Response = ServiceResponse<BoxBody>, Error = Error>,
{
    let form: Vec<(String, String)> = form
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let req = test::TestRequest::post()
        .uri(path)
        .insert_header((RETRY_HEADER, attempts.to_string()))
        .set_form(&form)
        .to_request();
    test::call_service(app, req).await.status()
}

pub fn enqueue_uri(user_id: &str, region: &str) -> String {
    format!("/enqueue?UserID={user_id}&AuthToken={TICKET}&Region={region}")
}

pub fn active_server(uuid: &str, region: &str, players: i32, max: i32) -> GameServer {
    let now = Utc::now();
    let mut server = GameServer {
        uuid: uuid.to_string(),
        address: format!("10.0.0.{}", (players + 1).clamp(1, 250)),
        port: 7777,
        region: region.to_string(),
        state: ServerState::Active,
        creation_time: now,
        check_time: now,
        player_count: players,
        max_player_count: max,
        fill: 0.0,
    };
    server.recompute_fill();
    server
}

pub async fn seed_server(harness: &Harness, server: &GameServer) -> Uuid {
    put_entity(harness.store.as_ref(), None, server)
        .await
        .unwrap()
}

pub async fn seed_player(harness: &Harness, player: &Player) -> Uuid {
    put_entity(harness.store.as_ref(), None, player)
        .await
        .unwrap()
}

pub async fn seed_join(harness: &Harness, join: &JoinRecord) -> Uuid {
    put_entity(harness.store.as_ref(), None, join)
        .await
        .unwrap()
}

pub fn queued_player(user_id: &str, mm_tok: &str) -> Player {
    Player::new(user_id, mm_tok)
}

pub fn join_record(user_id: &str, server_id: &str, token: &str) -> JoinRecord {
    JoinRecord {
        user_id: user_id.to_string(),
        server_id: server_id.to_string(),
        region: "na".to_string(),
        join_token: token.to_string(),
        creation_time: Utc::now(),
        checked: false,
    }
}

pub async fn player_by_token(harness: &Harness, mm_tok: &str) -> Option<(Uuid, Player)> {
    player::find_by(harness.store.as_ref(), "MMTok", mm_tok)
        .await
        .unwrap()
}

pub async fn player_by_user(harness: &Harness, user_id: &str) -> Option<(Uuid, Player)> {
    player::find_by(harness.store.as_ref(), "UserID", user_id)
        .await
        .unwrap()
}

pub async fn server_by_key(harness: &Harness, key: Uuid) -> GameServer {
    get_entity(harness.store.as_ref(), key).await.unwrap()
}

pub async fn counter(harness: &Harness, region: &str) -> Option<String> {
    harness
        .cache
        .get(&format!(
            "{}{region}",
            rallypoint::http::fleet::ACTIVE_ALLOCATIONS_KEY
        ))
        .await
        .unwrap()
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
}

pub async fn last_server_hint(harness: &Harness, region: &str) -> Option<String> {
    harness
        .cache
        .get(&format!(
            "{}{region}",
            rallypoint::http::joinmatch::LAST_SERVER_KEY
        ))
        .await
        .unwrap()
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
}

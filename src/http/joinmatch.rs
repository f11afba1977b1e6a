//! Deferred join task: pick a server for a queued player and issue the
//! join token. Delivered by the task queue with at-least-once semantics;
//! 2xx drops the task, anything else redelivers it.

use actix_web::{post, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::CoordError;
use crate::model::player::{self, QueueStatus};
use crate::model::server::{self, GameServer, ServerState};
use crate::model::{JoinRecord, Region};
use crate::state::AppState;
use crate::store::{get_entity, put_entity};
use crate::tasks::task_attempts;

/// Give up on a vanished player after this many redeliveries (possible if
/// the player dequeued before the first join attempt).
const USER_NOT_FOUND_RETRIES: i32 = 3;
/// After this many redeliveries without a server, matchmaking fails.
const NO_SERVER_RETRIES: i32 = 5;

/// Cache key prefix pinning the last chosen server per region.
pub const LAST_SERVER_KEY: &str = "Matchmaker-LastServer";

#[derive(Deserialize)]
struct JoinForm {
    mmtok: String,
    region: String,
}

#[post("/joinmatch")]
async fn join_match(
    req: HttpRequest,
    form: web::Form<JoinForm>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, CoordError> {
    let Some(attempts) = task_attempts(&req) else {
        log::error!("joinmatch: missing retry header, dropping task");
        return Ok(HttpResponse::Ok().finish());
    };
    let region: Region = form
        .region
        .parse()
        .map_err(CoordError::InvalidArgument)?;

    log::debug!(
        "joinmatch: handling join for {} in region {region} (attempt {attempts})",
        form.mmtok
    );

    let found = player::find_by(state.store.as_ref(), "MMTok", &form.mmtok).await?;
    let Some((player_key, mut player)) = found else {
        if attempts >= USER_NOT_FOUND_RETRIES {
            log::error!("joinmatch: out of attempts to find token {}", form.mmtok);
            return Ok(HttpResponse::Ok().finish());
        }
        return Err(CoordError::NotFound("token not found".into()));
    };

    if player.status != QueueStatus::InQueue {
        // Player moved on (cancelled, or a racing task already joined).
        return Ok(HttpResponse::Ok().finish());
    }

    if attempts > NO_SERVER_RETRIES {
        player.status = QueueStatus::Failed;
        put_entity(state.store.as_ref(), Some(player_key), &player).await?;
        log::error!("joinmatch: matchmaking failed for {}", form.mmtok);
        return Ok(HttpResponse::Ok().finish());
    }

    let (server_key, mut server) = select_server(&state, region).await?;

    server.player_count += 1;
    server.recompute_fill();
    if server.player_count >= server.max_player_count {
        // Full now; stop pointing new join tasks at it.
        evict_last_server(&state, region).await;
    }
    put_entity(state.store.as_ref(), Some(server_key), &server).await?;

    let join_token = Uuid::new_v4().to_string();
    let join = JoinRecord {
        user_id: player.user_id.clone(),
        server_id: server.uuid.clone(),
        region: region.as_str().to_string(),
        join_token: join_token.clone(),
        creation_time: Utc::now(),
        checked: false,
    };
    put_entity(state.store.as_ref(), None, &join).await?;

    player.status = QueueStatus::JoinedMatch;
    player.join_tok = join_token;
    player.server_addr = server.address.clone();
    player.server_port = server.port;
    put_entity(state.store.as_ref(), Some(player_key), &player).await?;

    log::info!(
        "joinmatch: user {} ({}) joined server {} ({}, {})",
        form.mmtok,
        player.user_id,
        server.uuid,
        server.address,
        server.port
    );
    Ok(HttpResponse::Ok().body(format!(
        "{} ({}) joined {} ({}, {})",
        form.mmtok, player.user_id, server.uuid, server.address, server.port
    )))
}

/// Two-tier selection: the cached last server for the region if it is still
/// active and has room, otherwise the store query (partial servers first,
/// then a cold one), pinning the result for the next burst of join tasks.
async fn select_server(
    state: &AppState,
    region: Region,
) -> Result<(Uuid, GameServer), CoordError> {
    let cache_key = format!("{LAST_SERVER_KEY}{region}");

    if let Some(key) = cached_server_key(state, &cache_key).await {
        match get_entity::<GameServer>(state.store.as_ref(), key).await {
            Ok(server)
                if server.state == ServerState::Active
                    && server.player_count < server.max_player_count =>
            {
                return Ok((key, server));
            }
            Ok(_) | Err(crate::store::StoreError::NotFound) => {
                // Stale hint; drop it and fall through to the store query.
                evict_last_server(state, region).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let found = match server::find_joinable(state.store.as_ref(), region, true).await? {
        Some(hit) => Some(hit),
        None => server::find_joinable(state.store.as_ref(), region, false).await?,
    };
    let Some((key, server)) = found else {
        log::error!("joinmatch: no available servers in {region}");
        return Err(CoordError::NoServer);
    };
    if server.player_count >= server.max_player_count {
        // The fill filter can still surface a full server; retry the task.
        return Err(CoordError::Internal("retrieved server full".into()));
    }

    if let Err(e) = state.cache.set(&cache_key, key.to_string().as_bytes()).await {
        log::error!("joinmatch: caching last server: {e}");
    }
    Ok((key, server))
}

async fn cached_server_key(state: &AppState, cache_key: &str) -> Option<Uuid> {
    match state.cache.get(cache_key).await {
        Ok(Some(bytes)) => std::str::from_utf8(&bytes).ok()?.parse().ok(),
        Ok(None) => None,
        Err(e) => {
            // Cache trouble is never fatal; behave like a miss.
            log::error!("joinmatch: reading last server: {e}");
            None
        }
    }
}

async fn evict_last_server(state: &AppState, region: Region) {
    let cache_key = format!("{LAST_SERVER_KEY}{region}");
    if let Err(e) = state.cache.delete(&cache_key).await {
        log::error!("joinmatch: evicting last server: {e}");
    }
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(join_match);
}

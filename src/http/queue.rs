//! Client-facing matchmaking endpoints: enqueue, poll, dequeue.

use std::time::Duration;

use actix_web::{get, web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoordError;
use crate::model::player::{self, Player, QueueStatus, RECORD_EXPIRY_SECS, REQUEUE_GRACE_SECS};
use crate::model::Region;
use crate::state::AppState;
use crate::store::put_entity;

/// Best-effort gap between enqueue and the first join attempt.
const JOIN_DELAY: Duration = Duration::from_secs(1);

#[derive(Deserialize)]
struct EnqueueQuery {
    #[serde(rename = "UserID")]
    user_id: String,
    #[serde(rename = "AuthToken")]
    auth_token: String,
    #[serde(rename = "Region")]
    region: String,
}

#[derive(Deserialize)]
struct TokenQuery {
    #[serde(rename = "QueryToken")]
    query_token: String,
}

#[derive(Serialize)]
struct PollBody {
    #[serde(rename = "Status")]
    status: QueueStatus,
}

#[derive(Serialize)]
struct PollFullBody {
    #[serde(rename = "Status")]
    status: QueueStatus,
    #[serde(rename = "JoinToken")]
    join_token: String,
    #[serde(rename = "ServerAddress")]
    server_address: String,
    #[serde(rename = "ServerPort")]
    server_port: i32,
}

#[get("/enqueue")]
async fn enqueue(
    query: web::Query<EnqueueQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, CoordError> {
    let region: Region = query
        .region
        .parse()
        .map_err(CoordError::InvalidArgument)?;

    if !state
        .identity
        .verify(&query.user_id, &query.auth_token)
        .await?
    {
        log::error!("enqueue: invalid auth ticket for {}", query.user_id);
        return Err(CoordError::Unauthorized("invalid auth token".into()));
    }

    let existing = player::find_by(state.store.as_ref(), "UserID", &query.user_id).await?;

    let mmtok = match existing {
        None => {
            let player = Player::new(query.user_id.as_str(), Uuid::new_v4().to_string());
            let mmtok = player.mm_tok.clone();
            put_entity(state.store.as_ref(), None, &player).await?;
            schedule_join(&state, &mmtok, region).await?;
            log::info!(
                "enqueue: added user {} with token {mmtok} in region {region}",
                query.user_id
            );
            mmtok
        }
        Some((key, mut player)) => {
            // Reconnecting. A player already in queue may refresh at any
            // time; leaving a terminal state needs the full requeue grace.
            let elapsed = Utc::now() - player.check_time;
            let can_requeue = elapsed.num_seconds() >= REQUEUE_GRACE_SECS;
            let acceptable = player.status == QueueStatus::InQueue || can_requeue;

            if !acceptable {
                log::info!(
                    "enqueue: user {} not requeueable (status {:?}, last check {}s ago)",
                    player.user_id,
                    player.status,
                    elapsed.num_seconds()
                );
                return Err(CoordError::Conflict("not requeueable yet".into()));
            }

            let mmtok = player.mm_tok.clone();
            player.check_time = Utc::now();
            if can_requeue {
                player.status = QueueStatus::InQueue;
                put_entity(state.store.as_ref(), Some(key), &player).await?;
                schedule_join(&state, &mmtok, region).await?;
                log::info!("enqueue: requeued user {} with token {mmtok}", player.user_id);
            } else {
                put_entity(state.store.as_ref(), Some(key), &player).await?;
            }
            mmtok
        }
    };

    Ok(HttpResponse::Ok().body(mmtok))
}

#[get("/poll")]
async fn poll(
    query: web::Query<TokenQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, CoordError> {
    let found = player::find_by(state.store.as_ref(), "MMTok", &query.query_token).await?;
    let Some((key, mut player)) = found else {
        return Err(CoordError::NotFound("matchmaker token not found".into()));
    };

    if player.status == QueueStatus::InQueue {
        // Only a still-waiting player counts as interacting.
        player.check_time = Utc::now();
        put_entity(state.store.as_ref(), Some(key), &player).await?;
    }

    let response = if player.status == QueueStatus::JoinedMatch {
        HttpResponse::Ok().json(PollFullBody {
            status: player.status,
            join_token: player.join_tok.clone(),
            server_address: player.server_addr.clone(),
            server_port: player.server_port,
        })
    } else {
        HttpResponse::Ok().json(PollBody {
            status: player.status,
        })
    };
    log::info!(
        "poll: user {} ({}): {:?}",
        player.user_id,
        player.mm_tok,
        player.status
    );
    Ok(response)
}

#[get("/dequeue")]
async fn dequeue(
    query: web::Query<TokenQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, CoordError> {
    let found = player::find_by(state.store.as_ref(), "MMTok", &query.query_token).await?;
    let Some((key, mut player)) = found else {
        return Err(CoordError::NotFound("matchmaker token not found".into()));
    };

    if player.status != QueueStatus::Cancelled {
        player.status = QueueStatus::Cancelled;
        // Backdate past the expiry window so the next sweep removes it.
        player.check_time = Utc::now() - chrono::Duration::seconds(RECORD_EXPIRY_SECS + 60);
        put_entity(state.store.as_ref(), Some(key), &player).await?;
        log::info!(
            "dequeue: marked user {} with token {} as cancelled",
            player.user_id,
            player.mm_tok
        );
    }

    Ok(HttpResponse::Ok().body(player.mm_tok))
}

async fn schedule_join(state: &AppState, mmtok: &str, region: Region) -> Result<(), CoordError> {
    state
        .tasks
        .enqueue(
            "default",
            "/joinmatch",
            vec![
                ("mmtok", mmtok.to_string()),
                ("region", region.as_str().to_string()),
            ],
            JOIN_DELAY,
        )
        .await?;
    Ok(())
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(enqueue).service(poll).service(dequeue);
}

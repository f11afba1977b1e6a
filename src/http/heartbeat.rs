//! Server gateway: game servers report liveness and receive the batch of
//! pending joins for their machine.

use actix_web::{get, web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoordError;
use crate::model::server::ServerState;
use crate::model::{GameServer, JoinRecord};
use crate::state::AppState;
use crate::store::{put_entity, query_all, query_one, Entity, Op, Query};

#[derive(Deserialize)]
struct HeartbeatQuery {
    #[serde(rename = "ServerID")]
    server_id: String,
    #[serde(rename = "ServerState")]
    server_state: i32,
    #[serde(rename = "PlayerCount")]
    player_count: i32,
    #[serde(rename = "MaxPlayerCount")]
    max_player_count: i32,
}

#[derive(Serialize)]
struct JoinInfo {
    #[serde(rename = "UserID")]
    user_id: String,
    #[serde(rename = "JoinToken")]
    join_token: String,
}

#[derive(Serialize)]
struct JoinReport {
    #[serde(rename = "JoinInfo")]
    join_info: Vec<JoinInfo>,
}

#[get("/heartbeat")]
async fn heartbeat(
    query: web::Query<HeartbeatQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, CoordError> {
    let server_state =
        ServerState::try_from(query.server_state).map_err(CoordError::InvalidArgument)?;

    let found = query_one::<GameServer>(
        state.store.as_ref(),
        Query::new(GameServer::KIND).filter("UUID", Op::Eq, query.server_id.as_str()),
    )
    .await?;
    let Some((server_key, mut server)) = found else {
        log::error!("heartbeat: server not found: {}", query.server_id);
        return Err(CoordError::NotFound("server not found".into()));
    };

    server.state = server_state;
    server.check_time = Utc::now();
    server.player_count = query.player_count;
    server.max_player_count = query.max_player_count;
    server.recompute_fill();
    put_entity(state.store.as_ref(), Some(server_key), &server).await?;

    // Deliver every join the server hasn't seen. Records are marked before
    // the response goes out; a lost response loses the batch, but the
    // player holds the join token independently.
    let pending = query_all::<JoinRecord>(
        state.store.as_ref(),
        &Query::new(JoinRecord::KIND)
            .filter("ServerID", Op::Eq, query.server_id.as_str())
            .filter("Checked", Op::Eq, false),
    )
    .await?;

    let mut join_info = Vec::with_capacity(pending.len());
    for (key, mut record) in pending {
        join_info.push(JoinInfo {
            user_id: record.user_id.clone(),
            join_token: record.join_token.clone(),
        });
        record.checked = true;
        put_entity(state.store.as_ref(), Some(key), &record).await?;
    }

    log::info!(
        "heartbeat: server {} ({}, {}): {}/{}",
        server.uuid,
        server.address,
        server.port,
        server.player_count,
        server.max_player_count
    );
    Ok(HttpResponse::Ok().json(JoinReport { join_info }))
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(heartbeat);
}

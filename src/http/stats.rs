//! Periodic stats export and record expiry sweep. Every step is
//! best-effort: a failing collector is logged and the rest still run.

use actix_web::{get, web, HttpResponse};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::CoordError;
use crate::model::{join, player, JoinRecord, MatchmakerStats, Player, Region, ServerStats};
use crate::state::AppState;
use crate::store::{query_all, Entity, Op, Query};

#[get("/stats")]
async fn stats(state: web::Data<AppState>) -> Result<HttpResponse, CoordError> {
    log::info!("stats: running matchmaker stats collection");
    if let Err(e) = collect_matchmaker_stats(&state).await {
        log::error!("stats: {e}");
    }

    log::info!("stats: running server stats collection");
    if let Err(e) = collect_server_stats(&state).await {
        log::error!("stats: {e}");
    }

    log::info!("stats: running user expiration");
    if let Err(e) = expire_users(&state).await {
        log::error!("stats: {e}");
    }

    log::info!("stats: running join expiration");
    if let Err(e) = expire_joins(&state).await {
        log::error!("stats: {e}");
    }

    Ok(HttpResponse::Ok().finish())
}

/// One sample of queue depth and per-region join volume, written as a
/// header row plus one data row.
async fn collect_matchmaker_stats(state: &AppState) -> Result<(), CoordError> {
    let sample = MatchmakerStats {
        timestamp: Utc::now(),
        total_users: state.store.count(&Query::new(Player::KIND)).await?,
        total_joins_na: count_joins(state, Region::Na).await?,
        total_joins_eu: count_joins(state, Region::Eu).await?,
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    write_row(
        &mut writer,
        &["Timestamp", "TotalUsers", "TotalJoinsNA", "TotalJoinsEU"],
    )?;
    write_row(
        &mut writer,
        &[
            sample.timestamp.timestamp().to_string(),
            sample.total_users.to_string(),
            sample.total_joins_na.to_string(),
            sample.total_joins_eu.to_string(),
        ],
    )?;

    store_csv(state, "matchmaker", writer).await
}

async fn count_joins(state: &AppState, region: Region) -> Result<i64, CoordError> {
    Ok(state
        .store
        .count(&Query::new(JoinRecord::KIND).filter("Region", Op::Eq, region.as_str()))
        .await?)
}

/// Drain the ServerStats rows accumulated by the fleet passes into a CSV,
/// then delete them.
async fn collect_server_stats(state: &AppState) -> Result<(), CoordError> {
    let rows = query_all::<ServerStats>(state.store.as_ref(), &Query::new(ServerStats::KIND))
        .await?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    write_row(
        &mut writer,
        &[
            "Region",
            "Timestamp",
            "TotalServers",
            "TotalCurrentPlayers",
            "TotalMaxPlayers",
        ],
    )?;
    let mut keys = Vec::with_capacity(rows.len());
    for (key, row) in &rows {
        write_row(
            &mut writer,
            &[
                row.region.clone(),
                row.timestamp.timestamp().to_string(),
                row.total_servers.to_string(),
                row.total_current_players.to_string(),
                row.total_max_players.to_string(),
            ],
        )?;
        keys.push(*key);
    }

    store_csv(state, "servers", writer).await?;

    state.store.delete_many(ServerStats::KIND, &keys).await?;
    log::info!("stats: removed {} server stats records", keys.len());
    Ok(())
}

async fn expire_users(state: &AppState) -> Result<(), CoordError> {
    let cutoff = Utc::now() - Duration::seconds(player::RECORD_EXPIRY_SECS);
    let stale = query_all::<Player>(
        state.store.as_ref(),
        &Query::new(Player::KIND).filter("CheckTime", Op::Lt, cutoff.timestamp()),
    )
    .await?;
    let keys: Vec<Uuid> = stale.iter().map(|(key, _)| *key).collect();
    state.store.delete_many(Player::KIND, &keys).await?;
    log::info!("stats: removed {} user records", keys.len());
    Ok(())
}

async fn expire_joins(state: &AppState) -> Result<(), CoordError> {
    let cutoff = Utc::now() - Duration::seconds(join::RECORD_EXPIRY_SECS);
    let stale = query_all::<JoinRecord>(
        state.store.as_ref(),
        &Query::new(JoinRecord::KIND).filter("CreationTime", Op::Lt, cutoff.timestamp()),
    )
    .await?;
    let keys: Vec<Uuid> = stale.iter().map(|(key, _)| *key).collect();
    state.store.delete_many(JoinRecord::KIND, &keys).await?;
    log::info!("stats: removed {} join records", keys.len());
    Ok(())
}

fn write_row<const N: usize>(
    writer: &mut csv::Writer<Vec<u8>>,
    row: &[impl AsRef<[u8]>; N],
) -> Result<(), CoordError> {
    writer
        .write_record(row.iter())
        .map_err(|e| CoordError::Internal(e.to_string()))
}

async fn store_csv(
    state: &AppState,
    kind: &str,
    writer: csv::Writer<Vec<u8>>,
) -> Result<(), CoordError> {
    let data = writer
        .into_inner()
        .map_err(|e| CoordError::Internal(e.to_string()))?;
    let name = format!("stats/{kind}/{}.csv", Utc::now().format("%Y%m%d%H%M%S"));
    state.storage.put(&name, "text/csv", &data).await?;
    Ok(())
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(stats);
}

//! Fleet control plane: the periodic per-region manage pass, the two-phase
//! allocation tasks, deallocation, and the stuck-allocation sweeper.

use std::time::Duration;

use actix_web::{post, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::config::settings;
use crate::error::CoordError;
use crate::model::server::{GameServer, ServerState};
use crate::model::{Region, ServerStats};
use crate::state::AppState;
use crate::store::{put_entity, query_all, Entity, Op, Query};
use crate::tasks::task_attempts;

/// A server at or past this fill ratio counts as full.
const FULL_THRESHOLD: f32 = 0.8;
/// Request a new machine once this share of the active pool is full.
const ALLOCATE_THRESHOLD: f64 = 0.75;
/// Seconds without a heartbeat before a server is expired.
const TIMEOUT_EXPIRY_SECS: i64 = 60;
/// Maximum server lifetime in seconds.
const AGE_EXPIRY_SECS: i64 = 3600;
const MAX_SERVERS_PER_REGION: i64 = 10;
const DEFAULT_MAX_PLAYERS: i32 = 64;
/// Provider machines need a moment before the first allocation check.
const SERVER_INIT_DELAY: Duration = Duration::from_secs(10);
const MAX_ALLOCATE_ATTEMPTS: i32 = 4;
const MAX_ALLOCATION_CHECK_ATTEMPTS: i32 = 4;

/// Cache key prefix counting in-flight allocations per region.
pub const ACTIVE_ALLOCATIONS_KEY: &str = "ServerManager-ActiveAllocations";

const QUEUE_ALLOCATE: &str = "coordinator-allocate";
const QUEUE_ALLOCATIONS: &str = "coordinator-allocations";
const QUEUE_DEALLOCATE: &str = "coordinator-deallocate";

#[derive(Deserialize)]
struct RegionForm {
    region: String,
}

#[derive(Deserialize)]
struct AllocationForm {
    #[serde(rename = "serverID")]
    server_id: String,
    region: String,
}

#[derive(Deserialize)]
struct ServerForm {
    #[serde(rename = "serverID")]
    server_id: String,
}

#[post("/manage")]
async fn manage(state: web::Data<AppState>) -> Result<HttpResponse, CoordError> {
    let na = tokio::spawn(manage_region(state.get_ref().clone(), Region::Na));
    let eu = tokio::spawn(manage_region(state.get_ref().clone(), Region::Eu));
    let (na, eu) = tokio::join!(na, eu);
    for joined in [na, eu] {
        match joined {
            Ok(Err(e)) => log::error!("manage: regional pass failed: {e}"),
            Err(e) => log::error!("manage: regional pass panicked: {e}"),
            Ok(Ok(())) => {}
        }
    }
    Ok(HttpResponse::Ok().finish())
}

struct ServerReport {
    key: Uuid,
    uuid: String,
    state: ServerState,
    full: bool,
    expired: bool,
}

/// One control pass for a region: classify every server, persist a stats
/// row, retire expired machines, and decide whether to request another.
async fn manage_region(state: AppState, region: Region) -> Result<(), CoordError> {
    log::info!("manage: managing region {region} servers");
    let now = Utc::now();

    let servers = query_all::<GameServer>(
        state.store.as_ref(),
        &Query::new(GameServer::KIND).filter("Region", Op::Eq, region.as_str()),
    )
    .await?;

    let mut stats = ServerStats {
        region: region.as_str().to_string(),
        timestamp: now,
        total_servers: 0,
        total_current_players: 0,
        total_max_players: 0,
    };
    let mut reports = Vec::with_capacity(servers.len());

    for (key, server) in &servers {
        stats.total_servers += 1;
        stats.total_current_players += server.player_count;
        stats.total_max_players += server.max_player_count;

        let silence = (now - server.check_time).num_seconds();
        let timed_out = silence > TIMEOUT_EXPIRY_SECS;
        let too_old = silence >= AGE_EXPIRY_SECS;
        reports.push(ServerReport {
            key: *key,
            uuid: server.uuid.clone(),
            state: server.state,
            full: server.fill >= FULL_THRESHOLD,
            expired: server.state == ServerState::Terminating || timed_out || too_old,
        });
    }

    put_entity(state.store.as_ref(), None, &stats).await?;

    let mut expired_keys = Vec::new();
    let mut active_servers: i64 = 0;
    let mut full_servers: i64 = 0;

    for report in &reports {
        if report.expired {
            log::info!("manage: scheduling expiration of server {}", report.uuid);
            state
                .tasks
                .enqueue(
                    QUEUE_DEALLOCATE,
                    "/dealloc",
                    vec![("serverID", report.uuid.clone())],
                    Duration::ZERO,
                )
                .await?;
            expired_keys.push(report.key);
        } else if matches!(
            report.state,
            ServerState::Initializing | ServerState::Active
        ) {
            active_servers += 1;
            if report.full {
                full_servers += 1;
            }
        }
    }

    state
        .store
        .delete_many(GameServer::KIND, &expired_keys)
        .await?;

    let active_allocations = read_allocations_counter(&state, region).await?;
    let pool = active_servers + active_allocations;
    let full_ratio = if pool == 0 {
        0.0
    } else {
        full_servers as f64 / pool as f64
    };

    log::info!(
        "manage: region {region} fill (full/partial/allocating/total - ratio): \
         {full_servers}/{}/{active_allocations}/{pool} - {full_ratio:.2}",
        active_servers - full_servers
    );

    if active_servers == 0 || full_ratio > ALLOCATE_THRESHOLD {
        if active_servers >= MAX_SERVERS_PER_REGION {
            log::info!("manage: max servers in {region} reached, skipping allocation");
            return Ok(());
        }

        log::info!("manage: scheduling new server allocation in {region}");
        state
            .tasks
            .enqueue(
                QUEUE_ALLOCATE,
                "/alloc",
                vec![("region", region.as_str().to_string())],
                Duration::ZERO,
            )
            .await?;
        state
            .cache
            .increment(&allocations_key(region), 1, 0)
            .await?;
    }

    Ok(())
}

#[post("/alloc")]
async fn allocate(
    req: HttpRequest,
    form: web::Form<RegionForm>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, CoordError> {
    let Some(attempts) = task_attempts(&req) else {
        return Err(CoordError::Internal("missing retry header".into()));
    };
    let region: Region = form
        .region
        .parse()
        .map_err(CoordError::InvalidArgument)?;

    if attempts > MAX_ALLOCATE_ATTEMPTS {
        log::info!("alloc: max attempts reached for region {region}, abandoning");
        state
            .cache
            .increment(&allocations_key(region), -1, 1)
            .await?;
        return Ok(HttpResponse::Ok().finish());
    }

    let server_id = Uuid::new_v4().to_string();
    log::info!("alloc: allocating server {server_id} in region {region}");

    let response = state
        .provider
        .allocate(
            &server_id,
            &settings().provider_profile_id,
            settings().region_id(region),
        )
        .await;
    match response {
        Err(e) => {
            // Abandon the request; the sweeper frees the counter slot.
            log::error!("alloc: {e}");
            return Ok(HttpResponse::Ok().finish());
        }
        Ok(resp) if !resp.success => {
            log::error!("alloc: allocation failed: {}", resp.messages.join(","));
            return Ok(HttpResponse::Ok().finish());
        }
        Ok(_) => {}
    }

    state
        .tasks
        .enqueue(
            QUEUE_ALLOCATIONS,
            "/allocation",
            vec![
                ("serverID", server_id.clone()),
                ("region", region.as_str().to_string()),
            ],
            SERVER_INIT_DELAY,
        )
        .await?;

    log::info!("alloc: allocated new server {server_id} in region {region}");
    Ok(HttpResponse::Ok().finish())
}

#[post("/allocation")]
async fn allocation_check(
    req: HttpRequest,
    form: web::Form<AllocationForm>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, CoordError> {
    let region: Region = form
        .region
        .parse()
        .map_err(CoordError::InvalidArgument)?;
    log::info!("allocation: checking server allocation {}", form.server_id);

    let response = match state.provider.allocations(&form.server_id).await {
        Err(e) => {
            log::error!("allocation: {e}");
            return Ok(HttpResponse::Ok().finish());
        }
        Ok(resp) if !resp.success => {
            log::error!("allocation: check failed: {}", resp.messages.join(","));
            return Ok(HttpResponse::Ok().finish());
        }
        Ok(resp) => resp,
    };

    let ready = response.allocations.first().filter(|d| d.ready()).cloned();
    let Some(detail) = ready else {
        log::error!("allocation: not ready: {}", form.server_id);

        let Some(attempts) = task_attempts(&req) else {
            return Err(CoordError::Internal("missing retry header".into()));
        };
        if attempts >= MAX_ALLOCATION_CHECK_ATTEMPTS {
            log::error!(
                "allocation: max check attempts reached, deallocating {}",
                form.server_id
            );
            state
                .tasks
                .enqueue(
                    QUEUE_DEALLOCATE,
                    "/dealloc",
                    vec![("serverID", form.server_id.clone())],
                    Duration::ZERO,
                )
                .await?;
            state
                .cache
                .increment(&allocations_key(region), -1, 1)
                .await?;
            return Ok(HttpResponse::Ok().finish());
        }
        return Err(CoordError::Internal("allocation not ready".into()));
    };

    let now = Utc::now();
    let server = GameServer {
        uuid: form.server_id.clone(),
        address: detail.ip.clone(),
        port: detail.game_port,
        region: region.as_str().to_string(),
        state: ServerState::Initializing,
        creation_time: now,
        check_time: now,
        player_count: 0,
        max_player_count: DEFAULT_MAX_PLAYERS,
        fill: 0.0,
    };
    put_entity(state.store.as_ref(), None, &server).await?;

    state
        .cache
        .increment(&allocations_key(region), -1, 1)
        .await?;

    log::info!(
        "allocation: confirmed new server {} ({}, {}) in region {region}",
        server.uuid,
        server.address,
        server.port
    );
    Ok(HttpResponse::Ok().finish())
}

#[post("/dealloc")]
async fn deallocate(
    form: web::Form<ServerForm>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, CoordError> {
    log::info!("dealloc: deallocating server {}", form.server_id);

    // Best-effort: the store record is already gone and the provider call
    // is idempotent, so errors are logged and the task dropped.
    match state.provider.deallocate(&form.server_id).await {
        Ok(_) => log::info!("dealloc: deallocated server {}", form.server_id),
        Err(e) => log::error!("dealloc: {e}"),
    }
    Ok(HttpResponse::Ok().finish())
}

#[post("/freeallocs")]
async fn free_allocations(state: web::Data<AppState>) -> Result<HttpResponse, CoordError> {
    log::info!("freeallocs: running free allocations");
    for region in Region::ALL {
        clear_stuck_allocations(&state, region).await;
    }
    Ok(HttpResponse::Ok().finish())
}

/// Safety net for leaked counter units: a present, non-zero counter is
/// deleted outright. An absent counter is already "free", so it is left
/// alone, as is an explicit zero.
async fn clear_stuck_allocations(state: &AppState, region: Region) {
    let count = match read_allocations_counter(state, region).await {
        Ok(count) => count,
        Err(e) => {
            log::error!("freeallocs: {e}");
            return;
        }
    };
    if count != 0 {
        log::info!("freeallocs: clearing {count} stuck allocations in {region}");
        if let Err(e) = state.cache.delete(&allocations_key(region)).await {
            log::error!("freeallocs: {e}");
        }
    }
}

fn allocations_key(region: Region) -> String {
    format!("{ACTIVE_ALLOCATIONS_KEY}{region}")
}

/// Current in-flight allocation count for a region; a cache miss means
/// none are known.
async fn read_allocations_counter(state: &AppState, region: Region) -> Result<i64, CoordError> {
    match state.cache.get(&allocations_key(region)).await? {
        Some(bytes) => std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CoordError::Internal("unparseable allocations counter".into())),
        None => Ok(0),
    }
}

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(manage)
        .service(allocate)
        .service(allocation_check)
        .service(deallocate)
        .service(free_allocations);
}

//! Game-server record and joinable-server selection query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Region;
use crate::store::{query_one, Entity, Op, Query, Store, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ServerState {
    Initializing,
    Active,
    Ending,
    Terminating,
}

impl From<ServerState> for i32 {
    fn from(state: ServerState) -> i32 {
        match state {
            ServerState::Initializing => 0,
            ServerState::Active => 1,
            ServerState::Ending => 2,
            ServerState::Terminating => 3,
        }
    }
}

impl TryFrom<i32> for ServerState {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServerState::Initializing),
            1 => Ok(ServerState::Active),
            2 => Ok(ServerState::Ending),
            3 => Ok(ServerState::Terminating),
            other => Err(format!("unknown server state {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameServer {
    /// Assigned by the coordinator at allocate time, before the machine
    /// exists; also the provider-side handle.
    #[serde(rename = "UUID")]
    pub uuid: String,
    pub address: String,
    pub port: i32,
    pub region: String,
    pub state: ServerState,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub creation_time: DateTime<Utc>,
    /// Last heartbeat.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub check_time: DateTime<Utc>,
    pub player_count: i32,
    pub max_player_count: i32,
    pub fill: f32,
}

impl Entity for GameServer {
    const KIND: &'static str = "GameServer";
}

impl GameServer {
    /// Keep `Fill` consistent with the counts at write time.
    pub fn recompute_fill(&mut self) {
        self.fill = if self.max_player_count > 0 {
            self.player_count as f32 / self.max_player_count as f32
        } else {
            0.0
        };
    }
}

/// Lowest-fill active server in the region: partially-filled servers first
/// (`non_empty`), cold servers as the fallback pass. Packing into the
/// lowest non-zero fill coalesces active lobbies before warming a new one.
pub async fn find_joinable(
    store: &dyn Store,
    region: Region,
    non_empty: bool,
) -> StoreResult<Option<(Uuid, GameServer)>> {
    let query = Query::new(GameServer::KIND)
        .filter("Region", Op::Eq, region.as_str())
        .filter("State", Op::Eq, i32::from(ServerState::Active));
    let query = if non_empty {
        query.filter("Fill", Op::Gt, 0)
    } else {
        query.filter("PlayerCount", Op::Eq, 0)
    };
    query_one(store, query.order("Fill")).await
}

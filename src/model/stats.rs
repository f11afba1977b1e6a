//! Metric rows emitted by the fleet pass and drained by the stats export.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Entity;

/// One per region per fleet pass; persisted until the next stats export
/// drains it to CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerStats {
    pub region: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub total_servers: i32,
    pub total_current_players: i32,
    pub total_max_players: i32,
}

impl Entity for ServerStats {
    const KIND: &'static str = "ServerStats";
}

/// Point-in-time matchmaker sample; goes straight to CSV, never stored.
#[derive(Debug, Clone)]
pub struct MatchmakerStats {
    pub timestamp: DateTime<Utc>,
    pub total_users: i64,
    pub total_joins_na: i64,
    pub total_joins_eu: i64,
}

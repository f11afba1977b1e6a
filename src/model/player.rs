//! Matchmaking player record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{query_one, Entity, Op, Query, Store, StoreResult};

/// Seconds without client contact before the record is swept.
pub const RECORD_EXPIRY_SECS: i64 = 3600;
/// Seconds since the last client interaction before a player may requeue.
pub const REQUEUE_GRACE_SECS: i64 = 60;

/// Where a player is in the matchmaking state machine. Advances
/// InQueue -> {JoinedMatch, Cancelled, Failed}; a requeue resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum QueueStatus {
    InQueue,
    JoinedMatch,
    Cancelled,
    Failed,
}

impl From<QueueStatus> for i32 {
    fn from(status: QueueStatus) -> i32 {
        match status {
            QueueStatus::InQueue => 0,
            QueueStatus::JoinedMatch => 1,
            QueueStatus::Cancelled => 2,
            QueueStatus::Failed => 3,
        }
    }
}

impl TryFrom<i32> for QueueStatus {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QueueStatus::InQueue),
            1 => Ok(QueueStatus::JoinedMatch),
            2 => Ok(QueueStatus::Cancelled),
            3 => Ok(QueueStatus::Failed),
            other => Err(format!("unknown queue status {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Player {
    #[serde(rename = "UserID")]
    pub user_id: String,
    /// Opaque session token handed back to the client; unique per player.
    #[serde(rename = "MMTok")]
    pub mm_tok: String,
    pub status: QueueStatus,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub creation_time: DateTime<Utc>,
    /// Last client interaction; drives requeue grace and expiry.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub check_time: DateTime<Utc>,
    #[serde(default)]
    pub join_tok: String,
    #[serde(default)]
    pub server_addr: String,
    #[serde(default)]
    pub server_port: i32,
}

impl Entity for Player {
    const KIND: &'static str = "MMUser";
}

impl Player {
    pub fn new(user_id: impl Into<String>, mm_tok: impl Into<String>) -> Self {
        let now = Utc::now();
        Player {
            user_id: user_id.into(),
            mm_tok: mm_tok.into(),
            status: QueueStatus::InQueue,
            creation_time: now,
            check_time: now,
            join_tok: String::new(),
            server_addr: String::new(),
            server_port: 0,
        }
    }
}

/// Single-player lookup by an indexed string field ("UserID" or "MMTok").
pub async fn find_by(
    store: &dyn Store,
    field: &'static str,
    value: &str,
) -> StoreResult<Option<(Uuid, Player)>> {
    query_one(store, Query::new(Player::KIND).filter(field, Op::Eq, value)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_as_int() {
        let player = Player::new("u1", "t1");
        let doc = serde_json::to_value(&player).unwrap();
        assert_eq!(doc["Status"], 0);
        assert_eq!(doc["UserID"], "u1");
        assert_eq!(doc["MMTok"], "t1");
        assert!(doc["CheckTime"].is_number());

        let back: Player = serde_json::from_value(doc).unwrap();
        assert_eq!(back.status, QueueStatus::InQueue);
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(QueueStatus::try_from(7).is_err());
    }
}

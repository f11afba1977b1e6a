//! Player-to-server assignment record, delivered to the server by
//! heartbeat and presented by the player as its join token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Entity;

/// Seconds after creation before the record is swept, delivered or not.
pub const RECORD_EXPIRY_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinRecord {
    #[serde(rename = "UserID")]
    pub user_id: String,
    #[serde(rename = "ServerID")]
    pub server_id: String,
    pub region: String,
    pub join_token: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub creation_time: DateTime<Utc>,
    /// Set once the record has been included in a heartbeat response;
    /// monotonic, never cleared.
    pub checked: bool,
}

impl Entity for JoinRecord {
    const KIND: &'static str = "JoinRecord";
}

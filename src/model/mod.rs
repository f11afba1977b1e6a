//! Stored entities and their query helpers.

pub mod join;
pub mod player;
pub mod server;
pub mod stats;

pub use join::JoinRecord;
pub use player::{Player, QueueStatus};
pub use server::{GameServer, ServerState};
pub use stats::{MatchmakerStats, ServerStats};

use std::fmt;
use std::str::FromStr;

/// Coarse geographic bucket with its own fleet and provider region id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Na,
    Eu,
}

impl Region {
    pub const ALL: [Region; 2] = [Region::Na, Region::Eu];

    pub fn as_str(self) -> &'static str {
        match self {
            Region::Na => "na",
            Region::Eu => "eu",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "na" => Ok(Region::Na),
            "eu" => Ok(Region::Eu),
            other => Err(format!("unknown region {other:?}")),
        }
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::board::{BoardRef, Tab};

/// Run time in thousandths of a second, the unit the upstream server reports.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreValue(pub i64);

impl ScoreValue {
    pub const UNITS_PER_SECOND: i64 = 1000;
    pub const FRAMES_PER_SECOND: i64 = 60;

    pub fn from_units(units: i64) -> Self {
        Self(units)
    }

    pub fn units(self) -> i64 {
        self.0
    }

    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / Self::UNITS_PER_SECOND as f64
    }

    pub fn frames(self) -> i64 {
        (self.0 as f64 * Self::FRAMES_PER_SECOND as f64 / Self::UNITS_PER_SECOND as f64).round()
            as i64
    }

    pub fn checked_add_seconds(self, seconds: i64) -> Option<Self> {
        seconds
            .checked_mul(Self::UNITS_PER_SECOND)
            .and_then(|delta| self.0.checked_add(delta))
            .map(Self)
    }
}

impl fmt::Display for ScoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:03}", abs / 1000, abs % 1000)
    }
}

/// One leaderboard entry as reported by the upstream server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub user_id: i64,
    pub user_name: String,
    pub score: ScoreValue,
    pub replay_id: i64,
}

/// Upstream score response body.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ScoresPayload {
    #[serde(default)]
    pub scores: Vec<RawEntry>,
}

/// Anything the tie resolver can order.
pub trait Rankable {
    fn score(&self) -> ScoreValue;
    fn replay_id(&self) -> i64;
}

impl Rankable for RawEntry {
    fn score(&self) -> ScoreValue {
        self.score
    }

    fn replay_id(&self) -> i64 {
        self.replay_id
    }
}

/// Persisted score slot joined with its player, as read back for rankings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub board: BoardRef,
    pub tab: Tab,
    pub rank: u32,
    pub tied_rank: u32,
    pub player_id: i64,
    pub player_name: String,
    pub score: ScoreValue,
    pub replay_id: i64,
}

impl Rankable for ScoreRow {
    fn score(&self) -> ScoreValue {
        self.score
    }

    fn replay_id(&self) -> i64 {
        self.replay_id
    }
}

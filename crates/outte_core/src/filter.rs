use std::collections::HashSet;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::board::{BoardRef, BoardType, Tab};
use crate::score::{RawEntry, ScoreValue};
use crate::{OutteError, OutteResult};

/// Upper score limit, in whole seconds, for one tab of one board type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CeilingRule {
    pub board_type: BoardType,
    pub tab: Tab,
    pub seconds: i64,
}

/// Offset applied to every run on `board` with a replay id at or below `max_replay_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPatch {
    pub board: BoardRef,
    pub max_replay_id: i64,
    pub offset_seconds: i64,
}

/// Offset applied to a single replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayPatch {
    pub board_type: BoardType,
    pub replay_id: i64,
    pub offset_seconds: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedReplay {
    pub board_type: BoardType,
    pub replay_id: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub ceilings: Vec<CeilingRule>,
    #[serde(default)]
    pub ignored_player_ids: Vec<i64>,
    #[serde(default)]
    pub ignored_player_names: Vec<String>,
    #[serde(default)]
    pub deleted_replays: Vec<DeletedReplay>,
    #[serde(default)]
    pub run_patches: Vec<RunPatch>,
    #[serde(default)]
    pub replay_patches: Vec<ReplayPatch>,
}

impl FilterConfig {
    /// Values used by the existing public deployment.
    pub fn legacy() -> Self {
        let ceilings = [
            (BoardType::Level, Tab::SI, 298),
            (BoardType::Level, Tab::S, 874),
            (BoardType::Level, Tab::SL, 400),
            (BoardType::Level, Tab::SS, 2462),
            (BoardType::Level, Tab::SU, 530),
            (BoardType::Level, Tab::SS2, 322),
            (BoardType::Episode, Tab::SI, 400),
            (BoardType::Episode, Tab::S, 950),
            (BoardType::Episode, Tab::SL, 650),
            (BoardType::Episode, Tab::SU, 650),
            (BoardType::Story, Tab::SI, 1000),
            (BoardType::Story, Tab::S, 2000),
            (BoardType::Story, Tab::SL, 2000),
            (BoardType::Story, Tab::SU, 1500),
        ]
        .into_iter()
        .map(|(board_type, tab, seconds)| CeilingRule {
            board_type,
            tab,
            seconds,
        })
        .collect();

        let run_patches = [
            (BoardType::Episode, 182, 695_142, -42),
            (BoardType::Episode, 217, 1_165_074, -8),
            (BoardType::Episode, 509, 2_010_381, -6),
            (BoardType::Level, 910, 286_360, -42),
            (BoardType::Level, 1089, 225_710, -8),
            (BoardType::Level, 2549, 2_000_000, -6),
        ]
        .into_iter()
        .map(|(board_type, board_id, max_replay_id, offset_seconds)| RunPatch {
            board: BoardRef::new(board_type, board_id),
            max_replay_id,
            offset_seconds,
        })
        .collect();

        let deleted_replays = [
            (BoardType::Episode, 5_035_576),
            (BoardType::Episode, 5_073_211),
            (BoardType::Level, 3_572_785),
            (BoardType::Level, 3_622_469),
        ]
        .into_iter()
        .map(|(board_type, replay_id)| DeletedReplay {
            board_type,
            replay_id,
        })
        .collect();

        let replay_patches = vec![
            ReplayPatch {
                board_type: BoardType::Episode,
                replay_id: 5_067_031,
                offset_seconds: -6,
            },
            ReplayPatch {
                board_type: BoardType::Level,
                replay_id: 3_758_900,
                offset_seconds: -6,
            },
        ];

        Self {
            ceilings,
            ignored_player_ids: vec![
                63944, 115572, 128613, 201322, 146275, 243184, 253161, 253072, 221472, 276273,
                291743, 75839, 307030, 298531, 76223, 325245, 202167, 173617,
            ],
            ignored_player_names: Vec::new(),
            deleted_replays,
            run_patches,
            replay_patches,
        }
    }

    /// Ceiling for a board in raw units. Boards outside every configured tab
    /// fall back to the largest ceiling of their type.
    pub fn ceiling_units(&self, board: BoardRef, tab: Tab) -> Option<i64> {
        let rules = self
            .ceilings
            .iter()
            .filter(|rule| rule.board_type == board.board_type);
        let exact = rules.clone().find(|rule| rule.tab == tab);
        let seconds = match exact {
            Some(rule) => Some(rule.seconds),
            None => rules.map(|rule| rule.seconds).max(),
        }?;
        seconds.checked_mul(ScoreValue::UNITS_PER_SECOND)
    }
}

/// Sanitizes freshly fetched leaderboard snapshots before they are resolved and merged.
#[derive(Clone, Debug, Default)]
pub struct CleaningFilter {
    config: FilterConfig,
}

impl CleaningFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Never fails: when cleaning cannot complete the input is returned untouched.
    pub fn clean(&self, board: BoardRef, tab: Tab, entries: Vec<RawEntry>) -> Vec<RawEntry> {
        match self.try_clean(board, tab, &entries) {
            Ok(cleaned) => cleaned,
            Err(err) => {
                warn!("cleaning {board} skipped: {err}");
                entries
            }
        }
    }

    pub fn try_clean(
        &self,
        board: BoardRef,
        tab: Tab,
        entries: &[RawEntry],
    ) -> OutteResult<Vec<RawEntry>> {
        let ceiling = self.config.ceiling_units(board, tab);
        let ignored_ids: HashSet<i64> = self.config.ignored_player_ids.iter().copied().collect();
        let deleted: HashSet<i64> = self
            .config
            .deleted_replays
            .iter()
            .filter(|d| d.board_type == board.board_type)
            .map(|d| d.replay_id)
            .collect();
        let run_patch = self.config.run_patches.iter().find(|p| p.board == board);

        let mut seen_names = HashSet::new();
        let mut cleaned = Vec::with_capacity(entries.len());
        for entry in entries {
            if !seen_names.insert(entry.user_name.as_str()) {
                continue;
            }
            if ignored_ids.contains(&entry.user_id)
                || self.config.ignored_player_names.contains(&entry.user_name)
                || deleted.contains(&entry.replay_id)
                || ceiling.is_some_and(|limit| entry.score.units() >= limit)
            {
                continue;
            }

            let mut entry = entry.clone();
            if let Some(patch) = run_patch
                && entry.replay_id <= patch.max_replay_id
            {
                entry.score = shift(entry.score, patch.offset_seconds, entry.replay_id)?;
            }
            if let Some(patch) = self
                .config
                .replay_patches
                .iter()
                .find(|p| p.board_type == board.board_type && p.replay_id == entry.replay_id)
            {
                entry.score = shift(entry.score, patch.offset_seconds, entry.replay_id)?;
            }
            cleaned.push(entry);
        }
        Ok(cleaned)
    }
}

fn shift(score: ScoreValue, seconds: i64, replay_id: i64) -> OutteResult<ScoreValue> {
    score.checked_add_seconds(seconds).ok_or_else(|| {
        OutteError::integrity(format!("score correction overflowed for replay {replay_id}"))
    })
}

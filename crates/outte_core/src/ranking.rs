use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::board::{BOARD_SIZE, BoardRef, BoardType, Tab};
use crate::score::{ScoreRow, ScoreValue};
use crate::ties::resolve;
use crate::{OutteError, OutteResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "metric", content = "n", rename_all = "snake_case")]
pub enum Metric {
    /// Boards where the player sits above position `n`.
    CountBelow(u32),
    /// Boards where the player is inside the top `n` only thanks to a tie.
    TiedOnly(u32),
    Points,
    AveragePoints,
    AverageRank,
    AverageLead,
    TotalScore,
    Maxed,
    Maxable,
}

impl Metric {
    /// Parses a metric name. `n` is only used by the count metrics.
    pub fn parse(name: &str, n: u32) -> OutteResult<Self> {
        let metric = match name.trim().to_ascii_lowercase().as_str() {
            "rank" | "count_below" | "top" => Metric::CountBelow(n),
            "tied_rank" | "tied_only" => Metric::TiedOnly(n),
            "points" => Metric::Points,
            "avg_points" | "average_points" => Metric::AveragePoints,
            "avg_rank" | "average_rank" => Metric::AverageRank,
            "avg_lead" | "average_lead" => Metric::AverageLead,
            "score" | "total_score" => Metric::TotalScore,
            "maxed" => Metric::Maxed,
            "maxable" => Metric::Maxable,
            other => {
                return Err(OutteError::configuration(format!(
                    "unrecognized ranking metric '{other}'"
                )));
            }
        };
        if let Metric::CountBelow(n) | Metric::TiedOnly(n) = metric
            && (n == 0 || n > BOARD_SIZE)
        {
            return Err(OutteError::configuration(format!(
                "rank cutoff must be between 1 and {BOARD_SIZE}, got {n}"
            )));
        }
        Ok(metric)
    }

    pub fn name(self) -> &'static str {
        match self {
            Metric::CountBelow(_) => "count_below",
            Metric::TiedOnly(_) => "tied_only",
            Metric::Points => "points",
            Metric::AveragePoints => "average_points",
            Metric::AverageRank => "average_rank",
            Metric::AverageLead => "average_lead",
            Metric::TotalScore => "total_score",
            Metric::Maxed => "maxed",
            Metric::Maxable => "maxable",
        }
    }

    fn needs_sample_floor(self) -> bool {
        matches!(self, Metric::AveragePoints | Metric::AverageRank)
    }

    fn keeps_non_positive(self) -> bool {
        matches!(self, Metric::AverageRank | Metric::AverageLead)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankQuery {
    pub metric: Metric,
    #[serde(default)]
    pub board_types: Vec<BoardType>,
    #[serde(default)]
    pub tabs: Vec<Tab>,
    #[serde(default)]
    pub ties: bool,
    #[serde(default)]
    pub full: bool,
    #[serde(default)]
    pub excluded_players: Vec<i64>,
}

impl RankQuery {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            board_types: Vec::new(),
            tabs: Vec::new(),
            ties: false,
            full: false,
            excluded_players: Vec::new(),
        }
    }

    pub fn with_types(mut self, board_types: impl Into<Vec<BoardType>>) -> Self {
        self.board_types = board_types.into();
        self
    }

    pub fn with_tabs(mut self, tabs: impl Into<Vec<Tab>>) -> Self {
        self.tabs = tabs.into();
        self
    }

    pub fn with_ties(mut self, ties: bool) -> Self {
        self.ties = ties;
        self
    }

    pub fn full(mut self) -> Self {
        self.full = true;
        self
    }

    pub fn excluding(mut self, players: impl Into<Vec<i64>>) -> Self {
        self.excluded_players = players.into();
        self
    }

    /// Board types in scope; Level and Episode when none were requested.
    pub fn scope_types(&self) -> Vec<BoardType> {
        if self.board_types.is_empty() {
            BoardType::DEFAULT.to_vec()
        } else {
            let mut types = self.board_types.clone();
            types.sort();
            types.dedup();
            types
        }
    }

    /// Tabs in scope for one board type.
    pub fn scope_tabs(&self, board_type: BoardType) -> Vec<Tab> {
        board_type
            .tabs()
            .iter()
            .copied()
            .filter(|tab| self.tabs.is_empty() || self.tabs.contains(tab))
            .collect()
    }

    pub fn covers(&self, board_type: BoardType, tab: Tab) -> bool {
        self.scope_types().contains(&board_type)
            && (self.tabs.is_empty() || self.tabs.contains(&tab))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMinimum {
    pub board_type: BoardType,
    pub samples: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabMinimum {
    pub board_type: BoardType,
    pub tab: Tab,
    pub samples: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Smallest rank-0 tie group that counts toward maxed/maxable.
    pub min_ties: u32,
    pub max_min_samples: u32,
    pub num_entries: usize,
    pub type_minimums: Vec<TypeMinimum>,
    pub tab_minimums: Vec<TabMinimum>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        let type_minimums = [
            (BoardType::Level, 100),
            (BoardType::Episode, 50),
            (BoardType::Story, 10),
        ]
        .into_iter()
        .map(|(board_type, samples)| TypeMinimum {
            board_type,
            samples,
        })
        .collect();
        let tab_minimums = [
            (BoardType::Level, Tab::SI, 25),
            (BoardType::Level, Tab::S, 50),
            (BoardType::Level, Tab::SL, 50),
            (BoardType::Level, Tab::SS, 25),
            (BoardType::Level, Tab::SU, 50),
            (BoardType::Level, Tab::SS2, 25),
            (BoardType::Episode, Tab::SI, 5),
            (BoardType::Episode, Tab::S, 25),
            (BoardType::Episode, Tab::SL, 25),
            (BoardType::Episode, Tab::SU, 25),
            (BoardType::Story, Tab::SI, 1),
            (BoardType::Story, Tab::S, 5),
            (BoardType::Story, Tab::SL, 5),
            (BoardType::Story, Tab::SU, 5),
        ]
        .into_iter()
        .map(|(board_type, tab, samples)| TabMinimum {
            board_type,
            tab,
            samples,
        })
        .collect();
        Self {
            min_ties: 3,
            max_min_samples: 100,
            num_entries: 20,
            type_minimums,
            tab_minimums,
        }
    }
}

impl RankingConfig {
    pub fn min_samples(&self, query: &RankQuery) -> u32 {
        let total: u32 = query
            .scope_types()
            .into_iter()
            .map(|board_type| {
                let tabs = query.scope_tabs(board_type);
                let per_tab: u32 = self
                    .tab_minimums
                    .iter()
                    .filter(|m| m.board_type == board_type && tabs.contains(&m.tab))
                    .map(|m| m.samples)
                    .sum();
                let cap = self
                    .type_minimums
                    .iter()
                    .find(|m| m.board_type == board_type)
                    .map(|m| m.samples)
                    .unwrap_or(per_tab);
                per_tab.min(cap)
            })
            .sum();
        total.min(self.max_min_samples)
    }
}

/// Running per-player aggregate shared by both ranking algorithms.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlayerTally {
    pub player_id: i64,
    pub player_name: String,
    pub sum: i64,
    pub count: u32,
}

impl PlayerTally {
    fn add(&mut self, amount: i64) {
        self.sum += amount;
        self.count += 1;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingRow {
    pub player_id: i64,
    pub player_name: String,
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadRow {
    pub board: BoardRef,
    pub board_name: String,
    pub spread: ScoreValue,
    pub holder_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieRow {
    pub board: BoardRef,
    pub board_name: String,
    pub tie_count: u32,
    pub total_count: u32,
    pub holder_name: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalScoreRow {
    pub total: ScoreValue,
    pub count: u32,
}

#[derive(Clone, Debug, Default)]
pub struct RankingEngine {
    config: RankingConfig,
}

impl RankingEngine {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Recomputes positions per board after dropping excluded players and
    /// tallies the metric from those positions. `rows` may span boards and
    /// scopes; anything outside the query is ignored.
    pub fn accumulate(&self, rows: &[ScoreRow], query: &RankQuery) -> Vec<PlayerTally> {
        let mut boards: BTreeMap<BoardRef, Vec<ScoreRow>> = BTreeMap::new();
        for row in rows {
            if !query.covers(row.board.board_type, row.tab)
                || query.excluded_players.contains(&row.player_id)
            {
                continue;
            }
            boards.entry(row.board).or_default().push(row.clone());
        }

        let mut tallies: BTreeMap<i64, PlayerTally> = BTreeMap::new();

        for (_, board_rows) in boards {
            let resolved = resolve(board_rows);
            match query.metric {
                Metric::AverageLead => {
                    if let [first, second, ..] = resolved.as_slice() {
                        let lead = first.item.score.units() - second.item.score.units();
                        tally_for(&mut tallies, &first.item).add(lead);
                    }
                }
                Metric::Maxed | Metric::Maxable => {
                    let total = resolved.len() as u32;
                    let group = resolved.iter().filter(|r| r.tied_rank == 0).count() as u32;
                    let qualifies = group >= self.config.min_ties
                        && match query.metric {
                            Metric::Maxed => group == total,
                            _ => group < total,
                        };
                    if qualifies {
                        for entry in resolved.iter().filter(|r| r.tied_rank == 0) {
                            tally_for(&mut tallies, &entry.item).add(1);
                        }
                    }
                }
                metric => {
                    for entry in &resolved {
                        let position = if query.ties {
                            entry.tied_rank
                        } else {
                            entry.rank
                        };
                        let contribution = match metric {
                            Metric::CountBelow(n) => (position < n).then_some(1),
                            Metric::TiedOnly(n) => {
                                (entry.tied_rank < n && entry.rank >= n).then_some(1)
                            }
                            Metric::Points | Metric::AveragePoints => {
                                Some(i64::from(BOARD_SIZE) - i64::from(position))
                            }
                            Metric::AverageRank => Some(i64::from(position)),
                            Metric::TotalScore => Some(entry.item.score.units()),
                            _ => None,
                        };
                        if let Some(amount) = contribution {
                            tally_for(&mut tallies, &entry.item).add(amount);
                        }
                    }
                }
            }
        }
        tallies.into_values().collect()
    }

    /// Turns per-player tallies into the final ordered ranking.
    pub fn finalize(
        &self,
        tallies: impl IntoIterator<Item = PlayerTally>,
        query: &RankQuery,
    ) -> Vec<RankingRow> {
        let metric = query.metric;
        let min_samples = self.config.min_samples(query);
        let mut rows: Vec<RankingRow> = tallies
            .into_iter()
            .filter(|t| t.count > 0)
            .filter(|t| !metric.needs_sample_floor() || t.count >= min_samples)
            .map(|t| {
                let sum = t.sum as f64;
                let count = f64::from(t.count);
                let value = match metric {
                    Metric::AveragePoints | Metric::AverageRank => sum / count,
                    Metric::AverageLead => sum / count / ScoreValue::UNITS_PER_SECOND as f64,
                    Metric::TotalScore => sum / ScoreValue::UNITS_PER_SECOND as f64,
                    _ => sum,
                };
                RankingRow {
                    player_id: t.player_id,
                    player_name: t.player_name,
                    value,
                }
            })
            .filter(|row| metric.keeps_non_positive() || row.value > 0.0)
            .collect();

        rows.sort_by(|a, b| {
            let by_value = if metric == Metric::AverageRank {
                a.value.total_cmp(&b.value)
            } else {
                b.value.total_cmp(&a.value)
            };
            by_value.then(a.player_id.cmp(&b.player_id))
        });
        if !query.full {
            rows.truncate(self.config.num_entries);
        }
        rows
    }

    /// Exclusion-aware ranking over loaded score rows.
    pub fn rank_rows(&self, rows: &[ScoreRow], query: &RankQuery) -> Vec<RankingRow> {
        let tallies = self.accumulate(rows, query);
        self.finalize(tallies, query)
    }
}

fn tally_for<'a>(tallies: &'a mut BTreeMap<i64, PlayerTally>, row: &ScoreRow) -> &'a mut PlayerTally {
    tallies.entry(row.player_id).or_insert_with(|| PlayerTally {
        player_id: row.player_id,
        player_name: row.player_name.clone(),
        ..PlayerTally::default()
    })
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    Board, BoardRef, BoardType, OutteResult, RankQuery, RankingRow, RawEntry, Resolved, ScoreRow,
    ScoreValue, SpreadRow, Tab, TieRow, TotalScoreRow,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: i64,
    pub external_id: Option<i64>,
    pub name: String,
}

/// Outcome of one committed board merge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub board: Option<BoardRef>,
    pub scores_written: usize,
    pub scores_deleted: usize,
    pub new_archives: Vec<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: i64,
    pub board: BoardRef,
    pub tab: Tab,
    pub player_id: i64,
    pub player_name: String,
    pub score: ScoreValue,
    pub replay_id: i64,
    pub created_at_ms: i64,
    pub framecount: Option<i64>,
    pub gold: Option<i64>,
}

/// Demo row still waiting for its payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDemo {
    pub archive_id: i64,
    pub board: BoardRef,
    pub replay_id: i64,
    pub score: ScoreValue,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricScore {
    pub rank: u32,
    pub archive_id: i64,
    pub player_id: i64,
    pub player_name: String,
    pub score: ScoreValue,
    pub replay_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankHistoryQuery {
    pub player_id: i64,
    pub board_type: BoardType,
    pub tab: Tab,
    pub rank: u32,
    pub ties: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankHistoryRow {
    pub player_id: i64,
    pub board_type: BoardType,
    pub tab: Tab,
    pub rank: u32,
    pub ties: bool,
    pub count: i64,
    pub timestamp_ms: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryReport {
    pub rank_rows: usize,
    pub points_rows: usize,
    pub total_score_rows: usize,
}

#[async_trait]
pub trait BoardCatalogApi {
    /// Inserts boards that are not known yet and refreshes names of the others.
    async fn register_boards(&self, boards: Vec<Board>) -> OutteResult<usize>;
    async fn list_boards(&self, board_type: BoardType) -> OutteResult<Vec<Board>>;
    async fn get_board(&self, board: BoardRef) -> OutteResult<Option<Board>>;
}

#[async_trait]
pub trait ScoreStoreApi {
    /// Applies a resolved snapshot to one board in a single transaction.
    async fn merge_board(
        &self,
        board: BoardRef,
        entries: Vec<Resolved<RawEntry>>,
    ) -> OutteResult<MergeReport>;
    async fn board_scores(&self, board: BoardRef) -> OutteResult<Vec<ScoreRow>>;
    async fn find_player(&self, external_id: i64) -> OutteResult<Option<PlayerRecord>>;
}

#[async_trait]
pub trait RankingApi {
    async fn rank(&self, query: RankQuery) -> OutteResult<Vec<RankingRow>>;
    async fn spreads(
        &self,
        n: u32,
        board_type: BoardType,
        tabs: Vec<Tab>,
    ) -> OutteResult<Vec<SpreadRow>>;
    async fn ties(
        &self,
        board_type: BoardType,
        tabs: Vec<Tab>,
        maxed: Option<bool>,
    ) -> OutteResult<Vec<TieRow>>;
    async fn total_scores(&self, board_type: BoardType, tabs: Vec<Tab>)
    -> OutteResult<TotalScoreRow>;
}

#[async_trait]
pub trait DemoApi {
    async fn pending_demos(&self, limit: Option<u32>) -> OutteResult<Vec<PendingDemo>>;
    /// Stores decoded sublevels and fills the archive's derived columns.
    /// Returns `false` when the demo was already populated or expired.
    async fn store_demo(&self, archive_id: i64, sublevels: Vec<Vec<u8>>) -> OutteResult<bool>;
    /// Returns `false` when the demo was already populated or expired.
    async fn expire_demo(&self, archive_id: i64) -> OutteResult<bool>;
    async fn decode_demo(&self, archive_id: i64) -> OutteResult<Option<Vec<Vec<u8>>>>;
}

#[async_trait]
pub trait ArchiveApi {
    async fn get_archive(&self, archive_id: i64) -> OutteResult<Option<ArchiveRecord>>;
    async fn board_at(&self, board: BoardRef, at_ms: i64) -> OutteResult<Vec<HistoricScore>>;
    async fn record_histories(&self, at_ms: i64) -> OutteResult<HistoryReport>;
    async fn rank_history(&self, query: RankHistoryQuery) -> OutteResult<Vec<RankHistoryRow>>;
}

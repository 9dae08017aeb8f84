use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::{debug, info, warn};
use sea_orm::sea_query::{
    Alias, Expr, Func, MysqlQueryBuilder, OnConflict, Order, PostgresQueryBuilder, Query,
    QueryStatementWriter, SelectStatement, SqliteQueryBuilder,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, QueryResult,
    Statement, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use unicode_normalization::UnicodeNormalization;

use crate::OutteConfig;
use crate::db::*;
use crate::migration::Migrator;
use outte_core::replay;
use outte_core::{
    ArchiveApi, ArchiveRecord, BOARD_SIZE, Board, BoardCatalogApi, BoardInfo, BoardRef,
    BoardType, DemoApi, HistoricScore, HistoryReport, Highscoreable, MergeReport, Metric,
    OutteError, OutteResult, PendingDemo, PlayerRecord, PlayerTally, RankHistoryQuery,
    RankHistoryRow, RankQuery, RankingApi, RankingConfig, RankingEngine, RankingRow, RawEntry,
    Resolved, ScoreRow, ScoreStoreApi, ScoreValue, SpreadRow, Tab, TieRow, TotalScoreRow,
};

/// Rank cutoffs snapshotted by [`ArchiveApi::record_histories`].
pub const HISTORY_RANKS: [u32; 4] = [1, 5, 10, 20];

#[derive(Clone)]
pub struct OutteStore {
    conn: DatabaseConnection,
    engine: RankingEngine,
}

/// Which score rows a read should return.
#[derive(Clone, Debug, Default)]
struct ScoreScope {
    types: Vec<BoardType>,
    tabs: Vec<Tab>,
    board: Option<BoardRef>,
    rank: Option<u32>,
    tied_rank: Option<u32>,
    boards: Option<Vec<BoardRef>>,
}

impl ScoreScope {
    fn of_query(query: &RankQuery) -> Self {
        Self {
            types: query.scope_types(),
            tabs: query.tabs.clone(),
            ..Self::default()
        }
    }

    fn of_type(board_type: BoardType, tabs: &[Tab]) -> Self {
        Self {
            types: vec![board_type],
            tabs: tabs.to_vec(),
            ..Self::default()
        }
    }

    fn apply(&self, select: &mut SelectStatement) {
        if !self.types.is_empty() {
            select.and_where(
                Expr::col((Scores::Table, Scores::BoardType))
                    .is_in(self.types.iter().map(|t| t.as_i16())),
            );
        }
        if !self.tabs.is_empty() {
            select.and_where(
                Expr::col((Scores::Table, Scores::Tab)).is_in(self.tabs.iter().map(|t| t.as_i16())),
            );
        }
        if let Some(board) = self.board {
            select
                .and_where(
                    Expr::col((Scores::Table, Scores::BoardType)).eq(board.board_type.as_i16()),
                )
                .and_where(Expr::col((Scores::Table, Scores::BoardId)).eq(board.board_id));
        }
        if let Some(rank) = self.rank {
            select.and_where(Expr::col((Scores::Table, Scores::Rank)).eq(rank as i64));
        }
        if let Some(tied_rank) = self.tied_rank {
            select.and_where(Expr::col((Scores::Table, Scores::TiedRank)).eq(tied_rank as i64));
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct TieGroup {
    board: BoardRef,
    tie_count: u32,
    total_count: u32,
}

impl OutteStore {
    pub async fn connect(config: &OutteConfig, base_dir: &Path) -> OutteResult<Self> {
        let url = config.connection_url(base_dir)?;
        let mut options = ConnectOptions::new(url);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        options.sqlx_logging(false);
        let conn = Database::connect(options).await?;
        Migrator::up(&conn, None).await?;
        debug!("outte store ready on {} backend", config.backend_name());
        Ok(Self {
            conn,
            engine: RankingEngine::new(config.ranking.clone()),
        })
    }

    pub async fn connect_sqlite(path: &Path) -> OutteResult<Self> {
        let config = OutteConfig::default_sqlite(path.to_string_lossy());
        Self::connect(&config, path.parent().unwrap_or_else(|| Path::new("."))).await
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn ranking_config(&self) -> &RankingConfig {
        self.engine.config()
    }

    pub async fn find_player_by_name(&self, name: &str) -> OutteResult<Option<PlayerRecord>> {
        let select = Query::select()
            .from(Players::Table)
            .columns([Players::Id, Players::ExternalId, Players::Name])
            .and_where(Expr::col(Players::NameNorm).eq(normalize_name(name)))
            .order_by(Players::Id, Order::Asc)
            .limit(1)
            .to_owned();
        query_one(&self.conn, &select)
            .await?
            .map(|row| player_from_row(&row))
            .transpose()
    }

    /// Same as [`ScoreStoreApi::merge_board`] with an explicit archive timestamp.
    pub async fn merge_board_at(
        &self,
        board: BoardRef,
        entries: Vec<Resolved<RawEntry>>,
        at_ms: i64,
    ) -> OutteResult<MergeReport> {
        let Some(registered) = self.get_board(board).await? else {
            return Err(OutteError::validation(format!(
                "board {board} is not registered"
            )));
        };
        let tab = registered.tab();
        let mut entries = entries;
        if entries.len() > BOARD_SIZE as usize {
            warn!(
                "{board}: {} entries received, keeping the best {BOARD_SIZE}",
                entries.len()
            );
            entries.truncate(BOARD_SIZE as usize);
        }

        let tx = self.conn.begin().await?;
        let mut report = MergeReport {
            board: Some(board),
            ..MergeReport::default()
        };
        for (position, resolved) in entries.iter().enumerate() {
            let entry = &resolved.item;
            let player_id = upsert_player(&tx, entry.user_id, &entry.user_name).await?;

            let upsert = Query::insert()
                .into_table(Scores::Table)
                .columns([
                    Scores::BoardType,
                    Scores::BoardId,
                    Scores::Rank,
                    Scores::TiedRank,
                    Scores::PlayerId,
                    Scores::Score,
                    Scores::ReplayId,
                    Scores::Tab,
                ])
                .values_panic([
                    board.board_type.as_i16().into(),
                    board.board_id.into(),
                    (position as i64).into(),
                    i64::from(resolved.tied_rank).into(),
                    player_id.into(),
                    entry.score.units().into(),
                    entry.replay_id.into(),
                    tab.as_i16().into(),
                ])
                .on_conflict(
                    OnConflict::columns([Scores::BoardType, Scores::BoardId, Scores::Rank])
                        .update_columns([
                            Scores::TiedRank,
                            Scores::PlayerId,
                            Scores::Score,
                            Scores::ReplayId,
                            Scores::Tab,
                        ])
                        .to_owned(),
                )
                .to_owned();
            exec(&tx, &upsert).await?;
            report.scores_written += 1;

            let existing = Query::select()
                .from(Archives::Table)
                .column(Archives::Id)
                .and_where(Expr::col(Archives::BoardType).eq(board.board_type.as_i16()))
                .and_where(Expr::col(Archives::BoardId).eq(board.board_id))
                .and_where(Expr::col(Archives::ReplayId).eq(entry.replay_id))
                .limit(1)
                .to_owned();
            if query_one(&tx, &existing).await?.is_some() {
                continue;
            }
            let insert_archive = Query::insert()
                .into_table(Archives::Table)
                .columns([
                    Archives::BoardType,
                    Archives::BoardId,
                    Archives::PlayerId,
                    Archives::Score,
                    Archives::ReplayId,
                    Archives::Tab,
                    Archives::CreatedAtMs,
                ])
                .values_panic([
                    board.board_type.as_i16().into(),
                    board.board_id.into(),
                    player_id.into(),
                    entry.score.units().into(),
                    entry.replay_id.into(),
                    tab.as_i16().into(),
                    at_ms.into(),
                ])
                .to_owned();
            exec(&tx, &insert_archive).await?;
            let archive_id = match query_one(&tx, &existing).await? {
                Some(row) => read_i64(&row, Archives::Id)?,
                None => {
                    return Err(OutteError::storage(format!(
                        "archive for replay {} vanished after insert",
                        entry.replay_id
                    )));
                }
            };
            let insert_demo = Query::insert()
                .into_table(Demos::Table)
                .columns([Demos::Id, Demos::BoardType, Demos::Payload, Demos::Expired])
                .values_panic([
                    archive_id.into(),
                    board.board_type.as_i16().into(),
                    Option::<Vec<u8>>::None.into(),
                    false.into(),
                ])
                .to_owned();
            exec(&tx, &insert_demo).await?;
            report.new_archives.push(archive_id);
        }

        let delete = Query::delete()
            .from_table(Scores::Table)
            .and_where(Expr::col(Scores::BoardType).eq(board.board_type.as_i16()))
            .and_where(Expr::col(Scores::BoardId).eq(board.board_id))
            .and_where(Expr::col(Scores::Rank).gte(entries.len() as i64))
            .to_owned();
        report.scores_deleted = exec_count(&tx, &delete).await? as usize;
        tx.commit().await?;

        if !report.new_archives.is_empty() {
            info!(
                "{board}: merged {} scores, {} new archives",
                report.scores_written,
                report.new_archives.len()
            );
        }
        Ok(report)
    }

    /// Set-based ranking, aggregated by the database from stored positions.
    pub async fn rank_set_based(&self, query: &RankQuery) -> OutteResult<Vec<RankingRow>> {
        let tallies = self.set_based_tallies(&self.conn, query).await?;
        Ok(self.engine.finalize(tallies, query))
    }

    /// Exclusion-aware ranking; recomputes every in-scope board from its rows.
    pub async fn rank_recomputed(&self, query: &RankQuery) -> OutteResult<Vec<RankingRow>> {
        let rows = load_score_rows(&self.conn, &ScoreScope::of_query(query)).await?;
        Ok(self.engine.rank_rows(&rows, query))
    }

    async fn set_based_tallies<C: ConnectionTrait>(
        &self,
        conn: &C,
        query: &RankQuery,
    ) -> OutteResult<Vec<PlayerTally>> {
        let scope = ScoreScope::of_query(query);
        let position = if query.ties {
            Scores::TiedRank
        } else {
            Scores::Rank
        };

        match query.metric {
            Metric::AverageLead => {
                let leaders = load_score_rows(
                    conn,
                    &ScoreScope {
                        rank: Some(0),
                        ..scope.clone()
                    },
                )
                .await?;
                let seconds: HashMap<BoardRef, ScoreValue> = load_score_rows(
                    conn,
                    &ScoreScope {
                        rank: Some(1),
                        ..scope
                    },
                )
                .await?
                .into_iter()
                .map(|row| (row.board, row.score))
                .collect();
                let mut tallies: BTreeMap<i64, PlayerTally> = BTreeMap::new();
                for leader in leaders {
                    let Some(second) = seconds.get(&leader.board) else {
                        continue;
                    };
                    let tally = tallies.entry(leader.player_id).or_insert_with(|| PlayerTally {
                        player_id: leader.player_id,
                        player_name: leader.player_name.clone(),
                        ..PlayerTally::default()
                    });
                    tally.sum += leader.score.units() - second.units();
                    tally.count += 1;
                }
                Ok(tallies.into_values().collect())
            }
            Metric::Maxed | Metric::Maxable => {
                let maxed = query.metric == Metric::Maxed;
                let groups = self.tie_groups(conn, &scope).await?;
                let boards: Vec<BoardRef> = groups
                    .into_iter()
                    .filter(|g| (g.tie_count == g.total_count) == maxed)
                    .map(|g| g.board)
                    .collect();
                if boards.is_empty() {
                    return Ok(Vec::new());
                }
                let holders = load_score_rows(
                    conn,
                    &ScoreScope {
                        tied_rank: Some(0),
                        boards: Some(boards),
                        ..scope
                    },
                )
                .await?;
                let mut tallies: BTreeMap<i64, PlayerTally> = BTreeMap::new();
                for row in holders {
                    let tally = tallies.entry(row.player_id).or_insert_with(|| PlayerTally {
                        player_id: row.player_id,
                        player_name: row.player_name.clone(),
                        ..PlayerTally::default()
                    });
                    tally.sum += 1;
                    tally.count += 1;
                }
                Ok(tallies.into_values().collect())
            }
            metric => {
                let summed = match metric {
                    Metric::TotalScore => Scores::Score,
                    _ => position,
                };
                let mut select = Query::select();
                select
                    .from(Scores::Table)
                    .inner_join(
                        Players::Table,
                        Expr::col((Players::Table, Players::Id))
                            .equals((Scores::Table, Scores::PlayerId)),
                    )
                    .column((Scores::Table, Scores::PlayerId))
                    .column((Players::Table, Players::Name))
                    .expr_as(
                        Func::sum(Expr::col((Scores::Table, summed))),
                        Alias::new("total"),
                    )
                    .expr_as(
                        Func::count(Expr::col((Scores::Table, Scores::Rank))),
                        Alias::new("cnt"),
                    )
                    .group_by_col((Scores::Table, Scores::PlayerId))
                    .group_by_col((Players::Table, Players::Name));
                scope.apply(&mut select);
                match metric {
                    Metric::CountBelow(n) => {
                        select.and_where(Expr::col((Scores::Table, position)).lt(i64::from(n)));
                    }
                    Metric::TiedOnly(n) => {
                        select
                            .and_where(Expr::col((Scores::Table, Scores::TiedRank)).lt(i64::from(n)))
                            .and_where(Expr::col((Scores::Table, Scores::Rank)).gte(i64::from(n)));
                    }
                    _ => {}
                }

                let rows = query_all(conn, &select).await?;
                let mut tallies = Vec::with_capacity(rows.len());
                for row in rows {
                    let count: i64 = row.try_get("", "cnt")?;
                    let total: Option<i64> = row.try_get("", "total")?;
                    let total = total.unwrap_or_default();
                    let sum = match metric {
                        Metric::CountBelow(_) | Metric::TiedOnly(_) => count,
                        Metric::Points | Metric::AveragePoints => {
                            i64::from(BOARD_SIZE) * count - total
                        }
                        _ => total,
                    };
                    tallies.push(PlayerTally {
                        player_id: read_i64(&row, Scores::PlayerId)?,
                        player_name: row.try_get("", &col_name(Players::Name))?,
                        sum,
                        count: count as u32,
                    });
                }
                Ok(tallies)
            }
        }
    }

    /// Boards whose rank-0 tie group is at least `min_ties` strong.
    async fn tie_groups<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &ScoreScope,
    ) -> OutteResult<Vec<TieGroup>> {
        let grouped = |tied_only: bool| {
            let mut select = Query::select();
            select
                .from(Scores::Table)
                .column((Scores::Table, Scores::BoardType))
                .column((Scores::Table, Scores::BoardId))
                .expr_as(
                    Func::count(Expr::col((Scores::Table, Scores::Rank))),
                    Alias::new("cnt"),
                )
                .group_by_col((Scores::Table, Scores::BoardType))
                .group_by_col((Scores::Table, Scores::BoardId));
            scope.apply(&mut select);
            if tied_only {
                select.and_where(Expr::col((Scores::Table, Scores::TiedRank)).eq(0));
            }
            select
        };

        let mut totals: HashMap<BoardRef, u32> = HashMap::new();
        for row in query_all(conn, &grouped(false)).await? {
            let count: i64 = row.try_get("", "cnt")?;
            totals.insert(read_board_ref(&row)?, count as u32);
        }
        let mut groups = Vec::new();
        for row in query_all(conn, &grouped(true)).await? {
            let board = read_board_ref(&row)?;
            let tie_count: i64 = row.try_get("", "cnt")?;
            let tie_count = tie_count as u32;
            if tie_count < self.engine.config().min_ties {
                continue;
            }
            groups.push(TieGroup {
                board,
                tie_count,
                total_count: totals.get(&board).copied().unwrap_or(tie_count),
            });
        }
        Ok(groups)
    }

    async fn board_names(&self, board_type: BoardType) -> OutteResult<HashMap<i64, String>> {
        Ok(self
            .list_boards(board_type)
            .await?
            .into_iter()
            .map(|board| (board.info().id, board.name().to_string()))
            .collect())
    }

    async fn set_demo_expired(&self, archive_id: i64) -> OutteResult<u64> {
        let update = Query::update()
            .table(Demos::Table)
            .values([(Demos::Expired, true.into())])
            .and_where(Expr::col(Demos::Id).eq(archive_id))
            .and_where(Expr::col(Demos::Payload).is_null())
            .and_where(Expr::col(Demos::Expired).eq(false))
            .to_owned();
        exec_count(&self.conn, &update).await
    }
}

#[async_trait]
impl BoardCatalogApi for OutteStore {
    async fn register_boards(&self, boards: Vec<Board>) -> OutteResult<usize> {
        let tx = self.conn.begin().await?;
        let mut count = 0;
        for board in &boards {
            let board_ref = board.board_ref();
            let insert = Query::insert()
                .into_table(Boards::Table)
                .columns([Boards::BoardType, Boards::BoardId, Boards::Tab, Boards::Name])
                .values_panic([
                    board_ref.board_type.as_i16().into(),
                    board_ref.board_id.into(),
                    board.tab().as_i16().into(),
                    board.name().into(),
                ])
                .on_conflict(
                    OnConflict::columns([Boards::BoardType, Boards::BoardId])
                        .update_columns([Boards::Tab, Boards::Name])
                        .to_owned(),
                )
                .to_owned();
            exec(&tx, &insert).await?;
            count += 1;
        }
        tx.commit().await?;
        debug!("registered {count} boards");
        Ok(count)
    }

    async fn list_boards(&self, board_type: BoardType) -> OutteResult<Vec<Board>> {
        let select = Query::select()
            .from(Boards::Table)
            .columns([Boards::BoardType, Boards::BoardId, Boards::Tab, Boards::Name])
            .and_where(Expr::col(Boards::BoardType).eq(board_type.as_i16()))
            .order_by(Boards::BoardId, Order::Asc)
            .to_owned();
        query_all(&self.conn, &select)
            .await?
            .iter()
            .map(board_from_row)
            .collect()
    }

    async fn get_board(&self, board: BoardRef) -> OutteResult<Option<Board>> {
        let select = Query::select()
            .from(Boards::Table)
            .columns([Boards::BoardType, Boards::BoardId, Boards::Tab, Boards::Name])
            .and_where(Expr::col(Boards::BoardType).eq(board.board_type.as_i16()))
            .and_where(Expr::col(Boards::BoardId).eq(board.board_id))
            .to_owned();
        query_one(&self.conn, &select)
            .await?
            .map(|row| board_from_row(&row))
            .transpose()
    }
}

#[async_trait]
impl ScoreStoreApi for OutteStore {
    async fn merge_board(
        &self,
        board: BoardRef,
        entries: Vec<Resolved<RawEntry>>,
    ) -> OutteResult<MergeReport> {
        self.merge_board_at(board, entries, now_ms()).await
    }

    async fn board_scores(&self, board: BoardRef) -> OutteResult<Vec<ScoreRow>> {
        load_score_rows(
            &self.conn,
            &ScoreScope {
                board: Some(board),
                ..ScoreScope::default()
            },
        )
        .await
    }

    async fn find_player(&self, external_id: i64) -> OutteResult<Option<PlayerRecord>> {
        let select = Query::select()
            .from(Players::Table)
            .columns([Players::Id, Players::ExternalId, Players::Name])
            .and_where(Expr::col(Players::ExternalId).eq(external_id))
            .to_owned();
        query_one(&self.conn, &select)
            .await?
            .map(|row| player_from_row(&row))
            .transpose()
    }
}

#[async_trait]
impl RankingApi for OutteStore {
    async fn rank(&self, query: RankQuery) -> OutteResult<Vec<RankingRow>> {
        if query.excluded_players.is_empty() {
            self.rank_set_based(&query).await
        } else {
            self.rank_recomputed(&query).await
        }
    }

    async fn spreads(
        &self,
        n: u32,
        board_type: BoardType,
        tabs: Vec<Tab>,
    ) -> OutteResult<Vec<SpreadRow>> {
        let n = n.min(BOARD_SIZE - 1);
        let scope = ScoreScope::of_type(board_type, &tabs);
        let leaders: HashMap<BoardRef, ScoreRow> = load_score_rows(
            &self.conn,
            &ScoreScope {
                rank: Some(0),
                ..scope.clone()
            },
        )
        .await?
        .into_iter()
        .map(|row| (row.board, row))
        .collect();
        let others = load_score_rows(
            &self.conn,
            &ScoreScope {
                rank: Some(n),
                ..scope
            },
        )
        .await?;
        let names = self.board_names(board_type).await?;

        let mut spreads: Vec<SpreadRow> = others
            .into_iter()
            .filter_map(|row| {
                let leader = leaders.get(&row.board)?;
                Some(SpreadRow {
                    board: row.board,
                    board_name: names.get(&row.board.board_id).cloned().unwrap_or_default(),
                    spread: ScoreValue(leader.score.units() - row.score.units()),
                    holder_name: leader.player_name.clone(),
                })
            })
            .collect();
        spreads.sort_by(|a, b| {
            b.spread
                .cmp(&a.spread)
                .then(a.board.board_id.cmp(&b.board.board_id))
        });
        spreads.truncate(self.engine.config().num_entries);
        Ok(spreads)
    }

    async fn ties(
        &self,
        board_type: BoardType,
        tabs: Vec<Tab>,
        maxed: Option<bool>,
    ) -> OutteResult<Vec<TieRow>> {
        let scope = ScoreScope::of_type(board_type, &tabs);
        let groups: Vec<TieGroup> = self
            .tie_groups(&self.conn, &scope)
            .await?
            .into_iter()
            .filter(|g| match maxed {
                Some(true) => g.tie_count == g.total_count,
                Some(false) => g.tie_count < g.total_count,
                None => true,
            })
            .collect();
        let holders: HashMap<BoardRef, String> = load_score_rows(
            &self.conn,
            &ScoreScope {
                rank: Some(0),
                ..scope
            },
        )
        .await?
        .into_iter()
        .map(|row| (row.board, row.player_name))
        .collect();
        let names = self.board_names(board_type).await?;

        let mut rows: Vec<TieRow> = groups
            .into_iter()
            .map(|g| TieRow {
                board: g.board,
                board_name: names.get(&g.board.board_id).cloned().unwrap_or_default(),
                tie_count: g.tie_count,
                total_count: g.total_count,
                holder_name: holders.get(&g.board).cloned().unwrap_or_default(),
            })
            .collect();
        rows.sort_by(|a, b| {
            b.tie_count
                .cmp(&a.tie_count)
                .then(a.board.board_id.cmp(&b.board.board_id))
        });
        Ok(rows)
    }

    async fn total_scores(
        &self,
        board_type: BoardType,
        tabs: Vec<Tab>,
    ) -> OutteResult<TotalScoreRow> {
        let mut select = Query::select();
        select
            .from(Scores::Table)
            .expr_as(
                Func::sum(Expr::col((Scores::Table, Scores::Score))),
                Alias::new("total"),
            )
            .expr_as(
                Func::count(Expr::col((Scores::Table, Scores::Score))),
                Alias::new("cnt"),
            );
        ScoreScope {
            rank: Some(0),
            ..ScoreScope::of_type(board_type, &tabs)
        }
        .apply(&mut select);
        let Some(row) = query_one(&self.conn, &select).await? else {
            return Ok(TotalScoreRow::default());
        };
        let total: Option<i64> = row.try_get("", "total")?;
        let count: i64 = row.try_get("", "cnt")?;
        Ok(TotalScoreRow {
            total: ScoreValue(total.unwrap_or_default()),
            count: count as u32,
        })
    }
}

#[async_trait]
impl DemoApi for OutteStore {
    async fn pending_demos(&self, limit: Option<u32>) -> OutteResult<Vec<PendingDemo>> {
        let mut select = Query::select();
        select
            .from(Demos::Table)
            .inner_join(
                Archives::Table,
                Expr::col((Archives::Table, Archives::Id)).equals((Demos::Table, Demos::Id)),
            )
            .columns([
                (Archives::Table, Archives::Id),
                (Archives::Table, Archives::BoardType),
                (Archives::Table, Archives::BoardId),
                (Archives::Table, Archives::ReplayId),
                (Archives::Table, Archives::Score),
            ])
            .and_where(Expr::col((Demos::Table, Demos::Payload)).is_null())
            .and_where(Expr::col((Demos::Table, Demos::Expired)).eq(false))
            .order_by((Archives::Table, Archives::Id), Order::Asc);
        if let Some(limit) = limit {
            select.limit(u64::from(limit));
        }
        query_all(&self.conn, &select)
            .await?
            .iter()
            .map(|row| {
                Ok(PendingDemo {
                    archive_id: read_i64(row, Archives::Id)?,
                    board: read_board_ref(row)?,
                    replay_id: read_i64(row, Archives::ReplayId)?,
                    score: ScoreValue(read_i64(row, Archives::Score)?),
                })
            })
            .collect()
    }

    async fn store_demo(&self, archive_id: i64, sublevels: Vec<Vec<u8>>) -> OutteResult<bool> {
        let Some(archive) = self.get_archive(archive_id).await? else {
            return Err(OutteError::not_found(format!("archive {archive_id}")));
        };
        let payload = replay::encode(&sublevels)?;
        let framecount: i64 = sublevels.iter().map(|s| s.len() as i64).sum();
        let gold = replay::gold(archive.score, framecount);

        let tx = self.conn.begin().await?;
        let update_demo = Query::update()
            .table(Demos::Table)
            .values([(Demos::Payload, payload.into())])
            .and_where(Expr::col(Demos::Id).eq(archive_id))
            .and_where(Expr::col(Demos::Payload).is_null())
            .and_where(Expr::col(Demos::Expired).eq(false))
            .to_owned();
        if exec_count(&tx, &update_demo).await? == 0 {
            if !demo_exists(&tx, archive_id).await? {
                return Err(OutteError::not_found(format!("demo {archive_id}")));
            }
            debug!("demo {archive_id} already settled, keeping it");
            return Ok(false);
        }
        let update_archive = Query::update()
            .table(Archives::Table)
            .values([
                (Archives::Framecount, framecount.into()),
                (Archives::Gold, gold.into()),
            ])
            .and_where(Expr::col(Archives::Id).eq(archive_id))
            .and_where(Expr::col(Archives::Framecount).is_null())
            .to_owned();
        exec(&tx, &update_archive).await?;
        tx.commit().await?;
        debug!("stored demo {archive_id} ({framecount} frames)");
        Ok(true)
    }

    async fn expire_demo(&self, archive_id: i64) -> OutteResult<bool> {
        if self.set_demo_expired(archive_id).await? == 0 {
            if !demo_exists(&self.conn, archive_id).await? {
                return Err(OutteError::not_found(format!("demo {archive_id}")));
            }
            debug!("demo {archive_id} already settled, not expiring");
            return Ok(false);
        }
        info!("demo {archive_id} marked expired");
        Ok(true)
    }

    async fn decode_demo(&self, archive_id: i64) -> OutteResult<Option<Vec<Vec<u8>>>> {
        let select = Query::select()
            .from(Demos::Table)
            .columns([Demos::Payload, Demos::Expired])
            .and_where(Expr::col(Demos::Id).eq(archive_id))
            .to_owned();
        let Some(row) = query_one(&self.conn, &select).await? else {
            return Ok(None);
        };
        let expired: bool = row.try_get("", &col_name(Demos::Expired))?;
        let payload: Option<Vec<u8>> = row.try_get("", &col_name(Demos::Payload))?;
        match payload {
            Some(payload) if !expired => replay::decode(&payload).map(Some),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ArchiveApi for OutteStore {
    async fn get_archive(&self, archive_id: i64) -> OutteResult<Option<ArchiveRecord>> {
        let mut select = archive_select();
        select.and_where(Expr::col((Archives::Table, Archives::Id)).eq(archive_id));
        query_one(&self.conn, &select)
            .await?
            .map(|row| archive_from_row(&row))
            .transpose()
    }

    async fn board_at(&self, board: BoardRef, at_ms: i64) -> OutteResult<Vec<HistoricScore>> {
        let mut select = archive_select();
        select
            .and_where(Expr::col((Archives::Table, Archives::BoardType)).eq(board.board_type.as_i16()))
            .and_where(Expr::col((Archives::Table, Archives::BoardId)).eq(board.board_id))
            .and_where(Expr::col((Archives::Table, Archives::CreatedAtMs)).lte(at_ms));
        let archives: Vec<ArchiveRecord> = query_all(&self.conn, &select)
            .await?
            .iter()
            .map(archive_from_row)
            .collect::<OutteResult<_>>()?;

        let mut best: HashMap<i64, ArchiveRecord> = HashMap::new();
        for archive in archives {
            match best.get(&archive.player_id) {
                Some(current)
                    if (current.score, std::cmp::Reverse(current.replay_id))
                        >= (archive.score, std::cmp::Reverse(archive.replay_id)) => {}
                _ => {
                    best.insert(archive.player_id, archive);
                }
            }
        }
        let mut best: Vec<ArchiveRecord> = best.into_values().collect();
        best.sort_by(|a, b| b.score.cmp(&a.score).then(a.replay_id.cmp(&b.replay_id)));
        Ok(best
            .into_iter()
            .take(BOARD_SIZE as usize)
            .enumerate()
            .map(|(rank, archive)| HistoricScore {
                rank: rank as u32,
                archive_id: archive.id,
                player_id: archive.player_id,
                player_name: archive.player_name,
                score: archive.score,
                replay_id: archive.replay_id,
            })
            .collect())
    }

    async fn record_histories(&self, at_ms: i64) -> OutteResult<HistoryReport> {
        let tx = self.conn.begin().await?;
        let mut report = HistoryReport::default();
        for board_type in BoardType::ALL {
            for &tab in board_type.tabs() {
                let scoped = |metric: Metric| {
                    RankQuery::new(metric)
                        .with_types(vec![board_type])
                        .with_tabs(vec![tab])
                        .full()
                };
                for rank in HISTORY_RANKS {
                    for ties in [false, true] {
                        let query = scoped(Metric::CountBelow(rank)).with_ties(ties);
                        for tally in self.set_based_tallies(&tx, &query).await? {
                            if tally.sum <= 0 {
                                continue;
                            }
                            let insert = Query::insert()
                                .into_table(RankHistories::Table)
                                .columns([
                                    RankHistories::PlayerId,
                                    RankHistories::BoardType,
                                    RankHistories::Tab,
                                    RankHistories::Rank,
                                    RankHistories::Ties,
                                    RankHistories::Count,
                                    RankHistories::TimestampMs,
                                ])
                                .values_panic([
                                    tally.player_id.into(),
                                    board_type.as_i16().into(),
                                    tab.as_i16().into(),
                                    i64::from(rank).into(),
                                    ties.into(),
                                    tally.sum.into(),
                                    at_ms.into(),
                                ])
                                .to_owned();
                            exec(&tx, &insert).await?;
                            report.rank_rows += 1;
                        }
                    }
                }

                for tally in self.set_based_tallies(&tx, &scoped(Metric::Points)).await? {
                    if tally.sum <= 0 {
                        continue;
                    }
                    let insert = Query::insert()
                        .into_table(PointsHistories::Table)
                        .columns([
                            PointsHistories::PlayerId,
                            PointsHistories::BoardType,
                            PointsHistories::Tab,
                            PointsHistories::Points,
                            PointsHistories::TimestampMs,
                        ])
                        .values_panic([
                            tally.player_id.into(),
                            board_type.as_i16().into(),
                            tab.as_i16().into(),
                            tally.sum.into(),
                            at_ms.into(),
                        ])
                        .to_owned();
                    exec(&tx, &insert).await?;
                    report.points_rows += 1;
                }

                for tally in self
                    .set_based_tallies(&tx, &scoped(Metric::TotalScore))
                    .await?
                {
                    if tally.sum <= 0 {
                        continue;
                    }
                    let insert = Query::insert()
                        .into_table(TotalScoreHistories::Table)
                        .columns([
                            TotalScoreHistories::PlayerId,
                            TotalScoreHistories::BoardType,
                            TotalScoreHistories::Tab,
                            TotalScoreHistories::Score,
                            TotalScoreHistories::TimestampMs,
                        ])
                        .values_panic([
                            tally.player_id.into(),
                            board_type.as_i16().into(),
                            tab.as_i16().into(),
                            tally.sum.into(),
                            at_ms.into(),
                        ])
                        .to_owned();
                    exec(&tx, &insert).await?;
                    report.total_score_rows += 1;
                }
            }
        }
        tx.commit().await?;
        info!(
            "recorded histories: {} rank, {} points, {} total score rows",
            report.rank_rows, report.points_rows, report.total_score_rows
        );
        Ok(report)
    }

    async fn rank_history(&self, query: RankHistoryQuery) -> OutteResult<Vec<RankHistoryRow>> {
        let select = Query::select()
            .from(RankHistories::Table)
            .columns([RankHistories::Count, RankHistories::TimestampMs])
            .and_where(Expr::col(RankHistories::PlayerId).eq(query.player_id))
            .and_where(Expr::col(RankHistories::BoardType).eq(query.board_type.as_i16()))
            .and_where(Expr::col(RankHistories::Tab).eq(query.tab.as_i16()))
            .and_where(Expr::col(RankHistories::Rank).eq(i64::from(query.rank)))
            .and_where(Expr::col(RankHistories::Ties).eq(query.ties))
            .order_by(RankHistories::TimestampMs, Order::Asc)
            .to_owned();
        query_all(&self.conn, &select)
            .await?
            .iter()
            .map(|row| {
                Ok(RankHistoryRow {
                    player_id: query.player_id,
                    board_type: query.board_type,
                    tab: query.tab,
                    rank: query.rank,
                    ties: query.ties,
                    count: read_i64(row, RankHistories::Count)?,
                    timestamp_ms: read_i64(row, RankHistories::TimestampMs)?,
                })
            })
            .collect()
    }
}

async fn upsert_player<C: ConnectionTrait>(
    conn: &C,
    external_id: i64,
    name: &str,
) -> OutteResult<i64> {
    let select = Query::select()
        .from(Players::Table)
        .column(Players::Id)
        .and_where(Expr::col(Players::ExternalId).eq(external_id))
        .to_owned();
    if let Some(row) = query_one(conn, &select).await? {
        let id = read_i64(&row, Players::Id)?;
        let update = Query::update()
            .table(Players::Table)
            .values([
                (Players::Name, name.into()),
                (Players::NameNorm, normalize_name(name).into()),
            ])
            .and_where(Expr::col(Players::Id).eq(id))
            .to_owned();
        exec(conn, &update).await?;
        return Ok(id);
    }
    let insert = Query::insert()
        .into_table(Players::Table)
        .columns([Players::ExternalId, Players::Name, Players::NameNorm])
        .values_panic([
            external_id.into(),
            name.into(),
            normalize_name(name).into(),
        ])
        .to_owned();
    exec(conn, &insert).await?;
    match query_one(conn, &select).await? {
        Some(row) => read_i64(&row, Players::Id),
        None => Err(OutteError::storage(format!(
            "player {external_id} missing after insert"
        ))),
    }
}

async fn load_score_rows<C: ConnectionTrait>(
    conn: &C,
    scope: &ScoreScope,
) -> OutteResult<Vec<ScoreRow>> {
    let Some(boards) = &scope.boards else {
        return select_score_rows(conn, scope).await;
    };
    let mut rows = Vec::new();
    for board in boards {
        let narrowed = ScoreScope {
            board: Some(*board),
            boards: None,
            ..scope.clone()
        };
        rows.extend(select_score_rows(conn, &narrowed).await?);
    }
    Ok(rows)
}

async fn select_score_rows<C: ConnectionTrait>(
    conn: &C,
    scope: &ScoreScope,
) -> OutteResult<Vec<ScoreRow>> {
    let mut select = Query::select();
    select
        .from(Scores::Table)
        .inner_join(
            Players::Table,
            Expr::col((Players::Table, Players::Id)).equals((Scores::Table, Scores::PlayerId)),
        )
        .columns([
            (Scores::Table, Scores::BoardType),
            (Scores::Table, Scores::BoardId),
            (Scores::Table, Scores::Rank),
            (Scores::Table, Scores::TiedRank),
            (Scores::Table, Scores::PlayerId),
            (Scores::Table, Scores::Score),
            (Scores::Table, Scores::ReplayId),
            (Scores::Table, Scores::Tab),
        ])
        .column((Players::Table, Players::Name))
        .order_by((Scores::Table, Scores::BoardType), Order::Asc)
        .order_by((Scores::Table, Scores::BoardId), Order::Asc)
        .order_by((Scores::Table, Scores::Rank), Order::Asc);
    scope.apply(&mut select);
    query_all(conn, &select)
        .await?
        .iter()
        .map(score_row_from_row)
        .collect()
}

async fn demo_exists<C: ConnectionTrait>(conn: &C, archive_id: i64) -> OutteResult<bool> {
    let select = Query::select()
        .from(Demos::Table)
        .column(Demos::Id)
        .and_where(Expr::col(Demos::Id).eq(archive_id))
        .to_owned();
    Ok(query_one(conn, &select).await?.is_some())
}

fn archive_select() -> SelectStatement {
    Query::select()
        .from(Archives::Table)
        .inner_join(
            Players::Table,
            Expr::col((Players::Table, Players::Id)).equals((Archives::Table, Archives::PlayerId)),
        )
        .columns([
            (Archives::Table, Archives::Id),
            (Archives::Table, Archives::BoardType),
            (Archives::Table, Archives::BoardId),
            (Archives::Table, Archives::PlayerId),
            (Archives::Table, Archives::Score),
            (Archives::Table, Archives::ReplayId),
            (Archives::Table, Archives::Tab),
            (Archives::Table, Archives::CreatedAtMs),
            (Archives::Table, Archives::Framecount),
            (Archives::Table, Archives::Gold),
        ])
        .column((Players::Table, Players::Name))
        .order_by((Archives::Table, Archives::Id), Order::Asc)
        .to_owned()
}

fn score_row_from_row(row: &QueryResult) -> OutteResult<ScoreRow> {
    Ok(ScoreRow {
        board: read_board_ref(row)?,
        tab: read_tab(row, Scores::Tab)?,
        rank: read_i64(row, Scores::Rank)? as u32,
        tied_rank: read_i64(row, Scores::TiedRank)? as u32,
        player_id: read_i64(row, Scores::PlayerId)?,
        player_name: row.try_get("", &col_name(Players::Name))?,
        score: ScoreValue(read_i64(row, Scores::Score)?),
        replay_id: read_i64(row, Scores::ReplayId)?,
    })
}

fn archive_from_row(row: &QueryResult) -> OutteResult<ArchiveRecord> {
    Ok(ArchiveRecord {
        id: read_i64(row, Archives::Id)?,
        board: read_board_ref(row)?,
        tab: read_tab(row, Archives::Tab)?,
        player_id: read_i64(row, Archives::PlayerId)?,
        player_name: row.try_get("", &col_name(Players::Name))?,
        score: ScoreValue(read_i64(row, Archives::Score)?),
        replay_id: read_i64(row, Archives::ReplayId)?,
        created_at_ms: read_i64(row, Archives::CreatedAtMs)?,
        framecount: row.try_get("", &col_name(Archives::Framecount))?,
        gold: row.try_get("", &col_name(Archives::Gold))?,
    })
}

fn board_from_row(row: &QueryResult) -> OutteResult<Board> {
    let board = read_board_ref(row)?;
    Ok(Board::new(
        board.board_type,
        BoardInfo {
            id: board.board_id,
            tab: read_tab(row, Boards::Tab)?,
            name: row.try_get("", &col_name(Boards::Name))?,
        },
    ))
}

fn player_from_row(row: &QueryResult) -> OutteResult<PlayerRecord> {
    Ok(PlayerRecord {
        id: read_i64(row, Players::Id)?,
        external_id: row.try_get("", &col_name(Players::ExternalId))?,
        name: row.try_get("", &col_name(Players::Name))?,
    })
}

/// Reads the `board_type`/`board_id` pair shared by every board-keyed table.
fn read_board_ref(row: &QueryResult) -> OutteResult<BoardRef> {
    let raw = read_i64(row, Scores::BoardType)?;
    let board_type = i16::try_from(raw)
        .ok()
        .and_then(BoardType::from_i16)
        .ok_or_else(|| OutteError::storage(format!("unknown board type {raw}")))?;
    Ok(BoardRef::new(board_type, read_i64(row, Scores::BoardId)?))
}

fn read_tab(row: &QueryResult, column: impl sea_orm::sea_query::Iden) -> OutteResult<Tab> {
    let raw = read_i64(row, column)?;
    i16::try_from(raw)
        .ok()
        .and_then(Tab::from_i16)
        .ok_or_else(|| OutteError::storage(format!("unknown tab {raw}")))
}

fn read_i64(row: &QueryResult, column: impl sea_orm::sea_query::Iden) -> OutteResult<i64> {
    Ok(row.try_get("", &col_name(column))?)
}

fn col_name(column: impl sea_orm::sea_query::Iden) -> String {
    column.to_string()
}

fn normalize_name(value: &str) -> String {
    value.trim().nfc().collect::<String>().to_lowercase()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_orm::sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
    }
}

async fn exec<C, S>(conn: &C, stmt: &S) -> OutteResult<()>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    exec_count(conn, stmt).await.map(|_| ())
}

async fn exec_count<C, S>(conn: &C, stmt: &S) -> OutteResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

async fn query_all<C, S>(conn: &C, stmt: &S) -> OutteResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

async fn query_one<C, S>(conn: &C, stmt: &S) -> OutteResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}

use std::sync::Arc;

use log::{debug, info, warn};
use outte_store::replay;
use outte_store::{
    ArchiveApi, Board, BoardCatalogApi, BoardType, CleaningFilter, DemoApi, Highscoreable,
    MergeReport, OutteConfig, OutteError, OutteResult, OutteStore, PendingDemo, ScoreStoreApi,
    resolve,
};

use crate::fetch::{BoardSource, FetchContext, Fetched};
use crate::retry::{RetryOutcome, RetryPolicy};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Merged(MergeReport),
    /// Upstream gave nothing usable; the stored board is untouched.
    NoData,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DemoOutcome {
    Stored { framecount: i64 },
    Expired,
    /// Left pending for a later sweep.
    Deferred,
    /// Another task populated or expired the demo first.
    Settled,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoardSweep {
    pub updated: usize,
    pub no_data: usize,
    pub failed: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DemoSweep {
    pub stored: usize,
    pub expired: usize,
    pub deferred: usize,
    pub settled: usize,
    pub failed: usize,
}

/// Fetch, clean, resolve and merge, then populate the new demos.
#[derive(Clone)]
pub struct Ingestor {
    store: OutteStore,
    source: Arc<dyn BoardSource>,
    filter: Arc<CleaningFilter>,
    board_retry: RetryPolicy,
    replay_retry: RetryPolicy,
}

impl Ingestor {
    pub fn new(store: OutteStore, source: Arc<dyn BoardSource>, config: &OutteConfig) -> Self {
        Self {
            store,
            source,
            filter: Arc::new(CleaningFilter::new(config.filter.clone())),
            board_retry: RetryPolicy::for_boards(&config.fetch),
            replay_retry: RetryPolicy::for_replays(&config.fetch),
        }
    }

    pub fn with_retry(mut self, boards: RetryPolicy, replays: RetryPolicy) -> Self {
        self.board_retry = boards;
        self.replay_retry = replays;
        self
    }

    pub fn store(&self) -> &OutteStore {
        &self.store
    }

    /// Refreshes one board and spawns demo population for its new archives.
    pub async fn update_board(
        &self,
        ctx: &FetchContext,
        board: &Board,
    ) -> OutteResult<UpdateOutcome> {
        let outcome = self.merge_fetched(ctx, board).await?;
        if let UpdateOutcome::Merged(report) = &outcome
            && !report.new_archives.is_empty()
        {
            self.spawn_demo_population(ctx.clone(), report.new_archives.clone());
        }
        Ok(outcome)
    }

    /// Same as [`Ingestor::update_board`] without the background demo task.
    pub async fn merge_fetched(
        &self,
        ctx: &FetchContext,
        board: &Board,
    ) -> OutteResult<UpdateOutcome> {
        let board_ref = board.board_ref();
        let label = format!("scores for {board_ref}");
        let fetched = match self
            .board_retry
            .run(&label, |_| self.source.fetch_board_entries(ctx, board_ref))
            .await
        {
            RetryOutcome::Succeeded { value, .. } => value,
            RetryOutcome::Exhausted { error, attempts } if error.is_retryable() => {
                warn!("{label}: giving up after {attempts} attempts: {error}");
                Fetched::NoData
            }
            RetryOutcome::Exhausted { error, .. } => return Err(error),
        };
        let entries = match fetched {
            Fetched::Data(entries) => entries,
            Fetched::NotFound | Fetched::NoData => {
                warn!("{board_ref}: no scores retrieved, keeping stored board");
                return Ok(UpdateOutcome::NoData);
            }
        };

        let cleaned = self.filter.clean(board_ref, board.tab(), entries);
        let report = self.store.merge_board(board_ref, resolve(cleaned)).await?;
        debug!(
            "{board_ref}: {} rows written, {} removed",
            report.scores_written, report.scores_deleted
        );
        Ok(UpdateOutcome::Merged(report))
    }

    /// Updates every registered board of a type; one board failing does not
    /// stop the others.
    pub async fn update_all(
        &self,
        ctx: &FetchContext,
        board_type: BoardType,
    ) -> OutteResult<BoardSweep> {
        let boards = self.store.list_boards(board_type).await?;
        let mut sweep = BoardSweep::default();
        for board in &boards {
            match self.update_board(ctx, board).await {
                Ok(UpdateOutcome::Merged(_)) => sweep.updated += 1,
                Ok(UpdateOutcome::NoData) => sweep.no_data += 1,
                Err(err) => {
                    warn!("{}: update failed: {err}", board.board_ref());
                    sweep.failed += 1;
                }
            }
        }
        info!(
            "{board_type} sweep: {} updated, {} without data, {} failed",
            sweep.updated, sweep.no_data, sweep.failed
        );
        Ok(sweep)
    }

    pub async fn populate_demo(
        &self,
        ctx: &FetchContext,
        demo: &PendingDemo,
    ) -> OutteResult<DemoOutcome> {
        let board_type = demo.board.board_type;
        let label = format!("replay {} for {}", demo.replay_id, demo.board);
        let outcome = self
            .replay_retry
            .run(&label, |_| async move {
                match self.source.fetch_replay(ctx, board_type, demo.replay_id).await? {
                    Fetched::Data(bytes) => {
                        let parsed = replay::parse_response(&bytes, board_type)?;
                        if i64::from(parsed.header.replay_id) != demo.replay_id {
                            return Err(OutteError::integrity(format!(
                                "asked for replay {}, got {}",
                                demo.replay_id, parsed.header.replay_id
                            )));
                        }
                        Ok(Fetched::Data(parsed))
                    }
                    Fetched::NotFound => Ok(Fetched::NotFound),
                    Fetched::NoData => Ok(Fetched::NoData),
                }
            })
            .await;

        let fetched = match outcome {
            RetryOutcome::Succeeded { value, .. } => value,
            RetryOutcome::Exhausted { error, attempts } if error.is_retryable() => {
                warn!("{label}: giving up for this cycle after {attempts} attempts: {error}");
                return Ok(DemoOutcome::Deferred);
            }
            RetryOutcome::Exhausted { error, .. } => return Err(error),
        };
        match fetched {
            Fetched::Data(parsed) => {
                let framecount = parsed.framecount();
                if self.store.store_demo(demo.archive_id, parsed.sublevels).await? {
                    Ok(DemoOutcome::Stored { framecount })
                } else {
                    Ok(DemoOutcome::Settled)
                }
            }
            Fetched::NotFound => {
                if self.store.expire_demo(demo.archive_id).await? {
                    Ok(DemoOutcome::Expired)
                } else {
                    Ok(DemoOutcome::Settled)
                }
            }
            Fetched::NoData => Ok(DemoOutcome::Deferred),
        }
    }

    /// Populates demos still missing a payload, oldest first.
    pub async fn sweep_demos(
        &self,
        ctx: &FetchContext,
        limit: Option<u32>,
    ) -> OutteResult<DemoSweep> {
        let pending = self.store.pending_demos(limit).await?;
        let mut sweep = DemoSweep::default();
        for demo in &pending {
            match self.populate_demo(ctx, demo).await {
                Ok(DemoOutcome::Stored { .. }) => sweep.stored += 1,
                Ok(DemoOutcome::Expired) => sweep.expired += 1,
                Ok(DemoOutcome::Deferred) => sweep.deferred += 1,
                Ok(DemoOutcome::Settled) => sweep.settled += 1,
                Err(err) => {
                    warn!("demo {}: {err}", demo.archive_id);
                    sweep.failed += 1;
                }
            }
        }
        if !pending.is_empty() {
            info!(
                "demo sweep: {} stored, {} expired, {} deferred, {} settled, {} failed",
                sweep.stored, sweep.expired, sweep.deferred, sweep.settled, sweep.failed
            );
        }
        Ok(sweep)
    }

    fn spawn_demo_population(&self, ctx: FetchContext, archive_ids: Vec<i64>) {
        let ingestor = self.clone();
        tokio::spawn(async move {
            for archive_id in archive_ids {
                let archive = match ingestor.store.get_archive(archive_id).await {
                    Ok(Some(archive)) => archive,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!("archive {archive_id}: {err}");
                        continue;
                    }
                };
                let demo = PendingDemo {
                    archive_id,
                    board: archive.board,
                    replay_id: archive.replay_id,
                    score: archive.score,
                };
                if let Err(err) = ingestor.populate_demo(&ctx, &demo).await {
                    warn!("demo {archive_id}: {err}");
                }
            }
        });
    }
}

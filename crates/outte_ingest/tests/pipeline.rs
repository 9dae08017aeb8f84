use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use outte_ingest::{
    BoardSource, BoardSweep, DemoOutcome, DemoSweep, FetchContext, Fetched, Ingestor,
    RetryPolicy, UpdateOutcome,
};
use outte_store::filter::CeilingRule;
use outte_store::replay::{self, ReplayHeader};
use outte_store::{
    ArchiveApi, Board, BoardCatalogApi, BoardInfo, BoardRef, BoardType, DemoApi, FilterConfig,
    OutteConfig, OutteError, OutteResult, OutteStore, PendingDemo, RawEntry, ScoreStoreApi,
    ScoreValue, Tab,
};
use tempfile::tempdir;

#[derive(Default)]
struct FakeSource {
    boards: Mutex<HashMap<BoardRef, OutteResult<Vec<RawEntry>>>>,
    replays: Mutex<HashMap<i64, Vec<u8>>>,
    transient_board_failures: AtomicU32,
    board_calls: AtomicU32,
}

impl FakeSource {
    fn with_board(self, board: BoardRef, entries: Vec<RawEntry>) -> Self {
        self.boards
            .lock()
            .expect("lock")
            .insert(board, Ok(entries));
        self
    }

    fn with_broken_board(self, board: BoardRef) -> Self {
        self.boards
            .lock()
            .expect("lock")
            .insert(board, Err(OutteError::validation("upstream schema changed")));
        self
    }

    fn with_replay(self, replay_id: i64, bytes: Vec<u8>) -> Self {
        self.replays
            .lock()
            .expect("lock")
            .insert(replay_id, bytes);
        self
    }
}

#[async_trait]
impl BoardSource for FakeSource {
    async fn fetch_board_entries(
        &self,
        _ctx: &FetchContext,
        board: BoardRef,
    ) -> OutteResult<Fetched<Vec<RawEntry>>> {
        self.board_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.transient_board_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_board_failures
                .store(pending - 1, Ordering::SeqCst);
            return Err(OutteError::transient("gateway timeout"));
        }
        match self.boards.lock().expect("lock").get(&board) {
            Some(Ok(entries)) => Ok(Fetched::Data(entries.clone())),
            Some(Err(err)) => Err(OutteError::validation(err.to_string())),
            None => Ok(Fetched::NoData),
        }
    }

    async fn fetch_replay(
        &self,
        _ctx: &FetchContext,
        _board_type: BoardType,
        replay_id: i64,
    ) -> OutteResult<Fetched<Vec<u8>>> {
        match self.replays.lock().expect("lock").get(&replay_id) {
            Some(bytes) => Ok(Fetched::Data(bytes.clone())),
            None => Ok(Fetched::NotFound),
        }
    }
}

fn level(id: i64) -> BoardRef {
    BoardRef::new(BoardType::Level, id)
}

fn entry(user_id: i64, name: &str, seconds: i64, replay_id: i64) -> RawEntry {
    RawEntry {
        user_id,
        user_name: name.to_string(),
        score: ScoreValue(seconds * 1000),
        replay_id,
    }
}

fn level_replay(replay_id: i64, frames: usize) -> Vec<u8> {
    replay::compose_response(
        BoardType::Level,
        ReplayHeader {
            replay_type: 0,
            replay_id: replay_id as u32,
            board_id: 2,
            user_id: 1,
        },
        &[vec![1u8; frames]],
    )
    .expect("compose")
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy::new(3, 0, 0)
}

async fn setup(base: &Path, source: FakeSource) -> OutteResult<(Ingestor, Arc<FakeSource>)> {
    let mut config = OutteConfig::default_sqlite(base.join("outte.sqlite").to_string_lossy());
    config.filter = FilterConfig {
        ceilings: vec![CeilingRule {
            board_type: BoardType::Level,
            tab: Tab::SI,
            seconds: 200,
        }],
        ignored_player_ids: vec![666],
        ..FilterConfig::default()
    };
    let store = OutteStore::connect(&config, base).await?;
    let boards = [0, 1, 2]
        .into_iter()
        .map(|id| {
            Board::new(
                BoardType::Level,
                BoardInfo {
                    id,
                    tab: Tab::SI,
                    name: format!("SI-A-00-0{id}"),
                },
            )
        })
        .collect();
    store.register_boards(boards).await?;
    let source = Arc::new(source);
    let ingestor = Ingestor::new(store, source.clone(), &config)
        .with_retry(fast_retries(), fast_retries());
    Ok((ingestor, source))
}

fn snapshot() -> Vec<RawEntry> {
    vec![
        entry(1, "alice", 70, 30),
        entry(1, "alice", 60, 31),
        entry(666, "cheater", 150, 32),
        entry(2, "bob", 250, 33),
        entry(3, "carol", 65, 34),
        entry(4, "dave", 64, 35),
    ]
}

#[tokio::test]
async fn update_cleans_resolves_and_merges() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let source = FakeSource::default().with_board(level(2), snapshot());
    let (ingestor, _) = setup(dir.path(), source).await?;
    let board = ingestor
        .store()
        .get_board(level(2))
        .await?
        .expect("registered");

    let outcome = ingestor
        .merge_fetched(&FetchContext::new(), &board)
        .await?;
    let UpdateOutcome::Merged(report) = outcome else {
        panic!("expected a merge");
    };
    assert_eq!(report.scores_written, 3);
    assert_eq!(report.new_archives.len(), 3);

    let rows = ingestor.store().board_scores(level(2)).await?;
    let names: Vec<&str> = rows.iter().map(|r| r.player_name.as_str()).collect();
    assert_eq!(names, vec!["alice", "carol", "dave"]);
    Ok(())
}

#[tokio::test]
async fn transient_failures_are_retried() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let source = FakeSource::default().with_board(level(2), snapshot());
    source.transient_board_failures.store(2, Ordering::SeqCst);
    let (ingestor, source) = setup(dir.path(), source).await?;
    let board = ingestor
        .store()
        .get_board(level(2))
        .await?
        .expect("registered");

    let outcome = ingestor
        .merge_fetched(&FetchContext::new(), &board)
        .await?;
    assert!(matches!(outcome, UpdateOutcome::Merged(_)));
    assert_eq!(source.board_calls.load(Ordering::SeqCst), 3);

    source.transient_board_failures.store(5, Ordering::SeqCst);
    let outcome = ingestor
        .merge_fetched(&FetchContext::new(), &board)
        .await?;
    assert_eq!(outcome, UpdateOutcome::NoData);
    assert_eq!(ingestor.store().board_scores(level(2)).await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn update_all_isolates_board_failures() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let source = FakeSource::default()
        .with_board(level(0), vec![entry(1, "alice", 40, 1)])
        .with_broken_board(level(1));
    let (ingestor, _) = setup(dir.path(), source).await?;

    let sweep = ingestor
        .update_all(&FetchContext::new(), BoardType::Level)
        .await?;
    assert_eq!(
        sweep,
        BoardSweep {
            updated: 1,
            no_data: 1,
            failed: 1
        }
    );
    assert_eq!(ingestor.store().board_scores(level(0)).await?.len(), 1);
    assert!(ingestor.store().board_scores(level(1)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn demo_sweep_stores_expires_and_defers() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let source = FakeSource::default()
        .with_board(level(2), snapshot())
        .with_replay(30, level_replay(30, 120))
        .with_replay(35, vec![0xde, 0xad, 0xbe, 0xef]);
    let (ingestor, _) = setup(dir.path(), source).await?;
    let board = ingestor
        .store()
        .get_board(level(2))
        .await?
        .expect("registered");
    let ctx = FetchContext::new();
    ingestor.merge_fetched(&ctx, &board).await?;

    let sweep = ingestor.sweep_demos(&ctx, None).await?;
    assert_eq!(
        sweep,
        DemoSweep {
            stored: 1,
            expired: 1,
            deferred: 1,
            settled: 0,
            failed: 0
        }
    );

    let pending = ingestor.store().pending_demos(None).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].replay_id, 35);

    let archive_id = ingestor
        .store()
        .board_at(level(2), i64::MAX)
        .await?
        .into_iter()
        .find(|row| row.replay_id == 30)
        .expect("alice archive")
        .archive_id;
    let archive = ingestor
        .store()
        .get_archive(archive_id)
        .await?
        .expect("archive");
    assert_eq!(archive.replay_id, 30);
    assert_eq!(archive.framecount, Some(120));
    let frames = ingestor
        .store()
        .decode_demo(archive_id)
        .await?
        .expect("demo");
    assert_eq!(frames, vec![vec![1u8; 120]]);

    let again = PendingDemo {
        archive_id,
        board: archive.board,
        replay_id: archive.replay_id,
        score: archive.score,
    };
    assert_eq!(
        ingestor.populate_demo(&ctx, &again).await?,
        DemoOutcome::Settled
    );
    Ok(())
}

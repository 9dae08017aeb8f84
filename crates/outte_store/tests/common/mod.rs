#![allow(dead_code)]

use std::path::Path;

use outte_store::{
    Board, BoardCatalogApi, BoardInfo, BoardRef, BoardType, OutteConfig, OutteResult, OutteStore,
    RankingConfig, RawEntry, ScoreStoreApi, ScoreValue, Tab, resolve,
};

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const CAROL: i64 = 3;
pub const DAVE: i64 = 4;

pub fn level(id: i64) -> BoardRef {
    BoardRef::new(BoardType::Level, id)
}

pub fn episode(id: i64) -> BoardRef {
    BoardRef::new(BoardType::Episode, id)
}

pub fn entry(user_id: i64, seconds: f64, replay_id: i64) -> RawEntry {
    let name = match user_id {
        ALICE => "alice",
        BOB => "bob",
        CAROL => "carol",
        DAVE => "dave",
        _ => "someone",
    };
    RawEntry {
        user_id,
        user_name: name.to_string(),
        score: ScoreValue((seconds * 1000.0).round() as i64),
        replay_id,
    }
}

/// Ranking thresholds that never hide anyone.
pub fn open_ranking() -> RankingConfig {
    RankingConfig {
        type_minimums: Vec::new(),
        tab_minimums: Vec::new(),
        ..RankingConfig::default()
    }
}

pub async fn open(base: &Path, ranking: RankingConfig) -> OutteResult<OutteStore> {
    let mut config = OutteConfig::default_sqlite(base.join("outte.sqlite").to_string_lossy());
    config.ranking = ranking;
    OutteStore::connect(&config, base).await
}

pub async fn register(store: &OutteStore, boards: &[(BoardRef, Tab)]) -> OutteResult<()> {
    let boards = boards
        .iter()
        .map(|(board, tab)| {
            Board::new(
                board.board_type,
                BoardInfo {
                    id: board.board_id,
                    tab: *tab,
                    name: format!("{}-{}", tab.code(), board.board_id),
                },
            )
        })
        .collect();
    store.register_boards(boards).await?;
    Ok(())
}

pub async fn merge(
    store: &OutteStore,
    board: BoardRef,
    entries: Vec<RawEntry>,
    at_ms: i64,
) -> OutteResult<()> {
    store.merge_board_at(board, resolve(entries), at_ms).await?;
    Ok(())
}

/// Five boards with a maxed level, a maxable level, and plain leads.
pub async fn seed_fixture(store: &OutteStore) -> OutteResult<()> {
    register(
        store,
        &[
            (level(0), Tab::SI),
            (level(1), Tab::SI),
            (level(2), Tab::SI),
            (level(600), Tab::S),
            (episode(0), Tab::SI),
        ],
    )
    .await?;
    merge(
        store,
        level(0),
        vec![
            entry(ALICE, 100.0, 10),
            entry(BOB, 100.0, 11),
            entry(CAROL, 100.0, 12),
        ],
        1_000,
    )
    .await?;
    merge(
        store,
        level(1),
        vec![
            entry(DAVE, 80.0, 23),
            entry(CAROL, 90.0, 22),
            entry(BOB, 90.0, 21),
            entry(ALICE, 90.0, 20),
        ],
        1_000,
    )
    .await?;
    merge(
        store,
        level(2),
        vec![
            entry(BOB, 70.0, 30),
            entry(ALICE, 65.0, 31),
            entry(DAVE, 60.0, 32),
        ],
        1_000,
    )
    .await?;
    merge(
        store,
        level(600),
        vec![entry(CAROL, 50.0, 40), entry(DAVE, 49.0, 41)],
        1_000,
    )
    .await?;
    merge(
        store,
        episode(0),
        vec![entry(ALICE, 300.0, 50), entry(BOB, 299.0, 51)],
        1_000,
    )
    .await?;
    Ok(())
}

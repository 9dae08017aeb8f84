mod common;

use common::*;
use outte_store::{
    ArchiveApi, BoardCatalogApi, BoardType, DemoApi, OutteError, OutteResult, OutteStore,
    ScoreStoreApi, ScoreValue, Tab, resolve,
};
use sea_orm::{ConnectionTrait, Statement};
use tempfile::tempdir;

#[tokio::test]
async fn merge_is_idempotent_and_truncates_tail() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), open_ranking()).await?;
    register(&store, &[(level(2), Tab::SI)]).await?;

    let snapshot = vec![
        entry(BOB, 70.0, 30),
        entry(ALICE, 65.0, 31),
        entry(DAVE, 60.0, 32),
    ];
    let first = store
        .merge_board_at(level(2), resolve(snapshot.clone()), 1_000)
        .await?;
    assert_eq!(first.scores_written, 3);
    assert_eq!(first.new_archives.len(), 3);

    let second = store
        .merge_board_at(level(2), resolve(snapshot), 2_000)
        .await?;
    assert_eq!(second.scores_deleted, 0);
    assert!(second.new_archives.is_empty());

    let rows = store.board_scores(level(2)).await?;
    let ranks: Vec<(u32, String)> = rows.iter().map(|r| (r.rank, r.player_name.clone())).collect();
    assert_eq!(
        ranks,
        vec![
            (0, "bob".to_string()),
            (1, "alice".to_string()),
            (2, "dave".to_string())
        ]
    );

    let shrunk = store
        .merge_board_at(
            level(2),
            resolve(vec![entry(BOB, 70.0, 30), entry(ALICE, 66.0, 33)]),
            3_000,
        )
        .await?;
    assert_eq!(shrunk.scores_deleted, 1);
    assert_eq!(shrunk.new_archives.len(), 1);
    let rows = store.board_scores(level(2)).await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].score, ScoreValue(66_000));
    Ok(())
}

#[tokio::test]
async fn merge_into_unregistered_board_is_rejected() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), open_ranking()).await?;
    let err = store
        .merge_board_at(level(7), resolve(vec![entry(ALICE, 10.0, 1)]), 1_000)
        .await
        .expect_err("unregistered board");
    assert!(matches!(err, OutteError::Validation { .. }));
    assert!(store.board_scores(level(7)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn renamed_players_keep_their_identity() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), open_ranking()).await?;
    register(&store, &[(level(0), Tab::SI), (level(1), Tab::SI)]).await?;
    merge(&store, level(0), vec![entry(ALICE, 10.0, 1)], 1_000).await?;
    let mut renamed = entry(ALICE, 11.0, 2);
    renamed.user_name = "Alice Prime".to_string();
    merge(&store, level(1), vec![renamed], 2_000).await?;

    let player = store.find_player(ALICE).await?.expect("player");
    assert_eq!(player.name, "Alice Prime");
    let by_name = store
        .find_player_by_name("  alice prime ")
        .await?
        .expect("by name");
    assert_eq!(by_name.id, player.id);
    assert_eq!(store.board_scores(level(0)).await?[0].player_id, player.id);
    Ok(())
}

#[tokio::test]
async fn registering_boards_refreshes_names() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), open_ranking()).await?;
    register(&store, &[(level(0), Tab::SI), (level(600), Tab::S)]).await?;
    register(&store, &[(level(0), Tab::SI)]).await?;
    let boards = store.list_boards(BoardType::Level).await?;
    assert_eq!(boards.len(), 2);
    assert!(store.list_boards(BoardType::Story).await?.is_empty());
    assert!(store.get_board(episode(0)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn demo_lifecycle_fills_archive_columns() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), open_ranking()).await?;
    register(&store, &[(level(2), Tab::SI)]).await?;
    merge(
        &store,
        level(2),
        vec![entry(BOB, 70.0, 30), entry(ALICE, 65.0, 31)],
        1_000,
    )
    .await?;

    let pending = store.pending_demos(None).await?;
    assert_eq!(pending.len(), 2);
    let first = &pending[0];
    assert_eq!(first.replay_id, 30);
    assert_eq!(store.pending_demos(Some(1)).await?.len(), 1);

    store.store_demo(first.archive_id, vec![vec![1u8; 6000]]).await?;
    let archive = store.get_archive(first.archive_id).await?.expect("archive");
    assert_eq!(archive.framecount, Some(6000));
    assert_eq!(archive.gold, Some(40));
    let decoded = store.decode_demo(first.archive_id).await?.expect("payload");
    assert_eq!(decoded, vec![vec![1u8; 6000]]);

    let second = pending[1].archive_id;
    store.expire_demo(second).await?;
    assert!(store.pending_demos(None).await?.is_empty());
    assert!(store.decode_demo(second).await?.is_none());
    assert!(store.get_archive(second).await?.expect("archive").gold.is_none());

    let missing = store.expire_demo(9_999).await.expect_err("missing demo");
    assert!(matches!(missing, OutteError::NotFound { .. }));
    let missing = store
        .store_demo(9_999, vec![vec![1u8; 10]])
        .await
        .expect_err("missing archive");
    assert!(matches!(missing, OutteError::NotFound { .. }));
    Ok(())
}

async fn archive_count(store: &OutteStore) -> OutteResult<i64> {
    let conn = store.connection();
    let row = conn
        .query_one(Statement::from_string(
            conn.get_database_backend(),
            "SELECT COUNT(*) AS cnt FROM archives",
        ))
        .await?
        .expect("count row");
    Ok(row.try_get("", "cnt")?)
}

#[tokio::test]
async fn failed_merge_leaves_board_untouched() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), open_ranking()).await?;
    register(&store, &[(level(2), Tab::SI)]).await?;
    merge(&store, level(2), vec![entry(BOB, 70.0, 30)], 1_000).await?;
    assert_eq!(archive_count(&store).await?, 1);

    store
        .connection()
        .execute_unprepared("DROP TABLE demos")
        .await?;
    let result = store
        .merge_board_at(
            level(2),
            resolve(vec![entry(ALICE, 80.0, 31), entry(BOB, 70.0, 30)]),
            2_000,
        )
        .await;
    assert!(result.is_err());

    let rows = store.board_scores(level(2)).await?;
    let ranks: Vec<(u32, String)> = rows.iter().map(|r| (r.rank, r.player_name.clone())).collect();
    assert_eq!(ranks, vec![(0, "bob".to_string())]);
    assert_eq!(archive_count(&store).await?, 1);
    Ok(())
}

#[tokio::test]
async fn settled_demos_are_not_overwritten() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), open_ranking()).await?;
    register(&store, &[(level(2), Tab::SI)]).await?;
    merge(
        &store,
        level(2),
        vec![entry(BOB, 70.0, 30), entry(ALICE, 65.0, 31)],
        1_000,
    )
    .await?;
    let pending = store.pending_demos(None).await?;
    let (stored, expired) = (pending[0].archive_id, pending[1].archive_id);

    assert!(store.store_demo(stored, vec![vec![1u8; 6000]]).await?);
    assert!(!store.store_demo(stored, vec![vec![2u8; 10]]).await?);
    assert!(!store.expire_demo(stored).await?);
    assert_eq!(
        store.decode_demo(stored).await?.expect("payload"),
        vec![vec![1u8; 6000]]
    );
    assert_eq!(
        store.get_archive(stored).await?.expect("archive").framecount,
        Some(6000)
    );

    assert!(store.expire_demo(expired).await?);
    assert!(!store.store_demo(expired, vec![vec![1u8; 10]]).await?);
    assert!(store.decode_demo(expired).await?.is_none());
    assert!(
        store
            .get_archive(expired)
            .await?
            .expect("archive")
            .framecount
            .is_none()
    );
    Ok(())
}

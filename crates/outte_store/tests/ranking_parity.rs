mod common;

use common::*;
use outte_store::{
    BoardType, Metric, OutteResult, RankQuery, RankingApi, RankingConfig, RankingRow,
    ScoreStoreApi, ScoreValue, Tab,
};
use tempfile::tempdir;

const METRICS: [Metric; 10] = [
    Metric::CountBelow(1),
    Metric::CountBelow(3),
    Metric::TiedOnly(1),
    Metric::Points,
    Metric::AveragePoints,
    Metric::AverageRank,
    Metric::AverageLead,
    Metric::TotalScore,
    Metric::Maxed,
    Metric::Maxable,
];

fn names(rows: &[RankingRow]) -> Vec<(&str, f64)> {
    rows.iter()
        .map(|r| (r.player_name.as_str(), r.value))
        .collect()
}

#[tokio::test]
async fn set_based_matches_recomputed_without_exclusions() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), open_ranking()).await?;
    seed_fixture(&store).await?;

    for metric in METRICS {
        for ties in [false, true] {
            let query = RankQuery::new(metric).with_ties(ties);
            let fast = store.rank_set_based(&query).await?;
            let slow = store.rank_recomputed(&query).await?;
            assert_eq!(fast, slow, "{} ties={ties}", metric.name());

            let scoped = query.with_types(vec![BoardType::Level]).with_tabs(vec![Tab::SI]);
            let fast = store.rank_set_based(&scoped).await?;
            let slow = store.rank_recomputed(&scoped).await?;
            assert_eq!(fast, slow, "{} scoped ties={ties}", metric.name());
        }
    }
    Ok(())
}

#[tokio::test]
async fn count_metrics_follow_positions() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), open_ranking()).await?;
    seed_fixture(&store).await?;

    let top1 = store.rank(RankQuery::new(Metric::CountBelow(1))).await?;
    assert_eq!(names(&top1), vec![("alice", 3.0), ("bob", 1.0), ("carol", 1.0)]);

    let tied = store
        .rank(RankQuery::new(Metric::CountBelow(1)).with_ties(true))
        .await?;
    assert_eq!(
        names(&tied),
        vec![("alice", 3.0), ("bob", 3.0), ("carol", 3.0)]
    );

    let tied_only = store.rank(RankQuery::new(Metric::TiedOnly(1))).await?;
    assert_eq!(names(&tied_only), vec![("bob", 2.0), ("carol", 2.0)]);

    let maxed = store.rank(RankQuery::new(Metric::Maxed)).await?;
    assert_eq!(
        names(&maxed),
        vec![("alice", 1.0), ("bob", 1.0), ("carol", 1.0)]
    );
    let maxable = store.rank(RankQuery::new(Metric::Maxable)).await?;
    assert_eq!(maxable.len(), 3);
    Ok(())
}

#[tokio::test]
async fn average_lead_keeps_zero_leads_in_the_average() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), open_ranking()).await?;
    seed_fixture(&store).await?;

    let rows = store.rank(RankQuery::new(Metric::AverageLead)).await?;
    let order: Vec<&str> = rows.iter().map(|r| r.player_name.as_str()).collect();
    assert_eq!(order, vec!["bob", "carol", "alice"]);
    assert!((rows[0].value - 5.0).abs() < 1e-9);
    assert!((rows[2].value - 1.0 / 3.0).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn exclusions_recompute_positions() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), open_ranking()).await?;
    seed_fixture(&store).await?;
    let alice = store.find_player(ALICE).await?.expect("alice").id;

    let top1 = store
        .rank(RankQuery::new(Metric::CountBelow(1)).excluding(vec![alice]))
        .await?;
    assert_eq!(names(&top1), vec![("bob", 4.0), ("carol", 1.0)]);

    let maxed = store
        .rank(RankQuery::new(Metric::Maxed).excluding(vec![alice]))
        .await?;
    assert!(maxed.is_empty());
    Ok(())
}

#[tokio::test]
async fn averages_respect_the_sample_floor() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), RankingConfig::default()).await?;
    seed_fixture(&store).await?;

    let query = RankQuery::new(Metric::AverageRank).with_types(vec![BoardType::Level]);
    assert!(store.rank(query.clone()).await?.is_empty());
    let points = store.rank(RankQuery::new(Metric::Points)).await?;
    assert_eq!(points.len(), 4);
    Ok(())
}

#[tokio::test]
async fn spreads_ties_and_totals() -> OutteResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), open_ranking()).await?;
    seed_fixture(&store).await?;

    let spreads = store.spreads(1, BoardType::Level, Vec::new()).await?;
    let summary: Vec<(i64, ScoreValue, &str)> = spreads
        .iter()
        .map(|s| (s.board.board_id, s.spread, s.holder_name.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (2, ScoreValue(5_000), "bob"),
            (600, ScoreValue(1_000), "carol"),
            (0, ScoreValue(0), "alice"),
            (1, ScoreValue(0), "alice"),
        ]
    );
    assert_eq!(spreads[0].board_name, "SI-2");

    let ties = store.ties(BoardType::Level, Vec::new(), None).await?;
    let ids: Vec<(i64, u32, u32)> = ties
        .iter()
        .map(|t| (t.board.board_id, t.tie_count, t.total_count))
        .collect();
    assert_eq!(ids, vec![(0, 3, 3), (1, 3, 4)]);
    let maxed = store.ties(BoardType::Level, Vec::new(), Some(true)).await?;
    assert_eq!(maxed.len(), 1);
    assert_eq!(maxed[0].board.board_id, 0);
    let maxable = store.ties(BoardType::Level, vec![Tab::SI], Some(false)).await?;
    assert_eq!(maxable[0].board.board_id, 1);

    let total = store.total_scores(BoardType::Level, Vec::new()).await?;
    assert_eq!(total.total, ScoreValue(310_000));
    assert_eq!(total.count, 4);
    let s_only = store.total_scores(BoardType::Level, vec![Tab::S]).await?;
    assert_eq!(s_only.total, ScoreValue(50_000));
    let empty = store.total_scores(BoardType::Story, Vec::new()).await?;
    assert_eq!(empty.count, 0);
    Ok(())
}

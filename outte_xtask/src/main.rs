use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use outte_ingest::{DemoOutcome, DojoClient, FetchContext, Ingestor, UpdateOutcome, WorkerSet};
use outte_store::{
    ArchiveApi, Board, BoardCatalogApi, BoardRef, BoardType, DemoApi, Highscoreable, Metric,
    Datastore, OutteConfig, OutteStore, PendingDemo, RankQuery, RankingApi, Tab,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let datastore = Datastore::new(&cli.datastore);
    let (config, store) = open(&datastore).await?;
    match cli.command {
        Command::ImportBoards(args) => import_boards(&store, args).await,
        Command::UpdateBoard(args) => update_board(&config, store, args).await,
        Command::UpdateAll(args) => update_all(&config, store, args).await,
        Command::SweepDemos(args) => sweep_demos(&config, store, args).await,
        Command::Rank(args) => rank(&store, args).await,
        Command::Spreads(args) => spreads(&store, args).await,
        Command::Ties(args) => ties(&store, args).await,
        Command::TotalScores(args) => total_scores(&store, args).await,
        Command::DecodeDemo(args) => decode_demo(&datastore, &store, args).await,
        Command::BoardAt(args) => board_at(&store, args).await,
        Command::RecordHistories => record_histories(&store).await,
        Command::Run => run_workers(&config, store).await,
    }
}

#[derive(Parser)]
#[command(author, version, about = "Operator utilities for the outte leaderboard store")]
struct Cli {
    /// Directory holding outte.json and the sqlite database.
    #[arg(long, global = true, default_value = ".outte")]
    datastore: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register boards from a JSON catalog file.
    ImportBoards(ImportBoardsArgs),
    /// Fetch and merge a single board.
    UpdateBoard(UpdateBoardArgs),
    /// Fetch and merge every registered board of a type.
    UpdateAll(UpdateAllArgs),
    /// Download demos that are still missing a payload.
    SweepDemos(SweepDemosArgs),
    Rank(RankArgs),
    Spreads(SpreadsArgs),
    Ties(TiesArgs),
    TotalScores(ScopeArgs),
    /// Print the frame counts of a stored demo.
    DecodeDemo(DecodeDemoArgs),
    /// Rebuild a leaderboard as it stood at a point in time.
    BoardAt(BoardAtArgs),
    /// Snapshot ranking counts into the history tables.
    RecordHistories,
    /// Run the update and demo workers until Ctrl-C.
    Run,
}

#[derive(Parser)]
struct ImportBoardsArgs {
    /// JSON array of boards, e.g. `[{"type":"level","id":0,"tab":"SI","name":"SI-A-00-00"}]`.
    #[arg(long)]
    file: PathBuf,
}

#[derive(Parser)]
struct UpdateBoardArgs {
    #[arg(long = "type", default_value = "level")]
    board_type: String,
    #[arg(long)]
    id: i64,
}

#[derive(Parser)]
struct UpdateAllArgs {
    #[arg(long = "type", default_value = "level")]
    board_type: String,
}

#[derive(Parser)]
struct SweepDemosArgs {
    #[arg(long)]
    limit: Option<u32>,
}

#[derive(Args)]
struct ScopeArgs {
    #[arg(long = "type", default_value = "level")]
    board_type: String,
    /// Tab codes (SI, S, SL, SS, SU, SS2); all tabs when omitted.
    #[arg(long = "tab")]
    tabs: Vec<String>,
}

#[derive(Parser)]
struct RankArgs {
    /// rank, tied_rank, points, avg_points, avg_rank, avg_lead, score, maxed, maxable
    #[arg(long, default_value = "rank")]
    metric: String,
    #[arg(long, default_value_t = 1)]
    n: u32,
    /// Board types in scope; level and episode when omitted.
    #[arg(long = "type")]
    board_types: Vec<String>,
    #[arg(long = "tab")]
    tabs: Vec<String>,
    #[arg(long, default_value_t = false)]
    ties: bool,
    #[arg(long, default_value_t = false)]
    full: bool,
    /// Player names to leave out; positions are recomputed without them.
    #[arg(long = "exclude")]
    excluded: Vec<String>,
}

#[derive(Parser)]
struct SpreadsArgs {
    #[arg(long, default_value_t = 1)]
    n: u32,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Parser)]
struct TiesArgs {
    /// Only boards whose whole leaderboard is tied.
    #[arg(long, default_value_t = false, conflicts_with = "maxable")]
    maxed: bool,
    /// Only boards with room left below the tie.
    #[arg(long, default_value_t = false)]
    maxable: bool,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Parser)]
struct DecodeDemoArgs {
    #[arg(long)]
    archive_id: i64,
    /// Write the sublevel frames as JSON under `<datastore>/demos/`.
    #[arg(long)]
    export: bool,
    /// Write the sublevel frames as JSON to this file instead.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Parser)]
struct BoardAtArgs {
    #[arg(long = "type", default_value = "level")]
    board_type: String,
    #[arg(long)]
    id: i64,
    /// Unix timestamp in milliseconds.
    #[arg(long)]
    at_ms: i64,
}

async fn open(datastore: &Datastore) -> Result<(OutteConfig, OutteStore)> {
    datastore
        .open()
        .await
        .with_context(|| format!("open datastore {}", datastore.root().display()))
}

fn ingestor(config: &OutteConfig, store: OutteStore) -> Ingestor {
    let client = DojoClient::new(&config.fetch);
    Ingestor::new(store, Arc::new(client), config)
}

fn parse_tabs(codes: &[String]) -> Result<Vec<Tab>> {
    let tabs = codes
        .iter()
        .map(|code| Tab::parse(code))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tabs)
}

async fn import_boards(store: &OutteStore, args: ImportBoardsArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let boards: Vec<Board> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", args.file.display()))?;
    for board in &boards {
        let expected = Tab::for_board(board.board_type(), board.info().id);
        if expected != Some(board.tab()) {
            warn!(
                "{} is listed under {} but its id belongs to {:?}",
                board.board_ref(),
                board.tab(),
                expected
            );
        }
    }
    let count = store.register_boards(boards).await?;
    println!("Registered {count} boards from {}", args.file.display());
    Ok(())
}

async fn update_board(
    config: &OutteConfig,
    store: OutteStore,
    args: UpdateBoardArgs,
) -> Result<()> {
    let board_ref = BoardRef::new(BoardType::parse(&args.board_type)?, args.id);
    let board = store
        .get_board(board_ref)
        .await?
        .ok_or_else(|| anyhow!("{board_ref} is not registered; run import-boards first"))?;
    let ingestor = ingestor(config, store);
    let ctx = FetchContext::new();
    match ingestor.merge_fetched(&ctx, &board).await? {
        UpdateOutcome::Merged(report) => {
            println!(
                "{board_ref}: {} scores written, {} removed, {} new archives",
                report.scores_written,
                report.scores_deleted,
                report.new_archives.len()
            );
            for archive_id in report.new_archives {
                let Some(archive) = ingestor.store().get_archive(archive_id).await? else {
                    continue;
                };
                let demo = PendingDemo {
                    archive_id,
                    board: archive.board,
                    replay_id: archive.replay_id,
                    score: archive.score,
                };
                match ingestor.populate_demo(&ctx, &demo).await? {
                    DemoOutcome::Stored { framecount } => {
                        println!("demo {archive_id}: {framecount} frames")
                    }
                    DemoOutcome::Expired => println!("demo {archive_id}: run no longer exists"),
                    DemoOutcome::Deferred => println!("demo {archive_id}: left for the sweeper"),
                    DemoOutcome::Settled => println!("demo {archive_id}: already settled"),
                }
            }
        }
        UpdateOutcome::NoData => println!("{board_ref}: no data retrieved"),
    }
    Ok(())
}

async fn update_all(config: &OutteConfig, store: OutteStore, args: UpdateAllArgs) -> Result<()> {
    let board_type = BoardType::parse(&args.board_type)?;
    let sweep = ingestor(config, store)
        .update_all(&FetchContext::new(), board_type)
        .await?;
    println!(
        "{board_type}: {} updated, {} without data, {} failed",
        sweep.updated, sweep.no_data, sweep.failed
    );
    Ok(())
}

async fn sweep_demos(
    config: &OutteConfig,
    store: OutteStore,
    args: SweepDemosArgs,
) -> Result<()> {
    let sweep = ingestor(config, store)
        .sweep_demos(&FetchContext::new(), args.limit)
        .await?;
    println!(
        "{} stored, {} expired, {} deferred, {} settled, {} failed",
        sweep.stored, sweep.expired, sweep.deferred, sweep.settled, sweep.failed
    );
    Ok(())
}

async fn rank(store: &OutteStore, args: RankArgs) -> Result<()> {
    let metric = Metric::parse(&args.metric, args.n)?;
    let board_types = args
        .board_types
        .iter()
        .map(|name| BoardType::parse(name))
        .collect::<Result<Vec<_>, _>>()?;
    let mut excluded = Vec::new();
    for name in &args.excluded {
        let player = store
            .find_player_by_name(name)
            .await?
            .ok_or_else(|| anyhow!("no player named '{name}'"))?;
        excluded.push(player.id);
    }
    let mut query = RankQuery::new(metric)
        .with_types(board_types)
        .with_tabs(parse_tabs(&args.tabs)?)
        .with_ties(args.ties)
        .excluding(excluded);
    if args.full {
        query = query.full();
    }

    let rows = store.rank(query).await?;
    if rows.is_empty() {
        println!("No players qualify for {}", metric.name());
    }
    for (position, row) in rows.iter().enumerate() {
        println!("{position:02} {:<24} {:.3}", row.player_name, row.value);
    }
    Ok(())
}

async fn spreads(store: &OutteStore, args: SpreadsArgs) -> Result<()> {
    let board_type = BoardType::parse(&args.scope.board_type)?;
    let rows = store
        .spreads(args.n, board_type, parse_tabs(&args.scope.tabs)?)
        .await?;
    for row in rows {
        println!("{:<12} {:>10} {}", row.board_name, row.spread, row.holder_name);
    }
    Ok(())
}

async fn ties(store: &OutteStore, args: TiesArgs) -> Result<()> {
    let board_type = BoardType::parse(&args.scope.board_type)?;
    let maxed = match (args.maxed, args.maxable) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    let rows = store
        .ties(board_type, parse_tabs(&args.scope.tabs)?, maxed)
        .await?;
    for row in rows {
        println!(
            "{:<12} {:>2}/{:<2} {}",
            row.board_name, row.tie_count, row.total_count, row.holder_name
        );
    }
    Ok(())
}

async fn total_scores(store: &OutteStore, args: ScopeArgs) -> Result<()> {
    let board_type = BoardType::parse(&args.board_type)?;
    let total = store
        .total_scores(board_type, parse_tabs(&args.tabs)?)
        .await?;
    println!("{board_type}: {} over {} boards", total.total, total.count);
    Ok(())
}

async fn decode_demo(
    datastore: &Datastore,
    store: &OutteStore,
    args: DecodeDemoArgs,
) -> Result<()> {
    let Some(sublevels) = store.decode_demo(args.archive_id).await? else {
        bail!("demo {} is missing, pending or expired", args.archive_id);
    };
    for (index, frames) in sublevels.iter().enumerate() {
        println!("sublevel {index}: {} frames", frames.len());
    }
    if args.export || args.out.is_some() {
        let path = datastore.export_demo(args.archive_id, &sublevels, args.out.as_deref())?;
        println!("Wrote frames to {}", path.display());
    }
    Ok(())
}

async fn board_at(store: &OutteStore, args: BoardAtArgs) -> Result<()> {
    let board = BoardRef::new(BoardType::parse(&args.board_type)?, args.id);
    for row in store.board_at(board, args.at_ms).await? {
        println!("{:02} {:<24} {}", row.rank, row.player_name, row.score);
    }
    Ok(())
}

async fn record_histories(store: &OutteStore) -> Result<()> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .context("system clock before epoch")?
        .as_millis() as i64;
    let report = store.record_histories(now).await?;
    println!(
        "Recorded {} rank, {} points and {} total score rows",
        report.rank_rows, report.points_rows, report.total_score_rows
    );
    Ok(())
}

async fn run_workers(config: &OutteConfig, store: OutteStore) -> Result<()> {
    let workers = WorkerSet::spawn(ingestor(config, store), FetchContext::new(), &config.workers);
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    let health = workers.health();
    workers.shutdown().await;
    for (worker, status) in health.snapshot() {
        println!(
            "{worker}: {} runs, {} failures, last error {:?}",
            status.runs, status.failures, status.last_error
        );
    }
    Ok(())
}

use sea_orm::sea_query;
use sea_orm_migration::prelude::Iden;

#[derive(Iden, Clone, Copy)]
pub enum Boards {
    Table,
    BoardType,
    BoardId,
    Tab,
    Name,
}

#[derive(Iden, Clone, Copy)]
pub enum Players {
    Table,
    Id,
    ExternalId,
    Name,
    NameNorm,
}

#[derive(Iden, Clone, Copy)]
pub enum Scores {
    Table,
    BoardType,
    BoardId,
    Rank,
    TiedRank,
    PlayerId,
    Score,
    ReplayId,
    Tab,
}

#[derive(Iden, Clone, Copy)]
pub enum Archives {
    Table,
    Id,
    BoardType,
    BoardId,
    PlayerId,
    Score,
    ReplayId,
    Tab,
    CreatedAtMs,
    Framecount,
    Gold,
}

#[derive(Iden, Clone, Copy)]
pub enum Demos {
    Table,
    Id,
    BoardType,
    Payload,
    Expired,
}

#[derive(Iden, Clone, Copy)]
pub enum RankHistories {
    Table,
    Id,
    PlayerId,
    BoardType,
    Tab,
    Rank,
    Ties,
    Count,
    TimestampMs,
}

#[derive(Iden, Clone, Copy)]
pub enum PointsHistories {
    Table,
    Id,
    PlayerId,
    BoardType,
    Tab,
    Points,
    TimestampMs,
}

#[derive(Iden, Clone, Copy)]
pub enum TotalScoreHistories {
    Table,
    Id,
    PlayerId,
    BoardType,
    Tab,
    Score,
    TimestampMs,
}

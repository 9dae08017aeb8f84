use sea_orm_migration::prelude::*;

use crate::db::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Boards::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Boards::BoardType).small_integer().not_null())
                    .col(ColumnDef::new(Boards::BoardId).big_integer().not_null())
                    .col(ColumnDef::new(Boards::Tab).small_integer().not_null())
                    .col(ColumnDef::new(Boards::Name).string().not_null())
                    .primary_key(
                        Index::create()
                            .name("pk_boards")
                            .col(Boards::BoardType)
                            .col(Boards::BoardId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Players::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Players::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Players::ExternalId).big_integer())
                    .col(ColumnDef::new(Players::Name).string().not_null())
                    .col(ColumnDef::new(Players::NameNorm).string().not_null())
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("players_external_idx")
                    .table(Players::Table)
                    .col(Players::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("players_name_idx")
                    .table(Players::Table)
                    .col(Players::NameNorm)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Scores::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Scores::BoardType).small_integer().not_null())
                    .col(ColumnDef::new(Scores::BoardId).big_integer().not_null())
                    .col(ColumnDef::new(Scores::Rank).integer().not_null())
                    .col(ColumnDef::new(Scores::TiedRank).integer().not_null())
                    .col(ColumnDef::new(Scores::PlayerId).big_integer().not_null())
                    .col(ColumnDef::new(Scores::Score).big_integer().not_null())
                    .col(ColumnDef::new(Scores::ReplayId).big_integer().not_null())
                    .col(ColumnDef::new(Scores::Tab).small_integer().not_null())
                    .primary_key(
                        Index::create()
                            .name("pk_scores")
                            .col(Scores::BoardType)
                            .col(Scores::BoardId)
                            .col(Scores::Rank),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("scores_player_idx")
                    .table(Scores::Table)
                    .col(Scores::PlayerId)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("scores_scope_idx")
                    .table(Scores::Table)
                    .col(Scores::BoardType)
                    .col(Scores::Tab)
                    .col(Scores::Rank)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Archives::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Archives::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Archives::BoardType).small_integer().not_null())
                    .col(ColumnDef::new(Archives::BoardId).big_integer().not_null())
                    .col(ColumnDef::new(Archives::PlayerId).big_integer().not_null())
                    .col(ColumnDef::new(Archives::Score).big_integer().not_null())
                    .col(ColumnDef::new(Archives::ReplayId).big_integer().not_null())
                    .col(ColumnDef::new(Archives::Tab).small_integer().not_null())
                    .col(ColumnDef::new(Archives::CreatedAtMs).big_integer().not_null())
                    .col(ColumnDef::new(Archives::Framecount).big_integer())
                    .col(ColumnDef::new(Archives::Gold).big_integer())
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("archives_replay_idx")
                    .table(Archives::Table)
                    .col(Archives::BoardType)
                    .col(Archives::BoardId)
                    .col(Archives::ReplayId)
                    .unique()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("archives_created_idx")
                    .table(Archives::Table)
                    .col(Archives::BoardType)
                    .col(Archives::BoardId)
                    .col(Archives::CreatedAtMs)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Demos::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Demos::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Demos::BoardType).small_integer().not_null())
                    .col(ColumnDef::new(Demos::Payload).blob())
                    .col(
                        ColumnDef::new(Demos::Expired)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RankHistories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RankHistories::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RankHistories::PlayerId).big_integer().not_null())
                    .col(ColumnDef::new(RankHistories::BoardType).small_integer().not_null())
                    .col(ColumnDef::new(RankHistories::Tab).small_integer().not_null())
                    .col(ColumnDef::new(RankHistories::Rank).integer().not_null())
                    .col(ColumnDef::new(RankHistories::Ties).boolean().not_null())
                    .col(ColumnDef::new(RankHistories::Count).big_integer().not_null())
                    .col(ColumnDef::new(RankHistories::TimestampMs).big_integer().not_null())
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("rank_histories_player_idx")
                    .table(RankHistories::Table)
                    .col(RankHistories::PlayerId)
                    .col(RankHistories::BoardType)
                    .col(RankHistories::Tab)
                    .col(RankHistories::TimestampMs)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PointsHistories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PointsHistories::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PointsHistories::PlayerId).big_integer().not_null())
                    .col(ColumnDef::new(PointsHistories::BoardType).small_integer().not_null())
                    .col(ColumnDef::new(PointsHistories::Tab).small_integer().not_null())
                    .col(ColumnDef::new(PointsHistories::Points).big_integer().not_null())
                    .col(ColumnDef::new(PointsHistories::TimestampMs).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TotalScoreHistories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TotalScoreHistories::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TotalScoreHistories::PlayerId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TotalScoreHistories::BoardType)
                            .small_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TotalScoreHistories::Tab).small_integer().not_null())
                    .col(ColumnDef::new(TotalScoreHistories::Score).big_integer().not_null())
                    .col(
                        ColumnDef::new(TotalScoreHistories::TimestampMs)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TotalScoreHistories::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PointsHistories::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RankHistories::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Demos::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Archives::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Scores::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Players::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Boards::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

use sea_orm_migration::prelude::*;

use crate::database::entity::blob::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20261016_000001_create_blob_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entity)
                    .if_not_exists()
                    .col(ColumnDef::new(Column::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Column::State)
                            .r#char()
                            .char_len(1)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Column::ContentHash).string().null())
                    .col(ColumnDef::new(Column::Size).big_integer().not_null())
                    .col(ColumnDef::new(Column::ChunkSize).integer().not_null())
                    .col(ColumnDef::new(Column::Owner).string().not_null())
                    .col(
                        ColumnDef::new(Column::HoldersCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Column::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Column::UploadedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-blob-content-hash")
                    .table(Entity)
                    .col(Column::ContentHash)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-blob-state")
                    .table(Entity)
                    .col(Column::State)
                    .to_owned(),
            )
            .await
    }
}

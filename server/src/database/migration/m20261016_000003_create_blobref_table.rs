use sea_orm_migration::prelude::*;

use crate::database::entity::blob;
use crate::database::entity::blobref::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20261016_000003_create_blobref_table"
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
                    .col(
                        ColumnDef::new(Column::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Column::BlobId).uuid().not_null())
                    .col(ColumnDef::new(Column::FileId).string().not_null())
                    .col(
                        ColumnDef::new(Column::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKeyCreateStatement::new()
                            .name("fk_blobref_blob")
                            .from_tbl(Entity)
                            .from_col(Column::BlobId)
                            .to_tbl(blob::Entity)
                            .to_col(blob::Column::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-blobref-blob-id-file-id")
                    .table(Entity)
                    .col(Column::BlobId)
                    .col(Column::FileId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-blobref-file-id")
                    .table(Entity)
                    .col(Column::FileId)
                    .to_owned(),
            )
            .await
    }
}

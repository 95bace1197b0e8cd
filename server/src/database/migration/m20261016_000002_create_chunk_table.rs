use sea_orm_migration::prelude::*;

use crate::database::entity::blob;
use crate::database::entity::chunk::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20261016_000002_create_chunk_table"
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
                    .col(ColumnDef::new(Column::Seq).integer().not_null())
                    .col(ColumnDef::new(Column::Data).binary().not_null())
                    .foreign_key(
                        ForeignKeyCreateStatement::new()
                            .name("fk_chunk_blob")
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
                    .name("idx-chunk-blob-id-seq")
                    .table(Entity)
                    .col(Column::BlobId)
                    .col(Column::Seq)
                    .unique()
                    .to_owned(),
            )
            .await
    }
}

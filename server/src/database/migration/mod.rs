//! Database migrations.

pub use sea_orm_migration::*;

mod m20261016_000001_create_blob_table;
mod m20261016_000002_create_chunk_table;
mod m20261016_000003_create_blobref_table;
mod m20261016_000004_create_quota_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261016_000001_create_blob_table::Migration),
            Box::new(m20261016_000002_create_chunk_table::Migration),
            Box::new(m20261016_000003_create_blobref_table::Migration),
            Box::new(m20261016_000004_create_quota_table::Migration),
        ]
    }
}

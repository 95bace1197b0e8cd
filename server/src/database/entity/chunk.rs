//! A fixed-size slice of a blob.

use sea_orm::entity::prelude::*;

pub type ChunkModel = Model;

/// A fixed-size slice of a blob.
///
/// Chunks of a blob are numbered contiguously from zero. All of them
/// are exactly `chunk_size` bytes long except possibly the last one,
/// which is rewritten in place as an upload appends to it.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "chunk")]
pub struct Model {
    /// Unique numeric ID of the chunk.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// ID of the blob.
    #[sea_orm(indexed)]
    pub blob_id: Uuid,

    /// The zero-indexed sequence number of the chunk.
    pub seq: i32,

    /// The content of the chunk.
    pub data: Vec<u8>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::blob::Entity",
        from = "Column::BlobId",
        to = "super::blob::Column::Id"
    )]
    Blob,
}

impl Related<super::blob::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Blob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

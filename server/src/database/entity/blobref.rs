//! A reference binding a file and a blob.
//!
//! A blob may be referenced by any number of files, and a file
//! references exactly one blob per version. The pair of IDs is unique,
//! so adding a reference twice is a no-op.
//!
//! A blob is deleted as soon as its last reference is released.

use sea_orm::entity::prelude::*;

pub type BlobRefModel = Model;

/// A reference binding a file to a blob.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "blobref")]
pub struct Model {
    /// Unique numeric ID of the link.
    #[sea_orm(primary_key)]
    pub id: i64,

    /// ID of the blob.
    #[sea_orm(indexed)]
    pub blob_id: Uuid,

    /// ID of the file owning the reference.
    pub file_id: String,

    /// Timestamp when the reference is created.
    pub created_at: ChronoDateTimeUtc,
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

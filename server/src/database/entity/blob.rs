//! A unit of deduplicated content.

use sea_orm::entity::prelude::*;

pub type BlobModel = Model;

/// The state of a blob.
#[derive(EnumIter, DeriveActiveEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(1))")]
pub enum BlobState {
    /// The blob is an upload in progress.
    ///
    /// It still accepts appended bytes and its content hash
    /// is not known yet. The blob ID doubles as the handle of
    /// the upload session.
    #[sea_orm(string_value = "T")]
    Temporary,

    /// The blob is finalized.
    ///
    /// The content hash is available and the content is immutable.
    #[sea_orm(string_value = "V")]
    Finalized,
}

/// A unit of deduplicated content.
///
/// The content itself lives in the `chunk` table, split into
/// `chunk_size`-byte chunks. Files point to a blob through
/// rows in the `blobref` table.
///
/// ## Deduplication
///
/// Among blobs finalized one after another, there is at most one
/// finalized blob per content hash. Two uploads of the same new
/// content finalizing at the same time may both end up as
/// finalized blobs since nothing reconciles them afterwards.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "blob")]
pub struct Model {
    /// Unique ID of the blob.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// The state of the blob.
    pub state: BlobState,

    /// The hash of the content.
    ///
    /// This always begins with "sha256:" with the hash in the
    /// hexadecimal format. It's only available for finalized blobs.
    #[sea_orm(indexed)]
    pub content_hash: Option<String>,

    /// The size of the content.
    pub size: i64,

    /// The size of each chunk, except possibly the last one.
    pub chunk_size: i32,

    /// The user who uploaded the content.
    pub owner: String,

    /// Number of processes holding this blob.
    ///
    /// This is for preventing garbage collection of a finalized
    /// blob without references while a finalization is attaching
    /// a new reference to it.
    pub holders_count: i32,

    /// Timestamp when the blob is created.
    pub created_at: ChronoDateTimeUtc,

    /// Timestamp when the last upload call for the blob completed.
    pub uploaded_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::chunk::Entity")]
    Chunk,

    #[sea_orm(has_many = "super::blobref::Entity")]
    BlobRef,
}

impl Related<super::chunk::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chunk.def()
    }
}

impl Related<super::blobref::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BlobRef.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Returns whether the blob is still accepting content.
    pub fn is_temporary(&self) -> bool {
        self.state == BlobState::Temporary
    }

    /// Returns the number of chunks the content is split into.
    pub fn num_chunks(&self) -> i64 {
        let chunk_size = i64::from(self.chunk_size);
        (self.size + chunk_size - 1) / chunk_size
    }
}

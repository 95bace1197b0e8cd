pub mod entity;
pub mod migration;

use std::ops::Deref;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, OnConflict, Query, SimpleExpr};
use sea_orm::{ActiveValue::Set, ConnectionTrait, DatabaseConnection, FromQueryResult, QueryOrder};
use tokio::task;

use crate::error::{ServerError, ServerResult};
use balloon::file::FileId;
use balloon::hash::Hash;
use entity::blob::{self, BlobModel, BlobState, Entity as Blob};
use entity::blobref::{self, Entity as BlobRef};
use entity::chunk::{self, Entity as Chunk};

#[async_trait]
pub trait BalloonDatabase: Send + Sync {
    /// Retrieves a blob.
    async fn find_blob(&self, blob_id: Uuid) -> ServerResult<BlobModel>;

    /// Retrieves the temporary blob backing an upload session.
    async fn find_upload_session(&self, session: Uuid, owner: &str) -> ServerResult<BlobModel>;

    /// Retrieves and locks a finalized blob matching a content hash.
    ///
    /// The lock only keeps the blob from being garbage-collected
    /// and is released when the guard is dropped.
    async fn find_and_lock_blob(&self, content_hash: &Hash) -> ServerResult<Option<BlobGuard>>;

    /// Returns the IDs of the files referencing a blob.
    async fn find_blob_references(&self, blob_id: Uuid) -> ServerResult<Vec<String>>;

    /// Bumps the upload timestamp of a blob.
    async fn bump_blob_uploaded_at(&self, blob_id: Uuid) -> ServerResult<()>;
}

/// A finalized blob protected from garbage collection.
pub struct BlobGuard {
    database: DatabaseConnection,
    blob: BlobModel,
    released: bool,
}

#[async_trait]
impl BalloonDatabase for DatabaseConnection {
    async fn find_blob(&self, blob_id: Uuid) -> ServerResult<BlobModel> {
        Blob::find_by_id(blob_id)
            .one(self)
            .await
            .map_err(ServerError::database_error)?
            .ok_or(ServerError::NoSuchBlob)
    }

    async fn find_upload_session(&self, session: Uuid, owner: &str) -> ServerResult<BlobModel> {
        Blob::find_by_id(session)
            .filter(blob::Column::State.eq(BlobState::Temporary))
            .filter(blob::Column::Owner.eq(owner))
            .one(self)
            .await
            .map_err(ServerError::database_error)?
            .ok_or(ServerError::NoSuchSession)
    }

    async fn find_and_lock_blob(&self, content_hash: &Hash) -> ServerResult<Option<BlobGuard>> {
        let matched_ids = Query::select()
            .from(Blob)
            .and_where(blob::Column::ContentHash.eq(content_hash.to_typed_base16()))
            .and_where(blob::Column::State.eq(BlobState::Finalized))
            .expr(Expr::col(blob::Column::Id))
            .limit(1)
            .to_owned();
        let incr_holders = Query::update()
            .table(Blob)
            .values([(
                blob::Column::HoldersCount,
                Expr::col(blob::Column::HoldersCount).add(1),
            )])
            .and_where(blob::Column::Id.in_subquery(matched_ids))
            .returning_all()
            .to_owned();
        let stmt = self.get_database_backend().build(&incr_holders);

        let guard = blob::Model::find_by_statement(stmt)
            .one(self)
            .await
            .map_err(ServerError::database_error)?
            .map(|blob| BlobGuard {
                database: self.clone(),
                blob,
                released: false,
            });

        Ok(guard)
    }

    async fn find_blob_references(&self, blob_id: Uuid) -> ServerResult<Vec<String>> {
        let references = BlobRef::find()
            .filter(blobref::Column::BlobId.eq(blob_id))
            .order_by_asc(blobref::Column::Id)
            .all(self)
            .await
            .map_err(ServerError::database_error)?
            .into_iter()
            .map(|r| r.file_id)
            .collect();

        Ok(references)
    }

    async fn bump_blob_uploaded_at(&self, blob_id: Uuid) -> ServerResult<()> {
        Blob::update_many()
            .col_expr(blob::Column::UploadedAt, Expr::value(Utc::now()))
            .filter(blob::Column::Id.eq(blob_id))
            .exec(self)
            .await
            .map_err(ServerError::database_error)?;

        Ok(())
    }
}

/// Adds a file to the references of a blob.
///
/// Returns whether a new reference was created. Adding an existing
/// reference is a no-op.
pub async fn insert_blob_reference<C: ConnectionTrait>(
    conn: &C,
    blob_id: Uuid,
    file_id: &FileId,
) -> ServerResult<bool> {
    let inserted = BlobRef::insert(blobref::ActiveModel {
        blob_id: Set(blob_id),
        file_id: Set(file_id.as_str().to_owned()),
        created_at: Set(Utc::now()),
        ..Default::default()
    })
    .on_conflict(
        OnConflict::columns([blobref::Column::BlobId, blobref::Column::FileId])
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(conn)
    .await
    .map_err(ServerError::database_error)?;

    Ok(inserted > 0)
}

/// Removes a file from the references of a blob.
///
/// Returns whether a reference was removed.
pub async fn delete_blob_reference<C: ConnectionTrait>(
    conn: &C,
    blob_id: Uuid,
    file_id: &FileId,
) -> ServerResult<bool> {
    let deletion = BlobRef::delete_many()
        .filter(blobref::Column::BlobId.eq(blob_id))
        .filter(blobref::Column::FileId.eq(file_id.as_str()))
        .exec(conn)
        .await
        .map_err(ServerError::database_error)?;

    Ok(deletion.rows_affected > 0)
}

/// Deletes a blob along with its chunks and references.
///
/// If `state` is set, the blob is only deleted if it's in that state.
/// Returns whether the blob was deleted.
pub async fn delete_blob_rows<C: ConnectionTrait>(
    conn: &C,
    blob_id: Uuid,
    state: Option<BlobState>,
) -> ServerResult<bool> {
    let mut deletion = Blob::delete_many().filter(blob::Column::Id.eq(blob_id));
    if let Some(state) = state {
        deletion = deletion.filter(blob::Column::State.eq(state));
    }

    let deletion = deletion
        .exec(conn)
        .await
        .map_err(ServerError::database_error)?;

    if deletion.rows_affected == 0 {
        return Ok(false);
    }

    delete_blob_contents(conn, blob_id).await?;

    Ok(true)
}

/// Returns the condition matching upload sessions untouched since `cutoff`.
pub fn stale_upload_condition(cutoff: ChronoDateTimeUtc) -> SimpleExpr {
    blob::Column::State.eq(BlobState::Temporary).and(
        blob::Column::UploadedAt.lt(cutoff).or(blob::Column::UploadedAt
            .is_null()
            .and(blob::Column::CreatedAt.lt(cutoff))),
    )
}

/// Deletes an upload session if it's still untouched since `cutoff`.
///
/// The check and the deletion are a single statement, so the returned
/// blob has the size it had when it was deleted.
pub async fn delete_stale_upload<C: ConnectionTrait>(
    conn: &C,
    blob_id: Uuid,
    cutoff: ChronoDateTimeUtc,
) -> ServerResult<Option<BlobModel>> {
    let deletion = Query::delete()
        .from_table(Blob)
        .and_where(blob::Column::Id.eq(blob_id))
        .and_where(stale_upload_condition(cutoff))
        .returning_all()
        .to_owned();
    let stmt = conn.get_database_backend().build(&deletion);

    let deleted = blob::Model::find_by_statement(stmt)
        .one(conn)
        .await
        .map_err(ServerError::database_error)?;

    if deleted.is_some() {
        delete_blob_contents(conn, blob_id).await?;
    }

    Ok(deleted)
}

/// Deletes a finalized blob if nothing references or holds it.
///
/// The check and the deletion are a single statement. Returns whether
/// the blob was deleted.
pub async fn delete_blob_if_unreferenced<C: ConnectionTrait>(
    conn: &C,
    blob_id: Uuid,
) -> ServerResult<bool> {
    let references = Query::select()
        .column(blobref::Column::BlobId)
        .from(BlobRef)
        .and_where(blobref::Column::BlobId.eq(blob_id))
        .to_owned();

    let deletion = Blob::delete_many()
        .filter(blob::Column::Id.eq(blob_id))
        .filter(blob::Column::State.eq(BlobState::Finalized))
        .filter(blob::Column::HoldersCount.eq(0))
        .filter(blob::Column::Id.not_in_subquery(references))
        .exec(conn)
        .await
        .map_err(ServerError::database_error)?;

    if deletion.rows_affected == 0 {
        return Ok(false);
    }

    delete_blob_contents(conn, blob_id).await?;

    Ok(true)
}

/// Deletes the chunks and references of a blob whose row is gone.
///
/// Foreign keys already cascade on databases enforcing them.
async fn delete_blob_contents<C: ConnectionTrait>(conn: &C, blob_id: Uuid) -> ServerResult<()> {
    Chunk::delete_many()
        .filter(chunk::Column::BlobId.eq(blob_id))
        .exec(conn)
        .await
        .map_err(ServerError::database_error)?;

    BlobRef::delete_many()
        .filter(blobref::Column::BlobId.eq(blob_id))
        .exec(conn)
        .await
        .map_err(ServerError::database_error)?;

    Ok(())
}

impl BlobGuard {
    /// Releases the hold on the blob.
    pub async fn release(mut self) {
        self.released = true;
        decrement_holders(&self.database, self.blob.id).await;
    }
}

impl Deref for BlobGuard {
    type Target = BlobModel;

    fn deref(&self) -> &Self::Target {
        &self.blob
    }
}

impl Drop for BlobGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let database = self.database.clone();
        let blob_id = self.blob.id;

        task::spawn(async move {
            decrement_holders(&database, blob_id).await;
        });
    }
}

async fn decrement_holders(database: &DatabaseConnection, blob_id: Uuid) {
    tracing::debug!("Unlocking blob");

    let decr_holders = Query::update()
        .table(Blob)
        .values([(
            blob::Column::HoldersCount,
            Expr::col(blob::Column::HoldersCount).sub(1),
        )])
        .and_where(blob::Column::Id.eq(blob_id))
        .to_owned();
    let stmt = database.get_database_backend().build(&decr_holders);

    if let Err(e) = database.execute(stmt).await {
        tracing::warn!("Failed to decrement holders count: {}", e);
    }
}

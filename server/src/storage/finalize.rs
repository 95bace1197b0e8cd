//! Finalization and deduplication.

use anyhow::anyhow;
use chrono::Utc;
use digest::Digest;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::TransactionTrait;
use sha2::Sha256;
use tokio::io;
use tracing::instrument;

use super::BlobStorage;
use crate::database::entity::blob::{self, BlobModel, BlobState, Entity as Blob};
use crate::database::{
    delete_blob_if_unreferenced, delete_blob_reference, delete_blob_rows, insert_blob_reference,
    BalloonDatabase,
};
use crate::error::{ServerError, ServerResult};
use balloon::api::v1::store_file::{StorageReference, StoreFileResult, StoreFileResultKind};
use balloon::file::FileId;
use balloon::hash::Hash;
use balloon::stream::StreamHasher;

/// The outcome of [`BlobStorage::release_reference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleasedReference {
    /// Whether the file was referencing the blob.
    pub removed: bool,

    /// Whether the blob is gone afterwards.
    pub blob_gone: bool,
}

impl BlobStorage {
    /// Finalizes a temporary blob as the content of a file.
    ///
    /// If a finalized blob with the same content exists, the file is
    /// added to its references and the temporary blob is deleted.
    /// Otherwise the temporary blob becomes a finalized blob referenced
    /// only by the file.
    #[instrument(skip(self, file_id), fields(file = %file_id))]
    pub async fn finalize(&self, blob_id: Uuid, file_id: &FileId) -> ServerResult<StoreFileResult> {
        let blob = self.database.find_blob(blob_id).await?;

        if !blob.is_temporary() {
            return Err(ServerError::BlobFinalized);
        }

        let hash = self.hash_blob(&blob).await?;

        if let Some(existing) = self.database.find_and_lock_blob(&hash).await? {
            tracing::debug!("Deduplicating into blob {}", existing.id);

            let txn = self
                .database
                .begin()
                .await
                .map_err(ServerError::database_error)?;

            insert_blob_reference(&txn, existing.id, file_id).await?;

            if !delete_blob_rows(&txn, blob_id, Some(BlobState::Temporary)).await? {
                // Someone else finalized or removed it in the meantime
                return Err(ServerError::BlobFinalized);
            }

            txn.commit().await.map_err(ServerError::database_error)?;

            let result = StoreFileResult {
                reference: StorageReference { id: existing.id },
                size: existing.size as u64,
                hash,
                kind: StoreFileResultKind::Deduplicated,
            };

            existing.release().await;

            return Ok(result);
        }

        let txn = self
            .database
            .begin()
            .await
            .map_err(ServerError::database_error)?;

        let promotion = Blob::update_many()
            .col_expr(blob::Column::State, Expr::value(BlobState::Finalized))
            .col_expr(
                blob::Column::ContentHash,
                Expr::value(hash.to_typed_base16()),
            )
            .col_expr(blob::Column::UploadedAt, Expr::value(Utc::now()))
            .filter(blob::Column::Id.eq(blob_id))
            .filter(blob::Column::State.eq(BlobState::Temporary))
            .exec(&txn)
            .await
            .map_err(ServerError::database_error)?;

        if promotion.rows_affected == 0 {
            return Err(ServerError::BlobFinalized);
        }

        insert_blob_reference(&txn, blob_id, file_id).await?;

        txn.commit().await.map_err(ServerError::database_error)?;

        tracing::debug!("Promoted blob to {}", hash);

        Ok(StoreFileResult {
            reference: StorageReference { id: blob_id },
            size: blob.size as u64,
            hash,
            kind: StoreFileResultKind::Uploaded,
        })
    }

    /// Removes a file from the references of a blob.
    ///
    /// The blob is deleted once nothing references it. Releasing a
    /// reference that doesn't exist is not an error.
    #[instrument(skip(self, file_id), fields(file = %file_id))]
    pub async fn release_reference(
        &self,
        blob_id: Uuid,
        file_id: &FileId,
    ) -> ServerResult<ReleasedReference> {
        let txn = self
            .database
            .begin()
            .await
            .map_err(ServerError::database_error)?;

        let removed = delete_blob_reference(&txn, blob_id, file_id).await?;
        let deleted = delete_blob_if_unreferenced(&txn, blob_id).await?;

        txn.commit().await.map_err(ServerError::database_error)?;

        if deleted {
            tracing::debug!("Deleted blob {}", blob_id);
            return Ok(ReleasedReference {
                removed,
                blob_gone: true,
            });
        }

        let exists = Blob::find_by_id(blob_id)
            .one(&self.database)
            .await
            .map_err(ServerError::database_error)?
            .is_some();

        Ok(ReleasedReference {
            removed,
            blob_gone: !exists,
        })
    }

    /// Computes the content hash of a blob.
    async fn hash_blob(&self, blob: &BlobModel) -> ServerResult<Hash> {
        let reader = self.stream_blob(blob)?;
        let (mut hasher, digest) = StreamHasher::new(reader, Sha256::new());

        io::copy(&mut hasher, &mut io::sink())
            .await
            .map_err(ServerError::storage_error)?;

        let digest = digest
            .get()
            .ok_or_else(|| ServerError::StorageError(anyhow!("Blob stream ended early")))?;

        if digest.size != blob.size as u64 {
            return Err(ServerError::StorageError(anyhow!(
                "Blob {} is {} bytes long but has {} bytes of content",
                blob.id,
                blob.size,
                digest.size
            )));
        }

        Ok(Hash::sha256_from_digest(digest.hash.clone()))
    }
}

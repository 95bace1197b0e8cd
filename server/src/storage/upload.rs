//! Upload sessions.

use bytes::BytesMut;
use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;
use tokio::io::AsyncRead;
use tracing::instrument;

use super::BlobStorage;
use crate::database::entity::blob::{self, BlobModel, BlobState, Entity as Blob};
use crate::database::BalloonDatabase;
use crate::error::{InsufficientStorageReason, ServerError, ServerResult};
use balloon::stream::read_chunk_async;

impl BlobStorage {
    /// Stages content from a stream in a temporary blob.
    ///
    /// Without a session, a new temporary blob is created. Otherwise the
    /// content is appended to the session's blob. Returns the session,
    /// which is also the ID of the blob.
    ///
    /// Every buffered increment is charged to the owner before it's
    /// written and refunded if the write fails. If the owner runs out
    /// of space, the whole blob is deleted and refunded.
    #[instrument(skip(self, stream))]
    pub async fn store_temporary<R>(
        &self,
        mut stream: R,
        owner: &str,
        session: Option<Uuid>,
    ) -> ServerResult<Uuid>
    where
        R: AsyncRead + Unpin + Send,
    {
        let blob = match session {
            Some(session) => {
                let blob = self.database.find_upload_session(session, owner).await?;
                self.database.bump_blob_uploaded_at(blob.id).await?;
                blob
            }
            None => self.create_temporary_blob(owner).await?,
        };

        let blob_id = blob.id;
        let mut size = blob.size;

        tracing::debug!("Staging into blob {} at offset {}", blob_id, size);

        loop {
            let buf = BytesMut::with_capacity(self.config.read_buffer_size);
            let increment = read_chunk_async(&mut stream, buf)
                .await
                .map_err(ServerError::request_error)?;

            if increment.is_empty() {
                break;
            }

            let charged = increment.len() as u64;
            if let Err(e) = self.charge(owner, size, charged).await {
                if matches!(e, ServerError::InsufficientStorage { .. }) {
                    self.abort_upload(blob_id, owner).await;
                }
                return Err(e);
            }

            size = match self.append_bytes(blob_id, increment).await {
                Ok(size) => size,
                Err(e) => {
                    if let Err(refund) = self.quota.release(owner, charged).await {
                        tracing::warn!("Failed to refund failed append: {}", refund);
                    }
                    return Err(e);
                }
            };
        }

        Ok(blob_id)
    }

    async fn create_temporary_blob(&self, owner: &str) -> ServerResult<BlobModel> {
        let model = blob::ActiveModel {
            id: Set(Uuid::new_v4()),
            state: Set(BlobState::Temporary),
            content_hash: Set(None),
            size: Set(0),
            chunk_size: Set(self.config.chunk_size()),
            owner: Set(owner.to_owned()),
            holders_count: Set(0),
            created_at: Set(Utc::now()),
            uploaded_at: Set(None),
        };

        let blob = Blob::insert(model)
            .exec_with_returning(&self.database)
            .await
            .map_err(ServerError::database_error)?;

        tracing::debug!("Created temporary blob {}", blob.id);

        Ok(blob)
    }

    /// Charges an increment of a blob currently `size` bytes long.
    async fn charge(&self, owner: &str, size: i64, increment: u64) -> ServerResult<()> {
        if let Some(max_file_size) = self.config.max_file_size {
            let new_size = (size as u64).saturating_add(increment);
            if new_size > max_file_size {
                return Err(InsufficientStorageReason::FileTooLarge.into());
            }
        }

        self.quota.check_and_charge(owner, increment).await
    }

    /// Deletes a temporary blob and refunds what was charged for it.
    ///
    /// Failures are logged since the upload already failed.
    async fn abort_upload(&self, blob_id: Uuid, owner: &str) {
        tracing::warn!("Aborting upload into blob {}", blob_id);

        let blob = match self.database.find_blob(blob_id).await {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!("Failed to look up aborted blob: {}", e);
                return;
            }
        };

        if let Err(e) = self.delete_blob(blob_id).await {
            tracing::warn!("Failed to delete aborted blob: {}", e);
            return;
        }

        if let Err(e) = self.quota.release(owner, blob.size as u64).await {
            tracing::warn!("Failed to refund aborted blob: {}", e);
        }
    }
}

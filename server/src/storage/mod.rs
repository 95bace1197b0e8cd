//! Deduplicating blob storage.
//!
//! File content is stored in blobs split into fixed-size chunks.
//! Uploads are staged in temporary blobs, and on finalization the
//! content hash decides whether the upload becomes a new blob or
//! is merged into an existing one with the same content.

mod chunk;
mod finalize;
mod quota;
mod upload;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tracing::instrument;

use crate::config::StorageConfig;
use crate::database::entity::blob::Entity as Blob;
use crate::error::{ServerError, ServerResult};
use balloon::api::v1::store_file::{StorageReference, StoreFileResult};
use balloon::file::FileId;

pub use self::finalize::ReleasedReference;
pub use self::quota::{DatabaseQuota, QuotaEnforcer, Unlimited};

/// A file node whose content is kept in blob storage.
///
/// Files are owned by the surrounding application. The storage only
/// looks at their blob references and sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    /// ID of the file.
    pub id: FileId,

    /// The user owning the file.
    pub owner: String,

    /// The current version.
    pub version: u32,

    /// The blob holding the current version.
    pub storage: Option<StorageReference>,

    /// The size of the current version.
    pub size: u64,

    /// Older versions.
    #[serde(default)]
    pub history: Vec<FileVersion>,
}

/// An older version of a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVersion {
    pub version: u32,
    pub storage: Option<StorageReference>,
    pub size: u64,
}

/// The storage adapter the file layer talks to.
#[async_trait]
pub trait StorageAdapter: Send + Sync + std::fmt::Debug {
    /// Returns whether the current version of a file has content.
    async fn has_node(&self, file: &FileRef) -> ServerResult<bool>;

    /// Stages uploaded content in a temporary blob.
    ///
    /// Pass the returned session to continue the same upload.
    async fn store_temporary_file(
        &self,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        user: &str,
        session: Option<Uuid>,
    ) -> ServerResult<Uuid>;

    /// Turns a staged upload into the content of a file.
    async fn store_file(&self, file: &FileRef, session: Uuid) -> ServerResult<StoreFileResult>;

    /// Opens the current version of a file for reading.
    async fn open_read_stream(
        &self,
        file: &FileRef,
    ) -> ServerResult<Box<dyn AsyncRead + Unpin + Send>>;

    /// Soft-deletes a file.
    ///
    /// Nothing is removed. Returns the storage reference of the
    /// requested version so the caller can keep it around.
    async fn delete_file(
        &self,
        file: &FileRef,
        version: Option<u32>,
    ) -> ServerResult<Option<StorageReference>>;

    /// Deletes a version of a file for good.
    ///
    /// The size of the version is refunded to the owner. Deleting a
    /// version again is a no-op. Returns `false` if the version has no
    /// content.
    async fn force_delete_file(&self, file: &FileRef, version: Option<u32>) -> ServerResult<bool>;
}

/// Blob storage backed by the database.
#[derive(Debug, Clone)]
pub struct BlobStorage {
    database: DatabaseConnection,
    quota: Arc<dyn QuotaEnforcer>,
    config: StorageConfig,
}

impl BlobStorage {
    pub fn new(
        database: DatabaseConnection,
        quota: Arc<dyn QuotaEnforcer>,
        config: StorageConfig,
    ) -> Self {
        Self {
            database,
            quota,
            config,
        }
    }

    /// Returns the quota enforcer.
    pub fn quota(&self) -> &Arc<dyn QuotaEnforcer> {
        &self.quota
    }
}

impl FileRef {
    /// Returns the storage reference and size of a version.
    ///
    /// `None` means the current version.
    pub fn resolve_version(
        &self,
        version: Option<u32>,
    ) -> ServerResult<(Option<StorageReference>, u64)> {
        match version {
            None => Ok((self.storage, self.size)),
            Some(v) if v == self.version => Ok((self.storage, self.size)),
            Some(v) => self
                .history
                .iter()
                .find(|h| h.version == v)
                .map(|h| (h.storage, h.size))
                .ok_or(ServerError::NoSuchVersion { version: v }),
        }
    }

    /// Returns whether any version other than `version` uses a blob.
    fn other_versions_use(&self, version: u32, blob_id: Uuid) -> bool {
        let uses = |v: u32, storage: Option<StorageReference>| {
            v != version && storage.map(|s| s.id) == Some(blob_id)
        };

        uses(self.version, self.storage) || self.history.iter().any(|h| uses(h.version, h.storage))
    }
}

#[async_trait]
impl StorageAdapter for BlobStorage {
    async fn has_node(&self, file: &FileRef) -> ServerResult<bool> {
        let Some(reference) = file.storage else {
            return Ok(false);
        };

        let blob = Blob::find_by_id(reference.id)
            .one(&self.database)
            .await
            .map_err(ServerError::database_error)?;

        Ok(blob.is_some())
    }

    async fn store_temporary_file(
        &self,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        user: &str,
        session: Option<Uuid>,
    ) -> ServerResult<Uuid> {
        self.store_temporary(stream, user, session).await
    }

    async fn store_file(&self, file: &FileRef, session: Uuid) -> ServerResult<StoreFileResult> {
        self.finalize(session, &file.id).await
    }

    async fn open_read_stream(
        &self,
        file: &FileRef,
    ) -> ServerResult<Box<dyn AsyncRead + Unpin + Send>> {
        let reference = file.storage.ok_or(ServerError::NoSuchBlob)?;
        self.open_blob_stream(reference.id).await
    }

    async fn delete_file(
        &self,
        file: &FileRef,
        version: Option<u32>,
    ) -> ServerResult<Option<StorageReference>> {
        let (reference, _) = file.resolve_version(version)?;
        Ok(reference)
    }

    #[instrument(skip(self, file), fields(file = %file.id))]
    async fn force_delete_file(&self, file: &FileRef, version: Option<u32>) -> ServerResult<bool> {
        let (reference, size) = file.resolve_version(version)?;
        let Some(reference) = reference else {
            return Ok(false);
        };

        let version = version.unwrap_or(file.version);

        let refund = if file.other_versions_use(version, reference.id) {
            tracing::debug!("Blob is still used by another version of the file");
            true
        } else {
            let released = self.release_reference(reference.id, &file.id).await?;
            if !released.removed {
                tracing::debug!("File was no longer referencing the blob");
            }
            released.removed
        };

        // A repeated deletion finds no reference and must not refund twice
        if refund {
            self.quota.release(&file.owner, size).await?;
        }

        Ok(true)
    }
}

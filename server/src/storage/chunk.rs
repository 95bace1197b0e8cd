//! Chunk store.
//!
//! Blob content is split into `chunk_size`-byte rows in the `chunk`
//! table. Only the last chunk of a blob may be shorter, and an upload
//! fills it up in place before starting a new one.

use std::collections::VecDeque;
use std::io;

use anyhow::anyhow;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveValue::Set, DatabaseConnection, TransactionTrait};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::instrument;

use super::BlobStorage;
use crate::database::entity::blob::{self, BlobModel, Entity as Blob};
use crate::database::entity::chunk::{self, Entity as Chunk};
use crate::database::{delete_blob_rows, BalloonDatabase};
use crate::error::{ServerError, ServerResult};
use balloon::stream::merge_chunks;

/// Maximum number of chunks inserted by a single statement.
const INSERT_BATCH_SIZE: usize = 64;

/// Where the next appended byte goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TailPosition {
    /// Sequence number of the chunk receiving the next byte.
    pub seq: i64,

    /// Room left in that chunk if it already exists.
    ///
    /// Zero means the chunk doesn't exist yet.
    pub free: i64,
}

/// How appended bytes are laid out into chunks.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct AppendPlan {
    /// Bytes completing the existing partial chunk.
    pub fill: Option<(i32, Bytes)>,

    /// New chunks in order.
    pub new_chunks: Vec<(i32, Bytes)>,

    /// The size of the blob afterwards.
    pub new_size: i64,
}

pub(crate) fn tail_position(size: i64, chunk_size: i64) -> TailPosition {
    let seq = size / chunk_size;

    if size % chunk_size == 0 {
        TailPosition { seq, free: 0 }
    } else {
        TailPosition {
            seq,
            free: (seq + 1) * chunk_size - size,
        }
    }
}

pub(crate) fn plan_append(size: i64, chunk_size: i32, mut data: Bytes) -> ServerResult<AppendPlan> {
    if chunk_size <= 0 {
        return Err(ServerError::StorageError(anyhow!(
            "Invalid chunk size {}",
            chunk_size
        )));
    }

    let appended = i64::try_from(data.len()).map_err(ServerError::request_error)?;
    let new_size = size
        .checked_add(appended)
        .ok_or_else(|| ServerError::StorageError(anyhow!("Blob size overflowed")))?;

    let tail = tail_position(size, i64::from(chunk_size));
    let mut next_seq = tail.seq;
    let mut fill = None;

    if tail.free > 0 && !data.is_empty() {
        let len = data.len().min(tail.free as usize);
        fill = Some((to_seq(tail.seq)?, data.split_to(len)));
        next_seq += 1;
    }

    let mut new_chunks = Vec::new();
    while !data.is_empty() {
        let len = data.len().min(chunk_size as usize);
        new_chunks.push((to_seq(next_seq)?, data.split_to(len)));
        next_seq += 1;
    }

    Ok(AppendPlan {
        fill,
        new_chunks,
        new_size,
    })
}

fn to_seq(seq: i64) -> ServerResult<i32> {
    i32::try_from(seq)
        .map_err(|_| ServerError::StorageError(anyhow!("Blob has too many chunks")))
}

impl BlobStorage {
    /// Opens a blob for reading.
    pub async fn open_blob_stream(
        &self,
        blob_id: Uuid,
    ) -> ServerResult<Box<dyn AsyncRead + Unpin + Send>> {
        let blob = self.database.find_blob(blob_id).await?;
        self.stream_blob(&blob)
    }

    pub(super) fn stream_blob(
        &self,
        blob: &BlobModel,
    ) -> ServerResult<Box<dyn AsyncRead + Unpin + Send>> {
        let num_chunks = to_seq(blob.num_chunks())?;
        let chunks: VecDeque<i32> = (0..num_chunks).collect();

        let stream = merge_chunks(
            chunks,
            fetch_chunk,
            (self.database.clone(), blob.id),
            self.config.read_prefetch,
        )
        .map(|item| item.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));

        Ok(Box::new(StreamReader::new(stream)))
    }

    /// Appends bytes to a temporary blob.
    ///
    /// Also bumps the upload timestamp. Returns the new size of the blob.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn append_bytes(&self, blob_id: Uuid, data: Bytes) -> ServerResult<i64> {
        let txn = self
            .database
            .begin()
            .await
            .map_err(ServerError::database_error)?;

        let blob = Blob::find_by_id(blob_id)
            .one(&txn)
            .await
            .map_err(ServerError::database_error)?
            .ok_or(ServerError::NoSuchBlob)?;

        if !blob.is_temporary() {
            return Err(ServerError::BlobFinalized);
        }

        if data.is_empty() {
            return Ok(blob.size);
        }

        let plan = plan_append(blob.size, blob.chunk_size, data)?;

        if let Some((seq, bytes)) = plan.fill {
            let tail = Chunk::find()
                .filter(chunk::Column::BlobId.eq(blob_id))
                .filter(chunk::Column::Seq.eq(seq))
                .one(&txn)
                .await
                .map_err(ServerError::database_error)?
                .ok_or(ServerError::MissingChunk { blob_id, seq })?;

            let expected_len = blob.size - i64::from(seq) * i64::from(blob.chunk_size);
            if tail.data.len() as i64 != expected_len {
                return Err(ServerError::StorageError(anyhow!(
                    "Chunk {} of blob {} is {} bytes long, expected {}",
                    seq,
                    blob_id,
                    tail.data.len(),
                    expected_len
                )));
            }

            let mut filled = tail.data;
            filled.extend_from_slice(&bytes);

            Chunk::update_many()
                .col_expr(chunk::Column::Data, Expr::value(filled))
                .filter(chunk::Column::Id.eq(tail.id))
                .exec(&txn)
                .await
                .map_err(ServerError::database_error)?;
        }

        for batch in plan.new_chunks.chunks(INSERT_BATCH_SIZE) {
            let models = batch.iter().map(|(seq, bytes)| chunk::ActiveModel {
                blob_id: Set(blob_id),
                seq: Set(*seq),
                data: Set(bytes.to_vec()),
                ..Default::default()
            });

            Chunk::insert_many(models)
                .exec_without_returning(&txn)
                .await
                .map_err(ServerError::database_error)?;
        }

        Blob::update_many()
            .col_expr(blob::Column::Size, Expr::value(plan.new_size))
            .col_expr(blob::Column::UploadedAt, Expr::value(Utc::now()))
            .filter(blob::Column::Id.eq(blob_id))
            .exec(&txn)
            .await
            .map_err(ServerError::database_error)?;

        txn.commit().await.map_err(ServerError::database_error)?;

        Ok(plan.new_size)
    }

    /// Deletes a blob with all of its chunks and references.
    #[instrument(skip(self))]
    pub async fn delete_blob(&self, blob_id: Uuid) -> ServerResult<()> {
        let txn = self
            .database
            .begin()
            .await
            .map_err(ServerError::database_error)?;

        if !delete_blob_rows(&txn, blob_id, None).await? {
            return Err(ServerError::NoSuchBlob);
        }

        txn.commit().await.map_err(ServerError::database_error)?;

        Ok(())
    }
}

async fn fetch_chunk(
    seq: i32,
    (database, blob_id): (DatabaseConnection, Uuid),
) -> ServerResult<BoxStream<'static, ServerResult<Bytes>>> {
    let chunk = Chunk::find()
        .filter(chunk::Column::BlobId.eq(blob_id))
        .filter(chunk::Column::Seq.eq(seq))
        .one(&database)
        .await
        .map_err(ServerError::database_error)?
        .ok_or(ServerError::MissingChunk { blob_id, seq })?;

    let data = Bytes::from(chunk.data);
    Ok(stream::once(async move { Ok(data) }).boxed())
}

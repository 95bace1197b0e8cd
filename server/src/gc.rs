//! Garbage collection.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use sea_orm::entity::prelude::*;
use sea_orm::query::QuerySelect;
use sea_orm::sea_query::Query;
use sea_orm::TransactionTrait;
use tokio::sync::Semaphore;
use tokio::time;
use tracing::instrument;

use super::{State, StateInner};
use crate::config::Config;
use crate::database::{delete_blob_if_unreferenced, delete_stale_upload, stale_upload_condition};
use crate::database::entity::blob::{self, BlobState, Entity as Blob};
use crate::database::entity::blobref::{self, Entity as BlobRef};
use crate::error::{ServerError, ServerResult};

/// Maximum number of blobs deleted at the same time.
const DELETION_CONCURRENCY: usize = 10;

/// Runs garbage collection periodically.
pub async fn run_garbage_collection(config: Config) {
    let interval = config.garbage_collection.interval;

    if interval == Duration::ZERO {
        // disabled
        return;
    }

    loop {
        // We don't stop even if it errors
        if let Err(e) = run_garbage_collection_once(config.clone()).await {
            tracing::warn!("Garbage collection failed: {}", e);
        }

        time::sleep(interval).await;
    }
}

/// Runs garbage collection once.
#[instrument(skip_all)]
pub async fn run_garbage_collection_once(config: Config) -> Result<()> {
    tracing::info!("Running garbage collection...");

    let state = StateInner::new(config).await;
    run_reap_stale_uploads(&state).await?;
    run_reap_orphan_blobs(&state).await?;

    Ok(())
}

/// Deletes abandoned upload sessions.
#[instrument(skip_all)]
async fn run_reap_stale_uploads(state: &State) -> Result<()> {
    let ttl = state.config.garbage_collection.temporary_blob_ttl;
    if ttl == Duration::ZERO {
        return Ok(());
    }

    let db = state.database().await?;
    let storage = state.storage().await?;

    let ttl = ChronoDuration::from_std(ttl)?;
    let cutoff = Utc::now()
        .checked_sub_signed(ttl)
        .ok_or_else(|| anyhow!("Somehow subtracting the temporary blob TTL underflowed"))?;

    let stale_ids: Vec<Uuid> = Blob::find()
        .select_only()
        .column(blob::Column::Id)
        .filter(stale_upload_condition(cutoff))
        .into_tuple()
        .all(db)
        .await?;

    tracing::info!("Found {} stale upload sessions", stale_ids.len());

    let deletion_limit = Arc::new(Semaphore::new(DELETION_CONCURRENCY));
    let futures: Vec<_> = stale_ids
        .into_iter()
        .map(|blob_id| {
            let deletion_limit = deletion_limit.clone();
            async move {
                let permit = deletion_limit.acquire().await?;

                let txn = db.begin().await?;
                let deleted = delete_stale_upload(&txn, blob_id, cutoff).await?;
                txn.commit().await?;

                // Resumed in the meantime
                let Some(stale) = deleted else {
                    return Ok(None);
                };

                storage
                    .quota()
                    .release(&stale.owner, stale.size as u64)
                    .await?;

                drop(permit);
                Result::<_, anyhow::Error>::Ok(Some(blob_id))
            }
        })
        .collect();

    let results = join_all(futures).await;
    let mut reaped = 0;
    for result in results {
        match result {
            Ok(Some(id)) => {
                tracing::debug!("Deleted stale upload session {}", id);
                reaped += 1;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Failed to delete stale upload session: {}", e);
            }
        }
    }

    tracing::info!("Deleted {} stale upload sessions", reaped);

    Ok(())
}

/// Deletes finalized blobs that nothing references.
#[instrument(skip_all)]
async fn run_reap_orphan_blobs(state: &State) -> Result<()> {
    let db = state.database().await?;

    let referenced = Query::select()
        .column(blobref::Column::BlobId)
        .from(BlobRef)
        .to_owned();

    let orphan_ids: Vec<Uuid> = Blob::find()
        .select_only()
        .column(blob::Column::Id)
        .filter(blob::Column::State.eq(BlobState::Finalized))
        .filter(blob::Column::HoldersCount.eq(0))
        .filter(blob::Column::Id.not_in_subquery(referenced))
        .into_tuple()
        .all(db)
        .await?;

    tracing::info!("Found {} orphan blobs", orphan_ids.len());

    let deletion_limit = Arc::new(Semaphore::new(DELETION_CONCURRENCY));
    let futures: Vec<_> = orphan_ids
        .into_iter()
        .map(|blob_id| {
            let deletion_limit = deletion_limit.clone();
            async move {
                let _permit = deletion_limit
                    .acquire()
                    .await
                    .map_err(ServerError::storage_error)?;

                reap_orphan_blob(db, blob_id).await
            }
        })
        .collect();

    let results = join_all(futures).await;
    let mut reaped = 0;
    for result in results {
        match result {
            Ok(true) => reaped += 1,
            // Picked up a reference or a holder in the meantime
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Failed to delete orphan blob: {}", e);
            }
        }
    }

    tracing::info!("Deleted {} orphan blobs", reaped);

    Ok(())
}

async fn reap_orphan_blob(db: &DatabaseConnection, blob_id: Uuid) -> ServerResult<bool> {
    let txn = db.begin().await.map_err(ServerError::database_error)?;
    let deleted = delete_blob_if_unreferenced(&txn, blob_id).await?;
    txn.commit().await.map_err(ServerError::database_error)?;

    Ok(deleted)
}

//! User storage quota.

use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ActiveValue::Set, DatabaseConnection};

use crate::database::entity::quota::{self, Entity as Quota, QuotaModel};
use crate::error::{InsufficientStorageReason, ServerError, ServerResult};

/// Charges users for the bytes they store.
#[async_trait]
pub trait QuotaEnforcer: Send + Sync + std::fmt::Debug {
    /// Charges `bytes` to a user if it fits in their quota.
    ///
    /// Fails with `InsufficientStorage` without charging anything
    /// otherwise.
    async fn check_and_charge(&self, user: &str, bytes: u64) -> ServerResult<()>;

    /// Gives `bytes` back to a user.
    ///
    /// Usage never drops below zero.
    async fn release(&self, user: &str, bytes: u64) -> ServerResult<()>;
}

/// Quota disabled.
#[derive(Debug, Default)]
pub struct Unlimited;

/// Quota tracked in the `quota` table.
#[derive(Debug)]
pub struct DatabaseQuota {
    database: DatabaseConnection,
    default_hard_quota: Option<i64>,
}

#[async_trait]
impl QuotaEnforcer for Unlimited {
    async fn check_and_charge(&self, _user: &str, _bytes: u64) -> ServerResult<()> {
        Ok(())
    }

    async fn release(&self, _user: &str, _bytes: u64) -> ServerResult<()> {
        Ok(())
    }
}

impl DatabaseQuota {
    pub fn new(database: DatabaseConnection, default_hard_quota: Option<u64>) -> Self {
        Self {
            database,
            // Anything beyond i64::MAX is effectively unlimited
            default_hard_quota: default_hard_quota.and_then(|q| i64::try_from(q).ok()),
        }
    }

    /// Returns the quota record of a user.
    pub async fn usage(&self, user: &str) -> ServerResult<Option<QuotaModel>> {
        Quota::find_by_id(user.to_owned())
            .one(&self.database)
            .await
            .map_err(ServerError::database_error)
    }

    /// Sets the hard quota of a user.
    ///
    /// `None` makes the user fall back to the default quota.
    pub async fn set_hard_quota(&self, user: &str, hard_quota: Option<u64>) -> ServerResult<()> {
        let hard_quota = hard_quota
            .map(i64::try_from)
            .transpose()
            .map_err(ServerError::request_error)?;

        self.ensure_row(user).await?;

        Quota::update_many()
            .col_expr(quota::Column::HardQuota, Expr::value(hard_quota))
            .filter(quota::Column::Username.eq(user))
            .exec(&self.database)
            .await
            .map_err(ServerError::database_error)?;

        Ok(())
    }

    async fn ensure_row(&self, user: &str) -> ServerResult<()> {
        Quota::insert(quota::ActiveModel {
            username: Set(user.to_owned()),
            hard_quota: Set(None),
            used_bytes: Set(0),
        })
        .on_conflict(
            OnConflict::column(quota::Column::Username)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(&self.database)
        .await
        .map_err(ServerError::database_error)?;

        Ok(())
    }
}

#[async_trait]
impl QuotaEnforcer for DatabaseQuota {
    async fn check_and_charge(&self, user: &str, bytes: u64) -> ServerResult<()> {
        let bytes = i64::try_from(bytes).map_err(|_| InsufficientStorageReason::UserQuotaFull)?;
        if bytes == 0 {
            return Ok(());
        }

        self.ensure_row(user).await?;

        let new_usage = Expr::col(quota::Column::UsedBytes).add(bytes);
        let within_quota = match self.default_hard_quota {
            Some(default) => Expr::expr(new_usage).lte(quota::Column::HardQuota.if_null(default)),
            None => quota::Column::HardQuota
                .is_null()
                .or(Expr::expr(new_usage).lte(Expr::col(quota::Column::HardQuota))),
        };

        let update = Quota::update_many()
            .col_expr(
                quota::Column::UsedBytes,
                Expr::col(quota::Column::UsedBytes).add(bytes),
            )
            .filter(quota::Column::Username.eq(user))
            .filter(within_quota)
            .exec(&self.database)
            .await
            .map_err(ServerError::database_error)?;

        if update.rows_affected == 0 {
            tracing::debug!("Quota of {} can't take another {} bytes", user, bytes);
            return Err(InsufficientStorageReason::UserQuotaFull.into());
        }

        Ok(())
    }

    async fn release(&self, user: &str, bytes: u64) -> ServerResult<()> {
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        if bytes == 0 {
            return Ok(());
        }

        let update = Quota::update_many()
            .col_expr(
                quota::Column::UsedBytes,
                Expr::col(quota::Column::UsedBytes).sub(bytes),
            )
            .filter(quota::Column::Username.eq(user))
            .filter(quota::Column::UsedBytes.gte(bytes))
            .exec(&self.database)
            .await
            .map_err(ServerError::database_error)?;

        if update.rows_affected == 0 {
            // Would go negative, or there's no row at all
            Quota::update_many()
                .col_expr(quota::Column::UsedBytes, Expr::value(0i64))
                .filter(quota::Column::Username.eq(user))
                .exec(&self.database)
                .await
                .map_err(ServerError::database_error)?;
        }

        Ok(())
    }
}

//! Storage usage of a user.

use sea_orm::entity::prelude::*;

pub type QuotaModel = Model;

/// Storage usage and limit of a user.
#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "quota")]
pub struct Model {
    /// Name of the user.
    #[sea_orm(primary_key, auto_increment = false)]
    pub username: String,

    /// The maximum number of bytes the user may store.
    ///
    /// If NULL, the configured default applies.
    pub hard_quota: Option<i64>,

    /// The number of bytes charged to the user.
    pub used_bytes: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

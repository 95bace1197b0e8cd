#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

pub mod config;
pub mod database;
pub mod error;
pub mod gc;
pub mod oobe;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sea_orm::{query::Statement, ConnectionTrait, Database, DatabaseConnection};
use tokio::sync::OnceCell;
use tokio::time;

use config::Config;
use database::migration::{Migrator, MigratorTrait};
use error::{ServerError, ServerResult};
use storage::{BlobStorage, DatabaseQuota, QuotaEnforcer, Unlimited};

type State = Arc<StateInner>;

/// Global server state.
#[derive(Debug)]
pub struct StateInner {
    /// The server configuration.
    config: Config,

    /// Handle to the database.
    database: OnceCell<DatabaseConnection>,

    /// Handle to the blob storage.
    storage: OnceCell<BlobStorage>,
}

impl StateInner {
    async fn new(config: Config) -> State {
        Arc::new(Self {
            config,
            database: OnceCell::new(),
            storage: OnceCell::new(),
        })
    }

    /// Returns a handle to the database.
    async fn database(&self) -> ServerResult<&DatabaseConnection> {
        self.database
            .get_or_try_init(|| async {
                Database::connect(&self.config.database.url)
                    .await
                    .map_err(ServerError::database_error)
            })
            .await
    }

    /// Returns a handle to the blob storage.
    async fn storage(&self) -> ServerResult<&BlobStorage> {
        self.storage
            .get_or_try_init(|| async {
                let database = self.database().await?.clone();

                let quota: Arc<dyn QuotaEnforcer> = if self.config.quota.enabled {
                    Arc::new(DatabaseQuota::new(
                        database.clone(),
                        self.config.quota.default_hard_quota,
                    ))
                } else {
                    Arc::new(Unlimited)
                };

                Ok(BlobStorage::new(
                    database,
                    quota,
                    self.config.storage.clone(),
                ))
            })
            .await
    }

    /// Sends periodic heartbeat queries to the database.
    async fn run_db_heartbeat(&self) -> ServerResult<()> {
        let db = self.database().await?;
        let stmt =
            Statement::from_string(db.get_database_backend(), "SELECT 'heartbeat';".to_string());

        loop {
            if let Err(e) = db.execute(stmt.clone()).await {
                tracing::debug!("Database heartbeat failed: {}", e);
            }
            time::sleep(Duration::from_secs(60)).await;
        }
    }
}

/// Runs the long-lived components.
///
/// Blob storage is driven by the embedding application through
/// [`storage::StorageAdapter`]. The daemon itself only keeps the
/// database warm and collects garbage.
pub async fn run_daemon(config: Config) -> Result<()> {
    eprintln!("Starting blob storage daemon...");

    let state = StateInner::new(config.clone()).await;

    tokio::join!(gc::run_garbage_collection(config), async {
        if state.config.database.heartbeat {
            if let Err(e) = state.run_db_heartbeat().await {
                tracing::error!("Database heartbeat failed: {}", e);
            }
        }
    });

    Ok(())
}

/// Runs database migrations.
pub async fn run_migrations(config: Config) -> Result<()> {
    eprintln!("Running migrations...");

    let state = StateInner::new(config).await;
    let db = state.database().await?;
    Migrator::up(db, None).await?;

    Ok(())
}

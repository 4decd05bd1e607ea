//! Connection pool component with bounded connect retry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgQueryResult, PgRow};
use sqlx::query::Query;
use sqlx::{Execute, Postgres, Transaction};
use thiserror::Error;

use crate::config::{DbConfig, SystemConfig};
use crate::lifecycle::{Component, FatalError, StopError};
use crate::observability::span::{SpanKind, SpanRef};
use crate::observability::tags;
use crate::resilience::retries::retry_fixed;

/// Remote endpoint name on every query span.
const REMOTE_SERVICE: &str = "postgres";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database pool is not connected")]
    NotConnected,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Opens and closes the underlying pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Pool: Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Pool, sqlx::Error>;

    async fn close(&self, pool: &Self::Pool);

    /// Target description for logs. Must not contain credentials.
    fn describe(&self) -> String;
}

/// Postgres connector sized from the `[system]` pool settings.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
    target: String,
    min_connections: u32,
    max_connections: u32,
    idle_timeout: Duration,
    acquire_timeout: Duration,
}

impl PgConnector {
    pub fn new(db: &DbConfig, system: &SystemConfig) -> Self {
        let options = PgConnectOptions::new()
            .host(&db.host)
            .port(db.port)
            .username(&db.username)
            .password(&db.password)
            .database(&db.dbname);
        Self {
            options,
            target: format!("postgres://{}@{}:{}/{}", db.username, db.host, db.port, db.dbname),
            min_connections: system.pool_min_size,
            max_connections: system.pool_max_size,
            idle_timeout: Duration::from_secs(system.pool_max_inactive_connection_lifetime_secs),
            acquire_timeout: Duration::from_secs(system.pool_acquire_timeout_secs),
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Pool = PgPool;

    async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .idle_timeout(Some(self.idle_timeout))
            .acquire_timeout(self.acquire_timeout)
            .connect_with(self.options.clone())
            .await?;
        // connect_with only opens lazily beyond min_connections; prove the server answers.
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(pool)
    }

    async fn close(&self, pool: &PgPool) {
        pool.close().await;
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

/// Database pool component.
///
/// `prepare` connects with a bounded number of attempts. The handle stays
/// unset until a connect succeeds and is cleared again by `stop`.
pub struct DbPool<C: Connector = PgConnector> {
    connector: C,
    max_attempts: u32,
    retry_delay: Duration,
    pool: ArcSwapOption<C::Pool>,
}

impl<C: Connector> DbPool<C> {
    pub fn new(connector: C, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            connector,
            max_attempts,
            retry_delay,
            pool: ArcSwapOption::empty(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.pool.load().is_some()
    }

    /// Current pool handle, if connected.
    pub fn pool(&self) -> Option<Arc<C::Pool>> {
        self.pool.load_full()
    }
}

impl DbPool<PgConnector> {
    pub fn from_config(db: &DbConfig, system: &SystemConfig) -> Self {
        Self::new(PgConnector::new(db, system), db.connect_max_attempts, db.connect_retry_delay())
    }
}

impl<C: Connector<Pool = PgPool>> DbPool<C> {
    fn connected(&self) -> Result<Arc<PgPool>, DbError> {
        self.pool.load_full().ok_or(DbError::NotConnected)
    }

    /// Run `op` inside its own transaction under a `db:<id>` child span.
    /// `op` hands the transaction back so it can be committed.
    async fn in_transaction<T, F, Fut>(&self, parent: &SpanRef, id: &str, sql: &str, op: F) -> Result<T, DbError>
    where
        F: FnOnce(Transaction<'static, Postgres>) -> Fut,
        Fut: Future<Output = Result<(T, Transaction<'static, Postgres>), sqlx::Error>>,
    {
        let mut span = parent.child(SpanKind::Outbound, &format!("db:{}", id));
        span.remote_endpoint(REMOTE_SERVICE);
        span.annotate(sql);

        let result: Result<T, DbError> = async {
            let pool = self.connected()?;
            let tx = pool.begin().await?;
            let (value, tx) = op(tx).await?;
            tx.commit().await?;
            Ok(value)
        }
        .await;

        if let Err(e) = &result {
            tracing::error!(query = id, error = %e, "Query failed");
            span.tag(tags::ERROR, "true");
            span.tag(tags::ERROR_MESSAGE, e.to_string());
        }
        result
    }

    /// Run a statement inside its own transaction.
    pub async fn execute<'q>(
        &self,
        parent: &SpanRef,
        id: &str,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Result<PgQueryResult, DbError> {
        let sql = query.sql();
        self.in_transaction(parent, id, sql, |mut tx| async move {
            let result = query.execute(&mut *tx).await?;
            Ok((result, tx))
        })
        .await
    }

    /// Fetch at most one row inside its own transaction.
    pub async fn fetch_optional<'q>(
        &self,
        parent: &SpanRef,
        id: &str,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Result<Option<PgRow>, DbError> {
        let sql = query.sql();
        self.in_transaction(parent, id, sql, |mut tx| async move {
            let row = query.fetch_optional(&mut *tx).await?;
            Ok((row, tx))
        })
        .await
    }

    /// Fetch every row inside its own transaction.
    pub async fn fetch_all<'q>(
        &self,
        parent: &SpanRef,
        id: &str,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Result<Vec<PgRow>, DbError> {
        let sql = query.sql();
        self.in_transaction(parent, id, sql, |mut tx| async move {
            let rows = query.fetch_all(&mut *tx).await?;
            Ok((rows, tx))
        })
        .await
    }

    /// Round-trip `SELECT 1`.
    pub async fn ping(&self, parent: &SpanRef) -> Result<(), DbError> {
        self.execute(parent, "ping", sqlx::query("SELECT 1")).await.map(|_| ())
    }
}

#[async_trait]
impl<C: Connector> Component for DbPool<C> {
    async fn prepare(&self) -> Result<(), FatalError> {
        let target = self.connector.describe();
        tracing::info!(target = %target, max_attempts = self.max_attempts, "Connecting to database");

        let pool = retry_fixed(self.max_attempts, self.retry_delay, |attempt| {
            tracing::debug!(target = %target, attempt, "Database connect attempt");
            self.connector.connect()
        })
        .await
        .map_err(|exhausted| {
            tracing::error!(
                target = %target,
                attempts = exhausted.attempts,
                error = %exhausted.last_error,
                "Database unreachable, giving up"
            );
            FatalError::ConnectExhausted {
                target: target.clone(),
                attempts: exhausted.attempts,
            }
        })?;

        self.pool.store(Some(Arc::new(pool)));
        tracing::info!(target = %target, "Connected to database");
        Ok(())
    }

    async fn start(&self) -> Result<(), FatalError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), StopError> {
        if let Some(pool) = self.pool.swap(None) {
            tracing::info!(target = %self.connector.describe(), "Disconnecting from database");
            self.connector.close(&pool).await;
        }
        Ok(())
    }
}

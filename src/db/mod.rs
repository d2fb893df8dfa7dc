//! Database module

mod schema;
mod warehouse;

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::model::{DimensionKind, FactRecord, ProxyId, RollupRecord, RunLogRecord, StagingRecord};

/// SQL flavour of the connected warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
    Postgres,
}

impl FromStr for Dialect {
    type Err = StoreError;

    fn from_str(driver: &str) -> Result<Self, Self::Err> {
        match driver.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" => Ok(Self::MySql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(StoreError::UnsupportedDriver(other.to_string())),
        }
    }
}

impl Dialect {
    /// Rewrites `?` placeholders into the dialect's bind syntax.
    pub fn sql(self, query: &str) -> String {
        if self != Dialect::Postgres {
            return query.to_string();
        }
        let mut out = String::with_capacity(query.len() + 16);
        let mut n = 0;
        for c in query.chars() {
            if c == '?' {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            } else {
                out.push(c);
            }
        }
        out
    }
}

/// Storage primitives the pipeline runs against.
///
/// Everything here is a plain read, insert or delete; grouping, anti-joins and key
/// resolution happen in the pipeline stages.
#[async_trait]
pub trait WarehouseStore: Send + Sync {
    /// Highest fact date for the proxy, `None` when it has no facts.
    async fn read_max_fact_date(&self, proxy: ProxyId) -> StoreResult<Option<f64>>;

    /// Highest rollup hour bucket for the proxy.
    async fn read_max_rollup_bucket(&self, proxy: ProxyId) -> StoreResult<Option<i64>>;

    /// Deletes rollup rows with a bucket at or after `from`, all of them when `None`.
    async fn delete_rollup_rows_from(&self, proxy: ProxyId, from: Option<i64>) -> StoreResult<u64>;

    async fn delete_staging_rows(&self, proxy: ProxyId) -> StoreResult<u64>;

    /// Writes the batch atomically.
    async fn insert_staging_batch(&self, records: &[StagingRecord]) -> StoreResult<u64>;

    async fn read_staged_distinct(&self, kind: DimensionKind, proxy: ProxyId) -> StoreResult<Vec<String>>;

    /// Surrogate keys for those of `names` already present.
    async fn read_dimension_ids(
        &self,
        kind: DimensionKind,
        names: &[String],
    ) -> StoreResult<HashMap<String, i64>>;

    async fn insert_dimension_names(&self, kind: DimensionKind, names: &[String]) -> StoreResult<u64>;

    /// Up to `limit` staged rows with an id above `after_id`, in id order, each with its id.
    async fn read_staging_rows(
        &self,
        proxy: ProxyId,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<(i64, StagingRecord)>>;

    async fn insert_fact_batch(&self, records: &[FactRecord]) -> StoreResult<u64>;

    /// One page of facts dated at or after `from` (all dates when `None`), keyed by id
    /// like [`WarehouseStore::read_staging_rows`].
    async fn read_facts_from(
        &self,
        proxy: ProxyId,
        from: Option<f64>,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<(i64, FactRecord)>>;

    async fn insert_rollup_batch(&self, records: &[RollupRecord]) -> StoreResult<u64>;

    async fn append_run_log(&self, record: &RunLogRecord) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
    dialect: Dialect,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> StoreResult<Self> {
        let dialect: Dialect = config.driver.parse()?;
        let url = config.connection_url();
        Self::connect(dialect, &url, config.max_connections, config.connect_timeout_secs).await
    }

    pub async fn connect(
        dialect: Dialect,
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StoreResult<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(StoreError::Connect)?;

        info!(driver = ?dialect, max_connections, "Connected to warehouse");
        Ok(Self { pool, dialect })
    }

    /// Single-connection in-memory SQLite warehouse with the schema in place.
    #[cfg(test)]
    pub async fn in_memory() -> Self {
        let db = Self::connect(Dialect::Sqlite, "sqlite::memory:", 1, 5)
            .await
            .expect("open in-memory sqlite");
        db.run_migrations().await.expect("create schema");
        db
    }

    /// Creates missing tables and indexes. Existing tables are left untouched.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        if self.dialect == Dialect::Sqlite {
            sqlx::query("PRAGMA journal_mode=WAL")
                .execute(&self.pool)
                .await
                .map_err(StoreError::query("enable WAL"))?;
        }

        for statement in schema::create_statements(self.dialect) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(StoreError::query("create schema"))?;
        }
        Ok(())
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Waits for in-flight statements to finish, then closes every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Every staged row of the proxy, paging through the store.
    #[cfg(test)]
    pub(crate) async fn staged_rows(&self, proxy: ProxyId) -> Vec<StagingRecord> {
        let mut out = Vec::new();
        let mut after = 0;
        loop {
            let page = self.read_staging_rows(proxy, after, 64).await.expect("read staging");
            let Some((last, _)) = page.last() else { break };
            after = *last;
            out.extend(page.into_iter().map(|(_, row)| row));
        }
        out
    }

    /// Every fact of the proxy dated at or after `from`.
    #[cfg(test)]
    pub(crate) async fn facts(&self, proxy: ProxyId, from: Option<f64>) -> Vec<FactRecord> {
        let mut out = Vec::new();
        let mut after = 0;
        loop {
            let page = self.read_facts_from(proxy, from, after, 64).await.expect("read facts");
            let Some((last, _)) = page.last() else { break };
            after = *last;
            out.extend(page.into_iter().map(|(_, fact)| fact));
        }
        out
    }
}

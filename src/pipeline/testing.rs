//! Test doubles shared by the pipeline stage tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::db::{Database, WarehouseStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{DimensionKind, FactRecord, ProxyId, RollupRecord, RunLogRecord, StagingRecord};

pub fn staged(date: f64, login: &str) -> StagingRecord {
    StagingRecord {
        date,
        ipaddress: "10.0.0.1".into(),
        httpstatus: "TCP_MISS/200".into(),
        size_in_bytes: 100,
        method: "GET".into(),
        site: "http://www.example.com/".into(),
        login: login.into(),
        mime: "text/html".into(),
        proxy_id: 1,
    }
}

fn unavailable(op: &'static str) -> StoreError {
    StoreError::Query {
        op,
        source: sqlx::Error::PoolTimedOut,
    }
}

/// Delegates to an optional in-memory database and fails selected calls.
///
/// Without a database every call fails.
#[derive(Default)]
pub struct FailingStore {
    inner: Option<Database>,
    fail_staging_batch: Option<usize>,
    fail_dimension: Option<DimensionKind>,
    fail_fact_insert: bool,
    staging_calls: AtomicUsize,
}

impl FailingStore {
    pub fn with_db(db: Database) -> Self {
        Self {
            inner: Some(db),
            ..Self::default()
        }
    }

    /// Fails the n-th (0-based) staging batch insert.
    pub fn fail_staging_batch(mut self, n: usize) -> Self {
        self.fail_staging_batch = Some(n);
        self
    }

    pub fn fail_dimension(mut self, kind: DimensionKind) -> Self {
        self.fail_dimension = Some(kind);
        self
    }

    pub fn fail_fact_insert(mut self) -> Self {
        self.fail_fact_insert = true;
        self
    }

    pub fn db(&self) -> &Database {
        self.inner.as_ref().expect("store has no database")
    }

    fn inner(&self, op: &'static str) -> StoreResult<&Database> {
        self.inner.as_ref().ok_or_else(|| unavailable(op))
    }
}

#[async_trait]
impl WarehouseStore for FailingStore {
    async fn read_max_fact_date(&self, proxy: ProxyId) -> StoreResult<Option<f64>> {
        self.inner("read max fact date")?.read_max_fact_date(proxy).await
    }

    async fn read_max_rollup_bucket(&self, proxy: ProxyId) -> StoreResult<Option<i64>> {
        self.inner("read max rollup bucket")?
            .read_max_rollup_bucket(proxy)
            .await
    }

    async fn delete_rollup_rows_from(&self, proxy: ProxyId, from: Option<i64>) -> StoreResult<u64> {
        self.inner("delete rollup rows")?
            .delete_rollup_rows_from(proxy, from)
            .await
    }

    async fn delete_staging_rows(&self, proxy: ProxyId) -> StoreResult<u64> {
        self.inner("delete staging rows")?.delete_staging_rows(proxy).await
    }

    async fn insert_staging_batch(&self, records: &[StagingRecord]) -> StoreResult<u64> {
        let call = self.staging_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_staging_batch == Some(call) {
            return Err(unavailable("insert staging batch"));
        }
        self.inner("insert staging batch")?
            .insert_staging_batch(records)
            .await
    }

    async fn read_staged_distinct(&self, kind: DimensionKind, proxy: ProxyId) -> StoreResult<Vec<String>> {
        self.inner("read staged values")?
            .read_staged_distinct(kind, proxy)
            .await
    }

    async fn read_dimension_ids(
        &self,
        kind: DimensionKind,
        names: &[String],
    ) -> StoreResult<HashMap<String, i64>> {
        self.inner("read dimension ids")?
            .read_dimension_ids(kind, names)
            .await
    }

    async fn insert_dimension_names(&self, kind: DimensionKind, names: &[String]) -> StoreResult<u64> {
        if self.fail_dimension == Some(kind) {
            return Err(unavailable("insert dimension names"));
        }
        self.inner("insert dimension names")?
            .insert_dimension_names(kind, names)
            .await
    }

    async fn read_staging_rows(
        &self,
        proxy: ProxyId,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<(i64, StagingRecord)>> {
        self.inner("read staging rows")?
            .read_staging_rows(proxy, after_id, limit)
            .await
    }

    async fn insert_fact_batch(&self, records: &[FactRecord]) -> StoreResult<u64> {
        if self.fail_fact_insert {
            return Err(unavailable("insert fact batch"));
        }
        self.inner("insert fact batch")?.insert_fact_batch(records).await
    }

    async fn read_facts_from(
        &self,
        proxy: ProxyId,
        from: Option<f64>,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<(i64, FactRecord)>> {
        self.inner("read facts")?
            .read_facts_from(proxy, from, after_id, limit)
            .await
    }

    async fn insert_rollup_batch(&self, records: &[RollupRecord]) -> StoreResult<u64> {
        self.inner("insert rollup batch")?
            .insert_rollup_batch(records)
            .await
    }

    async fn append_run_log(&self, record: &RunLogRecord) -> StoreResult<()> {
        self.inner("append run log")?.append_run_log(record).await
    }
}

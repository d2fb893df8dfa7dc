//! `WarehouseStore` over sqlx

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use super::schema::{dimension_table, FACT_TABLE, ROLLUP_TABLE, RUN_LOG_TABLE, STAGING_TABLE};
use super::{Database, WarehouseStore};
use crate::error::{StoreError, StoreResult};
use crate::model::{DimensionKind, FactRecord, ProxyId, RollupRecord, RunLogRecord, StagingRecord};

/// Bind parameters per statement, under SQLite's historical limit of 999.
const MAX_BIND_PARAMS: usize = 900;

const STAGING_COLUMNS: &str =
    "date, ipaddress, httpstatus, sizeinbytes, site, login, method, mime, numproxy";
const FACT_COLUMNS: &str =
    "date, ipaddress, login, httpstatus, sizeinbytes, site, method, mime, numproxy";
const ROLLUP_COLUMNS: &str = "date, login, ipaddress, sizeinbytes, site, httpstatus, par, numproxy";

type StagingRow = (i64, f64, String, String, i64, String, String, String, String, i64);
type FactRow = (i64, f64, i64, i64, i64, i64, String, String, String, i64);

fn column_count(columns: &str) -> usize {
    columns.split(',').count()
}

fn rows_per_statement(columns: &str) -> usize {
    MAX_BIND_PARAMS / column_count(columns)
}

/// `(?, ?), (?, ?)` for `rows` rows of `cols` placeholders.
fn values_clause(rows: usize, cols: usize) -> String {
    let row = format!("({})", vec!["?"; cols].join(", "));
    vec![row; rows].join(", ")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl Database {
    fn insert_sql(&self, table: &str, columns: &str, rows: usize) -> String {
        self.dialect.sql(&format!(
            "INSERT INTO {} ({}) VALUES {}",
            table,
            columns,
            values_clause(rows, column_count(columns))
        ))
    }
}

#[async_trait]
impl WarehouseStore for Database {
    async fn read_max_fact_date(&self, proxy: ProxyId) -> StoreResult<Option<f64>> {
        let sql = self
            .dialect
            .sql(&format!("SELECT MAX(date) FROM {FACT_TABLE} WHERE numproxy = ?"));
        sqlx::query_scalar::<_, Option<f64>>(&sql)
            .bind(proxy)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::query("read max fact date"))
    }

    async fn read_max_rollup_bucket(&self, proxy: ProxyId) -> StoreResult<Option<i64>> {
        let sql = self
            .dialect
            .sql(&format!("SELECT MAX(date) FROM {ROLLUP_TABLE} WHERE numproxy = ?"));
        sqlx::query_scalar::<_, Option<i64>>(&sql)
            .bind(proxy)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::query("read max rollup bucket"))
    }

    async fn delete_rollup_rows_from(&self, proxy: ProxyId, from: Option<i64>) -> StoreResult<u64> {
        let result = match from {
            Some(from) => {
                let sql = self.dialect.sql(&format!(
                    "DELETE FROM {ROLLUP_TABLE} WHERE numproxy = ? AND date >= ?"
                ));
                sqlx::query(&sql).bind(proxy).bind(from).execute(&self.pool).await
            }
            None => {
                let sql = self
                    .dialect
                    .sql(&format!("DELETE FROM {ROLLUP_TABLE} WHERE numproxy = ?"));
                sqlx::query(&sql).bind(proxy).execute(&self.pool).await
            }
        };
        Ok(result.map_err(StoreError::query("delete rollup rows"))?.rows_affected())
    }

    async fn delete_staging_rows(&self, proxy: ProxyId) -> StoreResult<u64> {
        let sql = self
            .dialect
            .sql(&format!("DELETE FROM {STAGING_TABLE} WHERE numproxy = ?"));
        let result = sqlx::query(&sql)
            .bind(proxy)
            .execute(&self.pool)
            .await
            .map_err(StoreError::query("delete staging rows"))?;
        Ok(result.rows_affected())
    }

    async fn insert_staging_batch(&self, records: &[StagingRecord]) -> StoreResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let op = "insert staging batch";
        let mut tx = self.pool.begin().await.map_err(StoreError::query(op))?;
        let mut inserted = 0;

        for chunk in records.chunks(rows_per_statement(STAGING_COLUMNS)) {
            let sql = self.insert_sql(STAGING_TABLE, STAGING_COLUMNS, chunk.len());
            let mut query = sqlx::query(&sql);
            for r in chunk {
                query = query
                    .bind(r.date)
                    .bind(&r.ipaddress)
                    .bind(&r.httpstatus)
                    .bind(r.size_in_bytes)
                    .bind(&r.site)
                    .bind(&r.login)
                    .bind(&r.method)
                    .bind(&r.mime)
                    .bind(r.proxy_id);
            }
            inserted += query
                .execute(&mut *tx)
                .await
                .map_err(StoreError::query(op))?
                .rows_affected();
        }

        tx.commit().await.map_err(StoreError::query(op))?;
        debug!(rows = inserted, "Staging batch committed");
        Ok(inserted)
    }

    async fn read_staged_distinct(&self, kind: DimensionKind, proxy: ProxyId) -> StoreResult<Vec<String>> {
        let sql = self.dialect.sql(&format!(
            "SELECT DISTINCT {} FROM {STAGING_TABLE} WHERE numproxy = ?",
            kind.staging_column()
        ));
        sqlx::query_scalar::<_, String>(&sql)
            .bind(proxy)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::query("read staged values"))
    }

    async fn read_dimension_ids(
        &self,
        kind: DimensionKind,
        names: &[String],
    ) -> StoreResult<HashMap<String, i64>> {
        let mut ids = HashMap::with_capacity(names.len());

        for chunk in names.chunks(MAX_BIND_PARAMS) {
            let sql = self.dialect.sql(&format!(
                "SELECT id, name FROM {} WHERE name IN ({})",
                dimension_table(kind),
                placeholders(chunk.len())
            ));
            let mut query = sqlx::query_as::<_, (i64, String)>(&sql);
            for name in chunk {
                query = query.bind(name);
            }
            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::query("read dimension ids"))?;
            ids.extend(rows.into_iter().map(|(id, name)| (name, id)));
        }

        Ok(ids)
    }

    async fn insert_dimension_names(&self, kind: DimensionKind, names: &[String]) -> StoreResult<u64> {
        if names.is_empty() {
            return Ok(0);
        }
        let op = "insert dimension names";
        let mut tx = self.pool.begin().await.map_err(StoreError::query(op))?;
        let mut inserted = 0;

        for chunk in names.chunks(MAX_BIND_PARAMS) {
            let sql = self.insert_sql(dimension_table(kind), "name", chunk.len());
            let mut query = sqlx::query(&sql);
            for name in chunk {
                query = query.bind(name);
            }
            inserted += query
                .execute(&mut *tx)
                .await
                .map_err(StoreError::query(op))?
                .rows_affected();
        }

        tx.commit().await.map_err(StoreError::query(op))?;
        Ok(inserted)
    }

    async fn read_staging_rows(
        &self,
        proxy: ProxyId,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<(i64, StagingRecord)>> {
        let sql = self.dialect.sql(&format!(
            "SELECT id, {STAGING_COLUMNS} FROM {STAGING_TABLE} WHERE numproxy = ? AND id > ? ORDER BY id LIMIT ?"
        ));
        let rows: Vec<StagingRow> = sqlx::query_as(&sql)
            .bind(proxy)
            .bind(after_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::query("read staging rows"))?;

        Ok(rows
            .into_iter()
            .map(
                |(id, date, ipaddress, httpstatus, size_in_bytes, site, login, method, mime, proxy_id)| {
                    let record = StagingRecord {
                        date,
                        ipaddress,
                        httpstatus,
                        size_in_bytes,
                        method,
                        site,
                        login,
                        mime,
                        proxy_id,
                    };
                    (id, record)
                },
            )
            .collect())
    }

    async fn insert_fact_batch(&self, records: &[FactRecord]) -> StoreResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let op = "insert fact batch";
        let mut tx = self.pool.begin().await.map_err(StoreError::query(op))?;
        let mut inserted = 0;

        for chunk in records.chunks(rows_per_statement(FACT_COLUMNS)) {
            let sql = self.insert_sql(FACT_TABLE, FACT_COLUMNS, chunk.len());
            let mut query = sqlx::query(&sql);
            for r in chunk {
                query = query
                    .bind(r.date)
                    .bind(r.ipaddress_id)
                    .bind(r.login_id)
                    .bind(r.httpstatus_id)
                    .bind(r.size_in_bytes)
                    .bind(&r.site)
                    .bind(&r.method)
                    .bind(&r.mime)
                    .bind(r.proxy_id);
            }
            inserted += query
                .execute(&mut *tx)
                .await
                .map_err(StoreError::query(op))?
                .rows_affected();
        }

        tx.commit().await.map_err(StoreError::query(op))?;
        Ok(inserted)
    }

    async fn read_facts_from(
        &self,
        proxy: ProxyId,
        from: Option<f64>,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<(i64, FactRecord)>> {
        let op = "read facts";
        let rows: Vec<FactRow> = match from {
            Some(from) => {
                let sql = self.dialect.sql(&format!(
                    "SELECT id, {FACT_COLUMNS} FROM {FACT_TABLE} \
                     WHERE numproxy = ? AND date >= ? AND id > ? ORDER BY id LIMIT ?"
                ));
                sqlx::query_as::<_, FactRow>(&sql)
                    .bind(proxy)
                    .bind(from)
                    .bind(after_id)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = self.dialect.sql(&format!(
                    "SELECT id, {FACT_COLUMNS} FROM {FACT_TABLE} WHERE numproxy = ? AND id > ? ORDER BY id LIMIT ?"
                ));
                sqlx::query_as::<_, FactRow>(&sql)
                    .bind(proxy)
                    .bind(after_id)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(StoreError::query(op))?;

        Ok(rows
            .into_iter()
            .map(
                |(id, date, ipaddress_id, login_id, httpstatus_id, size_in_bytes, site, method, mime, proxy_id)| {
                    let fact = FactRecord {
                        date,
                        ipaddress_id,
                        login_id,
                        httpstatus_id,
                        size_in_bytes,
                        site,
                        method,
                        mime,
                        proxy_id,
                    };
                    (id, fact)
                },
            )
            .collect())
    }

    async fn insert_rollup_batch(&self, records: &[RollupRecord]) -> StoreResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let op = "insert rollup batch";
        let mut tx = self.pool.begin().await.map_err(StoreError::query(op))?;
        let mut inserted = 0;

        for chunk in records.chunks(rows_per_statement(ROLLUP_COLUMNS)) {
            let sql = self.insert_sql(ROLLUP_TABLE, ROLLUP_COLUMNS, chunk.len());
            let mut query = sqlx::query(&sql);
            for r in chunk {
                query = query
                    .bind(r.date_bucket)
                    .bind(r.login_id)
                    .bind(r.ipaddress_id)
                    .bind(r.size_in_bytes)
                    .bind(&r.site)
                    .bind(r.httpstatus_id)
                    .bind(r.partition.as_i64())
                    .bind(r.proxy_id);
            }
            inserted += query
                .execute(&mut *tx)
                .await
                .map_err(StoreError::query(op))?
                .rows_affected();
        }

        tx.commit().await.map_err(StoreError::query(op))?;
        Ok(inserted)
    }

    async fn append_run_log(&self, record: &RunLogRecord) -> StoreResult<()> {
        let sql = self.dialect.sql(&format!(
            "INSERT INTO {RUN_LOG_TABLE} (datestart, dateend, message) VALUES (?, ?, ?)"
        ));
        sqlx::query(&sql)
            .bind(record.start_time.timestamp_millis())
            .bind(record.end_time.timestamp_millis())
            .bind(&record.message)
            .execute(&self.pool)
            .await
            .map_err(StoreError::query("append run log"))?;
        Ok(())
    }
}

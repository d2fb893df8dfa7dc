//! The load run, stage by stage
//!
//! 1. watermark: newest loaded fact date and rollup day
//! 2. preparation: purge the rollup window and leftover staging rows
//! 3. ingest: parse, filter against the watermark and stage in batches
//! 4. dimensions, merge, rollups, run log
//!
//! Only a staging batch failure under the abort policy or an unreadable input
//! ends a run early. Every other stage failure is logged and the run goes on.

pub mod dimensions;
pub mod merge;
pub mod rollup;
pub mod runlog;
pub mod staging;
pub mod watermark;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::db::WarehouseStore;
use crate::error::{ParseError, PipelineError};
use crate::model::{ProxyId, StagingRecord};
use crate::parser::parse_line;

use self::dimensions::DimensionResolver;
use self::merge::{FactMerger, MergeSummary};
use self::rollup::{RollupAggregator, RollupSummary};
use self::runlog::RunLogRecorder;
use self::staging::{StagingLoader, StagingSummary};
use self::watermark::{Watermark, WatermarkTracker};

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub lines_read: u64,
    /// Records written to staging
    pub lines_added: u64,
    pub lines_malformed: u64,
    /// Lines at or before the watermark
    pub lines_too_old: u64,
    pub staging: StagingSummary,
    pub merge: Option<MergeSummary>,
    pub rollup: Option<RollupSummary>,
}

/// Opens the access log for buffered line reads.
pub async fn open_log(path: &Path) -> std::io::Result<BufReader<File>> {
    let file = File::open(path).await?;
    Ok(BufReader::new(file))
}

pub struct Pipeline<'a> {
    store: &'a dyn WarehouseStore,
    settings: &'a IngestConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a dyn WarehouseStore, settings: &'a IngestConfig) -> Self {
        Self { store, settings }
    }

    /// Runs every stage over `input` for the configured proxy.
    ///
    /// A run log row is written even when the run aborts.
    pub async fn run<R>(&self, input: R) -> Result<RunStats, PipelineError>
    where
        R: AsyncBufRead + Unpin,
    {
        let start_time = Utc::now();
        let proxy = self.settings.proxy_id;
        info!(proxy, batch_size = self.settings.batch_size, "Run started");

        let watermark = WatermarkTracker::new(self.store).read(proxy).await;
        let rollup_window_purged = self.prepare(proxy, &watermark).await;

        let mut stats = RunStats::default();
        let started = Instant::now();
        if let Err(e) = self.ingest(input, &watermark, &mut stats).await {
            error!(
                error = %e,
                lines_read = stats.lines_read,
                lines_added = stats.lines_added,
                "Run aborted"
            );
            RunLogRecorder::new(self.store)
                .record(start_time, Utc::now(), stats.lines_read, stats.lines_added)
                .await;
            return Err(e);
        }
        info!(
            lines_read = stats.lines_read,
            lines_added = stats.lines_added,
            malformed = stats.lines_malformed,
            too_old = stats.lines_too_old,
            batches_dropped = stats.staging.batches_dropped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ingest finished"
        );

        let started = Instant::now();
        let dimensions = DimensionResolver::new(self.store).resolve(proxy).await;
        let failed: Vec<_> = dimensions.failed().collect();
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Dimensions done");

        // Merging part of staging would move the watermark past the rows left behind
        if failed.is_empty() {
            let started = Instant::now();
            match FactMerger::new(self.store, self.settings.batch_size)
                .merge(proxy)
                .await
            {
                Ok(summary) => stats.merge = Some(summary),
                Err(e) => error!(error = %e, "Merge failed, staged rows are kept until the next run"),
            }
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Merge done");
        } else {
            warn!(
                dimensions = ?failed,
                "Dimension fill failed, skipping merge; staged lines are read again next run"
            );
        }

        if rollup_window_purged {
            let started = Instant::now();
            match RollupAggregator::new(self.store, self.settings.batch_size)
                .run(proxy, watermark.last_rollup_day)
                .await
            {
                Ok(summary) => stats.rollup = Some(summary),
                Err(e) => error!(error = %e, "Rollup failed"),
            }
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Rollups done");
        } else {
            warn!("Rollup window was not purged, skipping rollups for this run");
        }

        RunLogRecorder::new(self.store)
            .record(start_time, Utc::now(), stats.lines_read, stats.lines_added)
            .await;
        Ok(stats)
    }

    /// Clears the rollup window and stale staging rows. Returns whether the
    /// rollup window is clean enough to rebuild.
    async fn prepare(&self, proxy: ProxyId, watermark: &Watermark) -> bool {
        let mut rollup_window_purged = true;
        match self
            .store
            .delete_rollup_rows_from(proxy, watermark.last_rollup_day)
            .await
        {
            Ok(removed) => debug!(removed, from_day = ?watermark.last_rollup_day, "Rollup window purged"),
            Err(e) => {
                error!(error = %e, "Failed to purge rollup window");
                rollup_window_purged = false;
            }
        }

        match self.store.delete_staging_rows(proxy).await {
            Ok(0) => {}
            Ok(removed) => warn!(removed, "Removed staging rows left by an earlier run"),
            Err(e) => error!(error = %e, "Failed to purge staging"),
        }
        rollup_window_purged
    }

    async fn ingest<R>(
        &self,
        mut input: R,
        watermark: &Watermark,
        stats: &mut RunStats,
    ) -> Result<(), PipelineError>
    where
        R: AsyncBufRead + Unpin,
    {
        let proxy = self.settings.proxy_id;
        let mut loader = StagingLoader::new(
            self.store,
            self.settings.batch_size,
            self.settings.on_batch_error,
        );
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            stats.lines_read += 1;

            let line = String::from_utf8_lossy(&buf);
            let record = match parse_line(&line).and_then(|l| StagingRecord::from_line(l, proxy)) {
                Ok(record) => record,
                Err(ParseError::EmptyLine) => {
                    debug!(line = stats.lines_read, "Skipping blank line");
                    stats.lines_malformed += 1;
                    continue;
                }
                Err(e) => {
                    warn!(line = stats.lines_read, error = %e, "Skipping malformed line");
                    stats.lines_malformed += 1;
                    continue;
                }
            };

            if !watermark.accepts(record.date) {
                stats.lines_too_old += 1;
                continue;
            }

            let pushed = loader.push(record, stats.lines_read).await;
            stats.staging = loader.summary();
            stats.lines_added = stats.staging.records_staged;
            pushed?;
        }

        let finished = loader.finish(stats.lines_read).await;
        stats.staging = loader.summary();
        stats.lines_added = stats.staging.records_staged;
        finished.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchFailurePolicy;
    use crate::db::Database;
    use crate::model::{DimensionKind, FactRecord, Partition};
    use crate::pipeline::testing::FailingStore;

    const DAY: i64 = 86_400 * 200;

    fn line(date: i64, login: &str, size: i64, url: &str) -> String {
        line_from("10.0.0.1", date, login, size, url)
    }

    fn line_from(ip: &str, date: i64, login: &str, size: i64, url: &str) -> String {
        format!(
            "{date}.000 12 {ip} TCP_MISS/200 {size} GET {url} {login} HIER_DIRECT/1.2.3.4 text/html\n"
        )
    }

    fn settings(batch_size: usize) -> IngestConfig {
        IngestConfig {
            batch_size,
            proxy_id: 1,
            ..IngestConfig::default()
        }
    }

    async fn seed_fact(db: &Database, date: f64, size: i64, site: &str) {
        let status = ["TCP_MISS/200".to_string()];
        let ip = ["10.0.0.9".to_string()];
        let login = ["seed".to_string()];
        db.insert_dimension_names(DimensionKind::HttpStatus, &status).await.unwrap();
        db.insert_dimension_names(DimensionKind::IpAddress, &ip).await.unwrap();
        db.insert_dimension_names(DimensionKind::Login, &login).await.unwrap();
        let id = |m: std::collections::HashMap<String, i64>, k: &str| m[k];
        let fact = FactRecord {
            date,
            ipaddress_id: id(db.read_dimension_ids(DimensionKind::IpAddress, &ip).await.unwrap(), "10.0.0.9"),
            login_id: id(db.read_dimension_ids(DimensionKind::Login, &login).await.unwrap(), "seed"),
            httpstatus_id: id(
                db.read_dimension_ids(DimensionKind::HttpStatus, &status).await.unwrap(),
                "TCP_MISS/200",
            ),
            size_in_bytes: size,
            site: site.into(),
            method: "GET".into(),
            mime: "text/html".into(),
            proxy_id: 1,
        };
        db.insert_fact_batch(&[fact]).await.unwrap();
    }

    async fn domain_totals(db: &Database) -> Vec<(String, i64, i64)> {
        sqlx::query_as(
            "SELECT site, date, sizeinbytes FROM scsq_quicktraffic WHERE par = ? ORDER BY site, date",
        )
        .bind(Partition::DomainTotal.as_i64())
        .fetch_all(db.pool())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn only_lines_newer_than_the_watermark_are_loaded() {
        let db = Database::in_memory().await;
        let watermark = DAY + 100;
        seed_fact(&db, watermark as f64, 1000, "http://old.net/").await;

        let input = [
            line(watermark, "alice", 999, "http://dup.org/"),
            line(watermark + 10, "alice", 100, "http://www.example.com/a"),
            line(watermark + 20, "bob", 50, "http://cdn.example.com/b"),
        ]
        .concat();

        let settings = settings(10);
        let stats = Pipeline::new(&db, &settings).run(input.as_bytes()).await.unwrap();

        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.lines_added, 2);
        assert_eq!(stats.lines_too_old, 1);
        assert_eq!(stats.merge.unwrap().merged, 2);
        assert_eq!(db.facts(1, None).await.len(), 3);
        assert!(db.staged_rows(1).await.is_empty());

        let bucket = watermark - watermark % 3600;
        assert_eq!(
            domain_totals(&db).await,
            vec![
                ("example.com".to_string(), bucket, 150),
                ("old.net".to_string(), bucket, 1000),
            ]
        );
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let db = Database::in_memory().await;
        let input = [
            line(DAY, "alice", 10, "http://a.com/"),
            "\n".to_string(),
            "garbage line\n".to_string(),
            line(DAY + 1, "alice", 20, "http://a.com/"),
        ]
        .concat();

        let settings = settings(1);
        let stats = Pipeline::new(&db, &settings).run(input.as_bytes()).await.unwrap();

        assert_eq!(stats.lines_read, 4);
        assert_eq!(stats.lines_malformed, 2);
        assert_eq!(stats.lines_added, 2);
        assert_eq!(domain_totals(&db).await, vec![("a.com".to_string(), DAY, 30)]);
    }

    #[tokio::test]
    async fn rerun_on_the_same_file_changes_nothing() {
        let db = Database::in_memory().await;
        let input = [
            line(DAY + 10, "alice", 100, "http://www.example.com/a"),
            line(DAY + 3700, "bob", 50, "http://example.com/b"),
        ]
        .concat();
        let settings = settings(1);
        let pipeline = Pipeline::new(&db, &settings);

        pipeline.run(input.as_bytes()).await.unwrap();
        let first = domain_totals(&db).await;
        let again = pipeline.run(input.as_bytes()).await.unwrap();

        assert_eq!(again.lines_added, 0);
        assert_eq!(again.lines_too_old, 2);
        assert_eq!(db.facts(1, None).await.len(), 2);
        assert_eq!(domain_totals(&db).await, first);
        assert_eq!(first.len(), 2);

        let runs: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM scsq_logtable")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(runs.0, 2);
    }

    #[tokio::test]
    async fn leftover_staging_is_purged_before_ingest() {
        let db = Database::in_memory().await;
        db.insert_staging_batch(&[testing::staged(DAY as f64, "stale")])
            .await
            .unwrap();

        let input = line(DAY + 5, "alice", 10, "http://a.com/");
        let settings = settings(10);
        Pipeline::new(&db, &settings).run(input.as_bytes()).await.unwrap();

        let facts = db.facts(1, None).await;
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].date, (DAY + 5) as f64);
    }

    #[tokio::test]
    async fn failed_dimension_defers_the_whole_merge() {
        let db = Database::in_memory().await;
        let settings = settings(10);
        let first = line(DAY, "alice", 10, "http://a.com/");
        Pipeline::new(&db, &settings).run(first.as_bytes()).await.unwrap();

        let input = [
            first.clone(),
            line_from("10.0.0.2", DAY + 1, "alice", 500, "http://a.com/"),
            line(DAY + 2, "alice", 20, "http://a.com/"),
        ]
        .concat();

        let failing = FailingStore::with_db(db.clone()).fail_dimension(DimensionKind::IpAddress);
        let stats = Pipeline::new(&failing, &settings).run(input.as_bytes()).await.unwrap();
        assert_eq!(stats.lines_added, 2);
        assert_eq!(stats.merge, None);
        assert_eq!(db.facts(1, None).await.len(), 1);

        let stats = Pipeline::new(&db, &settings).run(input.as_bytes()).await.unwrap();
        assert_eq!(stats.lines_added, 2);
        assert_eq!(stats.lines_too_old, 1);
        let dates: Vec<f64> = db.facts(1, None).await.iter().map(|f| f.date).collect();
        assert_eq!(dates, vec![DAY as f64, (DAY + 1) as f64, (DAY + 2) as f64]);
        assert_eq!(domain_totals(&db).await, vec![("a.com".to_string(), DAY, 530)]);
    }

    #[tokio::test]
    async fn abort_policy_ends_the_run_and_still_logs_it() {
        let store = FailingStore::with_db(Database::in_memory().await).fail_staging_batch(1);
        let input = [
            line(DAY, "alice", 10, "http://a.com/"),
            line(DAY + 1, "alice", 10, "http://a.com/"),
            line(DAY + 2, "alice", 10, "http://a.com/"),
        ]
        .concat();
        let settings = IngestConfig {
            on_batch_error: BatchFailurePolicy::Abort,
            ..settings(1)
        };

        let err = Pipeline::new(&store, &settings)
            .run(input.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::BatchWrite { lines_read: 2, .. }));

        // Nothing past the staging stage ran
        assert!(store.db().facts(1, None).await.is_empty());
        let message: (String,) = sqlx::query_as("SELECT message FROM scsq_logtable")
            .fetch_one(store.db().pool())
            .await
            .unwrap();
        assert_eq!(message.0, "2 read, 1 added");
    }

    #[tokio::test]
    async fn skip_policy_drops_the_batch_and_finishes() {
        let store = FailingStore::with_db(Database::in_memory().await).fail_staging_batch(0);
        let input = [
            line(DAY, "alice", 10, "http://a.com/"),
            line(DAY + 1, "alice", 20, "http://a.com/"),
        ]
        .concat();
        let settings = settings(1);

        let stats = Pipeline::new(&store, &settings).run(input.as_bytes()).await.unwrap();
        assert_eq!(stats.lines_added, 1);
        assert_eq!(stats.staging.batches_dropped, 1);
        let facts = store.db().facts(1, None).await;
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].size_in_bytes, 20);
    }
}

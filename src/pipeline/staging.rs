//! Batched writes into the staging table
//!
//! Accepted records are buffered and flushed to the database in batches, one
//! bulk insert per batch.

use tracing::{debug, error};

use crate::config::BatchFailurePolicy;
use crate::db::WarehouseStore;
use crate::error::PipelineError;
use crate::model::StagingRecord;

/// Counters kept by the loader across flushes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingSummary {
    pub records_staged: u64,
    pub batches_written: u64,
    pub batches_dropped: u64,
    pub records_dropped: u64,
}

pub struct StagingLoader<'a> {
    store: &'a dyn WarehouseStore,
    batch_size: usize,
    policy: BatchFailurePolicy,
    buffer: Vec<StagingRecord>,
    summary: StagingSummary,
}

impl<'a> StagingLoader<'a> {
    pub fn new(store: &'a dyn WarehouseStore, batch_size: usize, policy: BatchFailurePolicy) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            policy,
            buffer: Vec::with_capacity(batch_size),
            summary: StagingSummary::default(),
        }
    }

    /// Buffers a record, flushing once the batch is full.
    ///
    /// `lines_read` is only used for failure context.
    pub async fn push(&mut self, record: StagingRecord, lines_read: u64) -> Result<(), PipelineError> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush_batch(lines_read).await?;
        }
        Ok(())
    }

    /// Flushes what is left and returns the counters.
    pub async fn finish(&mut self, lines_read: u64) -> Result<StagingSummary, PipelineError> {
        if !self.buffer.is_empty() {
            self.flush_batch(lines_read).await?;
        }
        Ok(self.summary)
    }

    pub fn summary(&self) -> StagingSummary {
        self.summary
    }

    async fn flush_batch(&mut self, lines_read: u64) -> Result<(), PipelineError> {
        let count = self.buffer.len();
        debug!("Flushing {} records to staging", count);

        match self.store.insert_staging_batch(&self.buffer).await {
            Ok(_) => {
                self.summary.records_staged += count as u64;
                self.summary.batches_written += 1;
                debug!(
                    lines_read,
                    lines_added = self.summary.records_staged,
                    "Staging batch written"
                );
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                self.summary.batches_dropped += 1;
                self.summary.records_dropped += count as u64;
                error!(
                    error = %e,
                    records = count,
                    first_record = ?self.buffer.first(),
                    lines_read,
                    lines_added = self.summary.records_staged,
                    policy = self.policy.as_str(),
                    "Failed to write staging batch"
                );
                // The batch is gone either way, there is no retry
                self.buffer.clear();
                match self.policy {
                    BatchFailurePolicy::Skip => Ok(()),
                    BatchFailurePolicy::Abort => Err(PipelineError::BatchWrite {
                        records: count,
                        lines_read,
                        source: e,
                    }),
                }
            }
        }
    }
}

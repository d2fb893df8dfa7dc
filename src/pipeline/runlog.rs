//! Audit trail, one row per run

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::db::WarehouseStore;
use crate::model::RunLogRecord;

pub struct RunLogRecorder<'a> {
    store: &'a dyn WarehouseStore,
}

impl<'a> RunLogRecorder<'a> {
    pub fn new(store: &'a dyn WarehouseStore) -> Self {
        Self { store }
    }

    /// Appends the run's record. A failed write is logged; the run's outcome stands.
    pub async fn record(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        lines_read: u64,
        lines_added: u64,
    ) -> RunLogRecord {
        let record = RunLogRecord::new(start_time, end_time, lines_read, lines_added);
        match self.store.append_run_log(&record).await {
            Ok(()) => info!(message = %record.message, "Run logged"),
            Err(e) => error!(error = %e, message = %record.message, "Failed to write run log"),
        }
        record
    }
}

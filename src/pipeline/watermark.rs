//! Per-proxy high-water marks derived from the fact and rollup tables

use tracing::{debug, warn};

use crate::db::WarehouseStore;
use crate::model::ProxyId;

const SECONDS_PER_HOUR: i64 = 3600;
const SECONDS_PER_DAY: i64 = 86_400;

/// Start of the UTC hour containing `date`.
pub fn hour_bucket(date: f64) -> i64 {
    (date.floor() as i64).div_euclid(SECONDS_PER_HOUR) * SECONDS_PER_HOUR
}

/// Start of the UTC day containing `ts`.
pub fn day_start(ts: i64) -> i64 {
    ts.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Watermark {
    /// Newest fact date already loaded
    pub last_ingested_date: Option<f64>,
    /// Day from which rollups are rebuilt
    pub last_rollup_day: Option<i64>,
}

impl Watermark {
    /// Only lines strictly newer than the last loaded date are staged.
    pub fn accepts(&self, date: f64) -> bool {
        self.last_ingested_date.map_or(true, |last| date > last)
    }
}

pub struct WatermarkTracker<'a> {
    store: &'a dyn WarehouseStore,
}

impl<'a> WatermarkTracker<'a> {
    pub fn new(store: &'a dyn WarehouseStore) -> Self {
        Self { store }
    }

    /// A failed read counts as "nothing loaded yet".
    pub async fn read_last_ingested_date(&self, proxy: ProxyId) -> Option<f64> {
        match self.store.read_max_fact_date(proxy).await {
            Ok(date) => date,
            Err(e) => {
                warn!(proxy, error = %e, "Cannot read last ingested date, loading the whole file");
                None
            }
        }
    }

    /// Start of the day holding the newest rollup bucket.
    pub async fn read_last_rollup_day(&self, proxy: ProxyId) -> Option<i64> {
        match self.store.read_max_rollup_bucket(proxy).await {
            Ok(bucket) => bucket.map(day_start),
            Err(e) => {
                warn!(proxy, error = %e, "Cannot read last rollup day, rebuilding all rollups");
                None
            }
        }
    }

    pub async fn read(&self, proxy: ProxyId) -> Watermark {
        let watermark = Watermark {
            last_ingested_date: self.read_last_ingested_date(proxy).await,
            last_rollup_day: self.read_last_rollup_day(proxy).await,
        };
        debug!(
            proxy,
            last_ingested_date = ?watermark.last_ingested_date,
            last_rollup_day = ?watermark.last_rollup_day,
            "Watermark read"
        );
        watermark
    }
}

//! Hourly traffic rollups
//!
//! Two groupings, both filled in one walk over the fact rows:
//! - detailed: per normalized site, hour, login, ip address and status
//! - domain total: per normalized site and hour
//!
//! Rows inside the recompute window must be purged beforehand, otherwise a rerun
//! counts the same traffic twice.

use std::collections::BTreeMap;

use tracing::info;

use super::watermark::hour_bucket;
use crate::db::WarehouseStore;
use crate::domain::normalize_site;
use crate::error::StoreResult;
use crate::model::{FactRecord, Partition, ProxyId, RollupRecord, ROLLUP_SENTINEL_ID};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DetailKey {
    site: String,
    bucket: i64,
    login_id: i64,
    ipaddress_id: i64,
    httpstatus_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DomainKey {
    site: String,
    bucket: i64,
}

/// Running sums for both passes, fed one fact at a time.
///
/// Sums saturate at `i64::MAX` instead of wrapping.
#[derive(Debug, Default)]
pub struct RollupGroups {
    detailed: BTreeMap<DetailKey, i64>,
    domain_totals: BTreeMap<DomainKey, i64>,
}

impl RollupGroups {
    pub fn add(&mut self, fact: &FactRecord) {
        let site = normalize_site(&fact.site);
        let bucket = hour_bucket(fact.date);

        let detail = DetailKey {
            site: site.clone(),
            bucket,
            login_id: fact.login_id,
            ipaddress_id: fact.ipaddress_id,
            httpstatus_id: fact.httpstatus_id,
        };
        let sum = self.detailed.entry(detail).or_default();
        *sum = sum.saturating_add(fact.size_in_bytes);

        let total = self.domain_totals.entry(DomainKey { site, bucket }).or_default();
        *total = total.saturating_add(fact.size_in_bytes);
    }

    /// Detailed rows first, then domain totals, each in key order.
    pub fn into_records(self, proxy: ProxyId) -> Vec<RollupRecord> {
        let detailed = self.detailed.into_iter().map(|(key, size)| RollupRecord {
            date_bucket: key.bucket,
            login_id: key.login_id,
            ipaddress_id: key.ipaddress_id,
            size_in_bytes: size,
            site: key.site,
            httpstatus_id: Some(key.httpstatus_id),
            partition: Partition::Detailed,
            proxy_id: proxy,
        });
        let totals = self.domain_totals.into_iter().map(|(key, size)| RollupRecord {
            date_bucket: key.bucket,
            login_id: ROLLUP_SENTINEL_ID,
            ipaddress_id: ROLLUP_SENTINEL_ID,
            size_in_bytes: size,
            site: key.site,
            httpstatus_id: None,
            partition: Partition::DomainTotal,
            proxy_id: proxy,
        });
        detailed.chain(totals).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupSummary {
    pub facts: u64,
    pub detailed: u64,
    pub domain_totals: u64,
}

pub struct RollupAggregator<'a> {
    store: &'a dyn WarehouseStore,
    page_size: usize,
}

impl<'a> RollupAggregator<'a> {
    pub fn new(store: &'a dyn WarehouseStore, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Rebuilds rollups from the facts dated at or after `from_day`, all facts when `None`.
    ///
    /// Facts are read a page at a time; only the group sums are held in memory.
    pub async fn run(&self, proxy: ProxyId, from_day: Option<i64>) -> StoreResult<RollupSummary> {
        let from = from_day.map(|day| day as f64);
        let mut groups = RollupGroups::default();
        let mut summary = RollupSummary::default();
        let mut after_id = 0;

        loop {
            let page = self
                .store
                .read_facts_from(proxy, from, after_id, self.page_size)
                .await?;
            let Some((last_id, _)) = page.last() else {
                break;
            };
            after_id = *last_id;
            summary.facts += page.len() as u64;
            for (_, fact) in &page {
                groups.add(fact);
            }
        }

        summary.detailed = groups.detailed.len() as u64;
        summary.domain_totals = groups.domain_totals.len() as u64;
        let records = groups.into_records(proxy);
        self.store.insert_rollup_batch(&records).await?;

        info!(
            proxy,
            from_day = ?from_day,
            facts = summary.facts,
            detailed = summary.detailed,
            domain_totals = summary.domain_totals,
            "Rollups rebuilt"
        );
        Ok(summary)
    }
}

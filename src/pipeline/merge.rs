//! Staging to fact table merge
//!
//! Staging is walked in id order one page at a time; each page is resolved and
//! appended to the fact table in its own transaction. The proxy's staging rows are
//! deleted once every page is in. Pages follow log order, so a failure part way
//! leaves the committed facts older than every line still waiting: the watermark
//! stops below them and the next run reads them again after its preparation purge.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::db::WarehouseStore;
use crate::error::StoreResult;
use crate::model::{DimensionKind, FactRecord, ProxyId, StagingRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub staged: u64,
    pub merged: u64,
    /// Rows dropped because a dimension key was missing
    pub unresolved: u64,
    pub purged: u64,
}

/// Surrogate keys by dimension, then by name.
struct KeyMaps(HashMap<DimensionKind, HashMap<String, i64>>);

impl KeyMaps {
    fn key(&self, kind: DimensionKind, record: &StagingRecord) -> Option<i64> {
        self.0.get(&kind)?.get(kind.staged_value(record)).copied()
    }

    fn fact(&self, record: &StagingRecord) -> Option<FactRecord> {
        Some(FactRecord {
            date: record.date,
            ipaddress_id: self.key(DimensionKind::IpAddress, record)?,
            login_id: self.key(DimensionKind::Login, record)?,
            httpstatus_id: self.key(DimensionKind::HttpStatus, record)?,
            size_in_bytes: record.size_in_bytes,
            site: record.site.clone(),
            method: record.method.clone(),
            mime: record.mime.clone(),
            proxy_id: record.proxy_id,
        })
    }
}

pub struct FactMerger<'a> {
    store: &'a dyn WarehouseStore,
    page_size: usize,
}

impl<'a> FactMerger<'a> {
    pub fn new(store: &'a dyn WarehouseStore, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Moves the proxy's staged rows into the fact table.
    ///
    /// Staging is only purged once every page is committed; on error the staged
    /// rows stay where they are.
    pub async fn merge(&self, proxy: ProxyId) -> StoreResult<MergeSummary> {
        let mut summary = MergeSummary::default();
        let mut first_unresolved: Option<StagingRecord> = None;
        let mut after_id = 0;

        loop {
            let page = self
                .store
                .read_staging_rows(proxy, after_id, self.page_size)
                .await?;
            let Some((last_id, _)) = page.last() else {
                break;
            };
            after_id = *last_id;
            summary.staged += page.len() as u64;

            let rows: Vec<StagingRecord> = page.into_iter().map(|(_, row)| row).collect();
            let keys = self.load_keys(&rows).await?;

            let mut facts = Vec::with_capacity(rows.len());
            for row in rows {
                match keys.fact(&row) {
                    Some(fact) => facts.push(fact),
                    None => {
                        summary.unresolved += 1;
                        if first_unresolved.is_none() {
                            first_unresolved = Some(row);
                        }
                    }
                }
            }

            summary.merged += self.store.insert_fact_batch(&facts).await?;
            debug!(proxy, after_id, merged = summary.merged, "Fact page committed");
        }

        if let Some(row) = first_unresolved {
            warn!(
                proxy,
                unresolved = summary.unresolved,
                example = ?row,
                "Staged rows without dimension keys are not merged"
            );
        }
        if summary.staged == 0 {
            return Ok(summary);
        }

        summary.purged = self.store.delete_staging_rows(proxy).await?;

        info!(
            proxy,
            merged = summary.merged,
            purged = summary.purged,
            "Staging merged into facts"
        );
        Ok(summary)
    }

    async fn load_keys(&self, rows: &[StagingRecord]) -> StoreResult<KeyMaps> {
        let mut maps = HashMap::new();
        for kind in DimensionKind::ALL {
            let names: Vec<String> = rows
                .iter()
                .map(|r| kind.staged_value(r).to_string())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let ids = self.store.read_dimension_ids(kind, &names).await?;
            maps.insert(kind, ids);
        }
        Ok(KeyMaps(maps))
    }
}

//! Surrogate keys for newly seen ip addresses, logins and statuses

use std::collections::BTreeSet;

use tracing::{error, info};

use crate::db::WarehouseStore;
use crate::error::StoreResult;
use crate::model::{DimensionKind, ProxyId};

/// New rows per dimension; `None` where that dimension failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimensionSummary {
    pub inserted: Vec<(DimensionKind, Option<u64>)>,
}

impl DimensionSummary {
    pub fn failed(&self) -> impl Iterator<Item = DimensionKind> + '_ {
        self.inserted
            .iter()
            .filter(|(_, n)| n.is_none())
            .map(|(kind, _)| *kind)
    }
}

pub struct DimensionResolver<'a> {
    store: &'a dyn WarehouseStore,
}

impl<'a> DimensionResolver<'a> {
    pub fn new(store: &'a dyn WarehouseStore) -> Self {
        Self { store }
    }

    /// Inserts every staged value of the proxy that has no dimension row yet.
    ///
    /// Dimensions are independent: a failure on one is logged and the others still
    /// run.
    pub async fn resolve(&self, proxy: ProxyId) -> DimensionSummary {
        let mut summary = DimensionSummary::default();
        for kind in DimensionKind::ALL {
            let inserted = match self.resolve_kind(kind, proxy).await {
                Ok(n) => {
                    info!(dimension = %kind, inserted = n, "Dimension filled");
                    Some(n)
                }
                Err(e) => {
                    error!(dimension = %kind, error = %e, "Failed to fill dimension");
                    None
                }
            };
            summary.inserted.push((kind, inserted));
        }
        summary
    }

    /// Staged distinct values minus existing names, inserted in sorted order.
    pub async fn resolve_kind(&self, kind: DimensionKind, proxy: ProxyId) -> StoreResult<u64> {
        let staged = self.store.read_staged_distinct(kind, proxy).await?;
        if staged.is_empty() {
            return Ok(0);
        }

        let existing = self.store.read_dimension_ids(kind, &staged).await?;
        let missing: Vec<String> = staged
            .into_iter()
            .filter(|name| !existing.contains_key(name))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.store.insert_dimension_names(kind, &missing).await
    }
}

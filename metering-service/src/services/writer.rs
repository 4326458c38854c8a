//! Batched writes into the usage store.

use crate::models::FeatureUsage;
use crate::services::error::UsageError;
use crate::services::metrics::{record_batch_failure, record_rows_appended};
use crate::services::store::FeatureUsageStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Splits writes into fixed-size chunks, one store append per chunk.
///
/// A failing chunk is rejected as a whole. Chunks already flushed stay
/// stored; the error names the failed chunk so the caller can reconcile.
#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn FeatureUsageStore>,
    batch_size: usize,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn FeatureUsageStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Append a single row. Sign 0 is stored as +1.
    #[instrument(skip(self, row), fields(tenant_id = %row.tenant_id, unique_hash = %row.unique_hash))]
    pub async fn insert_feature_usage(&self, row: FeatureUsage) -> Result<(), UsageError> {
        let tenant_id = row.tenant_id.clone();
        self.store.append(vec![row]).await?;
        record_rows_appended(&tenant_id, 1);
        Ok(())
    }

    /// Append rows in chunks of `batch_size`, returning the number stored.
    #[instrument(skip(self, rows), fields(rows = rows.len(), batch_size = self.batch_size))]
    pub async fn bulk_insert_feature_usage(
        &self,
        rows: Vec<FeatureUsage>,
    ) -> Result<usize, UsageError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut flushed_rows = 0;
        let mut rows = rows.into_iter().peekable();
        let mut batch_index = 0;

        while rows.peek().is_some() {
            let chunk: Vec<FeatureUsage> = rows.by_ref().take(self.batch_size).collect();
            let per_tenant = count_by_tenant(&chunk);

            match self.store.append(chunk).await {
                Ok(count) => {
                    for (tenant_id, n) in &per_tenant {
                        record_rows_appended(tenant_id, *n);
                    }
                    flushed_rows += count;
                }
                Err(e) => {
                    for tenant_id in per_tenant.keys() {
                        record_batch_failure(tenant_id);
                    }
                    warn!(batch_index, flushed_rows, error = %e, "Feature usage batch rejected");
                    return Err(UsageError::BatchFailed {
                        batch_index,
                        flushed_rows,
                        source: anyhow::Error::new(e),
                    });
                }
            }
            batch_index += 1;
        }

        info!(flushed_rows, batches = batch_index, "Feature usage bulk insert complete");
        Ok(flushed_rows)
    }
}

fn count_by_tenant(rows: &[FeatureUsage]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(row.tenant_id.clone()).or_insert(0) += 1;
    }
    counts
}

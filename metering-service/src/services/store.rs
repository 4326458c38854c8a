//! Append-only feature usage storage.

use crate::models::{DedupKey, FeatureUsage, UsageScope};
use crate::services::error::UsageError;
use crate::services::metrics::QUERY_DURATION;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Append-only store of `FeatureUsage` rows.
///
/// Rows are never updated or deleted. `scan` returns rows in insertion
/// order, which the dedup collapse uses as its final tie-break.
#[async_trait]
pub trait FeatureUsageStore: Send + Sync {
    /// Append a chunk atomically: either every row is stored or none is.
    async fn append(&self, rows: Vec<FeatureUsage>) -> Result<usize, UsageError>;

    /// All raw rows (every version) inside the scope.
    async fn scan(&self, scope: &UsageScope) -> Result<Vec<FeatureUsage>, UsageError>;

    /// Whether any version of the logical fact has been stored.
    async fn contains(&self, key: &DedupKey) -> Result<bool, UsageError>;
}

/// Process-local store backed by a vector.
#[derive(Default)]
pub struct InMemoryFeatureUsageStore {
    rows: RwLock<Vec<FeatureUsage>>,
}

impl InMemoryFeatureUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl FeatureUsageStore for InMemoryFeatureUsageStore {
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn append(&self, mut rows: Vec<FeatureUsage>) -> Result<usize, UsageError> {
        let timer = QUERY_DURATION.with_label_values(&["append"]).start_timer();

        for row in rows.iter_mut() {
            row.normalize_sign();
            row.check_required().map_err(UsageError::Validation)?;
        }

        let count = rows.len();
        self.rows.write().await.extend(rows);

        timer.observe_duration();
        debug!(count, "Appended feature usage rows");
        Ok(count)
    }

    #[instrument(skip(self, scope), fields(tenant_id = %scope.tenant_id))]
    async fn scan(&self, scope: &UsageScope) -> Result<Vec<FeatureUsage>, UsageError> {
        let timer = QUERY_DURATION.with_label_values(&["scan"]).start_timer();

        let rows: Vec<FeatureUsage> = self
            .rows
            .read()
            .await
            .iter()
            .filter(|row| scope.matches(row))
            .cloned()
            .collect();

        timer.observe_duration();
        debug!(matched = rows.len(), "Scanned feature usage");
        Ok(rows)
    }

    async fn contains(&self, key: &DedupKey) -> Result<bool, UsageError> {
        let timer = QUERY_DURATION.with_label_values(&["contains"]).start_timer();
        let found = self
            .rows
            .read()
            .await
            .iter()
            .any(|row| row.dedup_key() == *key);
        timer.observe_duration();
        Ok(found)
    }
}

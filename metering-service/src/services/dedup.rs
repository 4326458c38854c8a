//! Version collapse and dedup hashing.
//!
//! The store keeps every version of a logical usage fact. Reads collapse
//! each `DedupKey` to its latest version before any aggregation, and that
//! row contributes `qty_total * sign`.

use crate::models::{AggregationType, DedupKey, Event, FeatureUsage};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hash identifying one logical usage fact for a meter.
///
/// `event_name:event_id` normally. COUNT_UNIQUE meters hash
/// `event_name:field:value` instead, so repeated values collapse into one
/// fact; events without the field fall back to the id form.
pub fn generate_unique_hash(
    event: &Event,
    aggregation_type: AggregationType,
    field: Option<&str>,
) -> String {
    let mut input = format!("{}:{}", event.event_name, event.id);

    if aggregation_type == AggregationType::CountUnique {
        if let Some(field) = field.filter(|f| !f.is_empty()) {
            if let Some(value) = event.properties.get_string(field) {
                input = format!("{}:{}:{}", event.event_name, field, value);
            }
        }
    }

    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Keep only the latest version of each logical fact.
///
/// Latest means highest `version`, then latest `timestamp`, then the row
/// stored last. Retractions are kept; their signed quantity is negative.
/// Output is ordered by `DedupKey`.
pub fn collapse_latest(rows: Vec<FeatureUsage>) -> Vec<FeatureUsage> {
    let mut latest: BTreeMap<DedupKey, FeatureUsage> = BTreeMap::new();

    for row in rows {
        let key = row.dedup_key();
        match latest.get(&key) {
            Some(current) if (current.version, current.timestamp) > (row.version, row.timestamp) => {}
            _ => {
                latest.insert(key, row);
            }
        }
    }

    latest.into_values().collect()
}

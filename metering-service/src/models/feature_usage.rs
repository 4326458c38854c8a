//! Billing-attributed usage rows.

use super::event::Event;
use super::properties::Properties;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An `Event` projected onto one subscription line item.
///
/// Rows are append-only. A correction is a new row with the same
/// `unique_hash` and a higher `version`; `sign = -1` marks a retraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureUsage {
    pub id: String,
    pub tenant_id: String,
    pub environment_id: String,
    #[serde(default)]
    pub external_customer_id: String,
    #[serde(default)]
    pub customer_id: String,
    pub event_name: String,
    #[serde(default)]
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub ingested_at: DateTime<Utc>,
    #[serde(default)]
    pub properties: Properties,
    pub subscription_id: String,
    pub sub_line_item_id: String,
    #[serde(default)]
    pub price_id: String,
    pub meter_id: String,
    pub feature_id: String,
    pub period_id: u64,
    pub unique_hash: String,
    pub qty_total: Decimal,
    #[serde(default = "default_sign")]
    pub sign: i8,
    #[serde(default = "default_version")]
    pub version: u64,
}

fn default_sign() -> i8 {
    1
}

fn default_version() -> u64 {
    1
}

/// Line-item attribution resolved by the ingestion collaborator.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    pub subscription_id: String,
    pub sub_line_item_id: String,
    pub price_id: String,
    pub meter_id: String,
    pub feature_id: String,
    pub period_id: u64,
}

/// Identity of one logical usage fact; later versions supersede earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub tenant_id: String,
    pub environment_id: String,
    pub subscription_id: String,
    pub meter_id: String,
    pub period_id: u64,
    pub unique_hash: String,
}

impl FeatureUsage {
    /// Project a validated event onto a line item.
    ///
    /// The quantity is read from `quantity_field` when given; events without
    /// a numeric value there contribute zero. Without a field every event
    /// counts as one unit.
    pub fn from_event(
        event: &Event,
        attribution: &Attribution,
        quantity_field: Option<&str>,
        unique_hash: String,
    ) -> Self {
        let qty_total = match quantity_field {
            Some(field) if !field.is_empty() => {
                event.properties.get_decimal(field).unwrap_or(Decimal::ZERO)
            }
            _ => Decimal::ONE,
        };

        Self {
            id: event.id.clone(),
            tenant_id: event.tenant_id.clone(),
            environment_id: event.environment_id.clone(),
            external_customer_id: event.external_customer_id.clone(),
            customer_id: event.customer_id.clone(),
            event_name: event.event_name.clone(),
            source: event.source.clone(),
            timestamp: event.timestamp,
            ingested_at: Utc::now(),
            properties: event.properties.clone(),
            subscription_id: attribution.subscription_id.clone(),
            sub_line_item_id: attribution.sub_line_item_id.clone(),
            price_id: attribution.price_id.clone(),
            meter_id: attribution.meter_id.clone(),
            feature_id: attribution.feature_id.clone(),
            period_id: attribution.period_id,
            unique_hash,
            qty_total,
            sign: 1,
            version: 1,
        }
    }

    /// Build the correction row that supersedes this one.
    pub fn next_version(&self, qty_total: Decimal, sign: i8) -> Self {
        let mut next = self.clone();
        next.qty_total = qty_total;
        next.sign = sign;
        next.version = self.version + 1;
        next.ingested_at = Utc::now();
        next
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            tenant_id: self.tenant_id.clone(),
            environment_id: self.environment_id.clone(),
            subscription_id: self.subscription_id.clone(),
            meter_id: self.meter_id.clone(),
            period_id: self.period_id,
            unique_hash: self.unique_hash.clone(),
        }
    }

    /// `qty_total * sign`.
    pub fn signed_qty(&self) -> Decimal {
        if self.sign < 0 {
            -self.qty_total
        } else {
            self.qty_total
        }
    }

    /// Sign 0 means "unset" and is stored as +1.
    pub fn normalize_sign(&mut self) {
        if self.sign == 0 {
            self.sign = 1;
        }
    }

    /// Check the fields the store requires before a row is appended.
    pub fn check_required(&self) -> Result<(), String> {
        let required = [
            ("id", &self.id),
            ("tenant_id", &self.tenant_id),
            ("environment_id", &self.environment_id),
            ("event_name", &self.event_name),
            ("subscription_id", &self.subscription_id),
            ("meter_id", &self.meter_id),
            ("feature_id", &self.feature_id),
            ("unique_hash", &self.unique_hash),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(format!("{} is required (row {:?})", name, self.id));
            }
        }
        if !matches!(self.sign, -1 | 1) {
            return Err(format!("sign must be +1 or -1, got {}", self.sign));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attribution() -> Attribution {
        Attribution {
            subscription_id: "sub_1".to_string(),
            sub_line_item_id: "li_1".to_string(),
            price_id: "price_1".to_string(),
            meter_id: "meter_1".to_string(),
            feature_id: "feat_1".to_string(),
            period_id: 202403,
        }
    }

    #[test]
    fn projection_reads_quantity_field() {
        let event = Event::new("t1", "env", "cus_1", "tokens")
            .with_properties(Properties::new().with("output_tokens", 128i64));
        let row = FeatureUsage::from_event(&event, &attribution(), Some("output_tokens"), "h".into());
        assert_eq!(row.qty_total, Decimal::from(128));
        assert_eq!(row.sign, 1);
        assert_eq!(row.version, 1);
        assert_eq!(row.sub_line_item_id, "li_1");
    }

    #[test]
    fn projection_without_field_counts_one() {
        let event = Event::new("t1", "env", "cus_1", "api_call");
        let row = FeatureUsage::from_event(&event, &attribution(), None, "h".into());
        assert_eq!(row.qty_total, Decimal::ONE);
    }

    #[test]
    fn next_version_bumps_version_and_keeps_identity() {
        let event = Event::new("t1", "env", "cus_1", "api_call");
        let row = FeatureUsage::from_event(&event, &attribution(), None, "h".into());
        let retraction = row.next_version(Decimal::ONE, -1);
        assert_eq!(retraction.version, 2);
        assert_eq!(retraction.dedup_key(), row.dedup_key());
        assert_eq!(retraction.signed_qty(), Decimal::NEGATIVE_ONE);
    }

    #[test]
    fn required_fields_and_sign_are_checked() {
        let event = Event::new("t1", "env", "cus_1", "api_call");
        let mut row = FeatureUsage::from_event(&event, &attribution(), None, String::new());
        assert!(row.check_required().unwrap_err().contains("unique_hash"));

        row.unique_hash = "h".to_string();
        row.sign = 0;
        assert!(row.check_required().is_err());
        row.normalize_sign();
        assert!(row.check_required().is_ok());
    }
}

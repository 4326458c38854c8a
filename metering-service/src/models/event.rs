//! Raw usage event model.

use super::properties::Properties;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Raw ingested usage fact. Never updated once accepted, only superseded.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_customer_reference"))]
pub struct Event {
    /// Client-supplied or generated identifier, used for dedup.
    #[serde(default)]
    pub id: String,
    #[validate(length(min = 1, message = "tenant_id is required"))]
    pub tenant_id: String,
    #[validate(length(min = 1, message = "environment_id is required"))]
    pub environment_id: String,
    #[serde(default)]
    pub external_customer_id: String,
    #[serde(default)]
    pub customer_id: String,
    #[validate(length(min = 1, message = "event_name is required"))]
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub properties: Properties,
}

fn validate_customer_reference(event: &Event) -> Result<(), ValidationError> {
    if event.external_customer_id.is_empty() && event.customer_id.is_empty() {
        let mut err = ValidationError::new("customer_reference");
        err.message = Some("one of external_customer_id or customer_id is required".into());
        return Err(err);
    }
    Ok(())
}

impl Event {
    /// Create an event stamped now with a generated id.
    pub fn new(
        tenant_id: impl Into<String>,
        environment_id: impl Into<String>,
        external_customer_id: impl Into<String>,
        event_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            environment_id: environment_id.into(),
            external_customer_id: external_customer_id.into(),
            customer_id: String::new(),
            event_name: event_name.into(),
            timestamp: Utc::now(),
            source: String::new(),
            properties: Properties::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Validate required fields and assign an id when the client sent none.
    pub fn prepare(&mut self) -> Result<(), validator::ValidationErrors> {
        self.validate()?;
        if self.id.trim().is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_event_name_is_rejected() {
        let mut event = Event::new("t1", "env", "cus_1", "");
        let err = event.prepare().unwrap_err();
        assert!(err.field_errors().contains_key("event_name"));
    }

    #[test]
    fn a_customer_reference_is_required() {
        let mut event = Event::new("t1", "env", "", "api_call");
        assert!(event.prepare().is_err());

        event.customer_id = "cust_internal".to_string();
        assert!(event.prepare().is_ok());
    }

    #[test]
    fn empty_id_is_generated() {
        let mut event = Event::new("t1", "env", "cus_1", "api_call").with_id("");
        event.prepare().unwrap();
        assert!(Uuid::parse_str(&event.id).is_ok());
    }

    #[test]
    fn client_id_is_preserved() {
        let mut event = Event::new("t1", "env", "cus_1", "api_call").with_id("evt_42");
        event.prepare().unwrap();
        assert_eq!(event.id, "evt_42");
    }
}

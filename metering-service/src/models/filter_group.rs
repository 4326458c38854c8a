//! Prioritized filter groups and property predicates.

use super::properties::Properties;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Property name -> allowed values. Conjunction across properties,
/// disjunction within one property's list. An empty list constrains nothing.
pub type PropertyFilters = BTreeMap<String, Vec<String>>;

/// True when every constrained property holds one of its allowed values.
pub fn matches_property_filters(filters: &PropertyFilters, properties: &Properties) -> bool {
    filters
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .all(|(property, values)| properties.matches_any(property, values))
}

/// A group of filters attributing events to one price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    /// The price id in practice.
    pub id: String,
    /// Higher wins among groups of equal specificity.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub filters: PropertyFilters,
}

impl FilterGroup {
    pub fn new(id: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            priority,
            filters: PropertyFilters::new(),
        }
    }

    pub fn with_filter<I, S>(mut self, property: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters
            .insert(property.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Number of properties that actually constrain events.
    pub fn predicate_count(&self) -> usize {
        self.filters.values().filter(|v| !v.is_empty()).count()
    }

    /// A group with no constraints matches everything.
    pub fn is_catch_all(&self) -> bool {
        self.predicate_count() == 0
    }

    pub fn matches(&self, properties: &Properties) -> bool {
        matches_property_filters(&self.filters, properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conjunction_across_disjunction_within() {
        let group = FilterGroup::new("price_a", 1)
            .with_filter("model", ["gpt-4", "gpt-4o"])
            .with_filter("region", ["us"]);

        let hit = Properties::new().with("model", "gpt-4o").with("region", "us");
        let wrong_region = Properties::new().with("model", "gpt-4").with("region", "eu");
        assert!(group.matches(&hit));
        assert!(!group.matches(&wrong_region));
        assert_eq!(group.predicate_count(), 2);
    }

    #[test]
    fn empty_value_list_is_unconstrained() {
        let group = FilterGroup::new("default", 0).with_filter("model", Vec::<String>::new());
        assert!(group.is_catch_all());
        assert!(group.matches(&Properties::new()));
    }
}

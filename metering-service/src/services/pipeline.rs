//! Staged filter-group matching.
//!
//! Rows pass through three stages, each with typed input and output:
//!
//! 1. `BaseFilterStage` collapses rows to one row per logical fact and
//!    keeps the latest versions that fall inside the query scope.
//! 2. `GroupMatchStage` evaluates every filter group against every row once
//!    and records a match flag per group.
//! 3. `BestMatchStage` keeps, per row, the matched group with the highest
//!    `(predicate_count, priority, group_id)` rank and drops unmatched rows.

use crate::models::{FeatureUsage, FilterGroup, UsageScope};
use crate::services::dedup::collapse_latest;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// One step of the pipeline.
pub trait Stage {
    type Input;
    type Output;

    /// Stage name for logs.
    fn name(&self) -> &'static str;

    fn apply(&self, input: Self::Input) -> Self::Output;
}

/// Outcome of evaluating one group against one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMatch {
    pub group_id: String,
    pub predicate_count: usize,
    pub priority: i32,
    pub matched: bool,
}

impl GroupMatch {
    fn rank(&self, other: &Self) -> Ordering {
        (self.predicate_count, self.priority, &self.group_id).cmp(&(
            other.predicate_count,
            other.priority,
            &other.group_id,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct MatchedRow {
    pub row: FeatureUsage,
    pub matches: Vec<GroupMatch>,
}

#[derive(Debug, Clone)]
pub struct AssignedRow {
    pub row: FeatureUsage,
    pub group_id: String,
}

pub struct BaseFilterStage {
    scope: UsageScope,
}

impl BaseFilterStage {
    pub fn new(scope: UsageScope) -> Self {
        Self { scope }
    }
}

impl Stage for BaseFilterStage {
    type Input = Vec<FeatureUsage>;
    type Output = Vec<FeatureUsage>;

    fn name(&self) -> &'static str {
        "base_filter"
    }

    fn apply(&self, input: Self::Input) -> Self::Output {
        collapse_latest(input)
            .into_iter()
            .filter(|row| self.scope.matches(row))
            .collect()
    }
}

pub struct GroupMatchStage {
    groups: Vec<FilterGroup>,
}

impl GroupMatchStage {
    pub fn new(groups: Vec<FilterGroup>) -> Self {
        Self { groups }
    }
}

impl Stage for GroupMatchStage {
    type Input = Vec<FeatureUsage>;
    type Output = Vec<MatchedRow>;

    fn name(&self) -> &'static str {
        "group_match"
    }

    fn apply(&self, input: Self::Input) -> Self::Output {
        input
            .into_iter()
            .map(|row| {
                let matches = self
                    .groups
                    .iter()
                    .map(|group| GroupMatch {
                        group_id: group.id.clone(),
                        predicate_count: group.predicate_count(),
                        priority: group.priority,
                        matched: group.matches(&row.properties),
                    })
                    .collect();
                MatchedRow { row, matches }
            })
            .collect()
    }
}

pub struct BestMatchStage;

impl Stage for BestMatchStage {
    type Input = Vec<MatchedRow>;
    type Output = Vec<AssignedRow>;

    fn name(&self) -> &'static str {
        "best_match"
    }

    fn apply(&self, input: Self::Input) -> Self::Output {
        input
            .into_iter()
            .filter_map(|matched| {
                let best = matched
                    .matches
                    .iter()
                    .filter(|m| m.matched)
                    .max_by(|a, b| a.rank(b))?
                    .group_id
                    .clone();
                Some(AssignedRow {
                    row: matched.row,
                    group_id: best,
                })
            })
            .collect()
    }
}

/// The assembled three-stage matcher.
pub struct FilterGroupPipeline {
    base: BaseFilterStage,
    matcher: GroupMatchStage,
    reducer: BestMatchStage,
}

impl FilterGroupPipeline {
    pub fn builder(scope: UsageScope) -> FilterGroupPipelineBuilder {
        FilterGroupPipelineBuilder {
            scope,
            groups: Vec::new(),
        }
    }

    pub fn stage_names(&self) -> [&'static str; 3] {
        [self.base.name(), self.matcher.name(), self.reducer.name()]
    }

    /// Assign each row to its best group, keyed by group id.
    ///
    /// Groups that won no row are absent from the map.
    pub fn run(&self, rows: Vec<FeatureUsage>) -> BTreeMap<String, Vec<FeatureUsage>> {
        let scanned = rows.len();
        let in_scope = self.base.apply(rows);
        let facts = in_scope.len();
        let matched = self.matcher.apply(in_scope);
        let assigned = self.reducer.apply(matched);
        debug!(
            stages = ?self.stage_names(),
            scanned,
            facts,
            assigned = assigned.len(),
            "Filter group pipeline finished"
        );

        let mut by_group: BTreeMap<String, Vec<FeatureUsage>> = BTreeMap::new();
        for AssignedRow { row, group_id } in assigned {
            by_group.entry(group_id).or_default().push(row);
        }
        by_group
    }
}

pub struct FilterGroupPipelineBuilder {
    scope: UsageScope,
    groups: Vec<FilterGroup>,
}

impl FilterGroupPipelineBuilder {
    pub fn group(mut self, group: FilterGroup) -> Self {
        self.groups.push(group);
        self
    }

    pub fn groups(mut self, groups: impl IntoIterator<Item = FilterGroup>) -> Self {
        self.groups.extend(groups);
        self
    }

    pub fn build(self) -> FilterGroupPipeline {
        FilterGroupPipeline {
            base: BaseFilterStage::new(self.scope),
            matcher: GroupMatchStage::new(self.groups),
            reducer: BestMatchStage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attribution, Event, Properties};

    fn usage(hash: &str, properties: Properties) -> FeatureUsage {
        let event = Event::new("t1", "env", "cus_1", "tokens").with_properties(properties);
        let attribution = Attribution {
            subscription_id: "sub_1".into(),
            sub_line_item_id: "li_1".into(),
            price_id: "price_1".into(),
            meter_id: "meter_1".into(),
            feature_id: "feat_1".into(),
            period_id: 1,
        };
        FeatureUsage::from_event(&event, &attribution, None, hash.to_string())
    }

    fn scope() -> UsageScope {
        UsageScope {
            tenant_id: "t1".into(),
            environment_id: "env".into(),
            ..Default::default()
        }
    }

    fn groups() -> Vec<FilterGroup> {
        vec![
            FilterGroup::new("a", 2)
                .with_filter("model", ["gpt-4"])
                .with_filter("region", ["us"]),
            FilterGroup::new("b", 1),
            FilterGroup::new("c", 5).with_filter("model", ["gpt-4"]),
        ]
    }

    #[test]
    fn more_specific_group_beats_catch_all() {
        let row = usage("h1", Properties::new().with("model", "gpt-4").with("region", "us"));
        let pipeline = FilterGroupPipeline::builder(scope()).groups(groups()).build();
        let result = pipeline.run(vec![row]);
        assert_eq!(result.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn catch_all_takes_what_nothing_else_matches() {
        let row = usage("h1", Properties::new().with("model", "claude"));
        let pipeline = FilterGroupPipeline::builder(scope()).groups(groups()).build();
        let result = pipeline.run(vec![row]);
        assert_eq!(result.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn unmatched_rows_are_dropped() {
        let row = usage("h1", Properties::new().with("model", "claude"));
        let pipeline = FilterGroupPipeline::builder(scope())
            .group(FilterGroup::new("c", 5).with_filter("model", ["gpt-4"]))
            .build();
        assert!(pipeline.run(vec![row]).is_empty());
    }

    #[test]
    fn group_order_does_not_change_assignment() {
        let rows = vec![
            usage("h1", Properties::new().with("model", "gpt-4").with("region", "us")),
            usage("h2", Properties::new().with("model", "gpt-4").with("region", "eu")),
            usage("h3", Properties::new()),
        ];
        let forward = FilterGroupPipeline::builder(scope()).groups(groups()).build();
        let mut reversed_groups = groups();
        reversed_groups.reverse();
        let reversed = FilterGroupPipeline::builder(scope())
            .groups(reversed_groups)
            .build();

        let a = forward.run(rows.clone());
        let b = reversed.run(rows);
        let ids = |m: &BTreeMap<String, Vec<FeatureUsage>>| {
            m.iter()
                .map(|(k, v)| (k.clone(), v.iter().map(|r| r.unique_hash.clone()).collect::<Vec<_>>()))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a["c"][0].unique_hash, "h2");
    }

    #[test]
    fn identical_rank_ties_break_on_group_id() {
        let row = usage("h1", Properties::new().with("model", "gpt-4"));
        let pipeline = FilterGroupPipeline::builder(scope())
            .group(FilterGroup::new("y", 1).with_filter("model", ["gpt-4"]))
            .group(FilterGroup::new("x", 1).with_filter("model", ["gpt-4"]))
            .build();
        assert!(pipeline.run(vec![row]).contains_key("y"));
    }

    #[test]
    fn base_filter_sees_versions_outside_the_scope() {
        let v1 = usage("h1", Properties::new().with("model", "gpt-4"));
        let mut v2 = v1.next_version(v1.qty_total, 1);
        v2.properties = Properties::new().with("model", "claude");

        let scope = UsageScope {
            property_filters: [("model".to_string(), vec!["gpt-4".to_string()])]
                .into_iter()
                .collect(),
            ..scope()
        };
        assert!(BaseFilterStage::new(scope).apply(vec![v1, v2]).is_empty());
    }

    #[test]
    fn stages_are_named_in_order() {
        let pipeline = FilterGroupPipeline::builder(scope()).build();
        assert_eq!(pipeline.stage_names(), ["base_filter", "group_match", "best_match"]);
    }
}

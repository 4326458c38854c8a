//! Aggregation type and window size enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a meter reduces its events to a billable quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationType {
    Count,
    Sum,
    Avg,
    Max,
    CountUnique,
    Latest,
    SumWithMultiplier,
    WeightedSum,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Count => "COUNT",
            AggregationType::Sum => "SUM",
            AggregationType::Avg => "AVG",
            AggregationType::Max => "MAX",
            AggregationType::CountUnique => "COUNT_UNIQUE",
            AggregationType::Latest => "LATEST",
            AggregationType::SumWithMultiplier => "SUM_WITH_MULTIPLIER",
            AggregationType::WeightedSum => "WEIGHTED_SUM",
        }
    }

    /// Parse a stored aggregation type. Unlike window sizes there is no
    /// fallback: an unknown type is a caller error.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggregationType::Count),
            "SUM" => Some(AggregationType::Sum),
            "AVG" => Some(AggregationType::Avg),
            "MAX" => Some(AggregationType::Max),
            "COUNT_UNIQUE" => Some(AggregationType::CountUnique),
            "LATEST" => Some(AggregationType::Latest),
            "SUM_WITH_MULTIPLIER" => Some(AggregationType::SumWithMultiplier),
            "WEIGHTED_SUM" => Some(AggregationType::WeightedSum),
            _ => None,
        }
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Time granularity for buckets and reporting windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WindowSize {
    Minute,
    FifteenMinutes,
    ThirtyMinutes,
    Hour,
    ThreeHours,
    SixHours,
    TwelveHours,
    Day,
    Week,
    Month,
}

impl WindowSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowSize::Minute => "MINUTE",
            WindowSize::FifteenMinutes => "15MIN",
            WindowSize::ThirtyMinutes => "30MIN",
            WindowSize::Hour => "HOUR",
            WindowSize::ThreeHours => "3HOUR",
            WindowSize::SixHours => "6HOUR",
            WindowSize::TwelveHours => "12HOUR",
            WindowSize::Day => "DAY",
            WindowSize::Week => "WEEK",
            WindowSize::Month => "MONTH",
        }
    }

    /// Unknown granularities fall back to hourly.
    pub fn from_string(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "MINUTE" => WindowSize::Minute,
            "15MIN" => WindowSize::FifteenMinutes,
            "30MIN" => WindowSize::ThirtyMinutes,
            "3HOUR" => WindowSize::ThreeHours,
            "6HOUR" => WindowSize::SixHours,
            "12HOUR" => WindowSize::TwelveHours,
            "DAY" => WindowSize::Day,
            "WEEK" => WindowSize::Week,
            "MONTH" => WindowSize::Month,
            _ => WindowSize::Hour,
        }
    }
}

impl From<String> for WindowSize {
    fn from(value: String) -> Self {
        WindowSize::from_string(&value)
    }
}

impl From<WindowSize> for String {
    fn from(value: WindowSize) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

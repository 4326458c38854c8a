//! Metering Service - Usage metering and aggregation for metered billing.

pub mod config;
pub mod models;
pub mod services;
pub mod startup;

//! Aggregation strategies and the keyed aggregation buffer
//!
//! A strategy decides which records belong together (the aggregation key),
//! how a fresh accumulator looks, and how a record is merged into one. The
//! buffer owns the accumulators of one aggregating processor.

pub mod buffer;
pub mod strategy;

pub use buffer::{AggregationBuffer, FlushTrigger, FlushedAggregate, OfferOutcome};
pub use strategy::{aggregator_for, Aggregator, SqlStatementAggregator, TimerAggregator};

use serde::{Deserialize, Serialize};

/// Groups records destined for the same accumulator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregationKey {
    pub platform_ident: i64,
    pub sensor_type_ident: i64,
    pub method_ident: i64,
    /// Extra strategy-specific component, e.g. the SQL text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
}

impl AggregationKey {
    pub fn new(platform_ident: i64, sensor_type_ident: i64, method_ident: i64) -> Self {
        Self {
            platform_ident,
            sensor_type_ident,
            method_ident,
            discriminator: None,
        }
    }

    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }
}

//! Named execution metrics recorded by an algorithm invocation.
//!
//! A [`MetricsRecord`] is an ordered set of [`MetricsField`]s. Some fields
//! live in-process ([`NumberField`]); others are engine accumulators
//! ([`AccumulatorField`]) that parallel workers add into. Where the values
//! end up is decided by a [`MetricsSink`].

mod field;
mod record;
mod sink;

#[cfg(test)]
mod tests;

use thiserror::Error;

pub use field::{AccumulatorField, MetricsField, NumberField};
pub use record::{standard_record, MetricsRecord};
pub use sink::{JsonSink, MetricsSink, TracingSink};

/// Keys of the standard per-invocation record.
pub mod keys {
    pub const NUM_TILES: &str = "num_tiles";
    pub const PARTITIONS: &str = "partitions";
    pub const TILE_FETCH: &str = "tile_fetch";
    pub const CALCULATION: &str = "calculation";
    pub const ACTUAL_TIME: &str = "actual_time";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricsError {
    #[error("duplicate metrics key: {0}")]
    DuplicateKey(String),
}

//! The contract every analysis algorithm implements.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tilestat_core::{
    ComputeOptions, Config, ContentType, OptionsError, ParamSpec, TileError, DEFAULT_PARAMETERS,
};

use crate::engine::ExecutionEngine;
use crate::jobs::JobError;
use crate::metrics::MetricsError;
use crate::series::MergeError;

/// Message returned to callers when every job slot is taken.
pub const BUSY_MESSAGE: &str = "Max concurrent requests reached. Please try again later.";

/// Error type for algorithm invocations.
#[derive(Debug, thiserror::Error)]
pub enum AlgorithmError {
    /// No job slot was free. The request never started.
    #[error("Max concurrent requests reached. Please try again later.")]
    Busy(#[from] JobError),

    #[error("no data found for dataset {0}")]
    NoData(String),

    #[error("invalid options: {0}")]
    Options(#[from] OptionsError),

    #[error("tile service error: {0}")]
    Tiles(#[from] TileError),

    #[error("invalid time series input: {0}")]
    Merge(#[from] MergeError),

    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Execution(String),
}

impl AlgorithmError {
    /// HTTP-equivalent status for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            AlgorithmError::Busy(_) => 503,
            AlgorithmError::NoData(_)
            | AlgorithmError::Options(_)
            | AlgorithmError::Merge(_) => 400,
            _ => 500,
        }
    }

    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AlgorithmError::Busy(_))
    }
}

/// Result payload of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmOutput {
    pub results: Value,
    /// Execution metrics written by the algorithm, if any.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub stats: Value,
    pub content_type: ContentType,
}

impl AlgorithmOutput {
    pub fn new(results: Value) -> Self {
        Self {
            results,
            stats: Value::Null,
            content_type: ContentType::Json,
        }
    }

    pub fn with_stats(mut self, stats: Value) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Accepts the service configuration after construction.
pub trait Configurable {
    fn set_config(&mut self, config: &Config);
}

/// Accepts a handle to the execution engine after construction.
pub trait EngineAware {
    fn set_engine(&mut self, engine: Arc<dyn ExecutionEngine>);
}

/// An analysis algorithm's compute entry point.
///
/// Optional capabilities are exposed through the `configurable` and
/// `engine_aware` queries; the registry wires them up when it builds an
/// instance.
pub trait Algorithm: Send + Sync {
    fn calc(&self, options: &ComputeOptions) -> Result<AlgorithmOutput, AlgorithmError>;

    fn configurable(&mut self) -> Option<&mut dyn Configurable> {
        None
    }

    fn engine_aware(&mut self) -> Option<&mut dyn EngineAware> {
        None
    }
}

/// Static description of an algorithm, checked when it is registered.
pub trait AlgorithmMeta {
    /// Request path the algorithm is served under, e.g. `/timeSeries`.
    const PATH: &'static str;
    const NAME: &'static str;
    const DESCRIPTION: &'static str;
    const PARAMS: &'static [ParamSpec] = DEFAULT_PARAMETERS;
    /// Share one instance across requests instead of building one per call.
    const SINGLETON: bool = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        let busy = AlgorithmError::from(JobError::CapacityExceeded { capacity: 2 });
        assert_eq!(busy.status_code(), 503);
        assert!(busy.is_retryable());
        assert_eq!(busy.to_string(), BUSY_MESSAGE);

        assert_eq!(AlgorithmError::NoData("SST".into()).status_code(), 400);
        assert_eq!(AlgorithmError::Execution("boom".into()).status_code(), 500);
        assert!(!AlgorithmError::Execution("boom".into()).is_retryable());
    }

    #[test]
    fn output_omits_empty_stats() {
        let output = AlgorithmOutput::new(serde_json::json!([1, 2]));
        let value = serde_json::to_value(&output).unwrap();
        assert!(value.get("stats").is_none());
        assert_eq!(value["content_type"], "JSON");
    }
}

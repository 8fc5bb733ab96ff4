use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::engine::{Accumulator, ExecutionEngine};

/// A single named, additive metric.
pub trait MetricsField: Send + Sync + fmt::Debug {
    fn key(&self) -> &str;

    /// Human-readable label used when the record is printed.
    fn description(&self) -> &str;

    fn add(&self, amount: f64);

    fn value(&self) -> f64;

    /// Shared handle for fields that parallel workers write into directly.
    fn distributed(&self) -> Option<&Accumulator> {
        None
    }
}

/// Plain number held by the invoking thread. Starts at zero.
#[derive(Debug)]
pub struct NumberField {
    key: String,
    description: String,
    value: Mutex<f64>,
}

impl NumberField {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            value: Mutex::new(0.0),
        }
    }
}

impl MetricsField for NumberField {
    fn key(&self) -> &str {
        &self.key
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn add(&self, amount: f64) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) += amount;
    }

    fn value(&self) -> f64 {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Field backed by an engine accumulator, summed across workers.
#[derive(Debug)]
pub struct AccumulatorField {
    key: String,
    description: String,
    accumulator: Accumulator,
}

impl AccumulatorField {
    pub fn new(
        key: impl Into<String>,
        description: impl Into<String>,
        engine: &dyn ExecutionEngine,
    ) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            accumulator: engine.accumulator(),
        }
    }
}

impl MetricsField for AccumulatorField {
    fn key(&self) -> &str {
        &self.key
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn add(&self, amount: f64) {
        self.accumulator.add(amount);
    }

    fn value(&self) -> f64 {
        self.accumulator.value()
    }

    fn distributed(&self) -> Option<&Accumulator> {
        Some(&self.accumulator)
    }
}

use indexmap::map::Entry;
use indexmap::IndexMap;

use super::field::{AccumulatorField, MetricsField, NumberField};
use super::keys;
use super::sink::{MetricsSink, TracingSink};
use super::MetricsError;
use crate::engine::{Accumulator, ExecutionEngine};

/// Ordered collection of metrics fields keyed by field key.
#[derive(Debug, Default)]
pub struct MetricsRecord {
    fields: IndexMap<String, Box<dyn MetricsField>>,
}

impl MetricsRecord {
    /// Build a record from fields in display order. Keys must be unique.
    pub fn new(fields: Vec<Box<dyn MetricsField>>) -> Result<Self, MetricsError> {
        let mut map = IndexMap::with_capacity(fields.len());
        for field in fields {
            match map.entry(field.key().to_string()) {
                Entry::Occupied(e) => return Err(MetricsError::DuplicateKey(e.key().clone())),
                Entry::Vacant(e) => {
                    e.insert(field);
                }
            }
        }
        Ok(Self { fields: map })
    }

    /// Add each amount to the field with the matching key. Unknown keys
    /// are ignored.
    pub fn record_metrics<'a>(&self, amounts: impl IntoIterator<Item = (&'a str, f64)>) {
        for (key, amount) in amounts {
            if let Some(field) = self.fields.get(key) {
                field.add(amount);
            }
        }
    }

    pub fn field(&self, key: &str) -> Option<&dyn MetricsField> {
        self.fields.get(key).map(|f| f.as_ref())
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        self.fields.get(key).map(|f| f.value())
    }

    /// Accumulator handle for a distributed field, to move into workers.
    pub fn accumulator(&self, key: &str) -> Option<Accumulator> {
        self.fields.get(key).and_then(|f| f.distributed()).cloned()
    }

    pub fn fields(&self) -> impl Iterator<Item = &dyn MetricsField> {
        self.fields.values().map(|f| f.as_ref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `description: value` for each field, in insertion order.
    pub fn lines(&self) -> Vec<String> {
        self.fields
            .values()
            .map(|f| format!("{}: {}", f.description(), f.value()))
            .collect()
    }

    /// Log every field through [`TracingSink`].
    pub fn print_metrics(&self) {
        self.write_metrics(&mut TracingSink);
    }

    pub fn write_metrics(&self, sink: &mut dyn MetricsSink) {
        for field in self.fields() {
            sink.write_field(field.key(), field.description(), field.value());
        }
    }
}

/// The record every tile-reading algorithm fills in.
pub fn standard_record(engine: &dyn ExecutionEngine) -> Result<MetricsRecord, MetricsError> {
    MetricsRecord::new(vec![
        Box::new(AccumulatorField::new(keys::NUM_TILES, "Num Tiles", engine)),
        Box::new(AccumulatorField::new(keys::PARTITIONS, "Num Partitions", engine)),
        Box::new(AccumulatorField::new(keys::TILE_FETCH, "Tile Fetch Time", engine)),
        Box::new(AccumulatorField::new(keys::CALCULATION, "Calculation Time", engine)),
        Box::new(NumberField::new(keys::ACTUAL_TIME, "Total Time")),
    ])
}

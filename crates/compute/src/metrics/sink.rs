use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::info;

/// Destination for a record's values.
pub trait MetricsSink {
    fn write_field(&mut self, key: &str, description: &str, value: f64);
}

/// Emits one `info` event per field, formatted as `description: value`
/// with the key attached as the `metric` field.
#[derive(Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn write_field(&mut self, key: &str, description: &str, value: f64) {
        info!(metric = key, "{description}: {value}");
    }
}

/// Collects values into a JSON object for a response payload.
#[derive(Debug, Default)]
pub struct JsonSink {
    values: IndexMap<String, f64>,
}

impl JsonSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Non-finite values become `null`.
    pub fn into_value(self) -> Value {
        Value::Object(self.values.into_iter().map(|(k, v)| (k, json!(v))).collect())
    }
}

impl MetricsSink for JsonSink {
    fn write_field(&mut self, key: &str, _description: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }
}

//! Merging of per-dataset time series into time-aligned buckets.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One point of a time series. Fields other than `time` and `ds` are kept
/// as-is and serialized flat next to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub time: i64,
    /// Index of the input series this entry came from. Set by the merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ds: Option<usize>,
    #[serde(flatten)]
    pub values: IndexMap<String, Value>,
}

impl SeriesEntry {
    pub fn new(time: i64) -> Self {
        Self {
            time,
            ds: None,
            values: IndexMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// `time` is missing, not a number, or has a fractional part.
    #[error("entry {index} of series {series} has no integral `time`")]
    InvalidTime { series: usize, index: usize },

    #[error("entry {index} of series {series} is not an object")]
    NotAnObject { series: usize, index: usize },
}

/// Group entries of all series by time.
///
/// Each entry is tagged with the index of its source series. Buckets come
/// out in ascending time order; within a bucket, entries keep input order
/// (series by series). Two entries of one series at the same time both
/// stay in the bucket.
pub fn merge_series(series: Vec<Vec<SeriesEntry>>) -> Vec<Vec<SeriesEntry>> {
    let mut buckets: BTreeMap<i64, Vec<SeriesEntry>> = BTreeMap::new();
    for (ds, entries) in series.into_iter().enumerate() {
        for mut entry in entries {
            entry.ds = Some(ds);
            buckets.entry(entry.time).or_default().push(entry);
        }
    }
    buckets.into_values().collect()
}

/// [`merge_series`] over raw JSON entries, each an object with an integral
/// `time` field. `100` and `100.0` are the same time.
pub fn merge_json_series(series: Vec<Vec<Value>>) -> Result<Vec<Vec<SeriesEntry>>, MergeError> {
    let parsed = series
        .into_iter()
        .enumerate()
        .map(|(s, entries)| {
            entries
                .into_iter()
                .enumerate()
                .map(|(i, raw)| parse_entry(raw, s, i))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(merge_series(parsed))
}

fn parse_entry(raw: Value, series: usize, index: usize) -> Result<SeriesEntry, MergeError> {
    let Value::Object(mut object) = raw else {
        return Err(MergeError::NotAnObject { series, index });
    };
    let time = object
        .remove("time")
        .as_ref()
        .and_then(integral_time)
        .ok_or(MergeError::InvalidTime { series, index })?;
    // An incoming `ds` would be overwritten by the merge anyway.
    object.remove("ds");

    Ok(SeriesEntry {
        time,
        ds: None,
        values: object.into_iter().collect(),
    })
}

fn integral_time(value: &Value) -> Option<i64> {
    if let Some(time) = value.as_i64() {
        return Some(time);
    }
    let float = value.as_f64()?;
    // `i64::MAX as f64` rounds up to 2^63, which is already out of range.
    let in_range = float >= i64::MIN as f64 && float < i64::MAX as f64;
    (float.is_finite() && float.fract() == 0.0 && in_range).then_some(float as i64)
}

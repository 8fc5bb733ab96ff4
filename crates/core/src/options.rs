//! Typed compute options handed to an algorithm's `calc` entry point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OptionsError;

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, min_lat, max_lon, max_lat }
    }

    /// Whole globe.
    pub fn global() -> Self {
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::global()
    }
}

/// Output format requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    #[default]
    Json,
    Csv,
    Xml,
    Png,
    Netcdf,
    Zip,
}

/// Options for a single computation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputeOptions {
    datasets: Vec<String>,
    bounding_box: BoundingBox,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    /// Requested partition count. 0 = engine default.
    nparts: usize,
    seasonal_filter: Option<bool>,
    low_pass_filter: Option<bool>,
    content_type: ContentType,
}

impl ComputeOptions {
    pub fn builder() -> ComputeOptionsBuilder {
        ComputeOptionsBuilder::default()
    }

    pub fn datasets(&self) -> Result<&[String], OptionsError> {
        if self.datasets.is_empty() {
            Err(OptionsError::NoDataset)
        } else {
            Ok(&self.datasets)
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    pub fn start_time(&self) -> Result<DateTime<Utc>, OptionsError> {
        self.start_time.ok_or(OptionsError::MissingValue("start time"))
    }

    pub fn end_time(&self) -> Result<DateTime<Utc>, OptionsError> {
        self.end_time.ok_or(OptionsError::MissingValue("end time"))
    }

    pub fn nparts(&self) -> usize {
        self.nparts
    }

    pub fn seasonal_filter(&self, default: bool) -> bool {
        self.seasonal_filter.unwrap_or(default)
    }

    pub fn low_pass_filter(&self, default: bool) -> bool {
        self.low_pass_filter.unwrap_or(default)
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }
}

#[derive(Debug, Default)]
pub struct ComputeOptionsBuilder {
    options: ComputeOptions,
}

impl ComputeOptionsBuilder {
    pub fn dataset(mut self, shortname: impl Into<String>) -> Self {
        self.options.datasets.push(shortname.into());
        self
    }

    pub fn datasets<I, S>(mut self, shortnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.datasets.extend(shortnames.into_iter().map(Into::into));
        self
    }

    pub fn bounding_box(mut self, bbox: BoundingBox) -> Self {
        self.options.bounding_box = bbox;
        self
    }

    pub fn time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.options.start_time = Some(start);
        self.options.end_time = Some(end);
        self
    }

    pub fn nparts(mut self, nparts: usize) -> Self {
        self.options.nparts = nparts;
        self
    }

    pub fn seasonal_filter(mut self, apply: bool) -> Self {
        self.options.seasonal_filter = Some(apply);
        self
    }

    pub fn low_pass_filter(mut self, apply: bool) -> Self {
        self.options.low_pass_filter = Some(apply);
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.options.content_type = content_type;
        self
    }

    pub fn build(self) -> ComputeOptions {
        self.options
    }
}

/// One entry of an algorithm's declared parameter schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub key: &'static str,
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub description: &'static str,
}

/// Parameters shared by the area/time based algorithms.
pub const DEFAULT_PARAMETERS: &[ParamSpec] = &[
    ParamSpec {
        key: "ds",
        name: "Dataset",
        kind: "string",
        description: "One or more comma-separated dataset shortnames",
    },
    ParamSpec {
        key: "minLat",
        name: "Minimum Latitude",
        kind: "float",
        description: "Minimum (Southern) bounding box Latitude",
    },
    ParamSpec {
        key: "maxLat",
        name: "Maximum Latitude",
        kind: "float",
        description: "Maximum (Northern) bounding box Latitude",
    },
    ParamSpec {
        key: "minLon",
        name: "Minimum Longitude",
        kind: "float",
        description: "Minimum (Western) bounding box Longitude",
    },
    ParamSpec {
        key: "maxLon",
        name: "Maximum Longitude",
        kind: "float",
        description: "Maximum (Eastern) bounding box Longitude",
    },
    ParamSpec {
        key: "startTime",
        name: "Start Time",
        kind: "long integer",
        description: "Starting time in milliseconds since midnight Jan. 1st, 1970 UTC",
    },
    ParamSpec {
        key: "endTime",
        name: "End Time",
        kind: "long integer",
        description: "Ending time in milliseconds since midnight Jan. 1st, 1970 UTC",
    },
    ParamSpec {
        key: "lowPassFilter",
        name: "Apply Low Pass Filter",
        kind: "boolean",
        description: "Specifies whether to apply a low pass filter on the analytics results",
    },
    ParamSpec {
        key: "seasonalFilter",
        name: "Apply Seasonal Filter",
        kind: "boolean",
        description: "Specified whether to apply a seasonal cycle filter on the analytics results",
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn missing_times_are_reported() {
        let options = ComputeOptions::builder().dataset("SST").build();
        assert_eq!(options.start_time(), Err(OptionsError::MissingValue("start time")));
        assert_eq!(options.end_time(), Err(OptionsError::MissingValue("end time")));
    }

    #[test]
    fn empty_dataset_list_is_an_error() {
        let options = ComputeOptions::builder().build();
        assert_eq!(options.datasets(), Err(OptionsError::NoDataset));
    }

    #[test]
    fn builder_sets_every_field() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap();
        let options = ComputeOptions::builder()
            .datasets(["SST", "CHL"])
            .bounding_box(BoundingBox::new(-10.0, -5.0, 10.0, 5.0))
            .time_range(start, end)
            .nparts(4)
            .seasonal_filter(true)
            .content_type(ContentType::Csv)
            .build();

        assert_eq!(options.datasets().unwrap(), ["SST", "CHL"]);
        assert_eq!(options.bounding_box().max_lat, 5.0);
        assert_eq!(options.start_time().unwrap(), start);
        assert_eq!(options.end_time().unwrap(), end);
        assert_eq!(options.nparts(), 4);
        assert!(options.seasonal_filter(false));
        assert!(options.low_pass_filter(true));
        assert_eq!(options.content_type(), ContentType::Csv);
    }

    #[test]
    fn default_box_is_global() {
        let bbox = BoundingBox::default();
        assert!(bbox.contains(-90.0, 180.0));
        assert!(!bbox.contains(91.0, 0.0));
    }

    #[test]
    fn default_parameter_schema_keys() {
        let keys: Vec<&str> = DEFAULT_PARAMETERS.iter().map(|p| p.key).collect();
        assert_eq!(
            keys,
            [
                "ds", "minLat", "maxLat", "minLon", "maxLon", "startTime", "endTime",
                "lowPassFilter", "seasonalFilter"
            ]
        );
    }
}

use std::sync::Arc;
use std::time::Instant;

use chrono::DateTime;
use rayon::prelude::*;
use tilestat_core::{
    BoundingBox, ComputeOptions, Config, ContentType, OptionsError, ParamSpec, Tile, TileError,
    TileService, DEFAULT_PARAMETERS,
};
use tracing::{debug, info};

use crate::algorithm::{
    Algorithm, AlgorithmError, AlgorithmMeta, AlgorithmOutput, Configurable, EngineAware,
};
use crate::engine::{resolve_partitions, ExecutionEngine, MAX_PARALLELISM};
use crate::metrics::{keys, standard_record, JsonSink, MetricsRecord};
use crate::series::{merge_series, SeriesEntry};

/// Area-averaged time series over a bounding box.
///
/// For each requested dataset, every time stamp in range becomes one entry
/// with the mean, min, max and count of the unmasked cells inside the box.
/// Series of several datasets are merged by time.
pub struct TimeSeriesAverage {
    tiles: Arc<dyn TileService>,
    engine: Option<Arc<dyn ExecutionEngine>>,
    max_partitions: usize,
}

impl TimeSeriesAverage {
    pub fn new(tiles: Arc<dyn TileService>) -> Self {
        Self {
            tiles,
            engine: None,
            max_partitions: MAX_PARALLELISM,
        }
    }

    fn dataset_series(
        &self,
        engine: &dyn ExecutionEngine,
        record: &MetricsRecord,
        dataset: &str,
        bbox: &BoundingBox,
        (start, end): (i64, i64),
        requested_parts: usize,
    ) -> Result<Vec<SeriesEntry>, AlgorithmError> {
        let lookup = Instant::now();
        let days = self.tiles.find_days_in_range_asc(bbox, dataset, start, end)?;
        record.record_metrics([(keys::TILE_FETCH, lookup.elapsed().as_secs_f64())]);
        if days.is_empty() {
            return Err(AlgorithmError::NoData(dataset.to_string()));
        }

        let nparts = resolve_partitions(
            requested_parts,
            engine.default_parallelism(),
            self.max_partitions,
        );
        let chunk_len = days.len().div_ceil(nparts);
        let chunks = days.len().div_ceil(chunk_len);
        record.record_metrics([(keys::PARTITIONS, chunks as f64)]);
        debug!(dataset, days = days.len(), partitions = chunks, "fanning out");

        let mut partials: Vec<Result<Vec<SeriesEntry>, TileError>> = Vec::new();
        engine.install(Box::new(|| {
            partials = days
                .par_chunks(chunk_len)
                .map(|span| self.partition(record, dataset, bbox, span))
                .collect();
        }));

        let mut entries = Vec::with_capacity(days.len());
        for partial in partials {
            entries.extend(partial?);
        }
        if entries.is_empty() {
            return Err(AlgorithmError::NoData(dataset.to_string()));
        }
        Ok(entries)
    }

    /// Runs on an engine worker.
    fn partition(
        &self,
        record: &MetricsRecord,
        dataset: &str,
        bbox: &BoundingBox,
        days: &[i64],
    ) -> Result<Vec<SeriesEntry>, TileError> {
        let mut entries = Vec::with_capacity(days.len());
        for &day in days {
            let fetch = Instant::now();
            let tiles = self.tiles.get_tiles_bounded_by_box(bbox, dataset, day, day)?;
            record.record_metrics([
                (keys::TILE_FETCH, fetch.elapsed().as_secs_f64()),
                (keys::NUM_TILES, tiles.len() as f64),
            ]);

            let calc = Instant::now();
            let entry = summarize(day, &tiles);
            record.record_metrics([(keys::CALCULATION, calc.elapsed().as_secs_f64())]);
            entries.extend(entry);
        }
        Ok(entries)
    }
}

/// Everything but the `lowPassFilter` and `seasonalFilter` flags.
const TIME_SERIES_PARAMS: &[ParamSpec] = DEFAULT_PARAMETERS.split_at(7).0;

/// Rejects options this algorithm accepts but cannot honour: only JSON
/// output is produced and no filtering is applied.
fn ensure_supported(options: &ComputeOptions) -> Result<(), OptionsError> {
    let content_type = options.content_type();
    if content_type != ContentType::Json {
        return Err(OptionsError::Unsupported {
            key: "content type",
            value: format!("{content_type:?}"),
        });
    }
    for (key, requested) in [
        ("seasonalFilter", options.seasonal_filter(false)),
        ("lowPassFilter", options.low_pass_filter(false)),
    ] {
        if requested {
            return Err(OptionsError::Unsupported {
                key,
                value: "true".to_string(),
            });
        }
    }
    Ok(())
}

/// Statistics over every unmasked cell of one time stamp. `None` when all
/// cells are masked.
fn summarize(time: i64, tiles: &[Tile]) -> Option<SeriesEntry> {
    let mut count = 0u64;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for value in tiles.iter().flat_map(|t| t.valid_values()) {
        count += 1;
        sum += value;
        min = min.min(value);
        max = max.max(value);
    }
    if count == 0 {
        return None;
    }

    let mut entry = SeriesEntry::new(time)
        .with("mean", sum / count as f64)
        .with("min", min)
        .with("max", max)
        .with("cnt", count);
    if let Some(iso) = DateTime::from_timestamp(time, 0) {
        entry = entry.with("iso_time", iso.to_rfc3339());
    }
    Some(entry)
}

impl Algorithm for TimeSeriesAverage {
    fn calc(&self, options: &ComputeOptions) -> Result<AlgorithmOutput, AlgorithmError> {
        let engine = self
            .engine
            .as_deref()
            .ok_or_else(|| AlgorithmError::Execution("no execution engine attached".into()))?;
        ensure_supported(options)?;
        let started = Instant::now();

        let datasets = options.datasets()?;
        let bbox = options.bounding_box();
        let range = (
            options.start_time()?.timestamp(),
            options.end_time()?.timestamp(),
        );
        let record = standard_record(engine)?;

        let mut series = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            series.push(self.dataset_series(
                engine,
                &record,
                dataset,
                &bbox,
                range,
                options.nparts(),
            )?);
        }
        let merged = merge_series(series);

        record.record_metrics([(keys::ACTUAL_TIME, started.elapsed().as_secs_f64())]);
        record.print_metrics();
        let mut stats = JsonSink::new();
        record.write_metrics(&mut stats);

        info!(datasets = datasets.len(), points = merged.len(), "time series computed");
        Ok(AlgorithmOutput::new(serde_json::to_value(&merged)?).with_stats(stats.into_value()))
    }

    fn configurable(&mut self) -> Option<&mut dyn Configurable> {
        Some(self)
    }

    fn engine_aware(&mut self) -> Option<&mut dyn EngineAware> {
        Some(self)
    }
}

impl Configurable for TimeSeriesAverage {
    fn set_config(&mut self, config: &Config) {
        self.max_partitions = config.jobs.max_partitions.clamp(1, MAX_PARALLELISM);
    }
}

impl EngineAware for TimeSeriesAverage {
    fn set_engine(&mut self, engine: Arc<dyn ExecutionEngine>) {
        self.engine = Some(engine);
    }
}

impl AlgorithmMeta for TimeSeriesAverage {
    const PATH: &'static str = "/timeSeries";
    const PARAMS: &'static [ParamSpec] = TIME_SERIES_PARAMS;
    const NAME: &'static str = "Time Series";
    const DESCRIPTION: &'static str =
        "Computes an area-averaged time series (mean, min, max, count) for one or more datasets \
         over a bounding box and time range";
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono::Utc;
    use tilestat_core::MemoryTileStore;

    use super::*;
    use crate::engine::LocalEngine;

    fn tile(dataset: &str, time: i64, values: [Option<f64>; 4]) -> Tile {
        Tile {
            tile_id: format!("{dataset}-{time}"),
            dataset: dataset.to_string(),
            time,
            latitudes: vec![Some(0.0), Some(1.0)],
            longitudes: vec![Some(10.0), Some(11.0)],
            data: vec![values[..2].to_vec(), values[2..].to_vec()],
        }
    }

    fn algorithm(tiles: Vec<Tile>) -> TimeSeriesAverage {
        let mut algorithm = TimeSeriesAverage::new(Arc::new(MemoryTileStore::from_tiles(tiles)));
        algorithm.set_engine(Arc::new(LocalEngine::new(2).unwrap()));
        algorithm
    }

    fn options(datasets: &[&str]) -> ComputeOptions {
        ComputeOptions::builder()
            .datasets(datasets.iter().copied())
            .time_range(
                Utc.timestamp_opt(0, 0).unwrap(),
                Utc.timestamp_opt(1_000, 0).unwrap(),
            )
            .build()
    }

    #[test]
    fn summarize_skips_masked_cells() {
        let t = tile("SST", 100, [Some(1.0), None, Some(5.0), Some(3.0)]);
        let entry = summarize(100, &[t]).unwrap();
        assert_eq!(entry.values["mean"], 3.0);
        assert_eq!(entry.values["min"], 1.0);
        assert_eq!(entry.values["max"], 5.0);
        assert_eq!(entry.values["cnt"], 3);
        assert_eq!(entry.values["iso_time"], "1970-01-01T00:01:40+00:00");

        let masked = tile("SST", 100, [None; 4]);
        assert!(summarize(100, &[masked]).is_none());
    }

    #[test]
    fn series_is_ordered_and_reports_metrics() {
        let algorithm = algorithm(vec![
            tile("SST", 300, [Some(2.0), Some(4.0), None, None]),
            tile("SST", 100, [Some(1.0), Some(1.0), Some(1.0), Some(1.0)]),
            tile("SST", 200, [Some(0.0), None, None, Some(6.0)]),
        ]);

        let output = algorithm.calc(&options(&["SST"])).unwrap();

        let times: Vec<i64> = output
            .results
            .as_array()
            .unwrap()
            .iter()
            .map(|bucket| bucket[0]["time"].as_i64().unwrap())
            .collect();
        assert_eq!(times, vec![100, 200, 300]);
        assert_eq!(output.results[2][0]["mean"], 3.0);
        assert_eq!(output.stats["num_tiles"], 3.0);
        assert!(output.stats["partitions"].as_f64().unwrap() >= 1.0);
        assert!(output.stats.get("actual_time").is_some());
    }

    #[test]
    fn requested_partitions_are_honored() {
        let tiles = (1..=6).map(|d| tile("SST", d * 10, [Some(1.0); 4])).collect();
        let algorithm = algorithm(tiles);
        let opts = ComputeOptions::builder()
            .dataset("SST")
            .time_range(Utc.timestamp_opt(0, 0).unwrap(), Utc.timestamp_opt(100, 0).unwrap())
            .nparts(3)
            .build();

        let output = algorithm.calc(&opts).unwrap();
        assert_eq!(output.stats["partitions"], 3.0);
        assert_eq!(output.results.as_array().unwrap().len(), 6);
    }

    #[test]
    fn two_datasets_share_buckets() {
        let algorithm = algorithm(vec![
            tile("A", 100, [Some(1.0); 4]),
            tile("A", 200, [Some(2.0); 4]),
            tile("B", 200, [Some(3.0); 4]),
        ]);

        let output = algorithm.calc(&options(&["A", "B"])).unwrap();
        let buckets = output.results.as_array().unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[1].as_array().unwrap().len(), 2);
        assert_eq!(buckets[1][1]["ds"], 1);
    }

    #[test]
    fn non_json_output_is_rejected_before_any_work() {
        let algorithm = algorithm(vec![tile("SST", 100, [Some(1.0); 4])]);
        let csv = ComputeOptions::builder()
            .dataset("SST")
            .time_range(Utc.timestamp_opt(0, 0).unwrap(), Utc.timestamp_opt(1_000, 0).unwrap())
            .content_type(ContentType::Csv)
            .build();

        let err = algorithm.calc(&csv).unwrap_err();
        assert!(matches!(
            err,
            AlgorithmError::Options(OptionsError::Unsupported { key: "content type", .. })
        ));
        assert_eq!(err.status_code(), 400);

        let output = algorithm.calc(&options(&["SST"])).unwrap();
        assert_eq!(output.content_type, ContentType::Json);
    }

    #[test]
    fn filter_flags_are_rejected_when_set() {
        let algorithm = algorithm(vec![tile("SST", 100, [Some(1.0); 4])]);
        let range = (Utc.timestamp_opt(0, 0).unwrap(), Utc.timestamp_opt(1_000, 0).unwrap());

        let seasonal = ComputeOptions::builder()
            .dataset("SST")
            .time_range(range.0, range.1)
            .seasonal_filter(true)
            .build();
        assert!(matches!(
            algorithm.calc(&seasonal),
            Err(AlgorithmError::Options(OptionsError::Unsupported { key: "seasonalFilter", .. }))
        ));

        let low_pass = ComputeOptions::builder()
            .dataset("SST")
            .time_range(range.0, range.1)
            .low_pass_filter(true)
            .build();
        assert!(matches!(
            algorithm.calc(&low_pass),
            Err(AlgorithmError::Options(OptionsError::Unsupported { key: "lowPassFilter", .. }))
        ));

        let disabled = ComputeOptions::builder()
            .dataset("SST")
            .time_range(range.0, range.1)
            .seasonal_filter(false)
            .low_pass_filter(false)
            .build();
        assert!(algorithm.calc(&disabled).is_ok());
    }

    #[test]
    fn advertised_params_omit_the_filters() {
        let keys: Vec<&str> = TimeSeriesAverage::PARAMS.iter().map(|p| p.key).collect();
        assert_eq!(
            keys,
            vec!["ds", "minLat", "maxLat", "minLon", "maxLon", "startTime", "endTime"]
        );
    }

    #[test]
    fn empty_range_is_no_data() {
        let algorithm = algorithm(vec![tile("SST", 5_000, [Some(1.0); 4])]);
        let err = algorithm.calc(&options(&["SST"])).unwrap_err();
        assert!(matches!(err, AlgorithmError::NoData(ref ds) if ds == "SST"));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn missing_engine_or_options_fail() {
        let bare = TimeSeriesAverage::new(Arc::new(MemoryTileStore::new()));
        assert!(matches!(
            bare.calc(&options(&["SST"])),
            Err(AlgorithmError::Execution(_))
        ));

        let algorithm = algorithm(vec![]);
        let no_range = ComputeOptions::builder().dataset("SST").build();
        assert!(matches!(algorithm.calc(&no_range), Err(AlgorithmError::Options(_))));
        assert!(matches!(
            algorithm.calc(&ComputeOptions::default()),
            Err(AlgorithmError::Options(_))
        ));
    }
}

//! Tile model and the tile-service seam.
//!
//! The analysis layer never talks to tile storage directly. It goes through
//! [`TileService`], which enumerates time stamps and fetches masked grids
//! for a bounding box. [`MemoryTileStore`] is an in-process implementation
//! backed by a JSON tile dump.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::TileError;
use crate::options::BoundingBox;

/// A 2-D grid of values for one dataset at one time stamp.
///
/// `None` marks a masked (fill) cell or coordinate. `data` is indexed
/// `[lat][lon]` and matches the lengths of the coordinate arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub tile_id: String,
    pub dataset: String,
    /// Seconds since the Unix epoch.
    pub time: i64,
    pub latitudes: Vec<Option<f64>>,
    pub longitudes: Vec<Option<f64>>,
    pub data: Vec<Vec<Option<f64>>>,
}

impl Tile {
    /// Iterate over every unmasked cell value.
    pub fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().flatten().filter_map(|v| *v)
    }

    /// True when no cell carries a value.
    pub fn is_fully_masked(&self) -> bool {
        self.valid_values().next().is_none()
    }

    /// Whether any unmasked cell lies inside `bbox`.
    pub fn intersects(&self, bbox: &BoundingBox) -> bool {
        self.cells().any(|(lat, lon, _)| bbox.contains(lat, lon))
    }

    /// Copy of this tile with every cell outside `bbox` masked.
    pub fn masked_to_bbox(&self, bbox: &BoundingBox) -> Tile {
        let data = self
            .data
            .iter()
            .enumerate()
            .map(|(y, row)| {
                row.iter()
                    .enumerate()
                    .map(|(x, value)| {
                        let lat = self.latitudes.get(y).copied().flatten();
                        let lon = self.longitudes.get(x).copied().flatten();
                        match (lat, lon, value) {
                            (Some(lat), Some(lon), Some(v)) if bbox.contains(lat, lon) => Some(*v),
                            _ => None,
                        }
                    })
                    .collect()
            })
            .collect();

        Tile {
            data,
            ..self.clone()
        }
    }

    /// (lat, lon, value) for every unmasked cell with known coordinates.
    fn cells(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.data.iter().enumerate().flat_map(move |(y, row)| {
            row.iter().enumerate().filter_map(move |(x, value)| {
                let lat = self.latitudes.get(y).copied().flatten()?;
                let lon = self.longitudes.get(x).copied().flatten()?;
                (*value).map(|v| (lat, lon, v))
            })
        })
    }
}

/// Query interface of the tile storage service.
pub trait TileService: Send + Sync {
    /// Distinct time stamps (ascending) with data for `dataset` inside the
    /// box and the inclusive `[start, end]` range, in epoch seconds.
    fn find_days_in_range_asc(
        &self,
        bbox: &BoundingBox,
        dataset: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<i64>, TileError>;

    /// Tiles for `dataset` inside the box and inclusive time range, with
    /// cells outside the box masked.
    fn get_tiles_bounded_by_box(
        &self,
        bbox: &BoundingBox,
        dataset: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Tile>, TileError>;
}

/// In-memory [`TileService`] keyed by dataset shortname.
#[derive(Debug, Default)]
pub struct MemoryTileStore {
    datasets: HashMap<String, Vec<Tile>>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tiles(tiles: impl IntoIterator<Item = Tile>) -> Self {
        let mut store = Self::new();
        for tile in tiles {
            store.insert(tile);
        }
        store
    }

    /// Load a JSON array of tiles.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TileError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let tiles: Vec<Tile> = serde_json::from_str(&raw)?;
        let store = Self::from_tiles(tiles);
        info!(
            path = %path.display(),
            datasets = store.datasets.len(),
            tiles = store.tile_count(),
            "loaded tile dump"
        );
        Ok(store)
    }

    pub fn insert(&mut self, tile: Tile) {
        self.datasets.entry(tile.dataset.clone()).or_default().push(tile);
    }

    pub fn tile_count(&self) -> usize {
        self.datasets.values().map(Vec::len).sum()
    }

    fn tiles_for(&self, dataset: &str) -> Result<&[Tile], TileError> {
        self.datasets
            .get(dataset)
            .map(Vec::as_slice)
            .ok_or_else(|| TileError::DatasetNotFound(dataset.to_string()))
    }
}

impl TileService for MemoryTileStore {
    fn find_days_in_range_asc(
        &self,
        bbox: &BoundingBox,
        dataset: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<i64>, TileError> {
        let days: BTreeSet<i64> = self
            .tiles_for(dataset)?
            .iter()
            .filter(|t| t.time >= start && t.time <= end && t.intersects(bbox))
            .map(|t| t.time)
            .collect();
        debug!(dataset, count = days.len(), "time stamps in range");
        Ok(days.into_iter().collect())
    }

    fn get_tiles_bounded_by_box(
        &self,
        bbox: &BoundingBox,
        dataset: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Tile>, TileError> {
        Ok(self
            .tiles_for(dataset)?
            .iter()
            .filter(|t| t.time >= start && t.time <= end && t.intersects(bbox))
            .map(|t| t.masked_to_bbox(bbox))
            .collect())
    }
}

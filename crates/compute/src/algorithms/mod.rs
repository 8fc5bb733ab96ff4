//! Built-in analysis algorithms.

pub mod time_series;

use std::sync::Arc;

use tilestat_core::TileService;

use crate::registry::{AlgorithmDescriptor, AlgorithmRegistry, RegistryError};

pub use time_series::TimeSeriesAverage;

/// Register every built-in algorithm, all reading from `tiles`.
pub fn register_builtin(
    registry: &mut AlgorithmRegistry,
    tiles: Arc<dyn TileService>,
) -> Result<(), RegistryError> {
    registry.register(AlgorithmDescriptor::of(move || {
        TimeSeriesAverage::new(Arc::clone(&tiles))
    }))?;
    Ok(())
}

pub mod algorithm;
pub mod algorithms;
pub mod engine;
pub mod jobs;
pub mod metrics;
pub mod registry;
pub mod series;

pub use algorithm::{
    Algorithm, AlgorithmError, AlgorithmMeta, AlgorithmOutput, Configurable, EngineAware,
    BUSY_MESSAGE,
};
pub use algorithms::TimeSeriesAverage;
pub use engine::{
    resolve_partitions, Accumulator, EngineError, ExecutionEngine, JobContext, JobGroup,
    LocalEngine, MAX_PARALLELISM, SCHEDULER_POOL_PROPERTY,
};
pub use jobs::{JobError, JobSlot, JobSlotPool, PoolSnapshot, SlotGuarded, SlotLease};
pub use metrics::{MetricsError, MetricsField, MetricsRecord, MetricsSink};
pub use registry::{
    AlgorithmDescriptor, AlgorithmInfo, AlgorithmRegistry, Handler, Handlers, Initializer,
    Instancing, RegistryError,
};
pub use series::{merge_json_series, merge_series, MergeError, SeriesEntry};

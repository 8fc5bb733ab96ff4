//! Execution engine seam.
//!
//! Algorithms fan their work out through an [`ExecutionEngine`]. The engine
//! supplies additive [`Accumulator`]s that parallel workers write into, a
//! way to tag the calling thread's current job with a scheduling pool and
//! job group, and a default-parallelism hint for partition sizing.
//!
//! [`LocalEngine`] runs everything on a `rayon` thread pool inside the
//! process and keeps per-pool job accounting.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

/// Local property naming the scheduling pool of the current job.
pub const SCHEDULER_POOL_PROPERTY: &str = "scheduler.pool";

/// Hard cap on partitions for a single fan-out.
pub const MAX_PARALLELISM: usize = 128;

/// Pick a partition count: the requested count when positive, otherwise
/// the engine default, capped at `cap` and never below one.
pub fn resolve_partitions(requested: usize, engine_default: usize, cap: usize) -> usize {
    let wanted = if requested > 0 { requested } else { engine_default };
    wanted.min(cap).max(1)
}

/// Error type for engine construction.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Additive f64 counter shared between workers.
///
/// Clones share the same cell. Reads are stable once every writer has
/// finished.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    bits: Arc<AtomicU64>,
}

impl Accumulator {
    pub fn new(initial: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(initial.to_bits())),
        }
    }

    pub fn add(&self, amount: f64) {
        // fetch_update retries on contention; the closure never returns None.
        let _ = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + amount).to_bits())
            });
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// Job group the calling thread is currently working under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobGroup {
    pub id: String,
    pub description: String,
}

/// Job group and local properties of the calling thread, captured so they
/// can be put back after a nested job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobContext {
    pub group: Option<JobGroup>,
    pub properties: HashMap<String, String>,
}

/// Interface of the distributed execution engine.
pub trait ExecutionEngine: Send + Sync {
    /// Partition count to use when the caller asks for none.
    fn default_parallelism(&self) -> usize;

    /// A fresh accumulator starting at zero.
    fn accumulator(&self) -> Accumulator;

    /// Set a property on jobs submitted from the calling thread.
    fn set_local_property(&self, key: &str, value: &str);

    /// Group jobs submitted from the calling thread under `group_id`.
    fn set_job_group(&self, group_id: &str, description: &str);

    /// Drop the calling thread's job group and local properties.
    fn clear_job_group(&self);

    /// Snapshot of the calling thread's job group and local properties.
    fn job_context(&self) -> JobContext;

    /// Replace the calling thread's job group and local properties.
    fn restore_job_context(&self, context: JobContext);

    /// Run `op` as one job on the engine's workers. Parallel iterators used
    /// inside `op` execute on the engine's pool.
    fn install(&self, op: Box<dyn FnOnce() + Send + '_>);
}

thread_local! {
    static LOCAL_PROPERTIES: RefCell<HashMap<String, String>> = RefCell::new(HashMap::new());
    static JOB_GROUP: RefCell<Option<JobGroup>> = const { RefCell::new(None) };
}

/// Job group set on the calling thread, if any.
pub fn current_job_group() -> Option<JobGroup> {
    JOB_GROUP.with(|g| g.borrow().clone())
}

/// Local property set on the calling thread, if any.
pub fn local_property(key: &str) -> Option<String> {
    LOCAL_PROPERTIES.with(|p| p.borrow().get(key).cloned())
}

/// Jobs and busy time accounted to one scheduling pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolUsage {
    pub jobs: u64,
    pub busy: Duration,
}

/// In-process engine backed by a `rayon` thread pool.
pub struct LocalEngine {
    pool: rayon::ThreadPool,
    usage: Mutex<HashMap<String, PoolUsage>>,
}

impl std::fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEngine")
            .field("threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl LocalEngine {
    /// Build an engine with `threads` workers (0 = rayon default).
    pub fn new(threads: usize) -> Result<Self, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("engine-worker-{i}"))
            .build()?;
        Ok(Self {
            pool,
            usage: Mutex::new(HashMap::new()),
        })
    }

    /// Snapshot of per-pool accounting. Jobs run without a pool tag are
    /// accounted under `"default"`.
    pub fn pool_usage(&self) -> HashMap<String, PoolUsage> {
        self.usage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ExecutionEngine for LocalEngine {
    fn default_parallelism(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn accumulator(&self) -> Accumulator {
        Accumulator::new(0.0)
    }

    fn set_local_property(&self, key: &str, value: &str) {
        LOCAL_PROPERTIES.with(|p| {
            p.borrow_mut().insert(key.to_string(), value.to_string());
        });
    }

    fn set_job_group(&self, group_id: &str, description: &str) {
        JOB_GROUP.with(|g| {
            *g.borrow_mut() = Some(JobGroup {
                id: group_id.to_string(),
                description: description.to_string(),
            });
        });
    }

    fn clear_job_group(&self) {
        JOB_GROUP.with(|g| g.borrow_mut().take());
        LOCAL_PROPERTIES.with(|p| p.borrow_mut().clear());
    }

    fn job_context(&self) -> JobContext {
        JobContext {
            group: current_job_group(),
            properties: LOCAL_PROPERTIES.with(|p| p.borrow().clone()),
        }
    }

    fn restore_job_context(&self, context: JobContext) {
        JOB_GROUP.with(|g| *g.borrow_mut() = context.group);
        LOCAL_PROPERTIES.with(|p| *p.borrow_mut() = context.properties);
    }

    fn install(&self, op: Box<dyn FnOnce() + Send + '_>) {
        let pool_name =
            local_property(SCHEDULER_POOL_PROPERTY).unwrap_or_else(|| "default".to_string());
        let group = current_job_group();
        debug!(pool = %pool_name, group = ?group.as_ref().map(|g| &g.id), "submitting job");

        let start = Instant::now();
        self.pool.install(op);
        let elapsed = start.elapsed();

        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = usage.entry(pool_name).or_default();
        entry.jobs += 1;
        entry.busy += elapsed;
    }
}

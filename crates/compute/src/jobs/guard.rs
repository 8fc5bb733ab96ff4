use std::sync::Arc;

use tilestat_core::ComputeOptions;
use tracing::{debug, info_span, warn};
use uuid::Uuid;

use crate::algorithm::{Algorithm, AlgorithmError, AlgorithmOutput};
use crate::engine::{ExecutionEngine, JobContext, SCHEDULER_POOL_PROPERTY};

use super::pool::{JobSlot, JobSlotPool};

/// Wraps an algorithm so every `calc` call runs inside a leased job slot.
///
/// The slot name becomes the engine's scheduling pool and job group for the
/// duration of the call. The slot goes back to the pool on every exit path,
/// and errors from the wrapped algorithm are returned unchanged.
pub struct SlotGuarded<A: ?Sized> {
    label: String,
    pool: Arc<JobSlotPool>,
    engine: Arc<dyn ExecutionEngine>,
    inner: Arc<A>,
}

impl<A: Algorithm + ?Sized> SlotGuarded<A> {
    pub fn new(
        label: impl Into<String>,
        inner: Arc<A>,
        pool: Arc<JobSlotPool>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        Self {
            label: label.into(),
            pool,
            engine,
            inner,
        }
    }

    pub fn pool(&self) -> &Arc<JobSlotPool> {
        &self.pool
    }
}

impl<A: Algorithm + ?Sized> Algorithm for SlotGuarded<A> {
    fn calc(&self, options: &ComputeOptions) -> Result<AlgorithmOutput, AlgorithmError> {
        let invocation = Uuid::new_v4();
        let span = info_span!(
            "calc",
            algorithm = %self.label,
            %invocation,
            slot = tracing::field::Empty
        );
        let _entered = span.enter();

        let lease = self.pool.try_acquire().map_err(|e| {
            warn!(error = %e, "rejecting request, no job slot free");
            AlgorithmError::from(e)
        })?;
        span.record("slot", lease.slot().name());
        // Declared after `lease` so the tag is undone before the slot returns.
        let _tag = JobTag::bind(self.engine.as_ref(), lease.slot());

        let result = self.inner.calc(options);
        if let Err(e) = &result {
            debug!(slot = %lease.slot(), error = %e, "calc failed");
        }
        result
    }
}

/// Binds a slot to the engine's current job until dropped, then puts back
/// whatever tag the thread carried before.
struct JobTag<'a> {
    engine: &'a dyn ExecutionEngine,
    previous: JobContext,
}

impl<'a> JobTag<'a> {
    fn bind(engine: &'a dyn ExecutionEngine, slot: &JobSlot) -> Self {
        let previous = engine.job_context();
        // Pool and job group are kept one-to-one with the slot.
        engine.set_local_property(SCHEDULER_POOL_PROPERTY, slot.name());
        engine.set_job_group(slot.name(), "a distributed job");
        Self { engine, previous }
    }
}

impl Drop for JobTag<'_> {
    fn drop(&mut self) {
        self.engine.restore_job_context(std::mem::take(&mut self.previous));
    }
}

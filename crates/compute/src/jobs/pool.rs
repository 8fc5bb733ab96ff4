use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tilestat_core::config::DEFAULT_MAX_CONCURRENT_JOBS;
use tracing::{debug, info, warn};

use super::error::JobError;

/// One scheduling lane. Named `"Job 1"` … `"Job N"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobSlot(String);

impl JobSlot {
    fn numbered(n: usize) -> Self {
        Self(format!("Job {n}"))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Point-in-time view of the pool for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub capacity: usize,
    pub available: usize,
    pub in_use: usize,
    pub generation: u64,
}

#[derive(Debug)]
struct PoolState {
    /// Free slots, handed out from the back.
    free: Vec<JobSlot>,
    capacity: usize,
    /// Bumped on every reconfiguration; leases remember the value they
    /// were issued under.
    generation: u64,
}

impl PoolState {
    fn fresh(capacity: usize, generation: u64) -> Self {
        Self {
            free: (1..=capacity).map(JobSlot::numbered).collect(),
            capacity,
            generation,
        }
    }
}

/// Bounded pool of job slots.
///
/// `available + in_use == capacity` holds at all times and no slot is ever
/// leased twice at once. Free slots form a stack: the most recently
/// released slot is the next one handed out.
#[derive(Debug)]
pub struct JobSlotPool {
    state: Mutex<PoolState>,
}

impl Default for JobSlotPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_JOBS)
    }
}

impl JobSlotPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState::fresh(capacity, 0)),
        }
    }

    /// Reset the pool to `capacity` fresh slots.
    ///
    /// Leases still outstanding belong to the previous generation; their
    /// slots are dropped instead of returned when they are released.
    pub fn configure(&self, capacity: usize) {
        let mut state = self.lock();
        let outstanding = state.capacity - state.free.len();
        let generation = state.generation + 1;
        *state = PoolState::fresh(capacity, generation);
        if outstanding > 0 {
            warn!(
                outstanding,
                capacity, "job slot pool reconfigured with leases outstanding"
            );
        } else {
            info!(capacity, "job slot pool configured");
        }
    }

    /// Lease a free slot without waiting.
    pub fn try_acquire(self: &Arc<Self>) -> Result<SlotLease, JobError> {
        let mut state = self.lock();
        match state.free.pop() {
            Some(slot) => {
                debug!(slot = %slot, "using job slot");
                Ok(SlotLease {
                    slot,
                    generation: state.generation,
                    pool: Arc::clone(self),
                })
            }
            None => Err(JobError::CapacityExceeded {
                capacity: state.capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn available(&self) -> usize {
        self.lock().free.len()
    }

    pub fn in_use(&self) -> usize {
        let state = self.lock();
        state.capacity - state.free.len()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.lock();
        PoolSnapshot {
            capacity: state.capacity,
            available: state.free.len(),
            in_use: state.capacity - state.free.len(),
            generation: state.generation,
        }
    }

    fn give_back(&self, slot: JobSlot, generation: u64) {
        let mut state = self.lock();
        if generation == state.generation {
            debug!(slot = %slot, "returning job slot");
            state.free.push(slot);
        } else {
            warn!(
                slot = %slot,
                lease_generation = generation,
                pool_generation = state.generation,
                "discarding job slot leased before reconfiguration"
            );
        }
    }

    // The free stack is only mutated by single push/pop operations, so a
    // poisoned lock still guards a consistent state.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A leased slot. Returned to its pool exactly once: on [`release`] or on
/// drop, whichever comes first, including during unwinding.
///
/// [`release`]: SlotLease::release
#[derive(Debug)]
pub struct SlotLease {
    slot: JobSlot,
    generation: u64,
    pool: Arc<JobSlotPool>,
}

impl SlotLease {
    pub fn slot(&self) -> &JobSlot {
        &self.slot
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.pool.give_back(self.slot.clone(), self.generation);
    }
}

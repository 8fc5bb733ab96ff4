//! Concurrent-job admission.
//!
//! A [`JobSlotPool`] holds a fixed set of named slots. Every invocation of an
//! algorithm's compute entry point leases one slot through [`SlotGuarded`]
//! and gives it back when the invocation ends, so at most `N` distributed
//! jobs run at once. Acquisition never waits: an exhausted pool fails with
//! [`JobError::CapacityExceeded`].

pub mod error;
pub mod guard;
pub mod pool;

pub use error::JobError;
pub use guard::SlotGuarded;
pub use pool::{JobSlot, JobSlotPool, PoolSnapshot, SlotLease};

use thiserror::Error;

/// Admission failures raised by the job slot pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Every slot is leased. Retryable once another job finishes.
    #[error("all {capacity} job slots are in use")]
    CapacityExceeded { capacity: usize },
}

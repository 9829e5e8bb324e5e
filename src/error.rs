//! Error types for the priority worker pool.
//!
//! Only [`ConfigurationError`] and [`LifecycleError`] ever reach a caller
//! synchronously (see the crate-level docs). Work-closure failures and
//! metrics-sink failures never produce a [`PoolError`]; they surface only
//! through the metrics sink and `tracing` logs.

use thiserror::Error;

/// Result type used throughout this crate's public API.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can be returned from the pool's public API.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Raised by [`crate::Pool::start`] when the supplied configuration
    /// violates one of the invariants in the data model.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Raised by [`crate::Pool::enqueue`] (or `start`) when the pool is not
    /// in a state that accepts the requested operation.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Configuration invariant violations, detected at [`crate::Pool::start`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// `max_workers` must be at least `max(min_workers, 1)`.
    #[error("max_workers ({max}) must be >= max(min_workers ({min}), 1)")]
    MaxBelowMin {
        /// Configured lower bound.
        min: usize,
        /// Configured upper bound.
        max: usize,
    },

    /// A per-priority weight was negative.
    #[error("{field} must be non-negative, got {value}")]
    NegativeWeight {
        /// Name of the offending configuration field.
        field: &'static str,
        /// The offending value.
        value: f64,
    },

    /// `aging_factor` was negative.
    #[error("aging_factor must be >= 0, got {0}")]
    NegativeAgingFactor(f64),

    /// `management_interval` was zero.
    #[error("management_interval must be > 0")]
    NonPositiveManagementInterval,

    /// `backlog_per_worker_scale_out` was zero.
    #[error("backlog_per_worker_scale_out must be >= 1, got {0}")]
    InvalidScaleOutDivisor(u64),
}

/// Lifecycle misuse: calling an operation in a state that does not support it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// `start` was called more than once on the same pool.
    #[error("pool has already been started")]
    AlreadyStarted,

    /// `enqueue` was called before `start`, or after `stop`.
    #[error("pool is not running (not started, or stopping/stopped)")]
    NotRunning,
}

/// Internal bookkeeping failure inside a single management tick.
///
/// Never reaches a caller: [`crate::pool`] catches it, logs a warning, and
/// continues the management loop on the next tick.
#[derive(Error, Debug)]
pub(crate) enum TickError {
    #[error("management tick panicked: {0}")]
    Internal(String),
}

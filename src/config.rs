//! Pool configuration: builder, defaults, and invariant validation.

use std::time::Duration;

use crate::error::ConfigurationError;
use crate::item::WorkPriority;

/// Tunables for a [`crate::Pool`].
///
/// Constructed via [`Default`] plus the `with_*` builder methods, then
/// validated once by [`crate::Pool::start`]. Not loaded from a file or
/// environment variables; callers that want that wire it up themselves.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub(crate) min_workers: usize,
    pub(crate) max_workers: usize,
    pub(crate) backlog_per_worker_scale_out: u64,
    pub(crate) idle_timeout: Duration,
    pub(crate) management_interval: Duration,
    pub(crate) high_priority_weight: f64,
    pub(crate) normal_priority_weight: f64,
    pub(crate) low_priority_weight: f64,
    pub(crate) aging_factor: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: num_cpus::get().max(1),
            backlog_per_worker_scale_out: 4,
            idle_timeout: Duration::from_secs(20),
            management_interval: Duration::from_secs(1),
            high_priority_weight: 8.0,
            normal_priority_weight: 3.0,
            low_priority_weight: 1.0,
            aging_factor: 0.1,
        }
    }
}

impl PoolConfig {
    /// Lower bound on the number of live workers, maintained at all times.
    #[must_use]
    pub fn with_min_workers(mut self, min_workers: usize) -> Self {
        self.min_workers = min_workers;
        self
    }

    /// Upper bound on the number of live workers.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Total backlog items per worker before the pool scales out by one.
    #[must_use]
    pub fn with_backlog_per_worker_scale_out(mut self, backlog_per_worker: u64) -> Self {
        self.backlog_per_worker_scale_out = backlog_per_worker;
        self
    }

    /// How long a worker must sit idle before it becomes eligible for reclamation.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Period between management-loop ticks (backlog sampling, scaling).
    #[must_use]
    pub fn with_management_interval(mut self, management_interval: Duration) -> Self {
        self.management_interval = management_interval;
        self
    }

    /// Base scheduling weight for [`WorkPriority::High`].
    #[must_use]
    pub fn with_high_priority_weight(mut self, weight: f64) -> Self {
        self.high_priority_weight = weight;
        self
    }

    /// Base scheduling weight for [`WorkPriority::Normal`].
    #[must_use]
    pub fn with_normal_priority_weight(mut self, weight: f64) -> Self {
        self.normal_priority_weight = weight;
        self
    }

    /// Base scheduling weight for [`WorkPriority::Low`].
    #[must_use]
    pub fn with_low_priority_weight(mut self, weight: f64) -> Self {
        self.low_priority_weight = weight;
        self
    }

    /// Multiplier applied to a queue's waiting time when computing its
    /// aging bias; bounds how quickly starvation is corrected.
    #[must_use]
    pub fn with_aging_factor(mut self, aging_factor: f64) -> Self {
        self.aging_factor = aging_factor;
        self
    }

    pub(crate) fn weight_for(&self, priority: WorkPriority) -> f64 {
        match priority {
            WorkPriority::High => self.high_priority_weight,
            WorkPriority::Normal => self.normal_priority_weight,
            WorkPriority::Low => self.low_priority_weight,
        }
    }

    /// Check the invariants from the data model. Called once by
    /// [`crate::Pool::start`]; never called implicitly by the builder
    /// methods above, so partially-configured instances can be passed
    /// around freely before `start`.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let min_floor = self.min_workers.max(1);
        if self.max_workers < min_floor {
            return Err(ConfigurationError::MaxBelowMin {
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        for (field, value) in [
            ("high_priority_weight", self.high_priority_weight),
            ("normal_priority_weight", self.normal_priority_weight),
            ("low_priority_weight", self.low_priority_weight),
        ] {
            if value < 0.0 {
                return Err(ConfigurationError::NegativeWeight { field, value });
            }
        }
        if self.aging_factor < 0.0 {
            return Err(ConfigurationError::NegativeAgingFactor(self.aging_factor));
        }
        if self.management_interval.is_zero() {
            return Err(ConfigurationError::NonPositiveManagementInterval);
        }
        if self.backlog_per_worker_scale_out == 0 {
            return Err(ConfigurationError::InvalidScaleOutDivisor(0));
        }
        Ok(())
    }
}

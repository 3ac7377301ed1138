//! Typed executor configuration (spec.md §6).

use dagforge_core::{Error, Result};

/// How long training-mode producers may run before the executor gives up
/// and proceeds with whatever has been produced so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingTimeBudget {
    Unlimited,
    Seconds(u64),
}

/// A validated, immutable executor configuration. Build one with
/// [`ExecutorConfigBuilder`] via [`ExecutorConfig::builder`], or use
/// [`ExecutorConfig::default`] for the documented defaults.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    minibatch_size: usize,
    inference_minibatch_size: Option<usize>,
    worker_count: usize,
    max_epochs: u32,
    max_training_seconds: TrainingTimeBudget,
    evaluation_holdout_proportion: f64,
    random_seed: u64,
    spill_threshold_bytes: u64,
    max_reduction_iterations: u64,
}

impl ExecutorConfig {
    #[must_use]
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::default()
    }

    #[must_use]
    pub const fn minibatch_size(&self) -> usize {
        self.minibatch_size
    }

    /// The minibatch size to use for inference: the configured override, or
    /// `minibatch_size` if none was set (spec.md §6,
    /// "`inferenceMinibatchSize`... zero means use training value").
    #[must_use]
    pub fn inference_minibatch_size(&self) -> usize {
        self.inference_minibatch_size.unwrap_or(self.minibatch_size)
    }

    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    #[must_use]
    pub const fn max_epochs(&self) -> u32 {
        self.max_epochs
    }

    #[must_use]
    pub const fn max_training_seconds(&self) -> TrainingTimeBudget {
        self.max_training_seconds
    }

    #[must_use]
    pub const fn evaluation_holdout_proportion(&self) -> f64 {
        self.evaluation_holdout_proportion
    }

    #[must_use]
    pub const fn random_seed(&self) -> u64 {
        self.random_seed
    }

    #[must_use]
    pub const fn spill_threshold_bytes(&self) -> u64 {
        self.spill_threshold_bytes
    }

    #[must_use]
    pub const fn max_reduction_iterations(&self) -> u64 {
        self.max_reduction_iterations
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        // `ExecutorConfigBuilder::default()` always validates cleanly, so
        // relying on that instead of duplicating the defaults here keeps
        // the two paths from drifting.
        #[allow(clippy::unwrap_used)]
        ExecutorConfigBuilder::default().build().unwrap()
    }
}

/// Builder for [`ExecutorConfig`] (spec.md §6). Every setter accepts the
/// option's natural type; [`Self::build`] validates the whole set at once
/// and returns [`Error::InvalidConfig`] naming the first offending option.
pub struct ExecutorConfigBuilder {
    minibatch_size: usize,
    inference_minibatch_size: Option<usize>,
    worker_count: usize,
    max_epochs: u32,
    max_training_seconds: TrainingTimeBudget,
    evaluation_holdout_proportion: f64,
    random_seed: u64,
    spill_threshold_bytes: u64,
    max_reduction_iterations: u64,
}

impl Default for ExecutorConfigBuilder {
    fn default() -> Self {
        Self {
            minibatch_size: 64,
            inference_minibatch_size: None,
            worker_count: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1),
            max_epochs: 16,
            max_training_seconds: TrainingTimeBudget::Unlimited,
            evaluation_holdout_proportion: 0.0,
            random_seed: 1,
            spill_threshold_bytes: 64 * 1024 * 1024,
            max_reduction_iterations: 10_000,
        }
    }
}

impl ExecutorConfigBuilder {
    #[must_use]
    pub const fn minibatch_size(mut self, value: usize) -> Self {
        self.minibatch_size = value;
        self
    }

    #[must_use]
    pub const fn inference_minibatch_size(mut self, value: usize) -> Self {
        self.inference_minibatch_size = if value == 0 { None } else { Some(value) };
        self
    }

    #[must_use]
    pub const fn worker_count(mut self, value: usize) -> Self {
        self.worker_count = value;
        self
    }

    #[must_use]
    pub const fn max_epochs(mut self, value: u32) -> Self {
        self.max_epochs = value;
        self
    }

    #[must_use]
    pub const fn max_training_seconds(mut self, value: TrainingTimeBudget) -> Self {
        self.max_training_seconds = value;
        self
    }

    #[must_use]
    pub const fn evaluation_holdout_proportion(mut self, value: f64) -> Self {
        self.evaluation_holdout_proportion = value;
        self
    }

    #[must_use]
    pub const fn random_seed(mut self, value: u64) -> Self {
        self.random_seed = value;
        self
    }

    #[must_use]
    pub const fn spill_threshold_bytes(mut self, value: u64) -> Self {
        self.spill_threshold_bytes = value;
        self
    }

    #[must_use]
    pub const fn max_reduction_iterations(mut self, value: u64) -> Self {
        self.max_reduction_iterations = value;
        self
    }

    pub fn build(self) -> Result<ExecutorConfig> {
        if self.minibatch_size == 0 {
            return Err(Error::invalid_config(
                "minibatchSize",
                "must be a positive integer",
            ));
        }
        if self.worker_count == 0 {
            return Err(Error::invalid_config(
                "workerCount",
                "must be a positive integer",
            ));
        }
        if self.max_epochs == 0 {
            return Err(Error::invalid_config(
                "maxEpochs",
                "must be a positive integer",
            ));
        }
        if let TrainingTimeBudget::Seconds(0) = self.max_training_seconds {
            return Err(Error::invalid_config(
                "maxTrainingSeconds",
                "must be a positive integer or unlimited",
            ));
        }
        if !(0.0..1.0).contains(&self.evaluation_holdout_proportion) {
            return Err(Error::invalid_config(
                "evaluationHoldoutProportion",
                "must be in [0, 1)",
            ));
        }
        if self.spill_threshold_bytes == 0 {
            return Err(Error::invalid_config(
                "spillThresholdBytes",
                "must be a positive integer",
            ));
        }
        if self.max_reduction_iterations == 0 {
            return Err(Error::invalid_config(
                "maxReductionIterations",
                "must be a positive integer",
            ));
        }

        Ok(ExecutorConfig {
            minibatch_size: self.minibatch_size,
            inference_minibatch_size: self.inference_minibatch_size,
            worker_count: self.worker_count,
            max_epochs: self.max_epochs,
            max_training_seconds: self.max_training_seconds,
            evaluation_holdout_proportion: self.evaluation_holdout_proportion,
            random_seed: self.random_seed,
            spill_threshold_bytes: self.spill_threshold_bytes,
            max_reduction_iterations: self.max_reduction_iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = ExecutorConfig::default();
        assert_eq!(config.minibatch_size(), 64);
        assert_eq!(config.inference_minibatch_size(), 64);
        assert_eq!(config.max_epochs(), 16);
        assert_eq!(config.random_seed(), 1);
        assert_eq!(config.max_reduction_iterations(), 10_000);
    }

    #[test]
    fn zero_minibatch_size_is_rejected() {
        let err = ExecutorConfig::builder()
            .minibatch_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn holdout_proportion_must_be_half_open_unit_interval() {
        assert!(ExecutorConfig::builder()
            .evaluation_holdout_proportion(1.0)
            .build()
            .is_err());
        assert!(ExecutorConfig::builder()
            .evaluation_holdout_proportion(0.5)
            .build()
            .is_ok());
    }

    #[test]
    fn inference_minibatch_size_falls_back_to_training_size_when_unset() {
        let config = ExecutorConfig::builder()
            .minibatch_size(32)
            .build()
            .unwrap();
        assert_eq!(config.inference_minibatch_size(), 32);
    }
}

//! Configuration types for the simulator.

use crate::SimulatorError;
use lockset_coordinator::{BackoffPolicy, CoordinatorConfig};
use lockset_harness::HarnessConfig;
use lockset_simulation::{SimulationConfig, Strategy};
use lockset_types::ResourceId;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// How each worker orders the resources it asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderMode {
    /// A fresh random subset in a random order for every request.
    #[default]
    Permuted,

    /// Worker `i` always asks for `resources[i], resources[i + 1], ...`
    /// (wrapping), so neighbouring workers want shared resources in
    /// opposite positions.
    Antiparallel,
}

/// Configuration for a simulator run.
///
/// Durations are plain integers with their unit in the field name so that the
/// TOML form stays readable.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Names of the shared resources.
    pub resources: Vec<String>,

    /// Number of concurrent workers.
    pub workers: usize,

    /// Resources per request.
    pub subset_size: usize,

    /// Requests per worker.
    pub iterations: u64,

    /// How request orders are chosen.
    pub ordering: OrderMode,

    /// Per-resource try-acquire timeout.
    pub attempt_timeout_ms: u64,

    /// Upper bound of the uniform backoff window.
    pub backoff_max_ms: u64,

    /// Retry bound per request; unbounded when absent.
    pub max_retries: Option<u32>,

    /// Time spent holding a full set.
    pub critical_section_us: u64,

    /// Harness pause between successive blocking locks.
    pub hold_between_ms: u64,

    /// Wall-clock time after which a harness run counts as hung.
    pub hang_bound_ms: u64,

    /// Random seed for workloads and jitter.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            resources: vec!["A".into(), "B".into(), "C".into()],
            workers: 3,
            subset_size: 2,
            iterations: 10_000,
            ordering: OrderMode::Permuted,
            attempt_timeout_ms: 2,
            backoff_max_ms: 1,
            max_retries: None,
            critical_section_us: 0,
            hold_between_ms: 100,
            hang_bound_ms: 2_000,
            seed: 12345,
        }
    }
}

impl SimulatorConfig {
    /// Parse a TOML document; absent fields keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, SimulatorError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Self, SimulatorError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the requests per worker.
    pub fn with_iterations(mut self, iterations: u64) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the ordering mode.
    pub fn with_ordering(mut self, ordering: OrderMode) -> Self {
        self.ordering = ordering;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the harness hang bound.
    pub fn with_hang_bound(mut self, bound: Duration) -> Self {
        self.hang_bound_ms = u64::try_from(bound.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Check that the configuration describes a runnable workload.
    pub fn validate(&self) -> Result<(), SimulatorError> {
        if self.workers == 0 {
            return Err(SimulatorError::Config("workers must be at least 1".into()));
        }
        if self.iterations == 0 {
            return Err(SimulatorError::Config("iterations must be at least 1".into()));
        }
        if self.subset_size == 0 || self.subset_size > self.resources.len() {
            return Err(SimulatorError::Config(format!(
                "subset_size must be between 1 and {} (the number of resources)",
                self.resources.len()
            )));
        }
        let mut names: Vec<&String> = self.resources.iter().collect();
        names.sort();
        names.dedup();
        if names.len() != self.resources.len() {
            return Err(SimulatorError::Config("resource names must be unique".into()));
        }
        Ok(())
    }

    /// Resource ids in configured order.
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.resources.iter().cloned().map(ResourceId::from).collect()
    }

    /// Coordinator settings derived from this configuration.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default()
            .with_attempt_timeout(Duration::from_millis(self.attempt_timeout_ms))
            .with_backoff(BackoffPolicy::Uniform {
                max: Duration::from_millis(self.backoff_max_ms),
            })
            .with_seed(self.seed);
        config.max_retries = self.max_retries;
        config
    }

    /// Harness settings derived from this configuration.
    pub fn harness_config(&self) -> HarnessConfig {
        HarnessConfig::default()
            .with_iterations(self.iterations)
            .with_hold_between(Duration::from_millis(self.hold_between_ms))
            .with_critical_section(Duration::from_micros(self.critical_section_us))
            .with_hang_bound(Duration::from_millis(self.hang_bound_ms))
    }

    /// Deterministic-simulation settings for `strategy` over `orders`.
    ///
    /// Only the blocking strategy pauses between locks; coordinated workers
    /// take each resource as soon as the previous one is held, as they do on
    /// real threads.
    pub fn simulation_config(
        &self,
        strategy: Strategy,
        orders: Vec<Vec<ResourceId>>,
    ) -> SimulationConfig {
        let step_delay = match strategy {
            Strategy::Blocking => Duration::from_millis(self.hold_between_ms),
            Strategy::Coordinated => Duration::ZERO,
        };
        let mut config = SimulationConfig::new(strategy, orders)
            .with_iterations(self.iterations)
            .with_attempt_timeout(Duration::from_millis(self.attempt_timeout_ms))
            .with_backoff(BackoffPolicy::Uniform {
                max: Duration::from_millis(self.backoff_max_ms),
            })
            .with_step_delay(step_delay)
            .with_critical_section(Duration::from_micros(self.critical_section_us))
            .with_seed(self.seed);
        config.max_retries = self.max_retries;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SimulatorConfig::from_toml_str(
            r#"
            workers = 4
            ordering = "antiparallel"
            max_retries = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.ordering, OrderMode::Antiparallel);
        assert_eq!(config.max_retries, Some(10));
        assert_eq!(config.resources, vec!["A", "B", "C"]);
        assert_eq!(config.coordinator_config().max_retries, Some(10));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        assert!(SimulatorConfig::from_toml_str("workers = 0").is_err());
        assert!(SimulatorConfig::from_toml_str("iterations = 0").is_err());
        assert!(SimulatorConfig::default().with_iterations(0).validate().is_err());
        assert!(SimulatorConfig::from_toml_str("subset_size = 4").is_err());
        assert!(SimulatorConfig::from_toml_str(r#"resources = ["A", "A"]"#).is_err());
        assert!(SimulatorConfig::from_toml_str("workers = \"three\"").is_err());
    }

    #[test]
    fn test_derived_configs() {
        let config = SimulatorConfig::default();

        let coordinator = config.coordinator_config();
        assert_eq!(coordinator.attempt_timeout, Duration::from_millis(2));
        assert_eq!(coordinator.seed, Some(12345));

        let harness = config.harness_config();
        assert_eq!(harness.iterations, 10_000);
        assert_eq!(harness.hang_bound, Duration::from_secs(2));
    }
}

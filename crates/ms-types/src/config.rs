//! Loop configuration: the snapshot a run is started with.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{ConfigError, MsResult};
use crate::config_error;

/// File used when `MULTISHOT_CONFIG` is not set.
pub const DEFAULT_CONFIG_FILE: &str = "mloop_config.json";

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "MULTISHOT_CONFIG";

/// What the supervisor does with an "absent" measurement while a run is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentPolicy {
    /// Push it through; the bridge turns it into a bad, NaN-cost record.
    #[default]
    Forward,
    /// Never push it; the waiting iteration keeps waiting for the next shot.
    Drop,
}

/// Which built-in search strategy drives the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerType {
    /// Random exploration mixed with perturbations of the best point.
    #[default]
    ExploreExploit,
    /// Uniform sampling inside the boundaries.
    Random,
}

/// Where the experiment host lives and how hard to try reaching it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentHostConfig {
    pub host: String,
    pub port: u16,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first attempt, timeouts only.
    pub retries: u32,
}

impl Default for ExperimentHostConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 42523,
            timeout_ms: 5_000,
            retries: 20,
        }
    }
}

impl ExperimentHostConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Hyperparameters handed to the optimizer controller.
///
/// Keys this crate does not know about are kept in `extra` so that custom
/// controllers can read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub controller_type: ControllerType,
    pub num_params: usize,
    pub min_boundary: Vec<f64>,
    pub max_boundary: Vec<f64>,
    pub first_params: Option<Vec<f64>>,
    pub max_num_runs: usize,
    pub max_num_runs_without_better_params: usize,
    pub target_cost: Option<f64>,
    /// Probability of a fresh random sample instead of perturbing the best point.
    pub exploration_weight: f64,
    pub seed: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_type: ControllerType::ExploreExploit,
            num_params: 1,
            min_boundary: vec![-3.0],
            max_boundary: vec![3.0],
            first_params: None,
            max_num_runs: 20,
            max_num_runs_without_better_params: 10,
            target_cost: None,
            exploration_weight: 0.3,
            seed: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Configuration snapshot for one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Skip the experiment host and let the analysis step simulate shots.
    pub mock: bool,
    /// Validity flag attached to every returned cost.
    pub bad: bool,
    /// Key path of the analysed quantity, read by the analysis step.
    pub opt_param: Vec<String>,
    /// Report NaN analysis results as absent measurements.
    pub ignore_nans: bool,
    pub absent_policy: AbsentPolicy,
    pub experiment: ExperimentHostConfig,
    pub controller: ControllerConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            mock: true,
            bad: false,
            opt_param: vec!["Test".to_string(), "y".to_string()],
            ignore_nans: false,
            absent_policy: AbsentPolicy::Forward,
            experiment: ExperimentHostConfig::default(),
            controller: ControllerConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn with_mock(mut self, mock: bool) -> Self {
        self.mock = mock;
        self
    }

    pub fn with_bad(mut self, bad: bool) -> Self {
        self.bad = bad;
        self
    }

    pub fn with_absent_policy(mut self, policy: AbsentPolicy) -> Self {
        self.absent_policy = policy;
        self
    }

    pub fn with_experiment(mut self, experiment: ExperimentHostConfig) -> Self {
        self.experiment = experiment;
        self
    }

    pub fn with_controller(mut self, controller: ControllerConfig) -> Self {
        self.controller = controller;
        self
    }

    /// Check the fields a run depends on before it is started.
    pub fn validate(&self) -> MsResult<()> {
        if self.opt_param.is_empty() {
            return Err(config_error!("opt_param must name at least one key"));
        }
        if self.experiment.timeout_ms == 0 {
            return Err(config_error!("experiment.timeout_ms must be positive"));
        }

        let c = &self.controller;
        if c.num_params == 0 {
            return Err(config_error!("controller.num_params must be positive"));
        }
        if c.min_boundary.len() != c.num_params || c.max_boundary.len() != c.num_params {
            return Err(config_error!(
                "boundaries must have num_params={} entries (min: {}, max: {})",
                c.num_params,
                c.min_boundary.len(),
                c.max_boundary.len()
            ));
        }
        for (i, (lo, hi)) in c.min_boundary.iter().zip(&c.max_boundary).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(config_error!(
                    "boundary {i} is not a finite range: [{lo}, {hi}]"
                ));
            }
        }
        if let Some(first) = &c.first_params {
            if first.len() != c.num_params {
                return Err(config_error!(
                    "first_params has {} entries, expected {}",
                    first.len(),
                    c.num_params
                ));
            }
            let inside = first
                .iter()
                .zip(c.min_boundary.iter().zip(&c.max_boundary))
                .all(|(v, (lo, hi))| v >= lo && v <= hi);
            if !inside {
                return Err(config_error!("first_params lies outside the boundaries"));
            }
        }
        if c.max_num_runs == 0 {
            return Err(config_error!("controller.max_num_runs must be positive"));
        }
        if !(0.0..=1.0).contains(&c.exploration_weight) {
            return Err(config_error!(
                "controller.exploration_weight must be within [0, 1], got {}",
                c.exploration_weight
            ));
        }
        Ok(())
    }

    /// Read the configuration at `path`, writing the defaults there first if
    /// the file does not exist yet.
    pub fn load_or_create(path: impl AsRef<Path>) -> MsResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| ConfigError::ParseFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `MULTISHOT_CONFIG`, or the default file.
    pub fn from_env_or_default() -> MsResult<Self> {
        let path =
            std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_or_create(path)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> MsResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

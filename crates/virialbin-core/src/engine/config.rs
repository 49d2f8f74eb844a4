use crate::core::bins::StoreShape;
use crate::core::sim::Classifier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Global step count at which the first in-run reweighting happens.
pub const DEFAULT_FIRST_REWEIGHT_STEP: u64 = 100_000;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{parameter}': {reason}")]
    Invalid {
        parameter: &'static str,
        reason: String,
    },

    #[error("Shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        expected: StoreShape,
        found: StoreShape,
    },
}

/// When sampling weights are recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReweightPolicy {
    /// Keep the weights the run started with.
    Disabled,
    /// Recompute once, after all workers have joined.
    AtEnd,
    /// Recompute during the run at geometrically spaced step counts, and again at the end.
    #[default]
    Adaptive,
}

impl ReweightPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            ReweightPolicy::Disabled => "disabled",
            ReweightPolicy::AtEnd => "at-end",
            ReweightPolicy::Adaptive => "adaptive",
        }
    }
}

impl FromStr for ReweightPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(ReweightPolicy::Disabled),
            "at-end" => Ok(ReweightPolicy::AtEnd),
            "adaptive" => Ok(ReweightPolicy::Adaptive),
            other => Err(invalid(
                "reweight",
                format!("unknown policy '{other}' (expected disabled, at-end or adaptive)"),
            )),
        }
    }
}

impl fmt::Display for ReweightPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How worker threads share their statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// One store for all workers, updated under per-bin locks.
    Shared,
    /// One private store per worker, merged after the join.
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub run_name: String,
    pub output_dir: PathBuf,
    pub model_size: usize,
    pub steps_per_worker: u64,
    pub workers: usize,
    pub seeds: Vec<u64>,
    pub covariance: bool,
    pub cost_ratio: f64,
    pub classifier: Classifier,
    pub weight_override: Option<f64>,
    pub reweight: ReweightPolicy,
    pub share_data: bool,
    pub load_weights: bool,
    pub first_reweight_step: u64,
}

impl RunConfig {
    pub fn shape(&self) -> StoreShape {
        StoreShape::for_model(
            self.model_size,
            self.classifier.key_len(),
            self.covariance,
        )
    }

    /// Total number of steps across all workers.
    pub fn total_steps(&self) -> u64 {
        self.steps_per_worker * self.workers as u64
    }

    /// Whether weights are recomputed at all, given whether a table was loaded at startup.
    ///
    /// An explicit weight override or a loaded table pins the weights for the whole run.
    pub fn reweight_active(&self, weights_loaded: bool) -> bool {
        self.reweight != ReweightPolicy::Disabled
            && self.weight_override.is_none()
            && !weights_loaded
    }

    /// Shared storage is required whenever weights change during the run.
    pub fn storage_mode(&self, weights_loaded: bool) -> StorageMode {
        let in_run = self.reweight == ReweightPolicy::Adaptive && self.reweight_active(weights_loaded);
        if in_run || self.share_data {
            StorageMode::Shared
        } else {
            StorageMode::Local
        }
    }

    /// The seed slice handed to worker `index`, or `None` when seeds come from entropy.
    pub fn worker_seeds(&self, index: usize) -> Option<&[u64]> {
        if self.seeds.is_empty() {
            return None;
        }
        let per_worker = self.seeds.len() / self.workers;
        self.seeds.get(index * per_worker..(index + 1) * per_worker)
    }
}

#[derive(Default)]
pub struct RunConfigBuilder {
    run_name: Option<String>,
    output_dir: Option<PathBuf>,
    model_size: Option<usize>,
    steps_per_worker: Option<u64>,
    workers: Option<usize>,
    seeds: Vec<u64>,
    covariance: bool,
    cost_ratio: Option<f64>,
    classifier: Option<Classifier>,
    weight_override: Option<f64>,
    reweight: Option<ReweightPolicy>,
    share_data: bool,
    load_weights: Option<bool>,
    first_reweight_step: Option<u64>,
}

impl RunConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = Some(name.into());
        self
    }
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }
    pub fn model_size(mut self, n: usize) -> Self {
        self.model_size = Some(n);
        self
    }
    pub fn steps_per_worker(mut self, steps: u64) -> Self {
        self.steps_per_worker = Some(steps);
        self
    }
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }
    pub fn seeds(mut self, seeds: Vec<u64>) -> Self {
        self.seeds = seeds;
        self
    }
    pub fn covariance(mut self, enabled: bool) -> Self {
        self.covariance = enabled;
        self
    }
    pub fn cost_ratio(mut self, ratio: f64) -> Self {
        self.cost_ratio = Some(ratio);
        self
    }
    pub fn classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Some(classifier);
        self
    }
    pub fn weight_override(mut self, weight: Option<f64>) -> Self {
        self.weight_override = weight;
        self
    }
    pub fn reweight(mut self, policy: ReweightPolicy) -> Self {
        self.reweight = Some(policy);
        self
    }
    pub fn share_data(mut self, shared: bool) -> Self {
        self.share_data = shared;
        self
    }
    pub fn load_weights(mut self, load: bool) -> Self {
        self.load_weights = Some(load);
        self
    }
    pub fn first_reweight_step(mut self, step: u64) -> Self {
        self.first_reweight_step = Some(step);
        self
    }

    pub fn build(self) -> Result<RunConfig, ConfigError> {
        let model_size = self
            .model_size
            .ok_or(ConfigError::MissingParameter("model_size"))?;
        if model_size < 2 {
            return Err(invalid("model_size", format!("{model_size} is below 2")));
        }
        let steps_per_worker = self
            .steps_per_worker
            .ok_or(ConfigError::MissingParameter("steps_per_worker"))?;
        if steps_per_worker == 0 {
            return Err(invalid("steps_per_worker", "must be positive".into()));
        }
        let workers = self.workers.unwrap_or(1);
        if workers == 0 {
            return Err(invalid("workers", "must be positive".into()));
        }
        if !self.seeds.is_empty() && self.seeds.len() < workers {
            return Err(invalid(
                "seeds",
                format!(
                    "{} seeds cannot be split across {} workers",
                    self.seeds.len(),
                    workers
                ),
            ));
        }
        let cost_ratio = self.cost_ratio.unwrap_or(1.0);
        if !(cost_ratio.is_finite() && cost_ratio > 0.0) {
            return Err(invalid("cost_ratio", format!("{cost_ratio} is not positive")));
        }
        if let Some(w) = self.weight_override
            && !(w > 0.0 && w <= 1.0)
        {
            return Err(invalid("weight_override", format!("{w} is outside (0, 1]")));
        }
        let first_reweight_step = self
            .first_reweight_step
            .unwrap_or(DEFAULT_FIRST_REWEIGHT_STEP);
        if first_reweight_step == 0 {
            return Err(invalid("first_reweight_step", "must be positive".into()));
        }
        let classifier = self
            .classifier
            .unwrap_or_else(|| Classifier::for_model_size(model_size));

        Ok(RunConfig {
            run_name: self
                .run_name
                .ok_or(ConfigError::MissingParameter("run_name"))?,
            output_dir: self.output_dir.unwrap_or_else(|| PathBuf::from(".")),
            model_size,
            steps_per_worker,
            workers,
            seeds: self.seeds,
            covariance: self.covariance,
            cost_ratio,
            classifier,
            weight_override: self.weight_override,
            reweight: self.reweight.unwrap_or_default(),
            share_data: self.share_data,
            load_weights: self.load_weights.unwrap_or(true),
            first_reweight_step,
        })
    }
}

fn invalid(parameter: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { parameter, reason }
}

use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use virialbin::core::sim::Classifier;
use virialbin::engine::config::{ReweightPolicy, RunConfig, RunConfigBuilder};

const DEFAULT_RUN_NAME: &str = "hs";

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialSamplingConfig {
    points: Option<usize>,
    steps: Option<u64>,
    workers: Option<usize>,
    seeds: Option<Vec<u64>>,
    classifier: Option<Classifier>,
    covariance: Option<bool>,
    share_data: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialReweightingConfig {
    policy: Option<ReweightPolicy>,
    cost_ratio: Option<f64>,
    weight: Option<f64>,
    first_step: Option<u64>,
    load_weights: Option<bool>,
}

/// A run configuration as read from a TOML file, before CLI overrides.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialRunConfig {
    name: Option<String>,
    output_dir: Option<PathBuf>,
    sampling: Option<PartialSamplingConfig>,
    reweighting: Option<PartialReweightingConfig>,
}

impl PartialRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Loads the file named by `--config`, or starts from an empty configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_file)
    }

    /// Resolves the final run configuration. Precedence, highest first: CLI flags,
    /// `-S` settings, the configuration file, built-in defaults.
    pub fn merge_with_cli(mut self, args: &RunArgs) -> Result<RunConfig> {
        self.apply_set_values(&args.set_values)?;

        let sampling = self.sampling.take().unwrap_or_default();
        let reweighting = self.reweighting.take().unwrap_or_default();

        let points = args.points.or(sampling.points).ok_or_else(|| {
            CliError::Config(
                "A value for 'sampling.points' is required either in the config file or via --points."
                    .to_string(),
            )
        })?;
        let steps = args.steps.or(sampling.steps).ok_or_else(|| {
            CliError::Config(
                "A value for 'sampling.steps' is required either in the config file or via --steps."
                    .to_string(),
            )
        })?;
        let workers = args
            .workers
            .or(sampling.workers)
            .unwrap_or_else(default_workers);
        let seeds = if args.seeds.is_empty() {
            sampling.seeds.unwrap_or_default()
        } else {
            args.seeds.clone()
        };

        let mut builder = RunConfigBuilder::new()
            .run_name(
                args.name
                    .clone()
                    .or(self.name)
                    .unwrap_or_else(|| DEFAULT_RUN_NAME.to_string()),
            )
            .output_dir(
                args.output_dir
                    .clone()
                    .or(self.output_dir)
                    .unwrap_or_else(|| PathBuf::from(".")),
            )
            .model_size(points)
            .steps_per_worker(steps)
            .workers(workers)
            .seeds(seeds)
            .covariance(args.covariance || sampling.covariance.unwrap_or(false))
            .share_data(args.share_data || sampling.share_data.unwrap_or(false))
            .weight_override(args.weight.or(reweighting.weight))
            .load_weights(!args.no_load_weights && reweighting.load_weights.unwrap_or(true));

        if let Some(classifier) = args.classifier.or(sampling.classifier) {
            builder = builder.classifier(classifier);
        }
        if let Some(policy) = args.reweight.or(reweighting.policy) {
            builder = builder.reweight(policy);
        }
        if let Some(ratio) = args.cost_ratio.or(reweighting.cost_ratio) {
            builder = builder.cost_ratio(ratio);
        }
        if let Some(step) = reweighting.first_step {
            builder = builder.first_reweight_step(step);
        }

        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let (key, value) = kv_pair.split_once('=').ok_or_else(|| {
                CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                ))
            })?;

            match key {
                "name" => self.name = Some(value.to_string()),
                "output-dir" => self.output_dir = Some(PathBuf::from(value)),
                "sampling.points" => {
                    self.sampling.get_or_insert_with(Default::default).points = Some(parse(key, value)?)
                }
                "sampling.steps" => {
                    self.sampling.get_or_insert_with(Default::default).steps = Some(parse(key, value)?)
                }
                "sampling.workers" => {
                    self.sampling.get_or_insert_with(Default::default).workers = Some(parse(key, value)?)
                }
                "sampling.seeds" => {
                    let seeds = value
                        .split(',')
                        .map(|s| parse(key, s.trim()))
                        .collect::<Result<Vec<u64>>>()?;
                    self.sampling.get_or_insert_with(Default::default).seeds = Some(seeds);
                }
                "sampling.classifier" => {
                    self.sampling.get_or_insert_with(Default::default).classifier = Some(parse(key, value)?)
                }
                "sampling.covariance" => {
                    self.sampling.get_or_insert_with(Default::default).covariance = Some(parse(key, value)?)
                }
                "sampling.share-data" => {
                    self.sampling.get_or_insert_with(Default::default).share_data = Some(parse(key, value)?)
                }
                "reweighting.policy" => {
                    self.reweighting.get_or_insert_with(Default::default).policy = Some(parse(key, value)?)
                }
                "reweighting.cost-ratio" => {
                    self.reweighting.get_or_insert_with(Default::default).cost_ratio =
                        Some(parse(key, value)?)
                }
                "reweighting.weight" => {
                    self.reweighting.get_or_insert_with(Default::default).weight = Some(parse(key, value)?)
                }
                "reweighting.first-step" => {
                    self.reweighting.get_or_insert_with(Default::default).first_step =
                        Some(parse(key, value)?)
                }
                "reweighting.load-weights" => {
                    self.reweighting.get_or_insert_with(Default::default).load_weights =
                        Some(parse(key, value)?)
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: {}", key, value)))
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, usize::from)
}

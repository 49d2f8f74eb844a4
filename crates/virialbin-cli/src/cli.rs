use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use virialbin::core::sim::Classifier;
use virialbin::engine::config::ReweightPolicy;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "The virialbin developers",
    version,
    about = "virialbin - Mayer-sampling estimates of virial coefficients with binned statistics and adaptive reweighting.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Number of threads used to merge statistics.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a hard-sphere sampling job and write its raw statistics.
    Run(RunArgs),
    /// Merge raw statistics files into one.
    Merge(MergeArgs),
    /// Print the per-order estimates of one or more raw statistics files.
    Report(ReportArgs),
    /// Recompute sampling weights from raw statistics files.
    Reweight(ReweightArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Optional run configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    // --- Run Identity ---
    /// Run name; output files are named `<NAME><N>_run<K>_raw.dat`.
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Directory for raw and weight files.
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    // --- Sampling ---
    /// Number of points in the cluster integral.
    #[arg(short = 'n', long, value_name = "INT")]
    pub points: Option<usize>,

    /// Steps taken by each worker.
    #[arg(short, long, value_name = "INT")]
    pub steps: Option<u64>,

    /// Number of worker threads.
    #[arg(short, long, value_name = "INT")]
    pub workers: Option<usize>,

    /// Comma-separated RNG seeds, split evenly across workers.
    #[arg(long, value_name = "SEEDS", value_delimiter = ',')]
    pub seeds: Vec<u64>,

    /// Bin classifier (single, edges, edges-degree, edges-triangles).
    #[arg(long, value_name = "NAME")]
    pub classifier: Option<Classifier>,

    /// Track cross moments between orders.
    #[arg(long)]
    pub covariance: bool,

    /// Keep one shared store for all workers even without in-run reweighting.
    #[arg(long)]
    pub share_data: bool,

    // --- Reweighting ---
    /// Use this nominal weight for every bin and disable reweighting.
    #[arg(long, value_name = "FLOAT")]
    pub weight: Option<f64>,

    /// When to recompute weights (disabled, at-end, adaptive).
    #[arg(long, value_name = "POLICY")]
    pub reweight: Option<ReweightPolicy>,

    /// Cost of one measurement relative to one sampling step.
    #[arg(long, value_name = "FLOAT")]
    pub cost_ratio: Option<f64>,

    /// Ignore an existing weight file for this run name.
    #[arg(long)]
    pub no_load_weights: bool,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S sampling.steps=1000000
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `merge` subcommand.
#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Raw statistics files to merge.
    #[arg(required = true, value_name = "FILES")]
    pub inputs: Vec<PathBuf>,

    /// Path of the merged raw file.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Load every input into memory instead of streaming through them.
    #[arg(long)]
    pub in_memory: bool,
}

/// Arguments for the `report` subcommand.
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Raw statistics files, combined before reporting.
    #[arg(required = true, value_name = "FILES")]
    pub inputs: Vec<PathBuf>,

    /// Integral of the reference distribution. Defaults to the hard-sphere chain value.
    #[arg(long, value_name = "FLOAT")]
    pub reference: Option<f64>,

    /// Cost ratio used for the reported time fraction.
    #[arg(long, value_name = "FLOAT", default_value_t = 1.0)]
    pub cost_ratio: f64,
}

/// Arguments for the `reweight` subcommand.
#[derive(Args, Debug)]
pub struct ReweightArgs {
    /// Raw statistics files, combined before reweighting.
    #[arg(required = true, value_name = "FILES")]
    pub inputs: Vec<PathBuf>,

    /// Path of the weight file to write.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Cost of one measurement relative to one sampling step.
    #[arg(long, value_name = "FLOAT", default_value_t = 1.0)]
    pub cost_ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_arguments_parse_into_typed_values() {
        let cli = Cli::parse_from([
            "virialbin",
            "run",
            "-n",
            "4",
            "--steps",
            "1000",
            "--seeds",
            "1,2,3",
            "--classifier",
            "edges-degree",
            "--reweight",
            "at-end",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("Expected 'run' subcommand");
        };
        assert_eq!(args.points, Some(4));
        assert_eq!(args.seeds, vec![1, 2, 3]);
        assert_eq!(args.classifier, Some(Classifier::EdgesDegree));
        assert_eq!(args.reweight, Some(ReweightPolicy::AtEnd));
    }

    #[test]
    fn unknown_classifier_is_rejected() {
        let result = Cli::try_parse_from(["virialbin", "run", "--classifier", "rings"]);
        assert!(result.is_err());
    }

    #[test]
    fn merge_requires_an_output() {
        assert!(Cli::try_parse_from(["virialbin", "merge", "a_raw.dat"]).is_err());
        let cli = Cli::parse_from(["virialbin", "merge", "a_raw.dat", "b_raw.dat", "-o", "c_raw.dat"]);
        let Commands::Merge(args) = cli.command else {
            panic!("Expected 'merge' subcommand");
        };
        assert_eq!(args.inputs.len(), 2);
        assert!(!args.in_memory);
    }
}

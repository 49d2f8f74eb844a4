use super::report::ReportTable;
use crate::cli::RunArgs;
use crate::config::PartialRunConfig;
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use tracing::{info, warn};
use virialbin::engine::cancel::CancelToken;
use virialbin::engine::progress::ProgressReporter;
use virialbin::workflows::run::{self, RunResult};

pub async fn run(args: RunArgs) -> Result<()> {
    info!("Starting 'run' command...");

    let config = PartialRunConfig::load(args.config.as_deref())?.merge_with_cli(&args)?;
    std::fs::create_dir_all(&config.output_dir)?;
    info!(
        "Resolved run '{}': {} points, {} workers x {} steps, reweighting {}.",
        config.run_name, config.model_size, config.workers, config.steps_per_worker, config.reweight
    );

    let cancel = CancelToken::new();
    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing the current steps and saving statistics.");
                cancel.cancel();
            }
        })
    };

    let handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(handler.get_callback());

    let result = tokio::task::block_in_place(|| run::run_hard_spheres(&config, &cancel, &reporter));
    signal_task.abort();
    handler.clear();

    let result = result?;
    print_summary(&result, config.cost_ratio);
    Ok(())
}

fn print_summary(result: &RunResult, cost_ratio: f64) {
    println!("\n--- Run Summary ({}) ---", result.shape);
    match &result.report {
        Some(report) => {
            print!(
                "{}",
                ReportTable {
                    report,
                    n: result.model_size,
                    cost_ratio,
                }
            );
            if let Some(difficulty) = result.difficulty() {
                println!("difficulty {:.4e}", difficulty);
            }
        }
        None => println!("No samples were measured."),
    }
    println!(
        "{} steps in {:.2}s",
        result.total_steps,
        result.elapsed.as_secs_f64()
    );
    println!("Raw statistics: {}", result.raw_path.display());
    if let Some(path) = &result.weights_path {
        println!("Weights: {}", path.display());
    }
    if let Some(summary) = &result.reweight {
        println!("{}", summary);
    }
    if result.interrupted {
        println!("⚠️  Run was interrupted; statistics cover the completed steps only.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut args = vec!["virialbin", "run"];
        args.extend_from_slice(extra);
        match Cli::parse_from(args).command {
            Commands::Run(args) => args,
            _ => panic!("Expected 'run' subcommand"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_command_writes_numbered_raw_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let out_str = out.to_str().unwrap();
        let args = || {
            run_args(&[
                "-n", "3", "-s", "500", "-w", "2", "--seeds", "1,2", "--reweight", "at-end",
                "-o", out_str,
            ])
        };

        run(args()).await.unwrap();
        run(args()).await.unwrap();

        assert!(out.join("hs3_run1_raw.dat").exists());
        assert!(out.join("hs3_run2_raw.dat").exists());
        assert!(out.join("hs3_weights.dat").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_command_reports_configuration_errors() {
        let dir = tempfile::tempdir().unwrap();
        let args = run_args(&["-n", "3", "-o", dir.path().to_str().unwrap()]);
        assert!(run(args).await.is_err());
    }
}

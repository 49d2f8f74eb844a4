use crate::core::bins::StoreShape;
use crate::core::io::naming::{create_run_file, weights_path};
use crate::core::io::raw::write_raw_to;
use crate::core::io::weights::{read_weights, write_weights};
use crate::core::sim::{HardSphereChain, Simulation};
use crate::engine::cancel::CancelToken;
use crate::engine::config::{ConfigError, ReweightPolicy, RunConfig, StorageMode};
use crate::engine::error::VirialError;
use crate::engine::merge::merge_all;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::report::{Report, finalize};
use crate::engine::reweight::{ReweightSummary, recompute_weights_with_summary};
use crate::engine::shared::SharedStore;
use crate::engine::store::AggregationStore;
use crate::engine::weights::{WeightHandle, WeightTable};
use crate::engine::worker::{
    ReweightSchedule, SamplingWorker, StepCounters, WorkerContext, WorkerOutcome,
};
use rand::Rng;
use std::io::BufWriter;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug)]
pub struct RunResult {
    pub model_size: usize,
    pub shape: StoreShape,
    /// `None` when no sample was measured (an early interruption, for example).
    pub report: Option<Report>,
    pub raw_path: PathBuf,
    pub weights_path: Option<PathBuf>,
    pub reweight: Option<ReweightSummary>,
    pub total_steps: u64,
    pub elapsed: Duration,
    /// The seed slice each worker was started with.
    pub seeds: Vec<Vec<u64>>,
    pub interrupted: bool,
}

impl RunResult {
    /// Combined standard error scaled by the square root of the wall time, in
    /// sqrt(seconds). Lower is better; comparable across runs of different length.
    pub fn difficulty(&self) -> Option<f64> {
        self.report
            .as_ref()
            .map(|r| r.combined().1 * self.elapsed.as_secs_f64().sqrt())
    }
}

/// Runs a multi-threaded sampling job and persists its statistics.
///
/// `factory` builds one simulation per worker index. Raw data is always written to a new
/// auto-numbered file in the output directory; weights are written when reweighting is
/// active for this run.
///
/// # Arguments
///
/// * `config` - Validated run parameters.
/// * `factory` - Builds the simulation for a worker index.
/// * `cancel` - Polled by every worker on every step.
/// * `reporter` - Receives phase and step progress from all workers.
///
/// # Return
///
/// The run's report and the paths it wrote. An interrupted run still merges, persists and
/// reports the steps its workers completed. A worker that panics is logged and left out;
/// the run fails only if every worker panics.
#[instrument(skip_all, name = "sampling_workflow")]
pub fn run<S, F>(
    config: &RunConfig,
    factory: F,
    cancel: &CancelToken,
    reporter: &ProgressReporter,
) -> Result<RunResult, VirialError>
where
    S: Simulation,
    F: Fn(usize) -> Result<S, VirialError>,
{
    let started = Instant::now();
    let shape = config.shape();

    // === Phase 0: Preparation ===
    reporter.report(Progress::PhaseStart {
        name: "Preparation",
    });
    let simulations = (0..config.workers)
        .map(&factory)
        .collect::<Result<Vec<_>, _>>()?;
    let reference_integral = check_simulations(config, &simulations)?;
    let seeds = worker_seeds(config);

    let (initial, weights_loaded) = load_initial_weights(config, shape)?;
    let reweight_active = config.reweight_active(weights_loaded);
    let mode = config.storage_mode(weights_loaded);
    info!(
        workers = config.workers,
        steps_per_worker = config.steps_per_worker,
        %shape,
        classifier = %config.classifier,
        ?mode,
        reweight_active,
        "Starting sampling run"
    );
    reporter.report(Progress::PhaseFinish);

    // === Phase 1: Sampling ===
    let handle = WeightHandle::new(initial);
    let shared = match mode {
        StorageMode::Shared => Some(SharedStore::new(shape)),
        StorageMode::Local => None,
    };
    let outcomes = sample(
        config,
        simulations,
        &seeds,
        shared.as_ref(),
        &handle,
        reweight_active,
        cancel,
        reporter,
    )?;

    // === Phase 2: Merge ===
    let total_steps: u64 = outcomes.iter().map(|o| o.steps_completed).sum();
    let interrupted = outcomes.iter().any(|o| o.interrupted);
    if interrupted {
        warn!(
            total_steps,
            "Run interrupted; keeping the steps completed so far"
        );
    }
    let store = match shared {
        Some(shared) => shared.into_store(),
        None => merge_all(shape, outcomes.into_iter().filter_map(|o| o.store).collect())?,
    };
    info!(bins = store.len(), total_steps, "Merged worker statistics");

    // === Phase 3: Persist raw statistics ===
    let (raw_path, file) = create_run_file(&config.output_dir, &config.run_name, config.model_size)?;
    write_raw_to(&store, total_steps, BufWriter::new(file), &raw_path)?;
    info!("Wrote raw statistics to '{}'", raw_path.display());

    // === Phase 4: Reweighting ===
    let (weights_path, reweight) = if reweight_active && total_steps > 0 {
        persist_weights(config, &store, total_steps, &handle)?
    } else {
        (None, None)
    };

    // === Phase 5: Report ===
    let report = finalize(&store, total_steps, reference_integral);
    let report = if report.samples > 0 {
        Some(report)
    } else {
        warn!("No samples were measured; nothing to report");
        None
    };

    let elapsed = started.elapsed();
    info!(
        elapsed_secs = elapsed.as_secs_f64(),
        "Run complete: {} steps",
        total_steps
    );
    Ok(RunResult {
        model_size: config.model_size,
        shape,
        report,
        raw_path,
        weights_path,
        reweight,
        total_steps,
        elapsed,
        seeds,
        interrupted,
    })
}

/// [`run`] with the hard-sphere chain simulation.
pub fn run_hard_spheres(
    config: &RunConfig,
    cancel: &CancelToken,
    reporter: &ProgressReporter,
) -> Result<RunResult, VirialError> {
    let n = config.model_size;
    run(
        config,
        |_| {
            HardSphereChain::new(n).map_err(|e| {
                VirialError::from(ConfigError::Invalid {
                    parameter: "model_size",
                    reason: e.to_string(),
                })
            })
        },
        cancel,
        reporter,
    )
}

fn check_simulations<S: Simulation>(config: &RunConfig, simulations: &[S]) -> Result<f64, VirialError> {
    let first = simulations
        .first()
        .ok_or(ConfigError::MissingParameter("workers"))?;
    if let Some(sim) = simulations
        .iter()
        .find(|s| s.point_count() != config.model_size)
    {
        return Err(ConfigError::Invalid {
            parameter: "model_size",
            reason: format!(
                "simulation has {} points, run expects {}",
                sim.point_count(),
                config.model_size
            ),
        }
        .into());
    }
    Ok(first.reference_integral())
}

fn worker_seeds(config: &RunConfig) -> Vec<Vec<u64>> {
    if config.seeds.is_empty() {
        let mut rng = rand::thread_rng();
        let seeds: Vec<Vec<u64>> = (0..config.workers).map(|_| vec![rng.r#gen()]).collect();
        info!(?seeds, "Drew worker seeds from entropy");
        return seeds;
    }
    (0..config.workers)
        .map(|i| config.worker_seeds(i).map(<[u64]>::to_vec).unwrap_or_default())
        .collect()
}

/// The weight table the run starts with, and whether it came from a weight file.
fn load_initial_weights(
    config: &RunConfig,
    shape: StoreShape,
) -> Result<(WeightTable, bool), VirialError> {
    if let Some(weight) = config.weight_override {
        info!(weight, "Using explicit nominal weight; reweighting disabled");
        return Ok((WeightTable::uniform(weight), false));
    }
    if !config.load_weights {
        return Ok((WeightTable::default(), false));
    }
    let path = weights_path(&config.output_dir, &config.run_name, config.model_size);
    match read_weights(&path, shape) {
        Ok(table) => {
            info!(
                bins = table.len(),
                "Loaded weights from '{}'; reweighting disabled",
                path.display()
            );
            Ok((table, true))
        }
        Err(e) if e.is_not_found() => {
            debug!("No weight file at '{}'", path.display());
            Ok((WeightTable::default(), false))
        }
        Err(e) if e.is_dimension_mismatch() => Err(e),
        Err(e) => {
            warn!("Ignoring unreadable weight file: {}", e);
            Ok((WeightTable::default(), false))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn sample<S: Simulation>(
    config: &RunConfig,
    simulations: Vec<S>,
    seeds: &[Vec<u64>],
    shared: Option<&SharedStore>,
    handle: &WeightHandle,
    reweight_active: bool,
    cancel: &CancelToken,
    reporter: &ProgressReporter,
) -> Result<Vec<WorkerOutcome>, VirialError> {
    reporter.report(Progress::PhaseStart { name: "Sampling" });
    reporter.report(Progress::TaskStart {
        total_steps: config.total_steps(),
    });

    let counters = StepCounters::new(config.workers);
    let ctx = WorkerContext {
        classifier: config.classifier,
        shape: config.shape(),
        shared,
        weights: handle,
        counters: &counters,
        cancel,
        reporter,
    };
    let in_run = reweight_active && config.reweight == ReweightPolicy::Adaptive;
    let schedule = match shared {
        Some(store) if in_run => Some(ReweightSchedule::new(
            store,
            handle,
            config.cost_ratio,
            config.first_reweight_step,
        )),
        _ => None,
    };

    let steps = config.steps_per_worker;
    let outcomes = thread::scope(|s| {
        let mut schedule = schedule;
        let handles: Vec<_> = simulations
            .into_iter()
            .enumerate()
            .map(|(index, simulation)| {
                let worker_seeds = seeds.get(index).cloned().unwrap_or_default();
                let schedule = if index == 0 { schedule.take() } else { None };
                s.spawn(move || {
                    let mut worker = SamplingWorker::new(index, simulation, worker_seeds, ctx);
                    if let Some(schedule) = schedule {
                        worker = worker.with_schedule(schedule);
                    }
                    worker.run(steps)
                })
            })
            .collect();
        handles
            .into_iter()
            .enumerate()
            .map(|(index, h)| {
                h.join().unwrap_or_else(|_| {
                    // Samples already in a shared store survive, and so do their steps.
                    let steps = if shared.is_some() { counters.get(index) } else { 0 };
                    error!(
                        worker = index,
                        steps, "Sampling worker panicked; continuing with the other workers"
                    );
                    WorkerOutcome::failed(index, steps, seeds.get(index).cloned().unwrap_or_default())
                })
            })
            .collect::<Vec<_>>()
    });
    if outcomes.iter().all(|o| o.failed) {
        return Err(VirialError::Internal("every sampling worker panicked".into()));
    }

    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);
    Ok(outcomes)
}

fn persist_weights(
    config: &RunConfig,
    store: &AggregationStore,
    total_steps: u64,
    handle: &WeightHandle,
) -> Result<(Option<PathBuf>, Option<ReweightSummary>), VirialError> {
    let prior = handle.load();
    let outcome =
        match recompute_weights_with_summary(store, total_steps, config.cost_ratio, Some(prior.as_ref())) {
            Ok(outcome) => outcome,
            Err(VirialError::EmptyStore) => {
                warn!("No samples were measured; keeping the current weights");
                return Ok((None, None));
            }
            Err(e) => return Err(e),
        };
    let path = weights_path(&config.output_dir, &config.run_name, config.model_size);
    write_weights(&outcome.table, store.shape(), &path)?;
    info!("Wrote {} weights to '{}'", outcome.table.len(), path.display());
    Ok((Some(path), Some(outcome.summary)))
}

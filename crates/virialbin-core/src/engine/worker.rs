use super::cancel::CancelToken;
use super::progress::{Progress, ProgressReporter};
use super::reweight::recompute_weights_with_summary;
use super::shared::SharedStore;
use super::store::AggregationStore;
use super::weights::{WeightCursor, WeightHandle};
use crate::core::bins::{BinKey, StoreShape};
use crate::core::sim::{Classifier, Simulation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Per-worker step counters, summed for the run-wide step count.
#[derive(Debug)]
pub struct StepCounters(Vec<AtomicU64>);

impl StepCounters {
    pub fn new(workers: usize) -> Self {
        Self((0..workers).map(|_| AtomicU64::new(0)).collect())
    }

    #[inline]
    pub fn increment(&self, worker: usize) {
        self.0[worker].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, worker: usize) -> u64 {
        self.0[worker].load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.0.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

/// Builds a worker RNG from its seed slice. Equal slices give equal streams.
pub fn rng_from_seeds(seeds: &[u64]) -> StdRng {
    let mut bytes = [0u8; 32];
    for (i, seed) in seeds.iter().enumerate() {
        let offset = (i % 4) * 8;
        let mixed = seed.rotate_left((i / 4) as u32 * 17);
        for (b, s) in bytes[offset..offset + 8].iter_mut().zip(mixed.to_le_bytes()) {
            *b ^= s;
        }
    }
    StdRng::from_seed(bytes)
}

/// One classified sample, ready to be recorded.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'v> {
    pub key: &'v BinKey,
    pub screened: bool,
    pub values: &'v [f64],
}

enum StoreTarget<'a> {
    Local(AggregationStore),
    Shared(&'a SharedStore),
}

impl StoreTarget<'_> {
    #[inline]
    fn record(&mut self, obs: &Observation) {
        match self {
            StoreTarget::Local(store) => store.record(obs.key, obs.values, obs.screened),
            StoreTarget::Shared(store) => store.record(obs.key, obs.values, obs.screened),
        }
    }
}

/// In-run weight recomputation, driven by a single worker.
///
/// Fires when the run-wide step count first reaches the threshold, then each time it
/// doubles.
pub struct ReweightSchedule<'a> {
    store: &'a SharedStore,
    handle: &'a WeightHandle,
    cost_ratio: f64,
    next: u64,
}

impl<'a> ReweightSchedule<'a> {
    pub fn new(store: &'a SharedStore, handle: &'a WeightHandle, cost_ratio: f64, first: u64) -> Self {
        Self {
            store,
            handle,
            cost_ratio,
            next: first,
        }
    }

    pub fn next_step(&self) -> u64 {
        self.next
    }

    fn poll(&mut self, total_steps: u64) {
        if total_steps < self.next {
            return;
        }
        let prior = self.handle.load();
        match recompute_weights_with_summary(self.store, total_steps, self.cost_ratio, Some(prior.as_ref())) {
            Ok(outcome) => {
                info!(step = total_steps, "Updated sampling weights");
                self.handle.replace(outcome.table);
            }
            Err(e) => warn!(step = total_steps, "Skipping reweighting: {}", e),
        }
        self.next = total_steps * 2;
    }
}

/// Everything a worker shares with the rest of the run.
#[derive(Clone, Copy)]
pub struct WorkerContext<'a> {
    pub classifier: Classifier,
    pub shape: StoreShape,
    pub shared: Option<&'a SharedStore>,
    pub weights: &'a WeightHandle,
    pub counters: &'a StepCounters,
    pub cancel: &'a CancelToken,
    pub reporter: &'a ProgressReporter<'a>,
}

#[derive(Debug)]
pub struct WorkerOutcome {
    pub index: usize,
    pub steps_completed: u64,
    pub interrupted: bool,
    /// Set when the worker thread panicked. Its private store is lost.
    pub failed: bool,
    /// The worker's private store; `None` when it wrote into a shared store.
    pub store: Option<AggregationStore>,
    pub seeds: Vec<u64>,
}

impl WorkerOutcome {
    /// The outcome of a worker whose thread panicked after `steps_completed` steps.
    pub fn failed(index: usize, steps_completed: u64, seeds: Vec<u64>) -> Self {
        Self {
            index,
            steps_completed,
            interrupted: true,
            failed: true,
            store: None,
            seeds,
        }
    }
}

/// Drives one independent Monte Carlo stream.
///
/// A worker is seeded by [`SamplingWorker::new`], consumed by [`SamplingWorker::run`]
/// and leaves behind a [`WorkerOutcome`] once its thread is joined.
pub struct SamplingWorker<'a, S: Simulation> {
    index: usize,
    simulation: S,
    classifier: Classifier,
    rng: StdRng,
    seeds: Vec<u64>,
    target: StoreTarget<'a>,
    weights: WeightCursor<'a>,
    counters: &'a StepCounters,
    cancel: &'a CancelToken,
    reporter: &'a ProgressReporter<'a>,
    schedule: Option<ReweightSchedule<'a>>,
    values: Vec<f64>,
}

impl<'a, S: Simulation> SamplingWorker<'a, S> {
    pub fn new(index: usize, simulation: S, seeds: Vec<u64>, ctx: WorkerContext<'a>) -> Self {
        debug!(worker = index, ?seeds, "Seeding worker");
        let target = match ctx.shared {
            Some(store) => StoreTarget::Shared(store),
            None => StoreTarget::Local(AggregationStore::new(ctx.shape)),
        };
        Self {
            index,
            simulation,
            classifier: ctx.classifier,
            rng: rng_from_seeds(&seeds),
            seeds,
            target,
            weights: ctx.weights.cursor(),
            counters: ctx.counters,
            cancel: ctx.cancel,
            reporter: ctx.reporter,
            schedule: None,
            values: vec![0.0; ctx.shape.nn],
        }
    }

    pub fn with_schedule(mut self, schedule: ReweightSchedule<'a>) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Runs up to `steps` steps, stopping early if the run is cancelled.
    pub fn run(mut self, steps: u64) -> WorkerOutcome {
        let chunk = (steps / 100).max(1);
        let mut completed = 0;
        let mut unreported = 0;
        let mut interrupted = false;

        while completed < steps {
            if self.cancel.is_cancelled() {
                warn!(
                    worker = self.index,
                    "Interrupted after {} of {} steps", completed, steps
                );
                interrupted = true;
                break;
            }
            if let Some(schedule) = self.schedule.as_mut() {
                schedule.poll(self.counters.total());
            }
            self.step();
            completed += 1;
            unreported += 1;
            if unreported == chunk {
                self.reporter
                    .report(Progress::TaskIncrement { amount: unreported });
                unreported = 0;
            }
        }
        if unreported > 0 {
            self.reporter
                .report(Progress::TaskIncrement { amount: unreported });
        }

        debug!(worker = self.index, completed, "Worker finished");
        WorkerOutcome {
            index: self.index,
            steps_completed: completed,
            interrupted,
            failed: false,
            store: match self.target {
                StoreTarget::Local(store) => Some(store),
                StoreTarget::Shared(_) => None,
            },
            seeds: self.seeds,
        }
    }

    fn step(&mut self) {
        self.counters.increment(self.index);
        let event = self.simulation.advance(&mut self.rng);
        if !event.contributes {
            return;
        }
        let key = self.classifier.classify(&event);
        self.weights.refresh();
        let weight = self.weights.weight(&key);
        let screened = weight < 1.0 && self.rng.r#gen::<f64>() >= weight;

        self.values.fill(0.0);
        if !screened {
            self.simulation.measure(&event, &mut self.values);
        }
        let obs = Observation {
            key: &key,
            screened,
            values: &self.values,
        };
        self.target.record(&obs);
    }
}

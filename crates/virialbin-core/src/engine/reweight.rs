use super::config::ConfigError;
use super::error::VirialError;
use super::store::BinView;
use super::weights::WeightTable;
use crate::core::bins::BinKey;
use std::fmt;
use tracing::{debug, info};

/// Smallest weight ever assigned, so every bin keeps a nonzero chance of being measured.
pub const WEIGHT_FLOOR: f64 = 1e-6;

/// Which candidate table a reweighting kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableChoice {
    Recomputed,
    Unweighted,
    Prior,
}

/// Diagnostics of one reweighting pass.
///
/// Variances are per step. Difficulties are `sqrt(variance * cost)` for a given
/// allocation; lower is better.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReweightSummary {
    pub between_variance: f64,
    pub within_variance: f64,
    pub new_within_variance: f64,
    pub scale: f64,
    pub current_time_fraction: f64,
    pub new_time_fraction: f64,
    pub measure_fraction: f64,
    pub difficulty_new: f64,
    pub difficulty_current: f64,
    pub difficulty_all_measured: f64,
    pub difficulty_none_measured: f64,
    pub choice: TableChoice,
}

impl ReweightSummary {
    pub fn between_fraction(&self) -> f64 {
        fraction(self.between_variance, self.between_variance + self.within_variance)
    }

    pub fn new_between_fraction(&self) -> f64 {
        fraction(
            self.between_variance,
            self.between_variance + self.new_within_variance,
        )
    }
}

impl fmt::Display for ReweightSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "var0 frac {:8.5} (new: {:8.5})  t0 frac {:8.5}  k {:8.2e}  new t0 frac {:5.3}  measure frac {:7.5}  ",
            self.between_fraction(),
            self.new_between_fraction(),
            self.current_time_fraction,
            self.scale,
            self.new_time_fraction,
            self.measure_fraction,
        )?;
        write!(
            f,
            "difficulty new {:10.4e} current {:10.4e} w=1 {:10.4e} w=0 {:10.4e} ({:?})",
            self.difficulty_new,
            self.difficulty_current,
            self.difficulty_all_measured,
            self.difficulty_none_measured,
            self.choice,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReweightOutcome {
    pub table: WeightTable,
    pub summary: ReweightSummary,
}

struct BinStats {
    key: BinKey,
    unscreened: f64,
    samples: u64,
    padded_var: f64,
}

/// Recomputes sampling weights that minimize estimator variance per unit of work.
///
/// `cost_ratio` is the cost of measuring one sample relative to generating and
/// classifying one step.
pub fn recompute_weights(
    view: &(impl BinView + ?Sized),
    total_steps: u64,
    cost_ratio: f64,
) -> Result<WeightTable, VirialError> {
    recompute_weights_with_summary(view, total_steps, cost_ratio, None).map(|o| o.table)
}

/// Like [`recompute_weights`], also returning diagnostics, and never returning a table with
/// a higher estimated difficulty than `prior` (or than measuring everything).
pub fn recompute_weights_with_summary(
    view: &(impl BinView + ?Sized),
    total_steps: u64,
    cost_ratio: f64,
    prior: Option<&WeightTable>,
) -> Result<ReweightOutcome, VirialError> {
    if !(cost_ratio.is_finite() && cost_ratio > 0.0) {
        return Err(ConfigError::Invalid {
            parameter: "cost_ratio",
            reason: format!("{cost_ratio} is not positive"),
        }
        .into());
    }
    if total_steps == 0 {
        return Err(ConfigError::Invalid {
            parameter: "total_steps",
            reason: "no steps were taken".into(),
        }
        .into());
    }

    let nn = view.shape().nn;
    let t = total_steps as f64;

    let mut bins = Vec::new();
    let mut avgs = Vec::new();
    let mut vars = Vec::new();
    view.for_each_bin(&mut |key, acc| {
        bins.push(BinStats {
            key: key.clone(),
            unscreened: acc.unscreened_count() as f64,
            samples: acc.sample_count(),
            padded_var: 0.0,
        });
        avgs.extend((0..nn).map(|i| acc.avg(i)));
        vars.extend((0..nn).map(|i| acc.var(i)));
    });

    let total_samples: u64 = bins.iter().map(|b| b.samples).sum();
    if total_samples == 0 {
        return Err(VirialError::EmptyStore);
    }
    let tsc = total_samples as f64;

    let mut e0 = 0.0;
    let mut e1 = 0.0;
    let mut total_sq_all = 0.0;
    for i in 0..nn {
        let total_sq: f64 = bins
            .iter()
            .enumerate()
            .map(|(b, bin)| {
                let avg = avgs[b * nn + i];
                bin.samples as f64 * (vars[b * nn + i] + avg * avg)
            })
            .sum();
        total_sq_all += total_sq;
        let avg_sq = total_sq / tsc;

        let (mut e0a, mut e0a2) = (0.0, 0.0);
        for (b, bin) in bins.iter_mut().enumerate() {
            if bin.unscreened == 0.0 {
                continue;
            }
            let avg = avgs[b * nn + i];
            let var = vars[b * nn + i];
            e0a += bin.unscreened * avg;
            e0a2 += bin.unscreened * avg * avg;
            bin.padded_var += avg_sq / bin.samples.max(1) as f64;
            if bin.samples < 2 {
                continue;
            }
            bin.padded_var += var;
            e1 += bin.unscreened * bin.unscreened / bin.samples as f64 * var;
        }
        let mean = e0a / t;
        e0 += e0a2 / (t - 1.0).max(1.0) - mean * mean;
    }
    e1 /= t;
    if e1 == 0.0 {
        e1 = (total_sq_all / tsc) / tsc;
    }

    let scale = if e0 > 0.0 && e0.is_finite() {
        (1.0 / (e0 * cost_ratio)).sqrt()
    } else {
        f64::INFINITY
    };

    // No dispersion across bins leaves nothing to allocate; every bin keeps weight 1.
    let mut table = WeightTable::default();
    for bin in bins.iter().filter(|b| b.unscreened > 0.0) {
        let w = if bin.samples < 2 || !scale.is_finite() {
            1.0
        } else {
            (scale * bin.padded_var.sqrt()).clamp(WEIGHT_FLOOR, 1.0)
        };
        debug!(bin = %bin.key, weight = w, padded_var = bin.padded_var);
        table.insert(bin.key.clone(), w);
    }

    let cost = |weight: &dyn Fn(&BinStats) -> f64| -> (f64, f64) {
        let (mut within, mut time) = (0.0, 0.0);
        for bin in bins.iter().filter(|b| b.unscreened > 0.0) {
            let w = weight(bin);
            if bin.padded_var > 0.0 {
                within += bin.unscreened * bin.padded_var / w;
            }
            time += bin.unscreened * w;
        }
        (within / t, time * cost_ratio / t)
    };
    let difficulty = |(within, time): (f64, f64)| {
        let d = ((e0 + within) * (1.0 + time)).sqrt();
        if d.is_nan() { f64::INFINITY } else { d }
    };

    let (new_within, new_time) = cost(&|b| table.weight(&b.key));
    let (all_within, all_time) = cost(&|_| 1.0);
    let difficulty_new = difficulty((new_within, new_time));
    let difficulty_all_measured = difficulty((all_within, all_time));
    let difficulty_prior = prior.map(|p| difficulty(cost(&|b| p.weight(&b.key))));

    let mut choice = TableChoice::Recomputed;
    let mut best = difficulty_new;
    if difficulty_all_measured < best {
        choice = TableChoice::Unweighted;
        best = difficulty_all_measured;
    }
    if let Some(d) = difficulty_prior
        && d < best
    {
        choice = TableChoice::Prior;
    }

    let t1 = tsc * cost_ratio;
    let total_unscreened: f64 = bins.iter().map(|b| b.unscreened).sum();
    let summary = ReweightSummary {
        between_variance: e0,
        within_variance: e1,
        new_within_variance: new_within,
        scale,
        current_time_fraction: t / (t + t1),
        new_time_fraction: 1.0 / (1.0 + new_time),
        measure_fraction: fraction(new_time * t / cost_ratio, total_unscreened),
        difficulty_new,
        difficulty_current: ((e0 + e1) * (1.0 + t1 / t)).sqrt(),
        difficulty_all_measured,
        difficulty_none_measured: (e0 + all_within).sqrt(),
        choice,
    };
    info!("Reweighted {} bins: {}", table.len(), summary);

    let table = match choice {
        TableChoice::Recomputed => table,
        TableChoice::Unweighted => WeightTable::default(),
        TableChoice::Prior => prior.cloned().unwrap_or_default(),
    };
    Ok(ReweightOutcome { table, summary })
}

fn fraction(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { part / whole } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bins::StoreShape;
    use crate::engine::store::AggregationStore;

    fn two_bin_store() -> AggregationStore {
        let mut store = AggregationStore::new(StoreShape::for_model(2, 1, false));
        let quiet = BinKey::from([0]);
        let noisy = BinKey::from([1]);
        for s in 0..1000 {
            store.record(&quiet, &[1.0, 1.0], false);
            let v = if s % 2 == 0 { 0.0 } else { 2.0 };
            store.record(&noisy, &[v, v], false);
        }
        store
    }

    #[test]
    fn noisy_bins_get_larger_weights() {
        let store = two_bin_store();
        let table = recompute_weights(&store, 2000, 1e4).unwrap();
        let quiet = table.weight(&BinKey::from([0]));
        let noisy = table.weight(&BinKey::from([1]));
        assert!(quiet > 0.0 && quiet < noisy && noisy < 1.0);
    }

    #[test]
    fn recomputed_table_beats_measuring_everything() {
        let store = two_bin_store();
        let outcome = recompute_weights_with_summary(&store, 2000, 1e4, None).unwrap();
        assert_eq!(outcome.summary.choice, TableChoice::Recomputed);
        assert!(outcome.summary.difficulty_new <= outcome.summary.difficulty_all_measured);
    }

    #[test]
    fn reweighting_is_idempotent() {
        let store = two_bin_store();
        let first = recompute_weights_with_summary(&store, 2000, 1e4, None).unwrap();
        let second =
            recompute_weights_with_summary(&store, 2000, 1e4, Some(&first.table)).unwrap();
        assert_eq!(first.table, second.table);
    }

    #[test]
    fn cheap_measurements_keep_every_weight_at_one() {
        let store = two_bin_store();
        let table = recompute_weights(&store, 2000, 1.0).unwrap();
        assert!(table.iter().all(|(_, w)| w == 1.0));
    }

    #[test]
    fn sparse_bins_get_default_weight() {
        let mut store = two_bin_store();
        store.record(&BinKey::from([2]), &[5.0, 5.0], false);
        let table = recompute_weights(&store, 2001, 1e4).unwrap();
        assert_eq!(table.weight(&BinKey::from([2])), 1.0);
    }

    #[test]
    fn zero_averages_give_uniform_weights() {
        let mut store = AggregationStore::new(StoreShape::for_model(2, 1, false));
        for _ in 0..10 {
            store.record(&BinKey::from([0]), &[0.0, 0.0], false);
        }
        let table = recompute_weights(&store, 10, 100.0).unwrap();
        assert_eq!(table.weight(&BinKey::from([0])), 1.0);
    }

    #[test]
    fn constant_values_keep_weights_finite_and_persistable() {
        let shape = StoreShape::for_model(2, 1, false);
        let mut store = AggregationStore::new(shape);
        for k in 0..20u32 {
            store.record(&BinKey::from([k % 2]), &[0.0, 0.0], false);
        }
        let outcome = recompute_weights_with_summary(&store, 20, 100.0, None).unwrap();
        for (_, w) in outcome.table.iter() {
            assert!(w.is_finite() && w > 0.0 && w <= 1.0);
        }
        assert!(!outcome.summary.difficulty_new.is_nan());
        assert!(!outcome.summary.difficulty_all_measured.is_nan());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hs2_weights.dat");
        crate::core::io::weights::write_weights(&outcome.table, shape, &path).unwrap();
        assert!(crate::core::io::weights::read_weights(&path, shape).is_ok());
    }

    #[test]
    fn invalid_arguments_are_config_errors() {
        let store = two_bin_store();
        for ratio in [0.0, -2.0, f64::NAN] {
            assert!(matches!(
                recompute_weights(&store, 2000, ratio),
                Err(VirialError::Config(_))
            ));
        }
        assert!(matches!(
            recompute_weights(&store, 0, 1.0),
            Err(VirialError::Config(_))
        ));
    }

    #[test]
    fn store_without_samples_is_empty_store_error() {
        let mut store = AggregationStore::new(StoreShape::for_model(2, 1, false));
        store.record(&BinKey::from([0]), &[0.0, 0.0], true);
        assert!(matches!(
            recompute_weights(&store, 1, 1.0),
            Err(VirialError::EmptyStore)
        ));
    }
}

use super::store::BinView;
use crate::core::bins::{BinAccumulator, StoreShape};
use nalgebra::DMatrix;

/// The estimate of one output order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderEstimate {
    pub order: usize,
    pub average: f64,
    pub std_error: f64,
    /// Share of the variance due to fluctuations in bin occupancy rather than within bins.
    pub between_fraction: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub estimates: Vec<OrderEstimate>,
    pub correlation: Option<DMatrix<f64>>,
    pub bin_count: usize,
    pub total_steps: u64,
    pub unscreened: u64,
    pub samples: u64,
    pub reference_integral: f64,
}

impl Report {
    /// Fraction of steps whose configuration could contribute.
    pub fn fraction_not_screened(&self) -> f64 {
        ratio(self.unscreened as f64, self.total_steps as f64)
    }

    /// Fraction of contributing configurations that were measured.
    pub fn fraction_measured(&self) -> f64 {
        ratio(self.samples as f64, self.unscreened as f64)
    }

    /// Fraction of the run's time spent generating configurations, given the cost ratio.
    pub fn time_fraction(&self, cost_ratio: f64) -> f64 {
        let t = self.total_steps as f64;
        ratio(t, t + self.samples as f64 * cost_ratio)
    }

    /// Sum of all orders with its standard error.
    ///
    /// The error includes the cross terms when a correlation matrix is available and
    /// treats the orders as independent otherwise.
    pub fn combined(&self) -> (f64, f64) {
        let total = self.estimates.iter().map(|e| e.average).sum();
        let errors: Vec<f64> = self.estimates.iter().map(|e| e.std_error).collect();
        let variance = match &self.correlation {
            Some(corr) => {
                let mut v = 0.0;
                for (j, ej) in errors.iter().enumerate() {
                    for (k, ek) in errors.iter().enumerate() {
                        v += corr[(j, k)] * ej * ek;
                    }
                }
                v
            }
            None => errors.iter().map(|e| e * e).sum(),
        };
        (total, variance.max(0.0).sqrt())
    }

    /// The virial coefficient `B_n = -(n-1)/n! * Σ average`, with its error.
    pub fn virial_coefficient(&self, n: usize) -> (f64, f64) {
        let factorial: f64 = (2..=n).map(|k| k as f64).product();
        let prefactor = -((n as f64) - 1.0) / factorial;
        let (sum, err) = self.combined();
        (prefactor * sum, prefactor.abs() * err)
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

/// Incremental reduction of bins into a [`Report`].
///
/// Bins can be added one at a time in any order, so a report can be built from a
/// streaming reader without holding a whole store in memory.
#[derive(Debug, Clone)]
pub struct ReportAccumulator {
    shape: StoreShape,
    bins: usize,
    unscreened: u64,
    samples: u64,
    weighted_sum: Vec<f64>,
    weighted_sq: Vec<f64>,
    within: Vec<f64>,
    cross: Option<DMatrix<f64>>,
}

impl ReportAccumulator {
    pub fn new(shape: StoreShape) -> Self {
        let nn = shape.nn;
        Self {
            shape,
            bins: 0,
            unscreened: 0,
            samples: 0,
            weighted_sum: vec![0.0; nn],
            weighted_sq: vec![0.0; nn],
            within: vec![0.0; nn],
            cross: shape.covariance.then(|| DMatrix::zeros(nn, nn)),
        }
    }

    pub fn add_bin(&mut self, acc: &BinAccumulator) {
        self.bins += 1;
        self.unscreened += acc.unscreened_count();
        self.samples += acc.sample_count();
        let sc = acc.sample_count();
        if sc == 0 {
            return;
        }
        let c = acc.unscreened_count() as f64;
        let nn = self.shape.nn;
        for i in 0..nn {
            let avg = acc.avg(i);
            self.weighted_sum[i] += c * avg;
            self.weighted_sq[i] += c * avg * avg;
            self.within[i] += c * c * acc.var(i) / sc as f64;
        }
        if let Some(cross) = self.cross.as_mut() {
            for j in 0..nn {
                for k in j..nn {
                    let cov = acc.cov(j, k).unwrap_or(0.0);
                    let v = c * (cov + acc.avg(j) * acc.avg(k));
                    cross[(j, k)] += v;
                    if j != k {
                        cross[(k, j)] += v;
                    }
                }
            }
        }
    }

    /// Completes the reduction. Without measured samples every estimate and error is zero.
    pub fn finish(self, total_steps: u64, reference_integral: f64) -> Report {
        let t = total_steps.max(1) as f64;
        let nn = self.shape.nn;

        let means: Vec<f64> = self.weighted_sum.iter().map(|s| s / t).collect();
        let estimates = (0..nn)
            .map(|i| {
                let within = self.within[i] / t;
                let between = (self.weighted_sq[i] / t - means[i] * means[i]).max(0.0);
                OrderEstimate {
                    order: i,
                    average: reference_integral * means[i],
                    std_error: reference_integral.abs() * ((within + between) / t).sqrt(),
                    between_fraction: ratio(between, within + between),
                }
            })
            .collect();

        let correlation = self.cross.map(|mut c| {
            for j in 0..nn {
                for k in j..nn {
                    let v = c[(j, k)] - t * means[j] * means[k];
                    c[(j, k)] = v;
                    c[(k, j)] = v;
                }
            }
            let diag: Vec<f64> = (0..nn).map(|j| c[(j, j)]).collect();
            DMatrix::from_fn(nn, nn, |j, k| {
                let d = diag[j] * diag[k];
                if j == k {
                    if diag[j] > 0.0 { 1.0 } else { 0.0 }
                } else if d > 0.0 {
                    (c[(j, k)] / d.sqrt()).clamp(-1.0, 1.0)
                } else {
                    0.0
                }
            })
        });

        Report {
            estimates,
            correlation,
            bin_count: self.bins,
            total_steps,
            unscreened: self.unscreened,
            samples: self.samples,
            reference_integral,
        }
    }
}

/// Reduces every bin of a store into per-order estimates.
pub fn finalize(
    view: &(impl BinView + ?Sized),
    total_steps: u64,
    reference_integral: f64,
) -> Report {
    let mut acc = ReportAccumulator::new(view.shape());
    view.for_each_bin(&mut |_, bin| acc.add_bin(bin));
    acc.finish(total_steps, reference_integral)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bins::BinKey;
    use crate::engine::store::AggregationStore;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn constant_single_bin_has_exact_average_and_no_error() {
        let mut store = AggregationStore::new(StoreShape::for_model(2, 1, false));
        for _ in 0..100 {
            store.record(&BinKey::from([0]), &[1.0, -0.5], false);
        }
        let report = finalize(&store, 100, 2.0);
        assert!(approx(report.estimates[0].average, 2.0));
        assert!(approx(report.estimates[1].average, -1.0));
        assert!(approx(report.estimates[0].std_error, 0.0));
        assert_eq!(report.bin_count, 1);
        assert!(approx(report.fraction_not_screened(), 1.0));
        assert!(approx(report.fraction_measured(), 1.0));
    }

    #[test]
    fn average_weights_bins_by_unscreened_count() {
        let mut store = AggregationStore::new(StoreShape::for_model(2, 1, false));
        for s in 0..40 {
            store.record(&BinKey::from([0]), &[1.0, 0.0], s % 2 == 0);
        }
        for _ in 0..60 {
            store.record(&BinKey::from([1]), &[3.0, 0.0], false);
        }
        let report = finalize(&store, 100, 1.0);
        assert!(approx(report.estimates[0].average, (40.0 * 1.0 + 60.0 * 3.0) / 100.0));
        assert!(report.estimates[0].std_error > 0.0);
        assert!(approx(report.estimates[0].between_fraction, 1.0));
        assert!(approx(report.fraction_measured(), 80.0 / 100.0));
    }

    #[test]
    fn steps_outside_bins_dilute_the_average() {
        let mut store = AggregationStore::new(StoreShape::for_model(2, 1, false));
        for _ in 0..50 {
            store.record(&BinKey::from([0]), &[1.0, 1.0], false);
        }
        let report = finalize(&store, 100, 1.0);
        assert!(approx(report.estimates[0].average, 0.5));
        assert!(approx(report.fraction_not_screened(), 0.5));
        assert!(approx(report.time_fraction(1.0), 100.0 / 150.0));
    }

    #[test]
    fn correlation_of_proportional_orders_is_one() {
        let mut store = AggregationStore::new(StoreShape::for_model(2, 1, true));
        for s in 0..200 {
            let v = (s % 7) as f64;
            store.record(&BinKey::from([0]), &[v, -2.0 * v], false);
        }
        let report = finalize(&store, 200, 1.0);
        let corr = report.correlation.unwrap();
        assert!(approx(corr[(0, 0)], 1.0));
        assert!((corr[(0, 1)] + 1.0).abs() < 1e-6);
        assert_eq!(corr[(0, 1)], corr[(1, 0)]);
    }

    #[test]
    fn combined_error_uses_correlation() {
        let mut store = AggregationStore::new(StoreShape::for_model(2, 1, true));
        for s in 0..200 {
            let v = (s % 5) as f64;
            store.record(&BinKey::from([0]), &[v, -v], false);
        }
        let report = finalize(&store, 200, 1.0);
        let (sum, err) = report.combined();
        assert!(approx(sum, 0.0));
        assert!(err < 1e-6);
    }

    #[test]
    fn virial_coefficient_applies_prefactor() {
        let mut store = AggregationStore::new(StoreShape::for_model(3, 1, false));
        for _ in 0..10 {
            store.record(&BinKey::from([0]), &[0.0, 0.0, 0.0, 3.0], false);
        }
        let report = finalize(&store, 10, 1.0);
        let (b3, _) = report.virial_coefficient(3);
        assert!(approx(b3, -2.0 / 6.0 * 3.0));
    }

    #[test]
    fn add_bin_order_does_not_matter() {
        let shape = StoreShape::for_model(2, 1, false);
        let mut a = BinAccumulator::new(2, false);
        let mut b = BinAccumulator::new(2, false);
        for s in 0..30 {
            a.record_sample(&[s as f64, 1.0], false);
            b.record_sample(&[2.0, s as f64 * 0.5], s % 3 == 0);
        }
        let mut forward = ReportAccumulator::new(shape);
        forward.add_bin(&a);
        forward.add_bin(&b);
        let mut backward = ReportAccumulator::new(shape);
        backward.add_bin(&b);
        backward.add_bin(&a);
        let f = forward.finish(60, 1.0);
        let r = backward.finish(60, 1.0);
        for (x, y) in f.estimates.iter().zip(&r.estimates) {
            assert!(approx(x.average, y.average));
            assert!(approx(x.std_error, y.std_error));
        }
    }

    #[test]
    fn all_screened_store_reports_zero_estimates() {
        let mut store = AggregationStore::new(StoreShape::for_model(3, 1, true));
        for k in 0..12u32 {
            store.record(&BinKey::from([k % 3]), &[0.0; 4], true);
        }
        let report = finalize(&store, 40, 1.0);

        assert_eq!(report.bin_count, 3);
        assert_eq!(report.samples, 0);
        assert_eq!(report.estimates.len(), 4);
        for e in &report.estimates {
            assert_eq!((e.average, e.std_error, e.between_fraction), (0.0, 0.0, 0.0));
        }
        assert_eq!(report.combined(), (0.0, 0.0));
        assert_eq!(report.fraction_not_screened(), 12.0 / 40.0);
        assert_eq!(report.fraction_measured(), 0.0);
        assert!(report.correlation.unwrap().iter().all(|c| *c == 0.0));
    }

    #[test]
    fn report_of_nothing_is_zero() {
        let report = ReportAccumulator::new(StoreShape::for_model(2, 1, false)).finish(0, 1.0);
        assert_eq!(report.bin_count, 0);
        assert!(report.estimates.iter().all(|e| e.average == 0.0 && e.std_error == 0.0));
    }
}

use super::shape::StoreShape;
use std::ops::{Add, AddAssign};

/// Relative threshold below which a variance or covariance is treated as round-off.
const ROUNDOFF_TOLERANCE: f64 = 1e-7;

/// Running statistics for one bin.
///
/// Every sample that reaches the bin increments `unscreened_count`. Samples that are
/// also measured increment `sample_count` and contribute their per-order values to the
/// first and second moments. When covariance tracking is on, the cross moments
/// `values[i] * values[j]` for `i < j` are kept packed in upper-triangle order.
#[derive(Debug, Clone, PartialEq)]
pub struct BinAccumulator {
    unscreened_count: u64,
    sample_count: u64,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    pair_sum: Option<Vec<f64>>,
}

impl BinAccumulator {
    pub fn new(nn: usize, covariance: bool) -> Self {
        Self {
            unscreened_count: 0,
            sample_count: 0,
            sum: vec![0.0; nn],
            sum_sq: vec![0.0; nn],
            pair_sum: covariance.then(|| vec![0.0; nn * nn.saturating_sub(1) / 2]),
        }
    }

    pub fn for_shape(shape: &StoreShape) -> Self {
        Self::new(shape.nn, shape.covariance)
    }

    /// Rebuilds an accumulator from persisted counters and moments.
    ///
    /// The caller guarantees `sum.len() == sum_sq.len()` and, when present, a pair-sum
    /// vector of the packed upper-triangle length.
    pub fn from_parts(
        unscreened_count: u64,
        sample_count: u64,
        sum: Vec<f64>,
        sum_sq: Vec<f64>,
        pair_sum: Option<Vec<f64>>,
    ) -> Self {
        debug_assert_eq!(sum.len(), sum_sq.len());
        debug_assert!(
            pair_sum
                .as_ref()
                .is_none_or(|p| p.len() == sum.len() * sum.len().saturating_sub(1) / 2)
        );
        Self {
            unscreened_count,
            sample_count,
            sum,
            sum_sq,
            pair_sum,
        }
    }

    /// Records one sample that reached this bin.
    ///
    /// A screened sample only counts toward `unscreened_count`; `values` is ignored.
    pub fn record_sample(&mut self, values: &[f64], screened: bool) {
        self.unscreened_count += 1;
        if screened {
            return;
        }
        debug_assert_eq!(values.len(), self.sum.len());
        self.sample_count += 1;
        for ((s, s2), &v) in self.sum.iter_mut().zip(self.sum_sq.iter_mut()).zip(values) {
            *s += v;
            *s2 += v * v;
        }
        if let Some(pair_sum) = self.pair_sum.as_mut() {
            let nn = values.len();
            let mut k = 0;
            for i in 0..nn.saturating_sub(1) {
                for j in (i + 1)..nn {
                    pair_sum[k] += values[i] * values[j];
                    k += 1;
                }
            }
        }
    }

    /// Adds the counters and moments of a disjoint sample set into this one.
    pub fn merge_from(&mut self, other: &Self) {
        debug_assert_eq!(self.sum.len(), other.sum.len());
        self.unscreened_count += other.unscreened_count;
        self.sample_count += other.sample_count;
        for (a, b) in self.sum.iter_mut().zip(&other.sum) {
            *a += b;
        }
        for (a, b) in self.sum_sq.iter_mut().zip(&other.sum_sq) {
            *a += b;
        }
        if let (Some(mine), Some(theirs)) = (self.pair_sum.as_mut(), other.pair_sum.as_ref()) {
            for (a, b) in mine.iter_mut().zip(theirs) {
                *a += b;
            }
        }
    }

    /// Returns the accumulator of the union of both sample sets.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.merge_from(other);
        merged
    }

    /// Discards the cross moments, leaving a non-covariance accumulator.
    pub fn drop_covariance(&mut self) {
        self.pair_sum = None;
    }

    #[inline]
    pub fn unscreened_count(&self) -> u64 {
        self.unscreened_count
    }

    #[inline]
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    #[inline]
    pub fn order_count(&self) -> usize {
        self.sum.len()
    }

    #[inline]
    pub fn has_covariance(&self) -> bool {
        self.pair_sum.is_some()
    }

    pub fn sums(&self) -> &[f64] {
        &self.sum
    }

    pub fn sums_sq(&self) -> &[f64] {
        &self.sum_sq
    }

    pub fn pair_sums(&self) -> Option<&[f64]> {
        self.pair_sum.as_deref()
    }

    /// Mean of order `i` over measured samples; zero when nothing was measured.
    pub fn avg(&self, i: usize) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.sum[i] / self.sample_count as f64
    }

    /// Population variance of order `i`, with round-off below a relative tolerance
    /// of the squared mean clamped to zero.
    pub fn var(&self, i: usize) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        let avg = self.avg(i);
        let avg2 = avg * avg;
        let var = self.sum_sq[i] / self.sample_count as f64 - avg2;
        if var < avg2 * ROUNDOFF_TOLERANCE {
            0.0
        } else {
            var
        }
    }

    /// Covariance between orders `i` and `j`. Returns `None` without cross moments.
    pub fn cov(&self, i: usize, j: usize) -> Option<f64> {
        if i == j {
            return Some(self.var(i));
        }
        let pair_sum = self.pair_sum.as_ref()?;
        if self.sample_count == 0 {
            return Some(0.0);
        }
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        let count = self.sample_count as f64;
        let avg_i = self.sum[i] / count;
        let avg_j = self.sum[j] / count;
        let cov = pair_sum[pair_index(self.sum.len(), i, j)] / count - avg_i * avg_j;
        if cov.abs() < (avg_i * avg_j).abs() * ROUNDOFF_TOLERANCE {
            Some(0.0)
        } else {
            Some(cov)
        }
    }
}

/// Position of the pair `(i, j)`, `i < j`, in the packed upper triangle of an `nn x nn` matrix.
#[inline]
pub fn pair_index(nn: usize, i: usize, j: usize) -> usize {
    debug_assert!(i < j && j < nn);
    (2 * nn - i - 1) * i / 2 + (j - i - 1)
}

impl Add for BinAccumulator {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        self.merge_from(&rhs);
        self
    }
}

impl AddAssign<&BinAccumulator> for BinAccumulator {
    fn add_assign(&mut self, rhs: &BinAccumulator) {
        self.merge_from(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs()))
    }

    fn sample_stream(len: usize, nn: usize) -> Vec<Vec<f64>> {
        (0..len)
            .map(|s| {
                (0..nn)
                    .map(|i| ((s * 7 + i * 13) % 11) as f64 * 0.25 - 1.0)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn new_creates_zeroed_accumulator() {
        let acc = BinAccumulator::new(4, false);
        assert_eq!(acc.unscreened_count(), 0);
        assert_eq!(acc.sample_count(), 0);
        assert_eq!(acc.sums(), &[0.0; 4]);
        assert!(!acc.has_covariance());
        assert_eq!(BinAccumulator::new(4, true).pair_sums().unwrap().len(), 6);
    }

    #[test]
    fn record_sample_updates_moments() {
        let mut acc = BinAccumulator::new(2, false);
        acc.record_sample(&[1.0, -2.0], false);
        acc.record_sample(&[3.0, 4.0], false);
        assert_eq!(acc.unscreened_count(), 2);
        assert_eq!(acc.sample_count(), 2);
        assert_eq!(acc.sums(), &[4.0, 2.0]);
        assert_eq!(acc.sums_sq(), &[10.0, 20.0]);
        assert!(f64_approx_equal(acc.avg(0), 2.0));
        assert!(f64_approx_equal(acc.var(0), 1.0));
        assert!(f64_approx_equal(acc.var(1), 9.0));
    }

    #[test]
    fn screened_sample_only_counts_as_unscreened() {
        let mut acc = BinAccumulator::new(1, false);
        acc.record_sample(&[5.0], true);
        assert_eq!(acc.unscreened_count(), 1);
        assert_eq!(acc.sample_count(), 0);
        assert_eq!(acc.sums(), &[0.0]);
    }

    #[test]
    fn counters_are_monotonic_and_sample_count_never_exceeds_unscreened() {
        let mut acc = BinAccumulator::new(3, true);
        let mut last = (0, 0);
        for (s, values) in sample_stream(200, 3).iter().enumerate() {
            acc.record_sample(values, s % 3 == 0);
            let now = (acc.unscreened_count(), acc.sample_count());
            assert!(now.0 >= last.0 && now.1 >= last.1);
            assert!(now.1 <= now.0);
            last = now;
        }
    }

    #[test]
    fn covariance_tracks_cross_moments() {
        let mut acc = BinAccumulator::new(3, true);
        acc.record_sample(&[1.0, 2.0, 3.0], false);
        acc.record_sample(&[3.0, 2.0, 1.0], false);
        assert_eq!(acc.pair_sums().unwrap(), &[8.0, 6.0, 8.0]);
        assert!(f64_approx_equal(acc.cov(0, 2).unwrap(), -1.0));
        assert!(f64_approx_equal(acc.cov(2, 0).unwrap(), -1.0));
        assert_eq!(acc.cov(0, 1), Some(0.0));
        assert!(f64_approx_equal(acc.cov(1, 1).unwrap(), acc.var(1)));
    }

    #[test]
    fn cov_is_none_without_covariance_tracking() {
        let mut acc = BinAccumulator::new(2, false);
        acc.record_sample(&[1.0, 2.0], false);
        assert_eq!(acc.cov(0, 1), None);
        assert!(acc.cov(1, 1).is_some());
    }

    #[test]
    fn constant_values_have_zero_variance() {
        let mut acc = BinAccumulator::new(1, false);
        for _ in 0..1000 {
            acc.record_sample(&[0.1], false);
        }
        assert!(f64_approx_equal(acc.avg(0), 0.1));
        assert_eq!(acc.var(0), 0.0);
    }

    #[test]
    fn avg_and_var_are_zero_without_samples() {
        let mut acc = BinAccumulator::new(2, false);
        acc.record_sample(&[9.0, 9.0], true);
        assert_eq!(acc.avg(1), 0.0);
        assert_eq!(acc.var(1), 0.0);
    }

    #[test]
    fn merge_of_partitions_reproduces_single_stream() {
        let stream = sample_stream(301, 4);
        let mut whole = BinAccumulator::new(4, true);
        for (s, v) in stream.iter().enumerate() {
            whole.record_sample(v, s % 5 == 0);
        }

        for parts in [2usize, 3, 7] {
            let mut partials: Vec<BinAccumulator> =
                (0..parts).map(|_| BinAccumulator::new(4, true)).collect();
            for (s, v) in stream.iter().enumerate() {
                partials[s % parts].record_sample(v, s % 5 == 0);
            }
            let forward = partials
                .iter()
                .fold(BinAccumulator::new(4, true), |acc, p| acc.merge(p));
            let backward = partials
                .iter()
                .rev()
                .fold(BinAccumulator::new(4, true), |acc, p| acc + p.clone());

            for merged in [&forward, &backward] {
                assert_eq!(merged.unscreened_count(), whole.unscreened_count());
                assert_eq!(merged.sample_count(), whole.sample_count());
                for i in 0..4 {
                    assert!(f64_approx_equal(merged.sums()[i], whole.sums()[i]));
                    assert!(f64_approx_equal(merged.sums_sq()[i], whole.sums_sq()[i]));
                }
                for (a, b) in merged
                    .pair_sums()
                    .unwrap()
                    .iter()
                    .zip(whole.pair_sums().unwrap())
                {
                    assert!(f64_approx_equal(*a, *b));
                }
            }
        }
    }

    #[test]
    fn merge_is_commutative() {
        let mut a = BinAccumulator::new(2, false);
        let mut b = BinAccumulator::new(2, false);
        a.record_sample(&[1.0, 2.0], false);
        b.record_sample(&[3.0, 5.0], false);
        b.record_sample(&[0.0, 0.0], true);
        assert_eq!(a.merge(&b), b.merge(&a));
    }

    #[test]
    fn add_assign_accumulates_counts() {
        let mut a = BinAccumulator::new(1, false);
        a.record_sample(&[2.0], false);
        let mut b = BinAccumulator::new(1, false);
        b.record_sample(&[4.0], true);
        a += &b;
        assert_eq!(a.unscreened_count(), 2);
        assert_eq!(a.sample_count(), 1);
    }

    #[test]
    fn pair_index_enumerates_upper_triangle_in_row_order() {
        let nn = 4;
        let mut expected = 0;
        for i in 0..nn - 1 {
            for j in (i + 1)..nn {
                assert_eq!(pair_index(nn, i, j), expected);
                expected += 1;
            }
        }
    }

    #[test]
    fn drop_covariance_removes_cross_moments() {
        let mut acc = BinAccumulator::new(3, true);
        acc.record_sample(&[1.0, 1.0, 1.0], false);
        acc.drop_covariance();
        assert!(!acc.has_covariance());
        assert_eq!(acc.sample_count(), 1);
    }
}

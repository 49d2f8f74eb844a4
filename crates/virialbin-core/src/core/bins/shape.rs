use std::fmt;

/// The dimensions shared by every accumulator of a run.
///
/// `n` is the model size (number of points in the cluster integral), `nn` the number of
/// output orders derived from it, `key_len` the number of integers in every bin key, and
/// `covariance` whether cross moments between orders are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreShape {
    pub n: usize,
    pub nn: usize,
    pub key_len: usize,
    pub covariance: bool,
}

impl StoreShape {
    pub fn for_model(n: usize, key_len: usize, covariance: bool) -> Self {
        Self {
            n,
            nn: Self::order_count(n),
            key_len,
            covariance,
        }
    }

    /// Number of output orders for a model of `n` points: one per possible bond count.
    #[inline]
    pub fn order_count(n: usize) -> usize {
        1 + n * n.saturating_sub(1) / 2
    }

    /// Number of packed cross moments (strict upper triangle of the order covariance).
    #[inline]
    pub fn pair_count(&self) -> usize {
        self.nn * self.nn.saturating_sub(1) / 2
    }

    /// Whether `nn` is the value implied by `n`.
    pub fn is_consistent(&self) -> bool {
        self.nn == Self::order_count(self.n)
    }

    /// Same model and key dimensions, ignoring the covariance flag.
    pub fn same_dimensions(&self, other: &Self) -> bool {
        self.n == other.n && self.nn == other.nn && self.key_len == other.key_len
    }

    pub fn without_covariance(self) -> Self {
        Self {
            covariance: false,
            ..self
        }
    }
}

impl fmt::Display for StoreShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} nn={} key={} cov={}",
            self.n,
            self.nn,
            self.key_len,
            u8::from(self.covariance)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_count_is_one_plus_pair_count_of_points() {
        assert_eq!(StoreShape::order_count(2), 2);
        assert_eq!(StoreShape::order_count(4), 7);
        assert_eq!(StoreShape::order_count(6), 16);
    }

    #[test]
    fn for_model_derives_nn_and_pairs() {
        let shape = StoreShape::for_model(4, 2, true);
        assert_eq!(shape.nn, 7);
        assert_eq!(shape.pair_count(), 21);
        assert!(shape.is_consistent());
    }

    #[test]
    fn same_dimensions_ignores_covariance_flag() {
        let a = StoreShape::for_model(5, 3, true);
        let b = StoreShape::for_model(5, 3, false);
        let c = StoreShape::for_model(5, 2, false);
        assert!(a.same_dimensions(&b));
        assert!(!a.same_dimensions(&c));
        assert_ne!(a, b);
    }

    #[test]
    fn display_matches_file_header_notation() {
        let shape = StoreShape::for_model(3, 1, false);
        assert_eq!(shape.to_string(), "n=3 nn=4 key=1 cov=0");
    }
}

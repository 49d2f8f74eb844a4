use std::fmt;

/// Identifies a sampling stratum.
///
/// A key is an ordered tuple of small non-negative integers produced by a classifier.
/// Keys compare by value and order lexicographically, which gives every report and
/// every persisted file a deterministic bin order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinKey(Box<[u32]>);

impl BinKey {
    /// The longest key any classifier produces.
    pub const MAX_LEN: usize = 13;

    pub fn new(values: impl Into<Box<[u32]>>) -> Self {
        Self(values.into())
    }

    #[inline]
    pub fn values(&self) -> &[u32] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u32>> for BinKey {
    fn from(values: Vec<u32>) -> Self {
        Self(values.into_boxed_slice())
    }
}

impl From<&[u32]> for BinKey {
    fn from(values: &[u32]) -> Self {
        Self(values.into())
    }
}

impl<const N: usize> From<[u32; N]> for BinKey {
    fn from(values: [u32; N]) -> Self {
        Self(Box::new(values))
    }
}

impl fmt::Display for BinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for value in self.0.iter() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}", value)?;
            first = false;
        }
        Ok(())
    }
}

use super::config::ConfigError;
use super::store::AggregationStore;
use crate::core::bins::StoreShape;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

fn check_shape(expected: StoreShape, found: StoreShape) -> Result<(), ConfigError> {
    if expected == found {
        Ok(())
    } else {
        Err(ConfigError::ShapeMismatch { expected, found })
    }
}

/// Merges every bin of `src` into `dst`, creating bins that `dst` lacks.
pub fn merge_into(dst: &mut AggregationStore, src: &AggregationStore) -> Result<(), ConfigError> {
    check_shape(dst.shape(), src.shape())?;
    for (key, acc) in src.iter() {
        dst.get_or_create(key).merge_from(acc);
    }
    Ok(())
}

/// Merges two owned stores, folding the smaller one into the larger.
pub fn merge_owned(
    mut a: AggregationStore,
    mut b: AggregationStore,
) -> Result<AggregationStore, ConfigError> {
    check_shape(a.shape(), b.shape())?;
    if a.len() < b.len() {
        std::mem::swap(&mut a, &mut b);
    }
    for (key, acc) in b.into_bins() {
        a.absorb(key, acc);
    }
    Ok(a)
}

/// Folds a list of stores of the given shape into one.
///
/// With the `parallel` feature the fold is a tree reduction across the rayon pool.
pub fn merge_all(
    shape: StoreShape,
    stores: Vec<AggregationStore>,
) -> Result<AggregationStore, ConfigError> {
    for store in &stores {
        check_shape(shape, store.shape())?;
    }

    #[cfg(feature = "parallel")]
    let merged = stores
        .into_par_iter()
        .map(Ok)
        .try_reduce(|| AggregationStore::new(shape), merge_owned);

    #[cfg(not(feature = "parallel"))]
    let merged = stores
        .into_iter()
        .try_fold(AggregationStore::new(shape), merge_owned);

    merged
}

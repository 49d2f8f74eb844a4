use crate::core::bins::{BinAccumulator, BinKey, StoreShape};
use itertools::Itertools;
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::collections::HashMap;

new_key_type! {
    pub struct BinId;
}

/// Totals over every bin of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreTotals {
    pub bins: usize,
    pub unscreened: u64,
    pub samples: u64,
}

/// Read access to the bins of a store, in ascending key order.
///
/// Implemented by both the private per-worker store and the shared store so that
/// reweighting, reporting and persistence work on either.
pub trait BinView {
    fn shape(&self) -> StoreShape;

    /// Visits every bin in ascending key order.
    fn for_each_bin(&self, f: &mut dyn FnMut(&BinKey, &BinAccumulator));

    fn totals(&self) -> StoreTotals {
        let mut totals = StoreTotals::default();
        self.for_each_bin(&mut |_, acc| {
            totals.bins += 1;
            totals.unscreened += acc.unscreened_count();
            totals.samples += acc.sample_count();
        });
        totals
    }
}

/// A single-owner mapping from bin keys to accumulators.
///
/// Accumulators live in an arena and are found through a deduplicated key table, so
/// every key maps to exactly one accumulator. Bins are created on first use and are
/// never removed while sampling.
#[derive(Debug, Clone)]
pub struct AggregationStore {
    /// Dimensions shared by every accumulator in the store.
    shape: StoreShape,
    /// Primary storage for accumulators.
    bins: SlotMap<BinId, BinAccumulator>,
    /// Reverse lookup from an arena slot to its key.
    keys: SecondaryMap<BinId, BinKey>,
    /// Lookup map for finding a bin by its key.
    index: HashMap<BinKey, BinId>,
}

impl AggregationStore {
    /// Creates an empty store.
    ///
    /// # Arguments
    ///
    /// * `shape` - The dimensions every accumulator of this store is created with.
    pub fn new(shape: StoreShape) -> Self {
        Self {
            shape,
            bins: SlotMap::with_key(),
            keys: SecondaryMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn shape(&self) -> StoreShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Returns the accumulator of `key`, creating an empty one if absent.
    ///
    /// # Arguments
    ///
    /// * `key` - The bin key; its length must equal the store's key length.
    ///
    /// # Return
    ///
    /// A mutable reference to the (possibly new) accumulator.
    pub fn get_or_create(&mut self, key: &BinKey) -> &mut BinAccumulator {
        debug_assert_eq!(key.len(), self.shape.key_len);
        let id = match self.index.get(key) {
            Some(&id) => id,
            None => self.insert_new(key.clone(), BinAccumulator::for_shape(&self.shape)),
        };
        &mut self.bins[id]
    }

    /// Records one sample into the bin of `key`.
    pub fn record(&mut self, key: &BinKey, values: &[f64], screened: bool) {
        self.get_or_create(key).record_sample(values, screened);
    }

    /// Retrieves the accumulator of `key`.
    ///
    /// # Return
    ///
    /// Returns `Some(&BinAccumulator)` if the bin exists, otherwise `None`.
    pub fn get(&self, key: &BinKey) -> Option<&BinAccumulator> {
        self.index.get(key).and_then(|&id| self.bins.get(id))
    }

    /// Merges `acc` into the bin of `key`, inserting it when the bin is absent.
    pub fn absorb(&mut self, key: BinKey, acc: BinAccumulator) {
        match self.index.get(&key) {
            Some(&id) => self.bins[id].merge_from(&acc),
            None => {
                self.insert_new(key, acc);
            }
        }
    }

    /// Returns an iterator over all bins in arbitrary order.
    ///
    /// # Return
    ///
    /// An iterator yielding `(&BinKey, &BinAccumulator)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&BinKey, &BinAccumulator)> {
        self.bins
            .iter()
            .filter_map(|(id, acc)| self.keys.get(id).map(|key| (key, acc)))
    }

    /// Returns all bins sorted by key.
    pub fn sorted(&self) -> Vec<(&BinKey, &BinAccumulator)> {
        self.iter().sorted_by(|a, b| a.0.cmp(b.0)).collect()
    }

    /// Consumes the store, yielding owned bins in arbitrary order.
    pub fn into_bins(self) -> impl Iterator<Item = (BinKey, BinAccumulator)> {
        let mut keys = self.keys;
        self.bins
            .into_iter()
            .filter_map(move |(id, acc)| keys.remove(id).map(|key| (key, acc)))
    }

    /// Discards the cross moments of every bin and clears the covariance flag.
    pub fn drop_covariance(&mut self) {
        self.shape = self.shape.without_covariance();
        for acc in self.bins.values_mut() {
            acc.drop_covariance();
        }
    }

    fn insert_new(&mut self, key: BinKey, acc: BinAccumulator) -> BinId {
        let id = self.bins.insert(acc);
        self.keys.insert(id, key.clone());
        self.index.insert(key, id);
        id
    }
}

impl BinView for AggregationStore {
    fn shape(&self) -> StoreShape {
        self.shape
    }

    fn for_each_bin(&self, f: &mut dyn FnMut(&BinKey, &BinAccumulator)) {
        for (key, acc) in self.sorted() {
            f(key, acc);
        }
    }
}

impl PartialEq for AggregationStore {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape
            && self.len() == other.len()
            && self
                .iter()
                .all(|(key, acc)| other.get(key).is_some_and(|o| o == acc))
    }
}

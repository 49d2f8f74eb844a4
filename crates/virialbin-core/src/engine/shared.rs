use super::store::{AggregationStore, BinId, BinView};
use crate::core::bins::{BinAccumulator, BinKey, StoreShape};
use itertools::Itertools;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use slotmap::SlotMap;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct BinTable {
    index: HashMap<BinKey, BinId>,
    bins: SlotMap<BinId, Mutex<BinAccumulator>>,
}

/// A store updated concurrently by every worker of a run.
///
/// The key table sits behind a read-mostly lock. Updates to an existing bin only take
/// the table's read lock plus that bin's own mutex; creating a bin takes the
/// upgradeable lock, checks again, and inserts, so a key never gets two accumulators.
#[derive(Debug)]
pub struct SharedStore {
    shape: StoreShape,
    table: RwLock<BinTable>,
}

impl SharedStore {
    pub fn new(shape: StoreShape) -> Self {
        Self {
            shape,
            table: RwLock::new(BinTable::default()),
        }
    }

    pub fn shape(&self) -> StoreShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.table.read().bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` on the accumulator of `key` under the bin's lock, creating the bin first if needed.
    pub fn with_bin<R>(&self, key: &BinKey, f: impl FnOnce(&mut BinAccumulator) -> R) -> R {
        debug_assert_eq!(key.len(), self.shape.key_len);
        {
            let table = self.table.read();
            if let Some(bin) = table.index.get(key).and_then(|&id| table.bins.get(id)) {
                let mut acc = bin.lock();
                return f(&mut acc);
            }
        }

        let table = self.table.upgradable_read();
        if let Some(id) = table.index.get(key).copied() {
            let table = RwLockUpgradableReadGuard::downgrade(table);
            let mut acc = table.bins[id].lock();
            return f(&mut acc);
        }

        let mut table = RwLockUpgradableReadGuard::upgrade(table);
        let id = table
            .bins
            .insert(Mutex::new(BinAccumulator::for_shape(&self.shape)));
        table.index.insert(key.clone(), id);
        let table = RwLockWriteGuard::downgrade(table);
        let mut acc = table.bins[id].lock();
        f(&mut acc)
    }

    pub fn record(&self, key: &BinKey, values: &[f64], screened: bool) {
        self.with_bin(key, |acc| acc.record_sample(values, screened));
    }

    /// Copies the current contents into a private store.
    pub fn snapshot(&self) -> AggregationStore {
        let mut store = AggregationStore::new(self.shape);
        let table = self.table.read();
        for (key, &id) in table.index.iter() {
            if let Some(bin) = table.bins.get(id) {
                store.absorb(key.clone(), bin.lock().clone());
            }
        }
        store
    }

    pub fn into_store(self) -> AggregationStore {
        let mut store = AggregationStore::new(self.shape);
        let BinTable { index, mut bins } = self.table.into_inner();
        for (key, id) in index {
            if let Some(bin) = bins.remove(id) {
                store.absorb(key, bin.into_inner());
            }
        }
        store
    }
}

impl BinView for SharedStore {
    fn shape(&self) -> StoreShape {
        self.shape
    }

    fn for_each_bin(&self, f: &mut dyn FnMut(&BinKey, &BinAccumulator)) {
        let table = self.table.read();
        for (key, &id) in table.index.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
            if let Some(bin) = table.bins.get(id) {
                f(key, &bin.lock());
            }
        }
    }
}

use crate::core::bins::BinKey;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sampling weights per bin.
///
/// Bins absent from the table use the nominal weight. Every weight lies in `(0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    nominal: f64,
    weights: BTreeMap<BinKey, f64>,
}

impl Default for WeightTable {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

impl WeightTable {
    /// A table with no entries, applying `nominal` to every bin.
    pub fn uniform(nominal: f64) -> Self {
        Self {
            nominal,
            weights: BTreeMap::new(),
        }
    }

    pub fn nominal(&self) -> f64 {
        self.nominal
    }

    #[inline]
    pub fn weight(&self, key: &BinKey) -> f64 {
        self.weights.get(key).copied().unwrap_or(self.nominal)
    }

    pub fn insert(&mut self, key: BinKey, weight: f64) {
        self.weights.insert(key, weight);
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&BinKey, f64)> {
        self.weights.iter().map(|(k, &w)| (k, w))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// The run-wide current weight table, replaced atomically while workers read it.
#[derive(Debug)]
pub struct WeightHandle {
    current: RwLock<Arc<WeightTable>>,
    generation: AtomicU64,
}

impl WeightHandle {
    pub fn new(table: WeightTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn load(&self) -> Arc<WeightTable> {
        Arc::clone(&self.current.read())
    }

    pub fn replace(&self, table: WeightTable) {
        *self.current.write() = Arc::new(table);
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn cursor(&self) -> WeightCursor<'_> {
        let generation = self.generation();
        WeightCursor {
            handle: self,
            snapshot: self.load(),
            generation,
        }
    }
}

/// A worker's snapshot of the weight table, refreshed when the handle changes.
pub struct WeightCursor<'a> {
    handle: &'a WeightHandle,
    snapshot: Arc<WeightTable>,
    generation: u64,
}

impl WeightCursor<'_> {
    #[inline]
    pub fn refresh(&mut self) {
        let current = self.handle.generation();
        if current != self.generation {
            self.snapshot = self.handle.load();
            self.generation = current;
        }
    }

    #[inline]
    pub fn weight(&self, key: &BinKey) -> f64 {
        self.snapshot.weight(key)
    }
}

use super::header::RawHeader;
use super::raw::{RawReader, RawWriter, open_all};
use crate::core::bins::{BinAccumulator, BinKey, StoreShape};
use crate::engine::error::VirialError;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Walks several key-sorted raw files as one, in ascending key order.
///
/// All data for a key is collected from every file and merged before `f` sees it, and
/// at most one pending bin per file is held in memory.
pub fn merge_sorted<F>(readers: &mut [RawReader], mut f: F) -> Result<(), VirialError>
where
    F: FnMut(BinKey, BinAccumulator) -> Result<(), VirialError>,
{
    let mut pending: Vec<Option<BinAccumulator>> = vec![None; readers.len()];
    let mut heap = BinaryHeap::with_capacity(readers.len());

    for (index, reader) in readers.iter_mut().enumerate() {
        if let Some((key, acc)) = reader.next_bin()? {
            pending[index] = Some(acc);
            heap.push(Reverse((key, index)));
        }
    }

    while let Some(Reverse((key, index))) = heap.pop() {
        let mut merged = take_and_refill(readers, &mut pending, &mut heap, index)?;
        while let Some(Reverse((next, _))) = heap.peek() {
            if *next != key {
                break;
            }
            if let Some(Reverse((_, other))) = heap.pop() {
                let acc = take_and_refill(readers, &mut pending, &mut heap, other)?;
                merged.merge_from(&acc);
            }
        }
        f(key, merged)?;
    }
    Ok(())
}

fn take_and_refill(
    readers: &mut [RawReader],
    pending: &mut [Option<BinAccumulator>],
    heap: &mut BinaryHeap<Reverse<(BinKey, usize)>>,
    index: usize,
) -> Result<BinAccumulator, VirialError> {
    let acc = pending[index]
        .take()
        .ok_or_else(|| VirialError::Internal(format!("no pending bin for input {index}")))?;
    if let Some((key, next)) = readers[index].next_bin()? {
        pending[index] = Some(next);
        heap.push(Reverse((key, index)));
    }
    Ok(acc)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReprocessSummary {
    pub shape: StoreShape,
    pub bins: usize,
    pub total_steps: u64,
}

/// Merges raw files into `out` without loading any of them whole.
///
/// `out` is left untouched if any input turns out to be malformed partway through.
pub fn reprocess(
    paths: &[PathBuf],
    out: &Path,
    expected: Option<StoreShape>,
) -> Result<ReprocessSummary, VirialError> {
    let (mut readers, shape) = open_all(paths, expected)?;
    let total_steps = readers.iter().map(RawReader::total_steps).sum();
    let mut writer = RawWriter::create(out, RawHeader { shape, total_steps })?;
    let mut bins = 0;
    merge_sorted(&mut readers, |key, acc| {
        bins += 1;
        writer.write_bin(&key, &acc)
    })?;
    writer.persist()?;
    debug!(bins, total_steps, "Reprocessed {} raw files", paths.len());
    Ok(ReprocessSummary {
        shape,
        bins,
        total_steps,
    })
}

use crate::core::bins::StoreShape;
use crate::core::io::raw::{merge_raw_files, open_all, write_raw};
use crate::core::io::reprocess::{ReprocessSummary, merge_sorted, reprocess};
use crate::core::io::weights::write_weights;
use crate::core::sim::hard_sphere::chain_reference_integral;
use crate::engine::error::VirialError;
use crate::engine::report::{Report, ReportAccumulator};
use crate::engine::reweight::{ReweightOutcome, recompute_weights_with_summary};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// How `merge_files` combines its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Load every file into one store, then write it.
    InMemory,
    /// K-way merge of the sorted files, holding one pending bin per file.
    #[default]
    Streaming,
}

/// Merges raw statistics files into one.
///
/// Every input must exist and agree on dimensions. Cross moments are kept only if every
/// input carries them, unless `expected` says otherwise.
#[instrument(skip_all, name = "merge_workflow")]
pub fn merge_files(
    inputs: &[PathBuf],
    out: &Path,
    expected: Option<StoreShape>,
    strategy: MergeStrategy,
) -> Result<ReprocessSummary, VirialError> {
    info!(inputs = inputs.len(), ?strategy, "Merging raw files");
    let summary = match strategy {
        MergeStrategy::Streaming => reprocess(inputs, out, expected)?,
        MergeStrategy::InMemory => {
            let (store, total_steps) = merge_raw_files(inputs, expected)?;
            write_raw(&store, total_steps, out)?;
            ReprocessSummary {
                shape: store.shape(),
                bins: store.len(),
                total_steps,
            }
        }
    };
    info!(
        bins = summary.bins,
        total_steps = summary.total_steps,
        "Wrote merged statistics to '{}'",
        out.display()
    );
    Ok(summary)
}

/// Reports on one or more raw files without loading them whole.
///
/// Without a `reference_integral`, the hard-sphere chain reference for the files' model
/// size is used.
#[instrument(skip_all, name = "report_workflow")]
pub fn report_files(
    inputs: &[PathBuf],
    reference_integral: Option<f64>,
) -> Result<Report, VirialError> {
    let (mut readers, shape) = open_all(inputs, None)?;
    let total_steps = readers.iter().map(|r| r.total_steps()).sum();
    let mut acc = ReportAccumulator::new(shape);
    merge_sorted(&mut readers, |_, bin| {
        acc.add_bin(&bin);
        Ok(())
    })?;
    let reference = reference_integral.unwrap_or_else(|| chain_reference_integral(shape.n));
    Ok(acc.finish(total_steps, reference))
}

/// Recomputes weights from raw files and writes them to `out`.
#[instrument(skip_all, name = "reweight_workflow")]
pub fn reweight_files(
    inputs: &[PathBuf],
    out: &Path,
    cost_ratio: f64,
) -> Result<ReweightOutcome, VirialError> {
    let (store, total_steps) = merge_raw_files(inputs, None)?;
    let outcome = recompute_weights_with_summary(&store, total_steps, cost_ratio, None)?;
    write_weights(&outcome.table, store.shape(), out)?;
    info!(
        bins = outcome.table.len(),
        "Wrote weights to '{}'",
        out.display()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bins::BinKey;
    use crate::core::io::raw::read_raw;
    use crate::core::io::weights::read_weights;
    use crate::engine::report::finalize;
    use crate::engine::store::AggregationStore;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, entries: &[(u32, f64, bool)], steps: u64) -> PathBuf {
        let mut store = AggregationStore::new(StoreShape::for_model(3, 1, false));
        for &(k, v, screened) in entries {
            store.record(&BinKey::from([k]), &[0.0, 0.0, v, -v], screened);
        }
        let path = dir.join(name);
        write_raw(&store, steps, &path).unwrap();
        path
    }

    fn inputs(dir: &Path) -> Vec<PathBuf> {
        vec![
            write(dir, "a_raw.dat", &[(2, 1.0, false), (3, 2.0, false), (3, 0.0, true)], 10),
            write(dir, "b_raw.dat", &[(3, 4.0, false), (2, 3.0, false), (2, 5.0, false)], 20),
        ]
    }

    #[test]
    fn both_strategies_produce_the_same_file() {
        let dir = tempdir().unwrap();
        let inputs = inputs(dir.path());
        let streamed = dir.path().join("s_raw.dat");
        let loaded = dir.path().join("m_raw.dat");
        let a = merge_files(&inputs, &streamed, None, MergeStrategy::Streaming).unwrap();
        let b = merge_files(&inputs, &loaded, None, MergeStrategy::InMemory).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            std::fs::read_to_string(streamed).unwrap(),
            std::fs::read_to_string(loaded).unwrap()
        );
    }

    #[test]
    fn streaming_report_matches_in_memory_report() {
        let dir = tempdir().unwrap();
        let inputs = inputs(dir.path());
        let streamed = report_files(&inputs, Some(2.0)).unwrap();
        let (store, steps) = merge_raw_files(&inputs, None).unwrap();
        let loaded = finalize(&store, steps, 2.0);
        assert_eq!(streamed.total_steps, 30);
        assert_eq!(streamed.bin_count, loaded.bin_count);
        for (s, l) in streamed.estimates.iter().zip(&loaded.estimates) {
            assert!((s.average - l.average).abs() < 1e-12);
            assert!((s.std_error - l.std_error).abs() < 1e-12);
        }
    }

    #[test]
    fn all_screened_files_report_zero() {
        let dir = tempdir().unwrap();
        let inputs = vec![write(dir.path(), "a_raw.dat", &[(2, 0.0, true), (3, 0.0, true)], 8)];
        let report = report_files(&inputs, None).unwrap();
        assert_eq!(report.bin_count, 2);
        assert_eq!(report.fraction_not_screened(), 0.25);
        assert!(report.estimates.iter().all(|e| e.average == 0.0 && e.std_error == 0.0));
    }

    #[test]
    fn missing_input_is_fatal() {
        let dir = tempdir().unwrap();
        let mut inputs = inputs(dir.path());
        inputs.push(dir.path().join("missing_raw.dat"));
        let out = dir.path().join("out_raw.dat");
        let err = merge_files(&inputs, &out, None, MergeStrategy::Streaming).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn reweight_files_writes_readable_weights() {
        let dir = tempdir().unwrap();
        let inputs = inputs(dir.path());
        let out = dir.path().join("t3_weights.dat");
        let outcome = reweight_files(&inputs, &out, 1.0).unwrap();
        let (store, _) = read_raw(&inputs[0], None).unwrap();
        let table = read_weights(&out, store.shape()).unwrap();
        assert_eq!(table, outcome.table);
    }
}

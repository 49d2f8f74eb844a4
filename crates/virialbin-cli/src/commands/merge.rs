use crate::cli::MergeArgs;
use crate::error::{CliError, Result};
use tracing::info;
use virialbin::workflows::process::{self, MergeStrategy};

pub async fn run(args: MergeArgs) -> Result<()> {
    if args.inputs.contains(&args.output) {
        return Err(CliError::Argument(format!(
            "Output '{}' is also an input file.",
            args.output.display()
        )));
    }
    let strategy = if args.in_memory {
        MergeStrategy::InMemory
    } else {
        MergeStrategy::Streaming
    };
    info!(
        "Merging {} raw file(s) into {:?}...",
        args.inputs.len(),
        &args.output
    );

    let summary = tokio::task::block_in_place(|| {
        process::merge_files(&args.inputs, &args.output, None, strategy)
    })?;

    println!(
        "✓ Merged {} file(s): {} bins, {} steps ({}) written to {}",
        args.inputs.len(),
        summary.bins,
        summary.total_steps,
        summary.shape,
        args.output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use virialbin::core::bins::{BinKey, StoreShape};
    use virialbin::core::io::raw::{read_raw, write_raw};
    use virialbin::engine::store::AggregationStore;

    fn write(dir: &Path, name: &str, key: u32) -> PathBuf {
        let mut store = AggregationStore::new(StoreShape::for_model(2, 1, false));
        store.record(&BinKey::from([key]), &[0.0, -1.0], false);
        let path = dir.join(name);
        write_raw(&store, 3, &path).unwrap();
        path
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merge_command_writes_combined_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("all_raw.dat");
        let args = MergeArgs {
            inputs: vec![
                write(dir.path(), "a_raw.dat", 1),
                write(dir.path(), "b_raw.dat", 1),
            ],
            output: output.clone(),
            in_memory: true,
        };
        run(args).await.unwrap();

        let (store, steps) = read_raw(&output, None).unwrap();
        assert_eq!(steps, 6);
        assert_eq!(store.get(&BinKey::from([1])).unwrap().unscreened_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_input_fails_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let args = MergeArgs {
            inputs: vec![
                write(dir.path(), "a_raw.dat", 1),
                dir.path().join("absent_raw.dat"),
            ],
            output: dir.path().join("all_raw.dat"),
            in_memory: false,
        };
        assert!(matches!(run(args).await, Err(CliError::Core(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn output_may_not_be_an_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = write(dir.path(), "a_raw.dat", 1);
        let args = MergeArgs {
            inputs: vec![input.clone()],
            output: input,
            in_memory: false,
        };
        assert!(matches!(run(args).await, Err(CliError::Argument(_))));
    }
}

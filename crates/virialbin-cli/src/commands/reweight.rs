use crate::cli::ReweightArgs;
use crate::error::Result;
use tracing::info;
use virialbin::workflows::process;

pub async fn run(args: ReweightArgs) -> Result<()> {
    info!(
        "Recomputing weights from {} raw file(s) with cost ratio {}...",
        args.inputs.len(),
        args.cost_ratio
    );
    let outcome = tokio::task::block_in_place(|| {
        process::reweight_files(&args.inputs, &args.output, args.cost_ratio)
    })?;

    println!("{}", outcome.summary);
    println!(
        "✓ {} weights written to {}",
        outcome.table.len(),
        args.output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use virialbin::core::bins::{BinKey, StoreShape};
    use virialbin::core::io::raw::write_raw;
    use virialbin::core::io::weights::read_weights;
    use virialbin::engine::store::AggregationStore;

    #[tokio::test(flavor = "multi_thread")]
    async fn reweight_command_writes_weight_file() {
        let dir = tempfile::tempdir().unwrap();
        let shape = StoreShape::for_model(3, 1, false);
        let mut store = AggregationStore::new(shape);
        for k in 0..30u32 {
            let key = BinKey::from([2 + k % 2]);
            let v = if k % 2 == 0 { 0.0 } else { -1.0 - (k % 5) as f64 };
            store.record(&key, &[0.0, 0.0, 0.0, v], false);
        }
        let input = dir.path().join("hs3_run1_raw.dat");
        write_raw(&store, 60, &input).unwrap();

        let output = dir.path().join("hs3_weights.dat");
        let args = ReweightArgs {
            inputs: vec![input],
            output: output.clone(),
            cost_ratio: 10.0,
        };
        run(args).await.unwrap();
        assert!(read_weights(&output, shape).is_ok());
    }
}

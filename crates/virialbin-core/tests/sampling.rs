use rand::Rng;
use std::f64::consts::PI;
use tempfile::tempdir;
use virialbin::core::bins::BinKey;
use virialbin::core::io::raw::read_raw;
use virialbin::core::sim::{Classifier, OverlapGraph, SampleEvent, Simulation};
use virialbin::engine::cancel::CancelToken;
use virialbin::engine::config::{ReweightPolicy, RunConfigBuilder};
use virialbin::engine::error::VirialError;
use virialbin::engine::progress::ProgressReporter;
use virialbin::workflows::run::{run, run_hard_spheres};

/// Every other configuration falls in a second bin; every order measures 1.
struct TwoBins {
    step: u64,
}

impl Simulation for TwoBins {
    fn point_count(&self) -> usize {
        4
    }

    fn reference_integral(&self) -> f64 {
        1.0
    }

    fn advance<R: Rng + ?Sized>(&mut self, _rng: &mut R) -> SampleEvent {
        self.step += 1;
        let graph = if self.step % 2 == 0 {
            OverlapGraph::complete(4)
        } else {
            OverlapGraph::from_mask(4, 0b111)
        };
        SampleEvent {
            graph,
            contributes: true,
        }
    }

    fn measure(&self, _event: &SampleEvent, out: &mut [f64]) {
        out.fill(1.0);
    }
}

#[test]
fn four_workers_with_constant_values_sum_their_counts() {
    let dir = tempdir().unwrap();
    let config = RunConfigBuilder::new()
        .run_name("const")
        .output_dir(dir.path())
        .model_size(4)
        .steps_per_worker(1000)
        .workers(4)
        .seeds(vec![1, 2, 3, 4])
        .classifier(Classifier::Edges)
        .weight_override(Some(1.0))
        .build()
        .unwrap();

    let result = run(
        &config,
        |_| Ok::<_, VirialError>(TwoBins { step: 0 }),
        &CancelToken::new(),
        &ProgressReporter::new(),
    )
    .unwrap();
    assert_eq!(result.total_steps, 4000);
    assert!(result.weights_path.is_none());

    let (store, steps) = read_raw(&result.raw_path, None).unwrap();
    assert_eq!(steps, 4000);
    assert_eq!(store.len(), 2);
    for key in [BinKey::from([3]), BinKey::from([6])] {
        let acc = store.get(&key).unwrap();
        assert_eq!(acc.unscreened_count(), 2000);
        assert_eq!(acc.sample_count(), 2000);
        for i in 0..acc.order_count() {
            assert_eq!(acc.avg(i), 1.0);
            assert_eq!(acc.var(i), 0.0);
        }
    }

    let report = result.report.unwrap();
    for estimate in &report.estimates {
        assert!((estimate.average - 1.0).abs() < 1e-12);
        assert!(estimate.std_error < 1e-6);
    }
}

#[test]
fn shared_and_local_storage_agree_on_counts() {
    let dir = tempdir().unwrap();
    let builder = || {
        RunConfigBuilder::new()
            .run_name("mode")
            .output_dir(dir.path())
            .model_size(4)
            .steps_per_worker(500)
            .workers(3)
            .classifier(Classifier::Edges)
            .reweight(ReweightPolicy::Disabled)
    };
    let local = builder().build().unwrap();
    let shared = builder().share_data(true).build().unwrap();

    let factory = |_| Ok::<_, VirialError>(TwoBins { step: 0 });
    let a = run(&local, factory, &CancelToken::new(), &ProgressReporter::new()).unwrap();
    let b = run(&shared, factory, &CancelToken::new(), &ProgressReporter::new()).unwrap();
    let (sa, _) = read_raw(&a.raw_path, None).unwrap();
    let (sb, _) = read_raw(&b.raw_path, None).unwrap();
    assert_eq!(sa, sb);
}

fn hard_sphere_config(dir: &std::path::Path, n: usize, steps: u64) -> virialbin::engine::config::RunConfig {
    RunConfigBuilder::new()
        .run_name("hs")
        .output_dir(dir)
        .model_size(n)
        .steps_per_worker(steps)
        .workers(4)
        .seeds(vec![11, 12, 13, 14])
        .reweight(ReweightPolicy::Disabled)
        .build()
        .unwrap()
}

#[test]
fn hard_sphere_second_coefficient_is_exact() {
    let dir = tempdir().unwrap();
    let config = hard_sphere_config(dir.path(), 2, 1000);
    let result = run_hard_spheres(&config, &CancelToken::new(), &ProgressReporter::new()).unwrap();
    let (b2, err) = result.report.unwrap().virial_coefficient(2);
    assert!((b2 - 2.0 * PI / 3.0).abs() < 1e-9, "B2 = {b2}");
    assert!(err < 1e-9);
}

#[test]
fn hard_sphere_third_coefficient_matches_closed_form() {
    let dir = tempdir().unwrap();
    let config = hard_sphere_config(dir.path(), 3, 50_000);
    let result = run_hard_spheres(&config, &CancelToken::new(), &ProgressReporter::new()).unwrap();
    let report = result.report.unwrap();
    let (b3, err) = report.virial_coefficient(3);
    let exact = 5.0 * PI * PI / 18.0;
    assert!((b3 - exact).abs() < 0.05, "B3 = {b3} +/- {err}");
    assert!(err > 0.0 && err < 0.05);
    assert!((report.fraction_not_screened() - 15.0 / 32.0).abs() < 0.01);
}

use super::graph::{OverlapGraph, biconnected_subgraphs};
use super::{SampleEvent, Simulation};
use nalgebra::Vector3;
use rand::Rng;
use std::f64::consts::PI;
use std::sync::Arc;
use thiserror::Error;

pub const MIN_POINTS: usize = 2;
pub const MAX_POINTS: usize = 6;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Hard spheres support 2 to 6 points, got {0}")]
pub struct UnsupportedModelSize(pub usize);

/// Mayer sampling of unit-diameter hard spheres with a chain reference.
///
/// Point 0 sits at the origin and point `i` is placed uniformly inside the unit sphere
/// around point `i - 1`, so consecutive points always overlap. A configuration's value
/// of order `k` is the signed count of biconnected subgraphs with `k` edges contained in
/// its overlap graph; summed over orders this is the full Mayer integrand.
#[derive(Debug, Clone)]
pub struct HardSphereChain {
    n: usize,
    diagrams: Arc<[u64]>,
    positions: Vec<Vector3<f64>>,
}

impl HardSphereChain {
    pub fn new(n: usize) -> Result<Self, UnsupportedModelSize> {
        if !(MIN_POINTS..=MAX_POINTS).contains(&n) {
            return Err(UnsupportedModelSize(n));
        }
        Ok(Self {
            n,
            diagrams: biconnected_subgraphs(n).into(),
            positions: vec![Vector3::zeros(); n],
        })
    }

    pub fn diagram_count(&self) -> usize {
        self.diagrams.len()
    }

    fn overlap_graph(&self) -> OverlapGraph {
        let mut graph = OverlapGraph::empty(self.n);
        for i in 0..self.n {
            for j in (i + 1)..self.n {
                if (self.positions[i] - self.positions[j]).norm_squared() < 1.0 {
                    graph.add_edge(i, j);
                }
            }
        }
        graph
    }
}

/// Integral of the chain reference distribution for `n` points.
pub fn chain_reference_integral(n: usize) -> f64 {
    (4.0 * PI / 3.0).powi(n as i32 - 1)
}

fn random_in_unit_sphere<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f64> {
    loop {
        let v = Vector3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        if v.norm_squared() < 1.0 {
            return v;
        }
    }
}

impl Simulation for HardSphereChain {
    fn point_count(&self) -> usize {
        self.n
    }

    fn reference_integral(&self) -> f64 {
        chain_reference_integral(self.n)
    }

    fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> SampleEvent {
        for i in 1..self.n {
            self.positions[i] = self.positions[i - 1] + random_in_unit_sphere(rng);
        }
        let graph = self.overlap_graph();
        SampleEvent {
            graph,
            contributes: graph.is_biconnected(),
        }
    }

    fn measure(&self, event: &SampleEvent, out: &mut [f64]) {
        for &diagram in self.diagrams.iter() {
            if event.graph.contains(diagram) {
                let edges = diagram.count_ones() as usize;
                out[edges] += if edges % 2 == 0 { 1.0 } else { -1.0 };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn new_rejects_unsupported_sizes() {
        assert!(HardSphereChain::new(1).is_err());
        assert!(HardSphereChain::new(7).is_err());
        assert_eq!(HardSphereChain::new(4).unwrap().diagram_count(), 10);
    }

    #[test]
    fn consecutive_points_always_overlap() {
        let mut sim = HardSphereChain::new(5).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let event = sim.advance(&mut rng);
            for i in 1..5 {
                assert!(event.graph.has_edge(i - 1, i));
            }
        }
    }

    #[test]
    fn measure_of_full_overlap_sums_all_diagrams() {
        let sim = HardSphereChain::new(3).unwrap();
        let event = SampleEvent {
            graph: OverlapGraph::complete(3),
            contributes: true,
        };
        let mut out = vec![0.0; 4];
        sim.measure(&event, &mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.0, -1.0]);
    }

    #[test]
    fn second_coefficient_integrand_is_constant() {
        let mut sim = HardSphereChain::new(2).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let event = sim.advance(&mut rng);
        assert!(event.contributes);
        let mut out = vec![0.0; 2];
        sim.measure(&event, &mut out);
        assert_eq!(out, vec![0.0, -1.0]);
        assert!((sim.reference_integral() - 4.0 * PI / 3.0).abs() < 1e-12);
    }

    #[test]
    fn closing_overlap_probability_matches_analytic_value() {
        let mut sim = HardSphereChain::new(3).unwrap();
        let mut rng = StdRng::seed_from_u64(2024);
        let steps = 200_000;
        let hits = (0..steps)
            .filter(|_| sim.advance(&mut rng).contributes)
            .count();
        let p = hits as f64 / steps as f64;
        assert!((p - 15.0 / 32.0).abs() < 0.01, "p = {p}");
    }
}

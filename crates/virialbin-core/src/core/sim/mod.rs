pub mod classifier;
pub mod graph;
pub mod hard_sphere;

pub use classifier::Classifier;
pub use graph::OverlapGraph;
pub use hard_sphere::HardSphereChain;

use rand::Rng;

/// One generated configuration, reduced to what the engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEvent {
    pub graph: OverlapGraph,
    /// Cheap pre-check result. When false, every order value is zero and the
    /// configuration is neither classified nor measured.
    pub contributes: bool,
}

/// A Monte Carlo stream producing configurations and their per-order values.
///
/// Each worker owns its own instance.
pub trait Simulation: Send {
    fn point_count(&self) -> usize;

    /// The integral of the sampling distribution, by which averages are scaled.
    fn reference_integral(&self) -> f64;

    fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> SampleEvent;

    /// Writes the order values of `event` into `out`, which has one slot per order
    /// and is zeroed by the caller.
    fn measure(&self, event: &SampleEvent, out: &mut [f64]);
}

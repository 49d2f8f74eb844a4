//! # Core Module
//!
//! Stateless building blocks shared by the engine and the workflows.
//!
//! ## Architecture
//!
//! - **Bins** ([`bins`]) - Bin keys, per-bin accumulators and the shape of a run's statistics
//! - **File I/O** ([`io`]) - Raw statistics files, weight files, streaming readers and run-file naming
//! - **Simulation** ([`sim`]) - The simulation and classifier collaborators, including a
//!   hard-sphere chain sampler used as the reference model
//!
//! ## Key Capabilities
//!
//! - **Exact, associative accumulation** of first and second moments per output order
//! - **Bit-reproducible persistence** of integer counters and shortest round-trip floats
//! - **Bounded-memory reprocessing** of many sorted raw files

pub mod bins;
pub mod io;
pub mod sim;

//! # virialbin Core Library
//!
//! A binned, multi-threaded statistics engine for Mayer-sampling Monte Carlo estimates
//! of virial coefficients, with adaptive reweighting of sampling effort across bins.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture so that the statistical machinery can
//! be tested independently of any particular simulation.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`BinKey`, `BinAccumulator`),
//!   the line-oriented file formats for raw statistics and weights, and the simulation
//!   collaborators (`Simulation`, `Classifier`) that feed samples into the engine.
//!
//! - **[`engine`]: The Logic Core.** The stateful layer: local and shared aggregation
//!   stores, the merge engine, the reweighting engine, the report engine and the
//!   sampling workers that drive independent Monte Carlo streams.
//!
//! - **[`workflows`]: The Public API.** End-to-end procedures: running a multi-threaded
//!   sampling job, and merging, reprocessing, reweighting or reporting on persisted
//!   raw-data files.

pub mod core;
pub mod engine;
pub mod workflows;

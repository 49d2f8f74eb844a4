//! # Workflows Module
//!
//! High-level entry points of virialbin. Each workflow validates its inputs, reports
//! progress, logs its phases and returns a summary the caller can print.
//!
//! - **Sampling** ([`run`]) - A multi-threaded sampling job: seeding, weight loading,
//!   sampling with in-run reweighting, merging, persistence and the final report.
//! - **Post-processing** ([`process`]) - Merging persisted raw files (streaming or in
//!   memory), reporting on them, and recomputing weights from them.

pub mod process;
pub mod run;

//! # Engine Module
//!
//! The stateful layer of virialbin: everything that accumulates, combines and interprets
//! binned sampling statistics while a run is in flight or after it has been persisted.
//!
//! ## Overview
//!
//! Samples produced by a [`worker`] are recorded into an aggregation store, either a
//! private [`store::AggregationStore`] per worker or one [`shared::SharedStore`] for the
//! whole run. Stores are combined by the [`merge`] engine, turned into sampling weights
//! by the [`reweight`] engine and into per-order estimates by the [`report`] engine.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Run parameters, the builder that validates them, and
//!   the storage and reweighting policies derived from them
//! - **Stores** ([`store`], [`shared`]) - Key-indexed bin tables behind the [`store::BinView`] trait
//! - **Weights** ([`weights`]) - The weight table and the handle that swaps it mid-run
//! - **Progress Monitoring** ([`progress`], [`cancel`]) - Progress callbacks and cooperative cancellation
//! - **Error Handling** ([`error`]) - Engine-wide error types

pub mod cancel;
pub mod config;
pub mod error;
pub mod merge;
pub mod progress;
pub mod report;
pub mod reweight;
pub mod shared;
pub mod store;
pub mod weights;
pub mod worker;

//! Persistence of run statistics.
//!
//! Raw statistics files and weight files are line-oriented text: a single `#` header
//! line carrying the dimensions, then one whitespace-separated record per bin in
//! ascending key order. Sorted files allow several of them to be merged as a stream.

pub mod header;
pub mod naming;
pub mod raw;
pub mod reprocess;
pub mod weights;

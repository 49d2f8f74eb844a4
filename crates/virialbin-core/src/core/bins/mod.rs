//! Per-bin statistics: the stratum identifier, the moment accumulator and the
//! dimensions every accumulator of a run shares.

pub mod accumulator;
pub mod key;
pub mod shape;

pub use accumulator::BinAccumulator;
pub use key::BinKey;
pub use shape::StoreShape;

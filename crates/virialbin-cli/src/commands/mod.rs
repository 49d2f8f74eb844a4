pub mod merge;
pub mod report;
pub mod reweight;
pub mod run;

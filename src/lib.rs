pub mod check;
pub mod cli;
pub mod config;
pub mod convert;
pub mod coverage_map;
pub mod engine;
pub mod error;
pub mod exclude;
pub mod loader;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod report;
pub mod snapshot;
pub mod source_map;
pub mod uncovered;

//! submill - batch build and run for student submissions
//!
//! This crate implements submill, a batch grader backend that stages an
//! assignment directory, classifies each submission's project layout,
//! builds every project through a per-type strategy, runs the results
//! under a hard timeout with controlled stdin and arguments, and writes
//! one JSON report covering the whole assignment.

pub mod build;
pub mod classifier;
pub mod config;
pub mod interrupt;
pub mod pipeline;
pub mod pool;
pub mod project;
pub mod report;
pub mod run;
pub mod stage;
pub mod toolchain;

pub use classifier::{Classifier, ProjectType};
pub use config::{ConfigLayer, Phase, RunSettings};
pub use pipeline::Pipeline;
pub use report::AssignmentReport;
pub use toolchain::Toolchain;

//! lexmt-eval library interface
//!
//! Exposes the dataset loader, metric suite, experiment runner, and
//! artifact writer for integration testing.

pub mod dataset;
pub mod metrics;
pub mod report;
pub mod runner;

pub use metrics::{MetricKind, MetricSuite};
pub use report::RunArtifactWriter;
pub use runner::{AblationResult, ExperimentRunner, RunOptions, SampleResult};

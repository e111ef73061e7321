//! Pipeline composition and execution for read-count cleaning.

mod params;
mod runner;

pub use params::Params;
pub use runner::{
    run_filters, Pipeline, PipelineConfig, PipelineOutcome, PipelineStatus, StageReport,
};

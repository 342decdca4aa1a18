pub mod collaborators;
pub mod config;
mod orchestrator;
mod types;

pub use collaborators::{
    with_timeout, CatalogFile, CatalogLookup, Collaborators, FrameFetcher, HeaderWcs,
    LocalArchive, PlateSolver,
};
pub use config::{PipelineConfig, TargetSelection};
pub use orchestrator::{run_pipeline, run_pipeline_reported};
pub use types::{PipelineStage, PipelineSummary, ProgressReporter, StageTiming};

mod clean;
pub mod critical_path;
pub mod graph;
mod loader;
mod matrix;
pub mod pipeline_config;
pub mod value;

pub use critical_path::{
    analyze_multiple_pipelines, analyze_pipeline, BatchOutcome, CriticalPathResult, JobExecution,
    JobStatus,
};
pub use graph::{build_execution_graph, ExecutionGraph};
pub use pipeline_config::CiConfig;

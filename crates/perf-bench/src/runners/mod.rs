pub mod benchmark_runner;
pub mod command_pipeline;
pub mod executor;
pub mod expander;
pub mod metric_aggregator;
pub mod pipeline;

// Re-export for easier usage
pub use command_pipeline::CommandPipeline;
pub use executor::{RunExecutor, RunState};
pub use expander::{GroupKey, RunExpander, RunSpec};
pub use metric_aggregator::{Reducer, ResultAggregator};
pub use pipeline::{ExportArtifact, Pipeline};

use crate::reporting::Metrics;
use crate::runners::expander::RunSpec;
use async_trait::async_trait;
use std::path::PathBuf;

/// What the export stage hands to the optimize stage
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub metrics: Metrics,
}

/// The training toolkit being benchmarked.
///
/// Metric names returned here are stage-local (`accuracy`, `latency`); the
/// executor prefixes them with the stage name.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn train(&self, spec: &RunSpec) -> anyhow::Result<Metrics>;

    async fn export(&self, spec: &RunSpec) -> anyhow::Result<ExportArtifact>;

    async fn optimize(&self, spec: &RunSpec, artifact: &ExportArtifact) -> anyhow::Result<Metrics>;
}

pub mod publisher;
pub mod report_generators;
pub mod types;

pub use publisher::{ArtifactPublisher, ArtifactStager, DirectoryStager, PublishedArtifact};
pub use report_generators::{
    CsvReportGenerator, ReportGenerator, RunsJsonReportGenerator, TextReportGenerator,
};
pub use types::{GroupStatus, Metrics, RunResult, RunStatus, SummaryRow};

pub mod bench_config;
pub mod catalog;
pub mod config_manager;
pub mod errors;
pub mod reporting;
pub mod runners;
pub mod work_dir;

// Re-export main components for easier use
pub use bench_config::{BenchRunConfig, BenchmarkRequest, DataSizeFilter, ModelTypeFilter, Stage};
pub use catalog::TaskCatalog;
pub use config_manager::ConfigManager;
pub use errors::{BenchError, BenchResult};
pub use runners::benchmark_runner::{BenchOutcome, BenchReport, BenchmarkRunner};

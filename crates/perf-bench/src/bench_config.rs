use crate::errors::{BenchError, BenchResult};
use crate::runners::metric_aggregator::Reducer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which models of a task take part in a benchmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTypeFilter {
    /// Only models tagged speed, balance or accuracy
    #[default]
    Default,
    All,
}

/// Size class of a dataset in the task catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSize {
    Small,
    Medium,
    Large,
}

impl DatasetSize {
    pub const ALL: [DatasetSize; 3] = [DatasetSize::Small, DatasetSize::Medium, DatasetSize::Large];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetSize::Small => "small",
            DatasetSize::Medium => "medium",
            DatasetSize::Large => "large",
        }
    }
}

/// Which dataset sizes take part in a benchmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSizeFilter {
    Small,
    Medium,
    Large,
    #[default]
    All,
}

impl DataSizeFilter {
    pub fn matches(&self, size: DatasetSize) -> bool {
        match self {
            DataSizeFilter::Small => size == DatasetSize::Small,
            DataSizeFilter::Medium => size == DatasetSize::Medium,
            DataSizeFilter::Large => size == DatasetSize::Large,
            DataSizeFilter::All => true,
        }
    }
}

/// Pipeline stages, ordered: a cutoff at `Optimize` implies train and export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Train,
    Export,
    Optimize,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Train, Stage::Export, Stage::Optimize];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Train => "train",
            Stage::Export => "export",
            Stage::Optimize => "optimize",
        }
    }

    /// The stage after this one, if any
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Train => Some(Stage::Export),
            Stage::Export => Some(Stage::Optimize),
            Stage::Optimize => None,
        }
    }
}

macro_rules! impl_lowercase_enum {
    ($ty:ty, $what:literal, [$($name:literal => $variant:path),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = BenchError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    other => Err(BenchError::InvalidRequest(format!(
                        "unknown {} '{}' (expected one of: {})",
                        $what,
                        other,
                        [$($name),+].join(", ")
                    ))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = match self {
                    $($variant => $name,)+
                };
                write!(f, "{}", name)
            }
        }
    };
}

impl_lowercase_enum!(ModelTypeFilter, "model type", [
    "default" => ModelTypeFilter::Default,
    "all" => ModelTypeFilter::All,
]);
impl_lowercase_enum!(DataSizeFilter, "data size", [
    "small" => DataSizeFilter::Small,
    "medium" => DataSizeFilter::Medium,
    "large" => DataSizeFilter::Large,
    "all" => DataSizeFilter::All,
]);
impl_lowercase_enum!(DatasetSize, "dataset size", [
    "small" => DatasetSize::Small,
    "medium" => DatasetSize::Medium,
    "large" => DatasetSize::Large,
]);
impl_lowercase_enum!(Stage, "stage", [
    "train" => Stage::Train,
    "export" => Stage::Export,
    "optimize" => Stage::Optimize,
]);

/// A validated benchmark request. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchmarkRequest {
    model_type: ModelTypeFilter,
    data_size: DataSizeFilter,
    num_repeat: u32,
    num_epoch: u32,
    eval_upto: Stage,
}

impl BenchmarkRequest {
    /// Build a request from already-typed values. Zero repeat/epoch means "task default".
    pub fn new(
        model_type: ModelTypeFilter,
        data_size: DataSizeFilter,
        num_repeat: u32,
        num_epoch: u32,
        eval_upto: Stage,
    ) -> Self {
        Self {
            model_type,
            data_size,
            num_repeat,
            num_epoch,
            eval_upto,
        }
    }

    /// Parse and validate a request from its textual invocation parameters
    pub fn parse(
        model_type: &str,
        data_size: &str,
        num_repeat: i64,
        num_epoch: i64,
        eval_upto: &str,
    ) -> BenchResult<Self> {
        Ok(Self::new(
            model_type.parse()?,
            data_size.parse()?,
            non_negative("num-repeat", num_repeat)?,
            non_negative("num-epoch", num_epoch)?,
            eval_upto.parse()?,
        ))
    }

    pub fn model_type(&self) -> ModelTypeFilter {
        self.model_type
    }

    pub fn data_size(&self) -> DataSizeFilter {
        self.data_size
    }

    pub fn num_repeat(&self) -> u32 {
        self.num_repeat
    }

    pub fn num_epoch(&self) -> u32 {
        self.num_epoch
    }

    pub fn eval_upto(&self) -> Stage {
        self.eval_upto
    }
}

fn non_negative(name: &str, value: i64) -> BenchResult<u32> {
    if value < 0 {
        return Err(BenchError::InvalidRequest(format!(
            "{} must not be negative (got {})",
            name, value
        )));
    }
    u32::try_from(value)
        .map_err(|_| BenchError::InvalidRequest(format!("{} is too large (got {})", name, value)))
}

/// Request parameters as they appear in a config file, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RequestConfig {
    pub model_type: String,
    pub data_size: String,
    pub num_repeat: i64,
    pub num_epoch: i64,
    pub eval_upto: String,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            model_type: ModelTypeFilter::default().to_string(),
            data_size: DataSizeFilter::default().to_string(),
            num_repeat: 0,
            num_epoch: 0,
            eval_upto: Stage::Optimize.to_string(),
        }
    }
}

impl RequestConfig {
    pub fn validate(&self) -> BenchResult<BenchmarkRequest> {
        BenchmarkRequest::parse(
            &self.model_type,
            &self.data_size,
            self.num_repeat,
            self.num_epoch,
            &self.eval_upto,
        )
    }
}

/// Command templates for each pipeline stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub train: Option<String>,
    pub export: Option<String>,
    pub optimize: Option<String>,
}

/// Where a published summary is staged for an external uploader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingConfig {
    pub dir: PathBuf,
    #[serde(default = "default_artifact_prefix")]
    pub prefix: String,
}

impl StagingConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: default_artifact_prefix(),
        }
    }
}

fn default_artifact_prefix() -> String {
    "perf-benchmark".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("perf-bench-runs")
}

fn default_max_parallel() -> usize {
    1
}

/// Full configuration of one benchmark invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BenchRunConfig {
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub data_root: Option<PathBuf>,
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    #[serde(default)]
    pub summary_csv: Option<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub reducer: Reducer,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    #[serde(default)]
    pub staging: Option<StagingConfig>,
    #[serde(default)]
    pub env_file: Option<PathBuf>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for BenchRunConfig {
    fn default() -> Self {
        Self {
            request: RequestConfig::default(),
            data_root: None,
            catalog: None,
            summary_csv: None,
            output_dir: default_output_dir(),
            reducer: Reducer::default(),
            max_parallel: default_max_parallel(),
            run_timeout_secs: None,
            job_timeout_secs: None,
            staging: None,
            env_file: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl BenchRunConfig {
    /// Parse a config from YAML (JSON is accepted as a YAML subset)
    pub fn from_string(config: String) -> BenchResult<Self> {
        serde_yaml::from_str(&config).map_err(|e| BenchError::ConfigError(e.to_string()))
    }

    pub fn from_path(path: &Path) -> BenchResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BenchError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_string(content)
    }

    pub fn to_string(&self) -> BenchResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the effective config next to the run outputs
    pub fn save(&self, path: &Path) -> BenchResult<()> {
        fs::write(path, self.to_string()?)?;
        Ok(())
    }

    /// The catalog file: explicit path, or the first `catalog.{yaml,yml,json}` under the data root
    pub fn catalog_path(&self) -> BenchResult<PathBuf> {
        if let Some(catalog) = &self.catalog {
            return Ok(catalog.clone());
        }
        let data_root = self.data_root.as_ref().ok_or_else(|| {
            BenchError::ConfigError("either a data root or a catalog path is required".to_string())
        })?;
        ["catalog.yaml", "catalog.yml", "catalog.json"]
            .iter()
            .map(|name| data_root.join(name))
            .find(|p| p.is_file())
            .ok_or_else(|| BenchError::FileNotFound(data_root.join("catalog.yaml")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_valid_request() {
        let request = BenchmarkRequest::parse("all", "Medium", 2, 0, "export").unwrap();
        assert_eq!(request.model_type(), ModelTypeFilter::All);
        assert_eq!(request.data_size(), DataSizeFilter::Medium);
        assert_eq!(request.num_repeat(), 2);
        assert_eq!(request.num_epoch(), 0);
        assert_eq!(request.eval_upto(), Stage::Export);
    }

    #[test_case("fast", "all", 0, 0, "train" ; "unknown model type")]
    #[test_case("all", "huge", 0, 0, "train" ; "unknown data size")]
    #[test_case("all", "all", -1, 0, "train" ; "negative repeat")]
    #[test_case("all", "all", 0, -3, "train" ; "negative epoch")]
    #[test_case("all", "all", 0, 0, "deploy" ; "unknown stage")]
    fn test_parse_invalid_request(model: &str, size: &str, repeat: i64, epoch: i64, upto: &str) {
        let err = BenchmarkRequest::parse(model, size, repeat, epoch, upto).unwrap_err();
        assert!(matches!(err, BenchError::InvalidRequest(_)), "{err}");
    }

    #[test]
    fn test_stage_order() {
        assert!(Stage::Train < Stage::Export);
        assert!(Stage::Export < Stage::Optimize);
        assert_eq!(Stage::Export.next(), Some(Stage::Optimize));
        assert_eq!(Stage::Optimize.next(), None);
        assert_eq!(Stage::Optimize.to_string(), "optimize");
    }

    #[test]
    fn test_data_size_filter() {
        assert!(DataSizeFilter::All.matches(DatasetSize::Large));
        assert!(DataSizeFilter::Small.matches(DatasetSize::Small));
        assert!(!DataSizeFilter::Small.matches(DatasetSize::Medium));
    }

    #[test]
    fn test_config_defaults_and_roundtrip() {
        let cfg = BenchRunConfig::from_string(
            r#"
request:
  model-type: all
  num-repeat: 3
data-root: /data
pipeline:
  train: "python train.py --model {model}"
"#
            .to_string(),
        )
        .unwrap();
        assert_eq!(cfg.max_parallel, 1);
        assert_eq!(cfg.output_dir, PathBuf::from("perf-bench-runs"));
        assert_eq!(cfg.request.data_size, "all");
        assert_eq!(cfg.request.eval_upto, "optimize");

        let request = cfg.request.validate().unwrap();
        assert_eq!(request.num_repeat(), 3);

        let again = BenchRunConfig::from_string(cfg.to_string().unwrap()).unwrap();
        assert_eq!(again, cfg);
    }

    #[test]
    fn test_catalog_path_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BenchRunConfig {
            data_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(cfg.catalog_path(), Err(BenchError::FileNotFound(_))));

        fs::write(dir.path().join("catalog.yml"), "tasks: []").unwrap();
        assert_eq!(cfg.catalog_path().unwrap(), dir.path().join("catalog.yml"));
    }
}

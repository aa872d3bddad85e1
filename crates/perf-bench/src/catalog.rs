//! Task catalog: the models and datasets a benchmark can select from, plus the
//! repeat/epoch defaults used when a request leaves them at zero.
//!
//! Defaults resolve through explicit tables, most specific first:
//!
//! - repeat for (task, dataset size): task table, catalog table, built-in table
//! - epoch for (task, model): model entry, task entry, catalog entry, `0`
//!
//! An epoch of `0` is passed through to the pipeline, which then trains with
//! its own default schedule.

use crate::bench_config::DatasetSize;
use crate::errors::util::ensure_file_exists;
use crate::work_dir::dir_name;
use crate::errors::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Repeat counts used when neither the request nor the catalog gives one
pub const BUILTIN_REPEAT_SMALL: u32 = 5;
pub const BUILTIN_REPEAT_MEDIUM: u32 = 5;
pub const BUILTIN_REPEAT_LARGE: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelTag {
    Speed,
    Balance,
    Accuracy,
    Other(String),
}

impl From<String> for ModelTag {
    fn from(tag: String) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "speed" => ModelTag::Speed,
            "balance" => ModelTag::Balance,
            "accuracy" => ModelTag::Accuracy,
            _ => ModelTag::Other(tag),
        }
    }
}

impl From<ModelTag> for String {
    fn from(tag: ModelTag) -> Self {
        match tag {
            ModelTag::Speed => "speed".to_string(),
            ModelTag::Balance => "balance".to_string(),
            ModelTag::Accuracy => "accuracy".to_string(),
            ModelTag::Other(tag) => tag,
        }
    }
}

impl ModelTag {
    /// Models carrying one of these tags form the `default` model set
    pub fn is_default(&self) -> bool {
        matches!(self, ModelTag::Speed | ModelTag::Balance | ModelTag::Accuracy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<ModelTag>,
    #[serde(default)]
    pub default_epoch: Option<u32>,
}

impl ModelEntry {
    pub fn is_default(&self) -> bool {
        self.tags.iter().any(ModelTag::is_default)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub id: String,
    pub size: DatasetSize,
    /// Location of the dataset, relative to the data root unless absolute
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Per-size repeat counts; unset sizes fall through to the next table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepeatDefaults {
    #[serde(default)]
    pub small: Option<u32>,
    #[serde(default)]
    pub medium: Option<u32>,
    #[serde(default)]
    pub large: Option<u32>,
}

impl RepeatDefaults {
    pub fn get(&self, size: DatasetSize) -> Option<u32> {
        match size {
            DatasetSize::Small => self.small,
            DatasetSize::Medium => self.medium,
            DatasetSize::Large => self.large,
        }
    }

    fn builtin(size: DatasetSize) -> u32 {
        match size {
            DatasetSize::Small => BUILTIN_REPEAT_SMALL,
            DatasetSize::Medium => BUILTIN_REPEAT_MEDIUM,
            DatasetSize::Large => BUILTIN_REPEAT_LARGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub id: String,
    #[serde(default)]
    pub models: Vec<ModelEntry>,
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,
    #[serde(default)]
    pub default_repeat: RepeatDefaults,
    #[serde(default)]
    pub default_epoch: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCatalog {
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
    #[serde(default)]
    pub default_repeat: RepeatDefaults,
    #[serde(default)]
    pub default_epoch: Option<u32>,
    /// Base directory for relative dataset paths. Set by `load`.
    #[serde(skip)]
    pub data_root: Option<PathBuf>,
}

impl TaskCatalog {
    /// Load a YAML or JSON catalog and validate it
    pub fn load(path: &Path, data_root: Option<&Path>) -> BenchResult<Self> {
        ensure_file_exists(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            BenchError::CatalogError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut catalog = Self::parse(&content)?;
        catalog.data_root = data_root
            .map(Path::to_path_buf)
            .or_else(|| path.parent().map(Path::to_path_buf));
        tracing::debug!(
            catalog = %path.display(),
            tasks = catalog.tasks.len(),
            "loaded task catalog"
        );
        Ok(catalog)
    }

    pub fn parse(content: &str) -> BenchResult<Self> {
        let catalog: TaskCatalog = serde_yaml::from_str(content)
            .map_err(|e| BenchError::CatalogError(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Ids must stay distinct after mapping to work-dir names, or two runs
    /// would share a directory
    pub fn validate(&self) -> BenchResult<()> {
        check_unique("task", self.tasks.iter().map(|t| t.id.as_str()), "the catalog")?;
        for task in &self.tasks {
            let owner = format!("task '{}'", task.id);
            check_unique("model", task.models.iter().map(|m| m.id.as_str()), &owner)?;
            check_unique("dataset", task.datasets.iter().map(|d| d.id.as_str()), &owner)?;
            check_repeat_table(&task.default_repeat, &owner)?;
        }
        check_repeat_table(&self.default_repeat, "catalog")
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskEntry> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Repeat count for a dataset size of a task when the request gives none
    pub fn default_repeat(&self, task: &TaskEntry, size: DatasetSize) -> u32 {
        task.default_repeat
            .get(size)
            .or_else(|| self.default_repeat.get(size))
            .unwrap_or_else(|| RepeatDefaults::builtin(size))
    }

    /// Epoch count for a model of a task when the request gives none
    pub fn default_epoch(&self, task: &TaskEntry, model: &ModelEntry) -> u32 {
        model
            .default_epoch
            .or(task.default_epoch)
            .or(self.default_epoch)
            .unwrap_or(0)
    }

    pub fn dataset_path(&self, dataset: &DatasetEntry) -> Option<PathBuf> {
        let path = dataset.path.as_ref()?;
        match &self.data_root {
            Some(root) if path.is_relative() => Some(root.join(path)),
            _ => Some(path.clone()),
        }
    }
}

fn check_unique<'a>(
    kind: &str,
    ids: impl Iterator<Item = &'a str>,
    owner: &str,
) -> BenchResult<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for id in ids {
        if let Some(previous) = seen.insert(dir_name(id), id) {
            let reason = if previous == id {
                format!("duplicate {} id '{}' in {}", kind, id, owner)
            } else {
                format!(
                    "{} ids '{}' and '{}' in {} map to the same work directory",
                    kind, previous, id, owner
                )
            };
            return Err(BenchError::CatalogError(reason));
        }
    }
    Ok(())
}

fn check_repeat_table(table: &RepeatDefaults, owner: &str) -> BenchResult<()> {
    for size in DatasetSize::ALL {
        if table.get(size) == Some(0) {
            return Err(BenchError::CatalogError(format!(
                "{} sets a zero default repeat for {} datasets",
                owner, size
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
default_repeat:
  large: 2
tasks:
  - id: classification
    default_epoch: 10
    default_repeat:
      small: 3
    models:
      - id: mobilenet_v3
        tags: [speed]
        default_epoch: 4
      - id: efficientnet_b0
        tags: [balance]
      - id: deit_tiny
        tags: [experimental]
    datasets:
      - id: flowers
        size: small
        path: cls/flowers
      - id: food101
        size: large
        path: /mnt/food101
"#;

    #[test]
    fn test_parse_catalog_and_tags() {
        let catalog = TaskCatalog::parse(CATALOG).unwrap();
        let task = catalog.task("classification").unwrap();
        assert_eq!(task.models.len(), 3);
        assert!(task.models[0].is_default());
        assert!(task.models[1].is_default());
        assert_eq!(
            task.models[2].tags,
            vec![ModelTag::Other("experimental".to_string())]
        );
        assert!(!task.models[2].is_default());
    }

    #[test]
    fn test_repeat_fallback_chain() {
        let catalog = TaskCatalog::parse(CATALOG).unwrap();
        let task = catalog.task("classification").unwrap();
        assert_eq!(catalog.default_repeat(task, DatasetSize::Small), 3);
        assert_eq!(catalog.default_repeat(task, DatasetSize::Large), 2);
        assert_eq!(
            catalog.default_repeat(task, DatasetSize::Medium),
            BUILTIN_REPEAT_MEDIUM
        );
    }

    #[test]
    fn test_epoch_fallback_chain() {
        let mut catalog = TaskCatalog::parse(CATALOG).unwrap();
        let task = catalog.task("classification").unwrap().clone();
        assert_eq!(catalog.default_epoch(&task, &task.models[0]), 4);
        assert_eq!(catalog.default_epoch(&task, &task.models[1]), 10);

        let mut bare = task.clone();
        bare.default_epoch = None;
        assert_eq!(catalog.default_epoch(&bare, &bare.models[1]), 0);
        catalog.default_epoch = Some(7);
        assert_eq!(catalog.default_epoch(&bare, &bare.models[1]), 7);
    }

    #[test]
    fn test_dataset_paths_resolve_against_data_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        fs::write(&path, CATALOG).unwrap();

        let catalog = TaskCatalog::load(&path, None).unwrap();
        let task = catalog.task("classification").unwrap();
        assert_eq!(
            catalog.dataset_path(&task.datasets[0]),
            Some(dir.path().join("cls/flowers"))
        );
        assert_eq!(
            catalog.dataset_path(&task.datasets[1]),
            Some(PathBuf::from("/mnt/food101"))
        );
    }

    #[test]
    fn test_rejects_duplicates_and_zero_repeat() {
        let dup = r#"
tasks:
  - id: det
    models: [{id: yolox}, {id: yolox}]
"#;
        assert!(matches!(
            TaskCatalog::parse(dup),
            Err(BenchError::CatalogError(msg)) if msg.contains("yolox")
        ));

        let colliding = r#"
tasks:
  - id: det
    models: [{id: "yolox:s"}, {id: yolox_s}]
"#;
        assert!(matches!(
            TaskCatalog::parse(colliding),
            Err(BenchError::CatalogError(msg)) if msg.contains("same work directory")
        ));

        let zero = "default_repeat: {small: 0}\ntasks: []";
        assert!(matches!(
            TaskCatalog::parse(zero),
            Err(BenchError::CatalogError(_))
        ));
    }
}

use crate::runners::expander::RunSpec;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directory a single run works in: `<root>/<task>/<model>/<dataset>/run-<repeat>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    pub path: PathBuf,
}

impl WorkDir {
    pub fn path_for_run(root: &Path, spec: &RunSpec) -> PathBuf {
        root.join(dir_name(&spec.task_id))
            .join(dir_name(&spec.model_id))
            .join(dir_name(&spec.dataset_id))
            .join(format!("run-{}", spec.repeat_index))
    }

    /// Create the run directory and everything above it
    pub fn create(root: &Path, spec: &RunSpec) -> io::Result<WorkDir> {
        let path = Self::path_for_run(root, spec);
        fs::create_dir_all(&path)?;
        Ok(WorkDir { path })
    }
}

/// Directory name used for a task, model or dataset id
pub(crate) fn dir_name(name: &str) -> String {
    name.replace([':', '/', '\\', '"'], "_")
}

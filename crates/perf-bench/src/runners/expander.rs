use crate::bench_config::{BenchmarkRequest, DatasetSize, ModelTypeFilter, Stage};
use crate::catalog::TaskCatalog;
use crate::errors::{BenchError, BenchResult};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// One concrete run: a model trained on a dataset for one repeat, up to a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSpec {
    /// Position in the expanded sequence
    pub index: usize,
    pub task_id: String,
    pub model_id: String,
    pub dataset_id: String,
    pub dataset_size: DatasetSize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_path: Option<PathBuf>,
    pub repeat_index: u32,
    pub epoch: u32,
    pub stage_cutoff: Stage,
}

/// Key of the summary group a run belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub task_id: String,
    pub model_id: String,
    pub dataset_id: String,
}

impl RunSpec {
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            task_id: self.task_id.clone(),
            model_id: self.model_id.clone(),
            dataset_id: self.dataset_id.clone(),
        }
    }
}

impl fmt::Display for RunSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}#{}",
            self.task_id, self.model_id, self.dataset_id, self.repeat_index
        )
    }
}

pub struct RunExpander;

impl RunExpander {
    /// Expand a request into runs: tasks in catalog order, then models, datasets, repeats
    pub fn expand(request: &BenchmarkRequest, catalog: &TaskCatalog) -> BenchResult<Vec<RunSpec>> {
        let mut runs = Vec::new();

        for task in &catalog.tasks {
            let models = task.models.iter().filter(|m| match request.model_type() {
                ModelTypeFilter::Default => m.is_default(),
                ModelTypeFilter::All => true,
            });

            for model in models {
                let epoch = match request.num_epoch() {
                    0 => catalog.default_epoch(task, model),
                    n => n,
                };

                for dataset in task
                    .datasets
                    .iter()
                    .filter(|d| request.data_size().matches(d.size))
                {
                    let repeat = match request.num_repeat() {
                        0 => catalog.default_repeat(task, dataset.size),
                        n => n,
                    };

                    for repeat_index in 0..repeat {
                        runs.push(RunSpec {
                            index: runs.len(),
                            task_id: task.id.clone(),
                            model_id: model.id.clone(),
                            dataset_id: dataset.id.clone(),
                            dataset_size: dataset.size,
                            dataset_path: catalog.dataset_path(dataset),
                            repeat_index,
                            epoch,
                            stage_cutoff: request.eval_upto(),
                        });
                    }
                }
            }
        }

        if runs.is_empty() {
            return Err(BenchError::EmptyExpansion(format!(
                "model-type={} data-size={} matched no model/dataset pair in {} task(s)",
                request.model_type(),
                request.data_size(),
                catalog.tasks.len()
            )));
        }

        tracing::info!(
            runs = runs.len(),
            model_type = %request.model_type(),
            data_size = %request.data_size(),
            eval_upto = %request.eval_upto(),
            "expanded benchmark request"
        );
        Ok(runs)
    }
}

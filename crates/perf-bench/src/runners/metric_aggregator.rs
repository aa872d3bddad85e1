use crate::errors::BenchError;
use crate::reporting::{GroupStatus, RunResult, RunStatus, SummaryRow};
use crate::runners::expander::GroupKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Statistic used to collapse a metric across the repeats of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    #[default]
    Mean,
    Median,
    Min,
    Max,
}

impl Reducer {
    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        match self {
            Reducer::Mean => Some(values.iter().sum::<f64>() / n),
            Reducer::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    Some((sorted[mid - 1] + sorted[mid]) / 2.0)
                } else {
                    Some(sorted[mid])
                }
            }
            Reducer::Min => values.iter().copied().reduce(f64::min),
            Reducer::Max => values.iter().copied().reduce(f64::max),
        }
    }
}

impl FromStr for Reducer {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Reducer::Mean),
            "median" => Ok(Reducer::Median),
            "min" => Ok(Reducer::Min),
            "max" => Ok(Reducer::Max),
            other => Err(BenchError::ConfigError(format!(
                "unknown reducer '{}' (expected mean, median, min or max)",
                other
            ))),
        }
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reducer::Mean => "mean",
            Reducer::Median => "median",
            Reducer::Min => "min",
            Reducer::Max => "max",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Default)]
struct GroupAccumulator {
    first_index: usize,
    samples: HashMap<String, Vec<f64>>,
    success: usize,
    failed: usize,
    skipped: usize,
}

/// Streaming reduction of run results into one summary row per (task, model, dataset).
///
/// Needs a single owner: `accumulate` takes `&mut self`.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    reducer: Reducer,
    groups: HashMap<GroupKey, GroupAccumulator>,
    metric_names: Vec<String>,
}

impl ResultAggregator {
    pub fn new(reducer: Reducer) -> Self {
        Self {
            reducer,
            ..Default::default()
        }
    }

    pub fn accumulate(&mut self, result: &RunResult) {
        for (name, _) in result.metrics.iter() {
            if !self.metric_names.iter().any(|n| n == name) {
                self.metric_names.push(name.to_string());
            }
        }

        let group = self
            .groups
            .entry(result.spec.group_key())
            .or_insert_with(|| GroupAccumulator {
                first_index: result.spec.index,
                ..Default::default()
            });
        group.first_index = group.first_index.min(result.spec.index);

        match result.status {
            RunStatus::Success => {
                group.success += 1;
                for (name, value) in result.metrics.iter() {
                    if value.is_finite() {
                        group.samples.entry(name.to_string()).or_default().push(value);
                    }
                }
            }
            RunStatus::Failed => group.failed += 1,
            RunStatus::Skipped => group.skipped += 1,
        }
    }

    /// Number of distinct groups seen so far
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Summary rows in expansion order; every row carries every metric column.
    /// Does not consume the accumulated state, so repeated calls agree.
    pub fn finalize(&self) -> Vec<SummaryRow> {
        let mut groups: Vec<_> = self.groups.iter().collect();
        groups.sort_by_key(|(key, group)| (group.first_index, (*key).clone()));

        groups
            .into_iter()
            .map(|(key, group)| {
                let metrics = self
                    .metric_names
                    .iter()
                    .map(|name| {
                        let value = group
                            .samples
                            .get(name)
                            .and_then(|values| self.reducer.reduce(values));
                        (name.clone(), value)
                    })
                    .collect();

                let status = if group.success > 0 {
                    GroupStatus::Complete
                } else if group.skipped > 0 {
                    GroupStatus::Skipped
                } else {
                    GroupStatus::NoSuccessfulRuns
                };

                SummaryRow {
                    task_id: key.task_id.clone(),
                    model_id: key.model_id.clone(),
                    dataset_id: key.dataset_id.clone(),
                    metrics,
                    success_count: group.success,
                    failure_count: group.failed,
                    skipped_count: group.skipped,
                    status,
                }
            })
            .collect()
    }
}

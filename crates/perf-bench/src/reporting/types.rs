use crate::bench_config::Stage;
use crate::errors::BenchError;
use crate::runners::expander::RunSpec;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

/// Numeric metrics in insertion order. Names are namespaced by stage, e.g. `train/accuracy`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics(Vec<(String, f64)>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a metric, keeping its original position if it already exists
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// Merge stage-local metrics under the `<stage>/` prefix
    pub fn extend_for_stage(&mut self, stage: Stage, other: Metrics) {
        for (name, value) in other.0 {
            self.insert(format!("{}/{}", stage.as_str(), name), value);
        }
    }
}

impl FromIterator<(String, f64)> for Metrics {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut metrics = Metrics::new();
        for (name, value) in iter {
            metrics.insert(name, value);
        }
        metrics
    }
}

impl Serialize for Metrics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ordered_map(&self.0, serializer)
    }
}

fn ordered_map<S, V>(pairs: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for (name, value) in pairs {
        map.serialize_entry(name, value)?;
    }
    map.end()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of one run. Exactly one is produced for every RunSpec.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub spec: RunSpec,
    /// Last stage entered; `None` when the run never started
    pub stage: Option<Stage>,
    pub status: RunStatus,
    pub metrics: Metrics,
    /// Present iff the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

impl RunResult {
    pub fn success(spec: RunSpec, stage: Stage, metrics: Metrics) -> Self {
        Self {
            spec,
            stage: Some(stage),
            status: RunStatus::Success,
            metrics,
            error: None,
            skip_reason: None,
            started_at: Utc::now(),
            elapsed_secs: 0.0,
        }
    }

    /// A run that failed at `stage`; metrics of the stages that did complete are kept
    pub fn failed(spec: RunSpec, stage: Stage, error: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            spec,
            stage: Some(stage),
            status: RunStatus::Failed,
            metrics,
            error: Some(error.into()),
            skip_reason: None,
            started_at: Utc::now(),
            elapsed_secs: 0.0,
        }
    }

    /// A run whose task died outside any stage, so no stage is known
    pub fn aborted(spec: RunSpec, error: impl Into<String>) -> Self {
        Self {
            spec,
            stage: None,
            status: RunStatus::Failed,
            metrics: Metrics::new(),
            error: Some(error.into()),
            skip_reason: None,
            started_at: Utc::now(),
            elapsed_secs: 0.0,
        }
    }

    pub fn skipped(spec: RunSpec, reason: impl Into<String>) -> Self {
        Self {
            spec,
            stage: None,
            status: RunStatus::Skipped,
            metrics: Metrics::new(),
            error: None,
            skip_reason: Some(reason.into()),
            started_at: Utc::now(),
            elapsed_secs: 0.0,
        }
    }

    pub fn timed(mut self, started_at: DateTime<Utc>, elapsed_secs: f64) -> Self {
        self.started_at = started_at;
        self.elapsed_secs = elapsed_secs;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// At least one run succeeded
    Complete,
    /// Every run of the group failed
    NoSuccessfulRuns,
    /// Nothing succeeded and at least one run was skipped
    Skipped,
}

/// One (task, model, dataset) group with its metrics reduced across repeats
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub task_id: String,
    pub model_id: String,
    pub dataset_id: String,
    /// Every metric column of the summary, `None` where the group has no value
    #[serde(serialize_with = "ordered_map")]
    pub metrics: Vec<(String, Option<f64>)>,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    pub status: GroupStatus,
}

impl SummaryRow {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| *v)
    }

    pub fn run_count(&self) -> usize {
        self.success_count + self.failure_count + self.skipped_count
    }

    /// The group-level error, if every run of the group failed
    pub fn error(&self) -> Option<BenchError> {
        match self.status {
            GroupStatus::NoSuccessfulRuns => Some(BenchError::NoSuccessfulRuns {
                task: self.task_id.clone(),
                model: self.model_id.clone(),
                dataset: self.dataset_id.clone(),
                failures: self.failure_count,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_keep_insertion_order() {
        let mut metrics = Metrics::new();
        metrics.insert("b", 1.0);
        metrics.insert("a", 2.0);
        metrics.insert("b", 3.0);
        let names: Vec<_> = metrics.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(metrics.get("b"), Some(3.0));
        assert_eq!(
            serde_json::to_string(&metrics).unwrap(),
            r#"{"b":3.0,"a":2.0}"#
        );
    }

    #[test]
    fn test_extend_for_stage_prefixes_names() {
        let mut metrics = Metrics::new();
        metrics.extend_for_stage(
            Stage::Export,
            vec![("accuracy".to_string(), 0.9)].into_iter().collect(),
        );
        assert_eq!(metrics.get("export/accuracy"), Some(0.9));
    }
}

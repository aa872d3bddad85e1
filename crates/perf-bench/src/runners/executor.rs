use crate::bench_config::Stage;
use crate::reporting::{Metrics, RunResult};
use crate::runners::expander::RunSpec;
use crate::runners::pipeline::{ExportArtifact, Pipeline};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Detail recorded on runs that exceed their wall-clock budget
pub const TIMEOUT_DETAIL: &str = "timeout";

/// Progress of a single run through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running(Stage),
    /// Finished every stage up to and including `last`
    Done { last: Stage },
    Failed { stage: Stage, detail: String },
}

impl RunState {
    /// Next state after the current stage completed. Stages past `cutoff` are never entered.
    pub fn advance(&self, cutoff: Stage) -> RunState {
        match self {
            RunState::Pending => RunState::Running(Stage::Train),
            RunState::Running(stage) => match stage.next() {
                Some(next) if next <= cutoff => RunState::Running(next),
                _ => RunState::Done { last: *stage },
            },
            terminal => terminal.clone(),
        }
    }
}

#[derive(Default)]
struct Progress {
    stage: Option<Stage>,
    metrics: Metrics,
}

/// Executes one RunSpec at a time against a pipeline. Holds no per-run state.
pub struct RunExecutor {
    pipeline: Arc<dyn Pipeline>,
    run_timeout: Option<Duration>,
}

impl RunExecutor {
    pub fn new(pipeline: Arc<dyn Pipeline>) -> Self {
        Self {
            pipeline,
            run_timeout: None,
        }
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Run the spec to completion, cutoff, failure or timeout. Never retries.
    pub async fn execute(&self, spec: RunSpec) -> RunResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let progress = Mutex::new(Progress::default());

        tracing::info!(run = %spec, cutoff = %spec.stage_cutoff, epoch = spec.epoch, "starting run");

        let guarded = AssertUnwindSafe(self.drive(&spec, &progress)).catch_unwind();
        let outcome = match self.run_timeout {
            Some(budget) => tokio::time::timeout(budget, guarded)
                .await
                .map_err(|_| TIMEOUT_DETAIL.to_string()),
            None => Ok(guarded.await),
        };
        let state = match outcome {
            Ok(Ok(state)) => state,
            Ok(Err(panic)) => RunState::Failed {
                stage: lock(&progress).stage.unwrap_or(Stage::Train),
                detail: format!("pipeline panicked: {}", panic_message(panic.as_ref())),
            },
            Err(detail) => RunState::Failed {
                stage: lock(&progress).stage.unwrap_or(Stage::Train),
                detail,
            },
        };

        let metrics = progress
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .metrics;
        let elapsed = clock.elapsed().as_secs_f64();

        let result = match state {
            RunState::Done { last } => {
                tracing::info!(run = %spec, stage = %last, elapsed, "run finished");
                RunResult::success(spec, last, metrics)
            }
            RunState::Failed { stage, detail } => {
                tracing::warn!(run = %spec, stage = %stage, error = %detail, "run failed");
                RunResult::failed(spec, stage, detail, metrics)
            }
            RunState::Pending | RunState::Running(_) => {
                unreachable!("drive returns only terminal states")
            }
        };
        result.timed(started_at, elapsed)
    }

    async fn drive(&self, spec: &RunSpec, progress: &Mutex<Progress>) -> RunState {
        let mut state = RunState::Pending.advance(spec.stage_cutoff);
        let mut artifact: Option<ExportArtifact> = None;

        while let RunState::Running(stage) = state {
            lock(progress).stage = Some(stage);
            let clock = Instant::now();

            let outcome = match stage {
                Stage::Train => self.pipeline.train(spec).await,
                Stage::Export => match self.pipeline.export(spec).await {
                    Ok(exported) => {
                        let metrics = exported.metrics.clone();
                        artifact = Some(exported);
                        Ok(metrics)
                    }
                    Err(e) => Err(e),
                },
                Stage::Optimize => match &artifact {
                    Some(exported) => self.pipeline.optimize(spec, exported).await,
                    None => Err(anyhow::anyhow!("optimize requires an exported artifact")),
                },
            };

            state = match outcome {
                Ok(mut metrics) => {
                    metrics.insert("e2e_time", clock.elapsed().as_secs_f64());
                    lock(progress).metrics.extend_for_stage(stage, metrics);
                    tracing::debug!(run = %spec, stage = %stage, "stage complete");
                    state.advance(spec.stage_cutoff)
                }
                Err(e) => RunState::Failed {
                    stage,
                    detail: format!("{:#}", e),
                },
            };
        }

        state
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn lock(progress: &Mutex<Progress>) -> std::sync::MutexGuard<'_, Progress> {
    progress.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

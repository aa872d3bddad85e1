use crate::bench_config::BenchmarkRequest;
use crate::catalog::TaskCatalog;
use crate::config_manager::ConfigManager;
use crate::errors::{BenchError, BenchResult};
use crate::reporting::{
    ArtifactPublisher, DirectoryStager, PublishedArtifact, RunResult, RunStatus, SummaryRow,
};
use crate::runners::command_pipeline::CommandPipeline;
use crate::runners::executor::RunExecutor;
use crate::runners::expander::{RunExpander, RunSpec};
use crate::runners::metric_aggregator::{Reducer, ResultAggregator};
use crate::runners::pipeline::Pipeline;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const SKIP_CANCELLED: &str = "cancelled";
pub const SKIP_JOB_TIMEOUT: &str = "job timeout";

/// How a finished benchmark should be reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchOutcome {
    /// Every run succeeded or was skipped
    Passed,
    /// At least one run failed
    RunsFailed,
}

impl BenchOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchOutcome::Passed => 0,
            BenchOutcome::RunsFailed => 2,
        }
    }
}

/// Everything a benchmark produced
#[derive(Debug)]
pub struct BenchReport {
    /// One result per expanded run, in expansion order
    pub results: Vec<RunResult>,
    pub rows: Vec<SummaryRow>,
    pub published: Option<PublishedArtifact>,
}

impl BenchReport {
    pub fn count(&self, status: RunStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Groups in which every run failed
    pub fn group_errors(&self) -> Vec<BenchError> {
        self.rows.iter().filter_map(SummaryRow::error).collect()
    }

    pub fn outcome(&self) -> BenchOutcome {
        if self.count(RunStatus::Failed) > 0 {
            BenchOutcome::RunsFailed
        } else {
            BenchOutcome::Passed
        }
    }
}

/// Coordinates expansion, bounded execution, aggregation and publishing
pub struct BenchmarkRunner {
    request: BenchmarkRequest,
    catalog: TaskCatalog,
    pipeline: Arc<dyn Pipeline>,
    reducer: Reducer,
    max_parallel: usize,
    run_timeout: Option<Duration>,
    job_timeout: Option<Duration>,
    summary_path: Option<PathBuf>,
    publisher: ArtifactPublisher,
}

impl BenchmarkRunner {
    pub fn new(request: BenchmarkRequest, catalog: TaskCatalog, pipeline: Arc<dyn Pipeline>) -> Self {
        Self {
            request,
            catalog,
            pipeline,
            reducer: Reducer::default(),
            max_parallel: 1,
            run_timeout: None,
            job_timeout: None,
            summary_path: None,
            publisher: ArtifactPublisher::new(),
        }
    }

    /// Build a runner that drives the configured stage commands and publishes
    /// to the configured summary CSV
    pub fn from_config(manager: &ConfigManager) -> BenchResult<Self> {
        let config = manager.config();
        let request = manager.request()?;
        let summary_csv = config.summary_csv.clone().ok_or_else(|| {
            BenchError::ConfigError(
                "no summary destination (set --summary-csv or summary-csv in the config)"
                    .to_string(),
            )
        })?;
        let catalog = TaskCatalog::load(&config.catalog_path()?, config.data_root.as_deref())?;

        let pipeline = CommandPipeline::new(
            config.pipeline.clone(),
            config.output_dir.clone(),
            config.data_root.clone(),
            manager.get_environment_variables(),
        );
        pipeline.check_stages(request.eval_upto())?;

        let mut publisher = ArtifactPublisher::new();
        if let Some(staging) = &config.staging {
            publisher = publisher.with_stager(
                Box::new(DirectoryStager::new(&staging.dir)),
                staging.prefix.clone(),
            );
        }

        Ok(Self::new(request, catalog, Arc::new(pipeline))
            .with_reducer(config.reducer)
            .with_max_parallel(config.max_parallel)
            .with_run_timeout(config.run_timeout_secs.map(Duration::from_secs))
            .with_job_timeout(config.job_timeout_secs.map(Duration::from_secs))
            .with_summary(Some(summary_csv))
            .with_publisher(publisher))
    }

    pub fn with_reducer(mut self, reducer: Reducer) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Wall-clock budget for a single run
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_summary(mut self, path: Option<PathBuf>) -> Self {
        self.summary_path = path;
        self
    }

    pub fn with_publisher(mut self, publisher: ArtifactPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// Expand the request without running anything
    pub fn plan(&self) -> BenchResult<Vec<RunSpec>> {
        RunExpander::expand(&self.request, &self.catalog)
    }

    /// Run every expanded spec and publish the summary.
    ///
    /// Cancelling `cancel` (or reaching the job timeout) skips runs that have not
    /// started; runs already in flight finish. Only request, catalog and publish
    /// errors are returned as `Err`.
    pub async fn run(&self, cancel: CancellationToken) -> BenchResult<BenchReport> {
        let specs = self.plan()?;
        let total = specs.len();
        tracing::info!(
            runs = total,
            max_parallel = self.max_parallel,
            reducer = %self.reducer,
            "starting benchmark"
        );

        let token = cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = self.job_timeout.map(|limit| {
            let token = token.clone();
            let timed_out = timed_out.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        tracing::warn!(?limit, "job timeout reached, skipping pending runs");
                        timed_out.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<RunResult>();
        let reducer = self.reducer;
        let collector = tokio::spawn(async move {
            let mut aggregator = ResultAggregator::new(reducer);
            let mut results = Vec::new();
            while let Some(result) = rx.recv().await {
                aggregator.accumulate(&result);
                results.push(result);
            }
            (aggregator, results)
        });

        let executor =
            Arc::new(RunExecutor::new(self.pipeline.clone()).with_run_timeout(self.run_timeout));
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();

        for spec in specs {
            let executor = executor.clone();
            let semaphore = semaphore.clone();
            let token = token.clone();
            let timed_out = timed_out.clone();
            let tx = tx.clone();
            let task_spec = spec.clone();

            let handle = tasks.spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let result = match permit {
                    Some(_permit) if !token.is_cancelled() => executor.execute(task_spec).await,
                    _ => {
                        let reason = skip_reason(&timed_out);
                        tracing::info!(run = %task_spec, reason, "skipping run");
                        RunResult::skipped(task_spec, reason)
                    }
                };
                let _ = tx.send(result);
            });
            in_flight.insert(handle.id(), spec);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, ())) => {
                    in_flight.remove(&id);
                }
                Err(e) => {
                    // stage panics are caught by the executor; this run died elsewhere
                    if let Some(spec) = in_flight.remove(&e.id()) {
                        tracing::error!(run = %spec, error = %e, "run task aborted");
                        let _ = tx.send(RunResult::aborted(spec, format!("run task aborted: {}", e)));
                    }
                }
            }
        }
        drop(tx);

        if let Some(timer) = timer {
            timer.abort();
        }

        let (aggregator, mut results) = collector
            .await
            .map_err(|e| BenchError::Other(format!("result collector failed: {}", e)))?;
        results.sort_by_key(|r| r.spec.index);
        debug_assert_eq!(results.len(), total);

        let rows = aggregator.finalize();
        tracing::debug!(groups = aggregator.group_count(), "aggregated run results");
        let published = match &self.summary_path {
            Some(path) => Some(self.publisher.publish(&rows, &results, path)?),
            None => None,
        };

        let report = BenchReport {
            results,
            rows,
            published,
        };
        for err in report.group_errors() {
            tracing::error!(error = %err, "benchmark group produced no results");
        }
        tracing::info!(
            succeeded = report.count(RunStatus::Success),
            failed = report.count(RunStatus::Failed),
            skipped = report.count(RunStatus::Skipped),
            "benchmark finished"
        );
        Ok(report)
    }
}

fn skip_reason(timed_out: &AtomicBool) -> &'static str {
    if timed_out.load(Ordering::SeqCst) {
        SKIP_JOB_TIMEOUT
    } else {
        SKIP_CANCELLED
    }
}

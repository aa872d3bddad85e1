use crate::bench_config::{PipelineConfig, Stage};
use crate::errors::{BenchError, BenchResult};
use crate::reporting::Metrics;
use crate::runners::expander::RunSpec;
use crate::runners::pipeline::{ExportArtifact, Pipeline};
use crate::work_dir::WorkDir;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

const STDERR_TAIL_LINES: usize = 20;

/// Runs each pipeline stage as an external command.
///
/// Templates are split shell-style and may use `{task}`, `{model}`, `{dataset}`,
/// `{dataset_path}`, `{epoch}`, `{repeat}`, `{work_dir}`, `{data_root}` and, for
/// optimize, `{artifact}`. The last stdout line holding a JSON object carries the
/// stage's metrics; export may add an `artifact` path to it.
///
/// Commands run inside their run's work directory, so every path handed to
/// them is absolute.
pub struct CommandPipeline {
    commands: PipelineConfig,
    work_root: PathBuf,
    data_root: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

struct StageOutput {
    metrics: Metrics,
    artifact: Option<PathBuf>,
}

impl CommandPipeline {
    pub fn new(
        commands: PipelineConfig,
        work_root: PathBuf,
        data_root: Option<PathBuf>,
        envs: Vec<(String, String)>,
    ) -> Self {
        Self {
            commands,
            work_root: absolute(work_root),
            data_root: data_root.map(absolute),
            envs,
        }
    }

    /// Fail fast when a stage the request needs has no command
    pub fn check_stages(&self, cutoff: Stage) -> BenchResult<()> {
        for stage in Stage::ALL.into_iter().filter(|s| *s <= cutoff) {
            if self.template(stage).is_none() {
                return Err(BenchError::ConfigError(format!(
                    "no pipeline command configured for the {} stage",
                    stage
                )));
            }
        }
        Ok(())
    }

    fn template(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Train => self.commands.train.as_deref(),
            Stage::Export => self.commands.export.as_deref(),
            Stage::Optimize => self.commands.optimize.as_deref(),
        }
    }

    fn placeholders(
        &self,
        spec: &RunSpec,
        work_dir: &Path,
        artifact: Option<&Path>,
    ) -> Vec<(&'static str, String)> {
        let display = |p: Option<&Path>| p.map(|p| p.display().to_string()).unwrap_or_default();
        vec![
            ("{task}", spec.task_id.clone()),
            ("{model}", spec.model_id.clone()),
            ("{dataset}", spec.dataset_id.clone()),
            (
                "{dataset_path}",
                display(spec.dataset_path.clone().map(absolute).as_deref()),
            ),
            ("{epoch}", spec.epoch.to_string()),
            ("{repeat}", spec.repeat_index.to_string()),
            ("{work_dir}", work_dir.display().to_string()),
            ("{data_root}", display(self.data_root.as_deref())),
            ("{artifact}", display(artifact)),
        ]
    }

    async fn run_stage(
        &self,
        stage: Stage,
        spec: &RunSpec,
        artifact: Option<&Path>,
    ) -> Result<StageOutput> {
        let template = self
            .template(stage)
            .ok_or_else(|| anyhow!("no command configured for the {} stage", stage))?;
        let work_dir = WorkDir::create(&self.work_root, spec)
            .with_context(|| format!("creating work dir for {}", spec))?;
        let argv = render(template, &self.placeholders(spec, &work_dir.path, artifact))?;

        tracing::debug!(run = %spec, stage = %stage, command = ?argv, "launching stage command");

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(&work_dir.path)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .envs(run_envs(spec, stage, &work_dir.path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to launch '{}'", argv[0]))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} command exited with {}: {}",
                stage,
                output.status,
                tail(&stderr, STDERR_TAIL_LINES)
            );
        }

        let report = last_json_object(&stdout)
            .ok_or_else(|| anyhow!("{} command printed no JSON metrics line", stage))?;
        Ok(parse_stage_output(report, &work_dir.path))
    }
}

#[async_trait]
impl Pipeline for CommandPipeline {
    async fn train(&self, spec: &RunSpec) -> Result<Metrics> {
        Ok(self.run_stage(Stage::Train, spec, None).await?.metrics)
    }

    async fn export(&self, spec: &RunSpec) -> Result<ExportArtifact> {
        let output = self.run_stage(Stage::Export, spec, None).await?;
        let path = output
            .artifact
            .unwrap_or_else(|| WorkDir::path_for_run(&self.work_root, spec).join("exported"));
        Ok(ExportArtifact {
            path,
            metrics: output.metrics,
        })
    }

    async fn optimize(&self, spec: &RunSpec, artifact: &ExportArtifact) -> Result<Metrics> {
        Ok(self
            .run_stage(Stage::Optimize, spec, Some(&artifact.path))
            .await?
            .metrics)
    }
}

fn run_envs(spec: &RunSpec, stage: Stage, work_dir: &Path) -> Vec<(String, String)> {
    let mut envs = vec![
        ("PERF_BENCH_TASK".to_string(), spec.task_id.clone()),
        ("PERF_BENCH_MODEL".to_string(), spec.model_id.clone()),
        ("PERF_BENCH_DATASET".to_string(), spec.dataset_id.clone()),
        ("PERF_BENCH_EPOCH".to_string(), spec.epoch.to_string()),
        ("PERF_BENCH_REPEAT".to_string(), spec.repeat_index.to_string()),
        ("PERF_BENCH_STAGE".to_string(), stage.to_string()),
        (
            "PERF_BENCH_WORK_DIR".to_string(),
            work_dir.display().to_string(),
        ),
    ];
    if let Some(path) = &spec.dataset_path {
        envs.push((
            "PERF_BENCH_DATASET_PATH".to_string(),
            absolute(path.clone()).display().to_string(),
        ));
    }
    envs
}

/// Resolve against the current directory; only an empty path stays as it is
fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

fn render(template: &str, vars: &[(&str, String)]) -> Result<Vec<String>> {
    let argv = shlex::split(template)
        .ok_or_else(|| anyhow!("unbalanced quoting in command template: {}", template))?;
    if argv.is_empty() {
        bail!("empty command template");
    }
    Ok(argv
        .into_iter()
        .map(|arg| {
            vars.iter()
                .fold(arg, |arg, (key, value)| arg.replace(key, value))
        })
        .collect())
}

fn last_json_object(stdout: &str) -> Option<Map<String, Value>> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

fn parse_stage_output(report: Map<String, Value>, work_dir: &Path) -> StageOutput {
    let mut metrics = Metrics::new();
    let mut artifact = None;
    for (name, value) in report {
        match value {
            Value::String(path) if name == "artifact" => {
                let path = PathBuf::from(path);
                artifact = Some(if path.is_relative() {
                    work_dir.join(path)
                } else {
                    path
                });
            }
            Value::Number(n) => {
                if let Some(v) = n.as_f64() {
                    metrics.insert(name, v);
                }
            }
            Value::Bool(b) => metrics.insert(name, if b { 1.0 } else { 0.0 }),
            other => tracing::debug!(metric = %name, value = %other, "ignoring non-numeric metric"),
        }
    }
    StageOutput { metrics, artifact }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench_config::DatasetSize;

    fn spec(cutoff: Stage) -> RunSpec {
        RunSpec {
            index: 0,
            task_id: "classification".to_string(),
            model_id: "mobilenet".to_string(),
            dataset_id: "flowers".to_string(),
            dataset_size: DatasetSize::Small,
            dataset_path: Some(PathBuf::from("/data/flowers")),
            repeat_index: 1,
            epoch: 3,
            stage_cutoff: cutoff,
        }
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let vars = vec![
            ("{model}", "mobilenet".to_string()),
            ("{epoch}", "3".to_string()),
        ];
        let argv = render("train.sh --model {model} 'epochs={epoch}'", &vars).unwrap();
        assert_eq!(argv, vec!["train.sh", "--model", "mobilenet", "epochs=3"]);
        assert!(render("train.sh 'unterminated", &vars).is_err());
        assert!(render("   ", &vars).is_err());
    }

    #[test]
    fn test_last_json_object_wins() {
        let stdout = "epoch 1 done\n{\"loss\": 2.0}\nnoise\n{\"loss\": 1.5, \"accuracy\": 0.8}\n[1,2]\n";
        let map = last_json_object(stdout).unwrap();
        assert_eq!(map.get("loss").and_then(Value::as_f64), Some(1.5));
        assert!(last_json_object("no metrics here").is_none());
    }

    #[test]
    fn test_parse_stage_output() {
        let dir = Path::new("/runs/x");
        let report = serde_json::json!({
            "latency": 12.5,
            "fp16": true,
            "artifact": "model.xml",
            "note": "ignored"
        });
        let Value::Object(map) = report else { unreachable!() };
        let output = parse_stage_output(map, dir);
        assert_eq!(output.metrics.get("latency"), Some(12.5));
        assert_eq!(output.metrics.get("fp16"), Some(1.0));
        assert_eq!(output.metrics.get("note"), None);
        assert_eq!(output.artifact, Some(dir.join("model.xml")));
    }

    #[test]
    fn test_check_stages() {
        let pipeline = CommandPipeline::new(
            PipelineConfig {
                train: Some("train.sh".to_string()),
                export: None,
                optimize: None,
            },
            PathBuf::from("runs"),
            None,
            Vec::new(),
        );
        assert!(pipeline.check_stages(Stage::Train).is_ok());
        assert!(matches!(
            pipeline.check_stages(Stage::Export),
            Err(BenchError::ConfigError(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stage_commands_run_in_work_dir() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = CommandPipeline::new(
            PipelineConfig {
                train: Some(
                    r#"sh -c 'echo training $PERF_BENCH_MODEL; echo "{\"accuracy\": 0.75, \"epochs\": {epoch}}"'"#
                        .to_string(),
                ),
                export: Some(r#"sh -c 'touch model.onnx; echo "{\"artifact\": \"model.onnx\"}"'"#.to_string()),
                optimize: Some(r#"sh -c 'test -f {artifact} && echo "{\"latency\": 4}"'"#.to_string()),
            },
            root.path().to_path_buf(),
            None,
            Vec::new(),
        );
        let spec = spec(Stage::Optimize);

        let train = pipeline.train(&spec).await.unwrap();
        assert_eq!(train.get("accuracy"), Some(0.75));
        assert_eq!(train.get("epochs"), Some(3.0));

        let artifact = pipeline.export(&spec).await.unwrap();
        assert_eq!(
            artifact.path,
            WorkDir::path_for_run(root.path(), &spec).join("model.onnx")
        );

        let optimize = pipeline.optimize(&spec, &artifact).await.unwrap();
        assert_eq!(optimize.get("latency"), Some(4.0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relative_output_dir_hands_out_absolute_paths() {
        // a relative root, as with the default `perf-bench-runs`
        let root = tempfile::tempdir_in(".").unwrap();
        let relative = PathBuf::from(root.path().file_name().unwrap());
        let pipeline = CommandPipeline::new(
            PipelineConfig {
                train: Some(r#"sh -c 'echo "{\"accuracy\": 0.5}"'"#.to_string()),
                export: Some(r#"sh -c 'touch model.onnx; echo "{\"artifact\": \"model.onnx\"}"'"#.to_string()),
                optimize: Some(
                    r#"sh -c 'test -f {artifact} && test -d {work_dir} && echo "{\"latency\": 2}"'"#
                        .to_string(),
                ),
            },
            relative.clone(),
            Some(PathBuf::from("data")),
            Vec::new(),
        );
        let spec = spec(Stage::Optimize);

        let artifact = pipeline.export(&spec).await.unwrap();
        assert!(artifact.path.is_absolute());
        assert!(artifact.path.is_file());
        let optimize = pipeline.optimize(&spec, &artifact).await.unwrap();
        assert_eq!(optimize.get("latency"), Some(2.0));

        let vars = pipeline.placeholders(&spec, Path::new("w"), None);
        let data_root = &vars.iter().find(|(k, _)| *k == "{data_root}").unwrap().1;
        assert!(Path::new(data_root).is_absolute());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_reports_stderr() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = CommandPipeline::new(
            PipelineConfig {
                train: Some("sh -c 'echo out of memory >&2; exit 3'".to_string()),
                ..Default::default()
            },
            root.path().to_path_buf(),
            None,
            Vec::new(),
        );
        let err = pipeline.train(&spec(Stage::Train)).await.unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("out of memory"), "{msg}");
        assert!(msg.contains("exit status: 3"), "{msg}");
    }
}

use crate::errors::util::to_publish_error;
use crate::errors::BenchResult;
use crate::reporting::report_generators::{
    CsvReportGenerator, ReportGenerator, RunsJsonReportGenerator,
};
use crate::reporting::types::{RunResult, SummaryRow};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Hands a published file to whatever uploads artifacts (the CI runner, usually)
pub trait ArtifactStager: Send + Sync {
    /// Stage `file` under `name_prefix`, returning where it was staged
    fn stage(&self, file: &Path, name_prefix: &str) -> BenchResult<PathBuf>;
}

/// Copies artifacts into a directory an uploader picks up from
pub struct DirectoryStager {
    dir: PathBuf,
}

impl DirectoryStager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArtifactStager for DirectoryStager {
    fn stage(&self, file: &Path, name_prefix: &str) -> BenchResult<PathBuf> {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "summary.csv".to_string());
        let target = self.dir.join(format!("{}-{}", name_prefix, file_name));

        fs::create_dir_all(&self.dir).map_err(|e| to_publish_error(e, &target))?;
        // copy through a temp file so the uploader never sees half a file either
        let content = fs::read(file).map_err(|e| to_publish_error(e, file))?;
        write_atomically(&target, |out| {
            out.write_all(&content)?;
            Ok(())
        })?;
        tracing::info!(artifact = %target.display(), "staged artifact for upload");
        Ok(target)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    pub path: PathBuf,
    pub runs_path: PathBuf,
    pub staged: Option<PathBuf>,
}

/// Writes the summary artifact; optionally stages it for upload
#[derive(Default)]
pub struct ArtifactPublisher {
    stager: Option<(Box<dyn ArtifactStager>, String)>,
}

impl ArtifactPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stager(mut self, stager: Box<dyn ArtifactStager>, name_prefix: impl Into<String>) -> Self {
        self.stager = Some((stager, name_prefix.into()));
        self
    }

    /// Path of the per-run JSON written next to a summary
    pub fn runs_path_for(destination: &Path) -> PathBuf {
        let stem = destination
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "summary".to_string());
        destination.with_file_name(format!("{}.runs.json", stem))
    }

    /// Atomically write the summary CSV and the per-run JSON next to it.
    ///
    /// Both files are fully written before either replaces anything; the
    /// summary is renamed into place first, so the sidecar never appears
    /// without it.
    pub fn publish(
        &self,
        rows: &[SummaryRow],
        results: &[RunResult],
        destination: &Path,
    ) -> BenchResult<PublishedArtifact> {
        let runs_path = Self::runs_path_for(destination);
        let summary = prepare(destination, |out| {
            CsvReportGenerator.generate(rows, results, out)
        })?;
        let runs = prepare(&runs_path, |out| {
            RunsJsonReportGenerator.generate(rows, results, out)
        })?;
        persist(summary, destination)?;
        persist(runs, &runs_path)?;
        tracing::info!(
            summary = %destination.display(),
            rows = rows.len(),
            "published benchmark summary"
        );

        let staged = match &self.stager {
            Some((stager, prefix)) => Some(stager.stage(destination, prefix)?),
            None => None,
        };

        Ok(PublishedArtifact {
            path: destination.to_path_buf(),
            runs_path,
            staged,
        })
    }
}

/// Write into a temp file beside `destination`, then rename over it
fn write_atomically<F>(destination: &Path, write: F) -> BenchResult<()>
where
    F: FnOnce(&mut dyn Write) -> BenchResult<()>,
{
    let temp = prepare(destination, write)?;
    persist(temp, destination)
}

/// Fully write and sync a temp file in `destination`'s directory
fn prepare<F>(destination: &Path, write: F) -> BenchResult<NamedTempFile>
where
    F: FnOnce(&mut dyn Write) -> BenchResult<()>,
{
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| to_publish_error(e, destination))?;

    let mut temp = NamedTempFile::new_in(&dir).map_err(|e| to_publish_error(e, destination))?;
    {
        let mut out = BufWriter::new(temp.as_file_mut());
        write(&mut out).map_err(|e| to_publish_error(e, destination))?;
        out.flush().map_err(|e| to_publish_error(e, destination))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|e| to_publish_error(e, destination))?;
    Ok(temp)
}

fn persist(temp: NamedTempFile, destination: &Path) -> BenchResult<()> {
    temp.persist(destination)
        .map_err(|e| to_publish_error(e.error, destination))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BenchError;
    use crate::reporting::types::GroupStatus;

    fn row() -> SummaryRow {
        SummaryRow {
            task_id: "segmentation".to_string(),
            model_id: "lite_hrnet".to_string(),
            dataset_id: "kvasir".to_string(),
            metrics: vec![("train/dice".to_string(), Some(0.8))],
            success_count: 1,
            failure_count: 0,
            skipped_count: 0,
            status: GroupStatus::Complete,
        }
    }

    #[test]
    fn test_publish_writes_summary_and_runs() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out").join("perf-summary.csv");

        let published = ArtifactPublisher::new()
            .publish(&[row()], &[], &destination)
            .unwrap();

        assert_eq!(published.path, destination);
        assert_eq!(published.runs_path, dir.path().join("out/perf-summary.runs.json"));
        assert!(published.staged.is_none());
        let csv = fs::read_to_string(&destination).unwrap();
        assert!(csv.starts_with("task,model,dataset,train/dice,failure_count\n"));
        assert_eq!(fs::read_to_string(&published.runs_path).unwrap().trim(), "[]");

        // only the two artifacts remain, no temp files
        let entries = fs::read_dir(dir.path().join("out")).unwrap().count();
        assert_eq!(entries, 2);
    }

    #[test]
    fn test_publish_stages_copy() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("summary.csv");
        let stage_dir = dir.path().join("upload");

        let published = ArtifactPublisher::new()
            .with_stager(Box::new(DirectoryStager::new(&stage_dir)), "perf-benchmark-default-all")
            .publish(&[row()], &[], &destination)
            .unwrap();

        let staged = published.staged.unwrap();
        assert_eq!(staged, stage_dir.join("perf-benchmark-default-all-summary.csv"));
        assert_eq!(
            fs::read_to_string(staged).unwrap(),
            fs::read_to_string(destination).unwrap()
        );
    }

    #[test]
    fn test_unpublishable_summary_leaves_no_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the summary should go cannot be replaced by a file
        let destination = dir.path().join("summary.csv");
        fs::create_dir(&destination).unwrap();

        let err = ArtifactPublisher::new()
            .publish(&[row()], &[], &destination)
            .unwrap_err();

        assert!(matches!(err, BenchError::PublishError { .. }));
        assert!(!ArtifactPublisher::runs_path_for(&destination).exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_publish_leaves_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("summary.csv");
        fs::write(&destination, "previous").unwrap();

        let err = write_atomically(&destination, |out| {
            out.write_all(b"partial")?;
            Err(BenchError::Other("disk full".to_string()))
        })
        .unwrap_err();

        assert!(matches!(err, BenchError::PublishError { .. }));
        assert_eq!(fs::read_to_string(&destination).unwrap(), "previous");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}

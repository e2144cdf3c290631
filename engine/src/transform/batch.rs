//! Directory batch runner.
//!
//! Every `*.csv` file of an input directory goes through one independent
//! file pass with the same mapping. Passes run on tokio's blocking pool and
//! share the mapping read-only. Outputs are named
//! `{stem}_{destination_id}.csv`.

use futures::future::join_all;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::pipeline::{file_name, transform_file, ProcessOptions, TransformResult};
use crate::error::{BatchError, BatchResult};
use crate::logs::LogEntry;
use crate::transform::dsl::{MappingConfig, RowError};

/// Options for a directory run
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Applied to every file
    pub process: ProcessOptions,

    /// Output name suffix; defaults to the mapping's `destination_id`
    pub output_suffix: Option<String>,
}

/// One planned file pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Result of one file pass
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file_name: String,
    pub job: FileJob,
    pub result: TransformResult,
}

/// Aggregated results, in input file order
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub files: Vec<FileOutcome>,
}

impl BatchSummary {
    pub fn success_count(&self) -> usize {
        self.files.iter().map(|f| f.result.success_count).sum()
    }

    pub fn skipped_count(&self) -> usize {
        self.files.iter().map(|f| f.result.skipped_count).sum()
    }

    pub fn error_count(&self) -> usize {
        self.files.iter().map(|f| f.result.error_count).sum()
    }

    pub fn files_written(&self) -> usize {
        self.files.iter().filter(|f| f.result.output_written).count()
    }

    /// Files whose pass stopped early
    pub fn failed_files(&self) -> usize {
        self.files.iter().filter(|f| f.result.is_failed()).count()
    }

    pub fn is_ok(&self) -> bool {
        self.files.iter().all(|f| f.result.is_ok())
    }

    /// All log entries, each prefixed with `[file name]`
    pub fn logs(&self) -> Vec<LogEntry> {
        self.files
            .iter()
            .flat_map(|f| f.result.logs.iter().map(move |entry| entry.prefixed(&f.file_name)))
            .collect()
    }

    /// Every row error with the file it came from
    pub fn errors(&self) -> impl Iterator<Item = (&str, &RowError)> {
        self.files
            .iter()
            .flat_map(|f| f.result.errors.iter().map(move |e| (f.file_name.as_str(), e)))
    }

    pub fn summary(&self) -> String {
        format!(
            "{} file(s), {} written, {} failed: {} valid, {} skipped, {} errors",
            self.files.len(),
            self.files_written(),
            self.failed_files(),
            self.success_count(),
            self.skipped_count(),
            self.error_count()
        )
    }
}

/// `{stem}_{suffix}.csv`
pub fn output_name(input: &Path, suffix: &str) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}_{}.csv", stem, suffix)
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// List the CSV files of `input_dir` (sorted, not recursive) and pair each
/// with its output path under `output_dir`.
pub async fn plan_directory(
    input_dir: &Path,
    output_dir: &Path,
    mapping: &MappingConfig,
    options: &BatchOptions,
) -> BatchResult<Vec<FileJob>> {
    let suffix = options
        .output_suffix
        .as_deref()
        .or(mapping.destination_id.as_deref())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BatchError::NoOutputSuffix(mapping.name.clone()))?;

    let scan_failed = |source| BatchError::ScanFailed {
        path: input_dir.display().to_string(),
        source,
    };

    let mut inputs = Vec::new();
    let mut entries = tokio::fs::read_dir(input_dir).await.map_err(scan_failed)?;
    while let Some(entry) = entries.next_entry().await.map_err(scan_failed)? {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && is_csv(&path) {
            inputs.push(path);
        }
    }
    inputs.sort();

    Ok(inputs
        .into_iter()
        .map(|input| {
            let output = output_dir.join(output_name(&input, suffix));
            FileJob { input, output }
        })
        .collect())
}

/// Run every job concurrently. A pass that panics is reported as a failed
/// file, the others are unaffected.
pub async fn transform_files(
    jobs: Vec<FileJob>,
    mapping: Arc<MappingConfig>,
    options: &ProcessOptions,
) -> BatchSummary {
    let handles = jobs.iter().cloned().map(|job| {
        let mapping = Arc::clone(&mapping);
        let options = options.clone();
        tokio::task::spawn_blocking(move || transform_file(&job.input, &job.output, &mapping, &options))
    });
    let joined = join_all(handles).await;

    let files = jobs
        .into_iter()
        .zip(joined)
        .map(|(job, joined)| {
            let result = joined.unwrap_or_else(|err| {
                let mut failed = TransformResult::new();
                failed.fail(format!("File task failed: {}", err));
                failed
            });
            FileOutcome { file_name: file_name(&job.input), job, result }
        })
        .collect();

    BatchSummary { files }
}

/// Plan and run a whole directory
pub async fn transform_directory(
    input_dir: &Path,
    output_dir: &Path,
    mapping: Arc<MappingConfig>,
    options: &BatchOptions,
) -> BatchResult<BatchSummary> {
    let jobs = plan_directory(input_dir, output_dir, &mapping, options).await?;
    Ok(transform_files(jobs, mapping, &options.process).await)
}

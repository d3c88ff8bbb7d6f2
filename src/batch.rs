//! Bounded-concurrency batch runs.
//!
//! A fixed pool of workers pulls files from a shared queue in dispatch order
//! and runs each file's whole pipeline in its own task, bounded by the
//! per-file timeout. A failure, panic or timeout is recorded for that file
//! only. After a configuration error no further files are started; the rest
//! are reported as skipped. A file whose output name an earlier file already
//! claimed is skipped up front.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::error::{ErrorKind, PipelineError, PipelineResult};
use crate::io::discover_audio_files;
use crate::models::base_name_of;
use crate::stages::{FileReport, StageRunner};
use crate::usage::{Pricing, UsageSnapshot};

/// Final status of one file in a batch
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Succeeded {
        exports: Vec<PathBuf>,
        export_failures: usize,
        corrections: usize,
        refined: bool,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        ambiguous_labels: Vec<String>,
        degraded: bool,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
    Skipped {
        reason: String,
    },
}

impl From<FileReport> for FileStatus {
    fn from(report: FileReport) -> Self {
        FileStatus::Succeeded {
            export_failures: report.exports.failures.len(),
            exports: report.exports.written,
            corrections: report.corrections,
            refined: report.refined,
            ambiguous_labels: report.ambiguous_labels,
            degraded: report.degraded,
        }
    }
}

/// Outcome of one file, keyed by its dispatch position
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub index: usize,
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: FileStatus,
    pub elapsed_secs: f64,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, FileStatus::Succeeded { .. })
    }
}

/// Aggregated result of one scheduler invocation
#[derive(Debug, Clone, Serialize)]
pub struct BatchRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workers: usize,
    /// One entry per input file, in dispatch order
    pub outcomes: Vec<FileOutcome>,
    pub usage: UsageSnapshot,
}

impl BatchRun {
    pub fn attempted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o.status, FileStatus::Skipped { .. }))
            .count()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, FileStatus::Skipped { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, FileStatus::Failed { .. }))
    }

    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at).to_std().unwrap_or_default()
    }

    /// Sum of per-file wall-clock time
    pub fn total_file_secs(&self) -> f64 {
        self.outcomes.iter().map(|o| o.elapsed_secs).sum()
    }

    /// Human-readable summary for the terminal
    pub fn render_summary(&self, pricing: &Pricing) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Batch {} ({} workers)", self.run_id, self.workers);
        let _ = writeln!(
            out,
            "Attempted: {}  Succeeded: {}  Failed: {}  Skipped: {}",
            self.attempted(),
            self.succeeded(),
            self.failed(),
            self.skipped()
        );
        let _ = writeln!(
            out,
            "Elapsed: {:.1}s (per-file total {:.1}s)",
            self.elapsed().as_secs_f64(),
            self.total_file_secs()
        );
        let _ = writeln!(
            out,
            "External calls: {}  Cache hits: {}  Estimated cost: ${:.4}",
            self.usage.external_calls(),
            self.usage.cache_hits,
            self.usage.estimated_cost_usd(pricing)
        );

        if self.failed() > 0 {
            let _ = writeln!(out, "\nFailed files:");
            for outcome in self.failures() {
                if let FileStatus::Failed { kind, message } = &outcome.status {
                    let _ = writeln!(out, "  {} [{}] {}", outcome.path.display(), kind, message);
                }
            }
        }
        let ambiguous: Vec<(&FileOutcome, &Vec<String>)> = self
            .outcomes
            .iter()
            .filter_map(|o| match &o.status {
                FileStatus::Succeeded { ambiguous_labels, .. } if !ambiguous_labels.is_empty() => {
                    Some((o, ambiguous_labels))
                }
                _ => None,
            })
            .collect();
        if !ambiguous.is_empty() {
            let _ = writeln!(out, "\nAmbiguous speakers:");
            for (outcome, labels) in ambiguous {
                let _ = writeln!(out, "  {}: {}", outcome.path.display(), labels.join(", "));
            }
        }
        if self.skipped() > 0 {
            let _ = writeln!(out, "\nSkipped files:");
            for outcome in &self.outcomes {
                if let FileStatus::Skipped { reason } = &outcome.status {
                    let _ = writeln!(out, "  {} ({})", outcome.path.display(), reason);
                }
            }
        }
        out
    }

    /// Write the run as pretty JSON
    pub fn write_report(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Runs the per-file pipeline across many inputs with a fixed worker pool
pub struct BatchScheduler {
    runner: Arc<StageRunner>,
    config: BatchConfig,
}

impl BatchScheduler {
    pub fn new(runner: Arc<StageRunner>, config: BatchConfig) -> Self {
        Self { runner, config }
    }

    /// Discover audio files in `dir` and run them
    pub async fn run_directory(&self, dir: &Path) -> PipelineResult<BatchRun> {
        let files = discover_audio_files(dir)?;
        info!("Found {} audio file(s) in {:?}", files.len(), dir);
        Ok(self.run(files).await)
    }

    /// Run every file. Never fails as a whole.
    pub async fn run(&self, files: Vec<PathBuf>) -> BatchRun {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = files.len();
        let mut slots: Vec<Option<FileOutcome>> = vec![None; total];

        for (index, reason) in output_name_collisions(&files) {
            warn!("Skipping {}: {}", files[index].display(), reason);
            slots[index] = Some(FileOutcome {
                index,
                path: files[index].clone(),
                status: FileStatus::Skipped { reason },
                elapsed_secs: 0.0,
            });
        }
        let dispatched = slots.iter().filter(|s| s.is_none()).count();
        let workers = self.config.worker_count().min(dispatched.max(1));
        info!("Batch {}: {} file(s), {} worker(s)", run_id, total, workers);

        let (work_sender, work_receiver) = mpsc::unbounded_channel::<(usize, PathBuf)>();
        for (index, path) in files.iter().enumerate() {
            if slots[index].is_none() {
                // Receiver is alive; send cannot fail here
                let _ = work_sender.send((index, path.clone()));
            }
        }
        drop(work_sender);
        let work_receiver = Arc::new(Mutex::new(work_receiver));
        let (done_sender, mut done_receiver) = mpsc::unbounded_channel::<FileOutcome>();

        let mut worker_handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let runner = self.runner.clone();
            let receiver = work_receiver.clone();
            let sender = done_sender.clone();
            let timeout = self.config.per_file_timeout;
            worker_handles.push(tokio::spawn(async move {
                worker_loop(worker_id, runner, receiver, sender, timeout).await;
            }));
        }
        drop(done_sender);

        for (worker_id, handle) in worker_handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!("Worker {} panicked: {:?}", worker_id, e);
            }
        }

        while let Some(outcome) = done_receiver.recv().await {
            let index = outcome.index;
            slots[index] = Some(outcome);
        }
        let outcomes: Vec<FileOutcome> = slots
            .into_iter()
            .zip(files)
            .enumerate()
            .map(|(index, (slot, path))| {
                slot.unwrap_or_else(|| FileOutcome {
                    index,
                    path,
                    status: FileStatus::Failed {
                        kind: ErrorKind::Panicked,
                        message: "worker stopped before reporting".to_string(),
                    },
                    elapsed_secs: 0.0,
                })
            })
            .collect();

        let run = BatchRun {
            run_id,
            started_at,
            finished_at: Utc::now(),
            workers,
            outcomes,
            usage: self.runner.context().usage.snapshot(),
        };
        info!(
            "Batch {} complete: {} succeeded, {} failed, {} skipped",
            run.run_id,
            run.succeeded(),
            run.failed(),
            run.skipped()
        );
        run
    }
}

/// Files whose output base name an earlier file already claimed. Their
/// intermediates and exports would overwrite the earlier file's.
fn output_name_collisions(files: &[PathBuf]) -> BTreeMap<usize, String> {
    let mut claimed: HashMap<String, &Path> = HashMap::new();
    let mut collisions = BTreeMap::new();
    for (index, path) in files.iter().enumerate() {
        match claimed.entry(base_name_of(path)) {
            Entry::Occupied(first) => {
                let reason = format!(
                    "output name \"{}\" already used by {}",
                    first.key(),
                    first.get().display()
                );
                collisions.insert(index, reason);
            }
            Entry::Vacant(slot) => {
                slot.insert(path);
            }
        }
    }
    collisions
}

async fn worker_loop(
    worker_id: usize,
    runner: Arc<StageRunner>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<(usize, PathBuf)>>>,
    sender: mpsc::UnboundedSender<FileOutcome>,
    timeout: Duration,
) {
    loop {
        let next = { receiver.lock().await.recv().await };
        let Some((index, path)) = next else {
            break;
        };

        let outcome = if runner.context().is_halted() {
            FileOutcome {
                index,
                path,
                status: FileStatus::Skipped {
                    reason: "dispatch halted after a configuration error".to_string(),
                },
                elapsed_secs: 0.0,
            }
        } else {
            info!("Worker {} starting {}", worker_id, path.display());
            run_one(&runner, index, path, timeout).await
        };

        if sender.send(outcome).is_err() {
            break;
        }
    }
}

async fn run_one(runner: &Arc<StageRunner>, index: usize, path: PathBuf, timeout: Duration) -> FileOutcome {
    let started = Instant::now();
    let task_runner = runner.clone();
    let task_path = path.clone();
    let mut task = tokio::spawn(async move { task_runner.run_file(&task_path).await });

    let status = match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(report))) => FileStatus::from(report),
        Ok(Ok(Err(e))) => {
            if e.is_fatal_configuration() {
                warn!("Configuration error on {}; halting dispatch", path.display());
                runner.context().halt_dispatch();
            }
            FileStatus::Failed {
                kind: e.kind(),
                message: e.to_string(),
            }
        }
        Ok(Err(join_error)) => FileStatus::Failed {
            kind: ErrorKind::Panicked,
            message: join_error.to_string(),
        },
        Err(_) => {
            task.abort();
            let e = PipelineError::Timeout { after: timeout };
            FileStatus::Failed {
                kind: e.kind(),
                message: e.to_string(),
            }
        }
    };

    let outcome = FileOutcome {
        index,
        path,
        status,
        elapsed_secs: started.elapsed().as_secs_f64(),
    };
    match &outcome.status {
        FileStatus::Succeeded { .. } => {
            info!("Done: {} ({:.1}s)", outcome.path.display(), outcome.elapsed_secs)
        }
        FileStatus::Failed { kind, message } => {
            warn!("Failed: {} [{}] {}", outcome.path.display(), kind, message)
        }
        FileStatus::Skipped { .. } => {}
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: usize, status: FileStatus) -> FileOutcome {
        FileOutcome {
            index,
            path: PathBuf::from(format!("file{}.wav", index)),
            status,
            elapsed_secs: 1.5,
        }
    }

    fn sample_run() -> BatchRun {
        let now = Utc::now();
        BatchRun {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now + chrono::Duration::seconds(3),
            workers: 2,
            outcomes: vec![
                outcome(
                    0,
                    FileStatus::Succeeded {
                        exports: vec![PathBuf::from("file0.txt")],
                        export_failures: 0,
                        corrections: 1,
                        refined: false,
                        ambiguous_labels: vec!["SPEAKER_00".to_string(), "SPEAKER_01".to_string()],
                        degraded: false,
                    },
                ),
                outcome(
                    1,
                    FileStatus::Failed {
                        kind: ErrorKind::UpstreamService,
                        message: "transcription failed".to_string(),
                    },
                ),
                outcome(
                    2,
                    FileStatus::Skipped {
                        reason: "halted".to_string(),
                    },
                ),
            ],
            usage: UsageSnapshot::default(),
        }
    }

    #[test]
    fn test_summary_counts() {
        let run = sample_run();

        assert_eq!(run.attempted(), 2);
        assert_eq!(run.succeeded(), 1);
        assert_eq!(run.failed(), 1);
        assert_eq!(run.skipped(), 1);
        assert_eq!(run.elapsed(), Duration::from_secs(3));
        assert!((run.total_file_secs() - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_render_summary_lists_failures() {
        let summary = sample_run().render_summary(&Pricing::default());

        assert!(summary.contains("Attempted: 2  Succeeded: 1  Failed: 1  Skipped: 1"));
        assert!(summary.contains("file1.wav [UpstreamServiceError] transcription failed"));
        assert!(summary.contains("file2.wav (halted)"));
        assert!(summary.contains("file0.wav: SPEAKER_00, SPEAKER_01"));
    }

    #[test]
    fn test_report_serializes_status_inline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch_report.json");
        sample_run().write_report(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["outcomes"][1]["status"], "failed");
        assert_eq!(value["outcomes"][1]["kind"], "upstream_service");
        assert_eq!(value["outcomes"][2]["reason"], "halted");
        assert_eq!(value["outcomes"][0]["ambiguous_labels"][1], "SPEAKER_01");
        assert!(value["outcomes"][1].get("ambiguous_labels").is_none());
    }

    #[test]
    fn test_output_name_collisions_keep_first_claim() {
        let files = vec![
            PathBuf::from("in/a.wav"),
            PathBuf::from("in/b.wav"),
            PathBuf::from("in/a.mp3"),
            PathBuf::from("other/a.flac"),
        ];
        let collisions = output_name_collisions(&files);

        assert_eq!(collisions.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert!(collisions[&2].contains("in/a.wav"));
    }

    #[test]
    fn test_report_converts_to_succeeded_status() {
        let report = FileReport {
            audio_file: PathBuf::from("sync.wav"),
            state: crate::stages::PipelineState::Stage3Done,
            stage1_cached: false,
            stage2_cached: false,
            corrections: 2,
            refined: true,
            ambiguous_labels: vec!["L1".to_string()],
            degraded: false,
            exports: Default::default(),
        };

        match FileStatus::from(report) {
            FileStatus::Succeeded {
                corrections,
                refined,
                ambiguous_labels,
                export_failures,
                ..
            } => {
                assert_eq!(corrections, 2);
                assert!(refined);
                assert_eq!(ambiguous_labels, vec!["L1".to_string()]);
                assert_eq!(export_failures, 0);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }
}

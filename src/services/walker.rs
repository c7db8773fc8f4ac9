use crate::metrics::Metrics;
use crate::models::{RunSettings, UnterminatedBlockPolicy};
use crate::services::registry::{ExtensionRule, RuleSet};
use crate::services::updater::{FileIoError, FileUpdater, UpdateOutcome};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use walkdir::WalkDir;

/// Discovered files buffered between the traversal thread and the dispatcher
const DISCOVERY_CHANNEL_CAPACITY: usize = 256;

/// Errors that end the traversal. Tasks already dispatched still run to completion.
#[derive(Error, Debug)]
pub enum WalkError {
    #[error("Root directory {0} does not exist")]
    RootNotFound(Utf8PathBuf),

    #[error("Failed to walk {path}: {source}")]
    Traversal {
        path: Utf8PathBuf,
        #[source]
        source: walkdir::Error,
        /// Results of the files dispatched before the error
        partial: Box<RunReport>,
    },

    #[error("Directory traversal thread failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl WalkError {
    fn traversal(root: &Utf8Path, source: walkdir::Error) -> Self {
        let path = source
            .path()
            .map(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned()))
            .unwrap_or_else(|| root.to_path_buf());
        WalkError::Traversal {
            path,
            source,
            partial: Box::default(),
        }
    }

    fn with_partial_report(self, report: RunReport) -> Self {
        match self {
            WalkError::Traversal { path, source, .. } => WalkError::Traversal {
                path,
                source,
                partial: Box::new(report),
            },
            other => other,
        }
    }

    /// Per-file results gathered before a traversal error ended the run.
    pub fn partial_report(&self) -> Option<&RunReport> {
        match self {
            WalkError::Traversal { partial, .. } => Some(partial.as_ref()),
            _ => None,
        }
    }
}

/// Execution options for [`TreeWalker::run`].
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Upper bound on concurrently running update tasks (min 1)
    pub max_concurrency: usize,
    /// Per-file deadline; `None` disables it
    pub task_timeout: Option<Duration>,
    pub follow_symlinks: bool,
    pub unterminated_block: UnterminatedBlockPolicy,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self::from(&RunSettings::default())
    }
}

impl From<&RunSettings> for WalkOptions {
    fn from(settings: &RunSettings) -> Self {
        Self {
            max_concurrency: settings.max_concurrency.max(1),
            task_timeout: (settings.task_timeout_secs > 0)
                .then(|| Duration::from_secs(settings.task_timeout_secs)),
            follow_symlinks: settings.follow_symlinks,
            unterminated_block: settings.unterminated_block,
        }
    }
}

/// Final state of one dispatched file.
#[derive(Debug)]
pub enum FileOutcome {
    Updated { block_replaced: bool },
    Unchanged,
    Missing,
    Failed(FileIoError),
    TimedOut(Duration),
    Cancelled,
}

impl From<UpdateOutcome> for FileOutcome {
    fn from(outcome: UpdateOutcome) -> Self {
        match outcome {
            UpdateOutcome::Updated { block_replaced } => FileOutcome::Updated { block_replaced },
            UpdateOutcome::Unchanged => FileOutcome::Unchanged,
            UpdateOutcome::Missing => FileOutcome::Missing,
            UpdateOutcome::Aborted => FileOutcome::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedFile {
    pub path: Utf8PathBuf,
    pub extension: String,
    pub block_replaced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: Utf8PathBuf,
    pub message: String,
}

/// Aggregated per-file results of a completed run, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub updated: Vec<UpdatedFile>,
    pub unchanged: Vec<Utf8PathBuf>,
    pub missing: Vec<Utf8PathBuf>,
    pub failures: Vec<FileFailure>,
    pub cancelled: Vec<Utf8PathBuf>,
    /// Regular files without a matching rule
    pub skipped: usize,
    /// Traversal was stopped by cancellation before visiting every entry
    pub interrupted: bool,
}

impl RunReport {
    /// Number of files handed to an update task
    pub fn dispatched(&self) -> usize {
        self.updated.len()
            + self.unchanged.len()
            + self.missing.len()
            + self.failures.len()
            + self.cancelled.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} updated, {} unchanged, {} missing, {} failed, {} cancelled, {} skipped",
            self.updated.len(),
            self.unchanged.len(),
            self.missing.len(),
            self.failures.len(),
            self.cancelled.len(),
            self.skipped
        )
    }

    fn record(&mut self, path: Utf8PathBuf, extension: String, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Updated { block_replaced } => self.updated.push(UpdatedFile {
                path,
                extension,
                block_replaced,
            }),
            FileOutcome::Unchanged => self.unchanged.push(path),
            FileOutcome::Missing => self.missing.push(path),
            FileOutcome::Failed(e) => self.failures.push(FileFailure {
                path,
                message: e.to_string(),
            }),
            FileOutcome::TimedOut(limit) => self.failures.push(FileFailure {
                path,
                message: format!("Timed out after {:?}", limit),
            }),
            FileOutcome::Cancelled => self.cancelled.push(path),
        }
    }
}

struct Discovered {
    path: Utf8PathBuf,
    rule: Arc<ExtensionRule>,
}

/// Outcome of the blocking traversal half of a run
struct Traversal {
    skipped: usize,
    interrupted: bool,
}

/// Walks a directory tree and updates every file with a matching rule.
///
/// Traversal runs sequentially on a blocking thread and streams matches to an
/// async dispatcher, which spawns one task per file. A semaphore bounds how many
/// updates run at once. [`run`](Self::run) returns only after every dispatched
/// task has finished.
pub struct TreeWalker {
    rules: Arc<RuleSet>,
    options: WalkOptions,
    updater: FileUpdater,
    metrics: Arc<Metrics>,
}

impl TreeWalker {
    pub fn new(rules: Arc<RuleSet>, options: WalkOptions) -> Self {
        Self {
            updater: FileUpdater::new(options.unterminated_block),
            rules,
            options,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Record into an externally owned [`Metrics`] instead of a private one.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Walk `root` and update every matching file.
    ///
    /// Setting `cancel_rx` to `true` stops discovery; tasks still waiting for a
    /// permit finish as cancelled while running updates complete.
    ///
    /// # Errors
    /// [`WalkError`] if the root is missing or the traversal hits an unreadable
    /// entry. Per-file failures are reported in the [`RunReport`] instead.
    pub async fn run(
        &self,
        root: &Utf8Path,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<RunReport, WalkError> {
        if tokio::fs::metadata(root).await.is_err() {
            return Err(WalkError::RootNotFound(root.to_path_buf()));
        }

        tracing::info!(
            "Walking {} ({} rules, max concurrent: {})",
            root,
            self.rules.len(),
            self.options.max_concurrency
        );

        let (tx, mut rx) = mpsc::channel(DISCOVERY_CHANNEL_CAPACITY);
        let traversal = tokio::task::spawn_blocking({
            let root = root.to_path_buf();
            let rules = Arc::clone(&self.rules);
            let metrics = Arc::clone(&self.metrics);
            let follow_symlinks = self.options.follow_symlinks;
            move || discover(&root, &rules, follow_symlinks, &metrics, &tx)
        });

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let mut tasks: Vec<(Utf8PathBuf, String, JoinHandle<FileOutcome>)> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(cancel_rx.clone()) => {
                    tracing::warn!("Run cancelled, no further files will be dispatched");
                    None
                }
                found = rx.recv() => found,
            };

            let Some(found) = next else { break };
            tasks.push(self.dispatch(found, &semaphore, &cancel_rx));
        }

        // Closing the channel stops the traversal thread at its next match
        drop(rx);
        let traversal = traversal.await;

        let mut report = RunReport::default();
        for (path, extension, task) in tasks {
            match task.await {
                Ok(outcome) => report.record(path, extension, outcome),
                Err(e) => {
                    tracing::error!("Update task for {} panicked: {}", path, e);
                    self.metrics.record_file_failed();
                    report.failures.push(FileFailure {
                        path,
                        message: format!("Task join error: {}", e),
                    });
                }
            }
        }

        let traversal = match traversal {
            Ok(Ok(traversal)) => traversal,
            Ok(Err(e)) => {
                tracing::error!(
                    "Traversal aborted after {} dispatched files: {}",
                    report.dispatched(),
                    e
                );
                return Err(e.with_partial_report(report));
            }
            Err(e) => return Err(WalkError::Join(e)),
        };

        report.skipped = traversal.skipped;
        report.interrupted = traversal.interrupted || *cancel_rx.borrow();

        tracing::info!("Walk of {} completed: {}", root, report.summary());
        Ok(report)
    }

    fn dispatch(
        &self,
        found: Discovered,
        semaphore: &Arc<Semaphore>,
        cancel_rx: &watch::Receiver<bool>,
    ) -> (Utf8PathBuf, String, JoinHandle<FileOutcome>) {
        let Discovered { path, rule } = found;
        let extension = rule.extension.clone();

        let task = tokio::spawn({
            let path = path.clone();
            let semaphore = Arc::clone(semaphore);
            let cancel_rx = cancel_rx.clone();
            let metrics = Arc::clone(&self.metrics);
            let updater = self.updater;
            let task_timeout = self.options.task_timeout;

            async move {
                // Queued tasks give up their slot as soon as the run is cancelled
                let permit = tokio::select! {
                    biased;
                    _ = cancelled(cancel_rx) => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    log_outcome(&path, &rule, &FileOutcome::Cancelled, &metrics);
                    return FileOutcome::Cancelled;
                };

                let start = Instant::now();
                let outcome =
                    update_with_deadline(&updater, path.clone(), Arc::clone(&rule), task_timeout)
                        .await;
                metrics.record_update_time(start.elapsed());

                log_outcome(&path, &rule, &outcome, &metrics);
                outcome
            }
        });

        (path, extension, task)
    }
}

/// Run one update job. Past the deadline the job is stopped unless it is already
/// renaming, in which case its real result is kept.
async fn update_with_deadline(
    updater: &FileUpdater,
    path: Utf8PathBuf,
    rule: Arc<ExtensionRule>,
    deadline: Option<Duration>,
) -> FileOutcome {
    let task = updater.spawn(path, rule);
    let result = match deadline {
        Some(limit) => match task.join_within(limit).await {
            Some(result) => result,
            None => return FileOutcome::TimedOut(limit),
        },
        None => task.join().await,
    };

    match result {
        Ok(outcome) => outcome.into(),
        Err(e) => FileOutcome::Failed(e),
    }
}

fn log_outcome(path: &Utf8Path, rule: &ExtensionRule, outcome: &FileOutcome, metrics: &Metrics) {
    match outcome {
        FileOutcome::Updated { block_replaced } => {
            metrics.record_file_updated(*block_replaced);
            tracing::info!(
                "Updated {} ({} rule, previous block {})",
                path,
                rule.extension,
                if *block_replaced { "replaced" } else { "not found" }
            );
        }
        FileOutcome::Unchanged => {
            metrics.record_file_unchanged();
            tracing::debug!("{} already carries the current {} block", path, rule.extension);
        }
        FileOutcome::Missing => metrics.record_file_missing(),
        FileOutcome::Failed(e) => {
            metrics.record_file_failed();
            tracing::error!("Failed to update {}: {}", path, e);
        }
        FileOutcome::TimedOut(limit) => {
            metrics.record_file_timed_out();
            tracing::error!("Update of {} timed out after {:?}", path, limit);
        }
        FileOutcome::Cancelled => {
            metrics.record_file_cancelled();
            tracing::debug!("Cancelled before update: {}", path);
        }
    }
}

/// Resolves once `cancel_rx` reads `true`. Never resolves if the sender is dropped first.
async fn cancelled(mut cancel_rx: watch::Receiver<bool>) {
    let sender_gone = cancel_rx.wait_for(|cancel| *cancel).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}

fn discover(
    root: &Utf8Path,
    rules: &RuleSet,
    follow_symlinks: bool,
    metrics: &Metrics,
    tx: &mpsc::Sender<Discovered>,
) -> Result<Traversal, WalkError> {
    let mut traversal = Traversal {
        skipped: 0,
        interrupted: false,
    };

    // Link targets already dispatched, so a file reachable twice is written once
    let mut seen_targets: HashSet<Utf8PathBuf> = HashSet::new();

    for entry in WalkDir::new(root)
        .follow_links(follow_symlinks)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| WalkError::traversal(root, source))?;

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(path) = Utf8Path::from_path(entry.path()) else {
            tracing::warn!("Skipping non UTF-8 path: {}", entry.path().display());
            metrics.record_file_skipped();
            traversal.skipped += 1;
            continue;
        };

        let Some(rule) = path
            .file_name()
            .and_then(|name| rules.lookup_file_name(name))
        else {
            tracing::trace!("No rule for {}", path);
            metrics.record_file_skipped();
            traversal.skipped += 1;
            continue;
        };

        let path = if follow_symlinks {
            match canonical_target(path) {
                Ok(target) if !seen_targets.insert(target.clone()) => {
                    tracing::debug!("{} resolves to already dispatched {}", path, target);
                    continue;
                }
                Ok(target) => target,
                Err(e) => {
                    tracing::warn!("Failed to resolve {}: {}", path, e);
                    path.to_path_buf()
                }
            }
        } else {
            path.to_path_buf()
        };

        let found = Discovered {
            path,
            rule: Arc::clone(rule),
        };
        if let Err(mpsc::error::SendError(found)) = tx.blocking_send(found) {
            tracing::debug!("Dispatcher stopped, ending traversal at {}", found.path);
            traversal.interrupted = true;
            break;
        }
    }

    Ok(traversal)
}

fn canonical_target(path: &Utf8Path) -> std::io::Result<Utf8PathBuf> {
    let target = std::fs::canonicalize(path)?;
    Utf8PathBuf::try_from(target).map_err(|e| e.into_io_error())
}

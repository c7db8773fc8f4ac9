use crate::models::UnterminatedBlockPolicy;
use crate::services::editor::{BlockScan, FileContent};
use crate::services::registry::ExtensionRule;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;

/// Per-file errors. None of them stop the run.
#[derive(Error, Debug)]
pub enum FileIoError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Comment block in {path} starts with {start_token:?} but never reaches {end_token:?}")]
    UnterminatedBlock {
        path: Utf8PathBuf,
        start_token: String,
        end_token: String,
    },

    #[error("Update job for {path} failed: {source}")]
    Task {
        path: Utf8PathBuf,
        #[source]
        source: JoinError,
    },
}

impl FileIoError {
    pub fn path(&self) -> &Utf8Path {
        match self {
            FileIoError::Read { path, .. }
            | FileIoError::Write { path, .. }
            | FileIoError::UnterminatedBlock { path, .. }
            | FileIoError::Task { path, .. } => path,
        }
    }
}

/// Result of a successful [`FileUpdater::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// File rewritten; `block_replaced` is true when an old block was stripped.
    Updated { block_replaced: bool },
    /// Rendered content matched the file on disk, nothing written.
    Unchanged,
    /// File disappeared between discovery and processing.
    Missing,
    /// The guard was aborted before the rename, the file was left untouched.
    Aborted,
}

const RUNNING: u8 = 0;
const COMMITTING: u8 = 1;
const ABORTED: u8 = 2;

/// Decides whether a running update may still rename its staged file.
///
/// The update claims the commit right before the rename; whoever gives up on
/// the update claims the abort. Exactly one of the two wins.
#[derive(Debug, Default)]
pub struct UpdateGuard {
    state: AtomicU8,
}

impl UpdateGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the update unless it is already renaming.
    ///
    /// Returns `true` when the file is guaranteed to stay untouched.
    pub fn abort(&self) -> bool {
        match self
            .state
            .compare_exchange(RUNNING, ABORTED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(state) => state == ABORTED,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state.load(Ordering::Acquire) == ABORTED
    }

    fn begin_commit(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Handle to an update running on the blocking pool.
pub struct UpdateTask {
    path: Utf8PathBuf,
    guard: Arc<UpdateGuard>,
    handle: JoinHandle<Result<UpdateOutcome, FileIoError>>,
}

impl UpdateTask {
    /// Wait for the update to finish.
    pub async fn join(self) -> Result<UpdateOutcome, FileIoError> {
        flatten(self.path, self.handle.await)
    }

    /// Wait at most `limit` for the update.
    ///
    /// Returns `None` when the deadline passed and the update was stopped before
    /// touching the file. An update already renaming when the deadline passes is
    /// awaited and its real result returned.
    pub async fn join_within(
        mut self,
        limit: Duration,
    ) -> Option<Result<UpdateOutcome, FileIoError>> {
        let joined = timeout(limit, &mut self.handle).await;
        match joined {
            Ok(joined) => Some(flatten(self.path, joined)),
            // A job that finished without writing still reports its own result
            Err(_) if self.guard.abort() && !self.handle.is_finished() => {
                tracing::debug!("Deadline passed for {}, update stopped", self.path);
                None
            }
            Err(_) => {
                tracing::debug!("Deadline passed for {} during commit, waiting", self.path);
                Some(flatten(self.path, self.handle.await))
            }
        }
    }
}

fn flatten(
    path: Utf8PathBuf,
    joined: Result<Result<UpdateOutcome, FileIoError>, JoinError>,
) -> Result<UpdateOutcome, FileIoError> {
    joined.map_err(|source| FileIoError::Task { path, source })?
}

/// Read → strip → prepend → write for a single file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileUpdater {
    unterminated: UnterminatedBlockPolicy,
}

impl FileUpdater {
    pub fn new(unterminated: UnterminatedBlockPolicy) -> Self {
        Self { unterminated }
    }

    /// Replace the leading comment block of `path` with `rule.block_text`.
    pub async fn update(
        &self,
        path: &Utf8Path,
        rule: &ExtensionRule,
    ) -> Result<UpdateOutcome, FileIoError> {
        self.spawn(path.to_path_buf(), Arc::new(rule.clone()))
            .join()
            .await
    }

    /// Start the whole update of `path` as one job on the blocking pool.
    pub fn spawn(&self, path: Utf8PathBuf, rule: Arc<ExtensionRule>) -> UpdateTask {
        let guard = Arc::new(UpdateGuard::new());
        let handle = tokio::task::spawn_blocking({
            let updater = *self;
            let path = path.clone();
            let guard = Arc::clone(&guard);
            move || updater.update_blocking(&path, &rule, &guard)
        });
        UpdateTask {
            path,
            guard,
            handle,
        }
    }

    /// Synchronous update. The staged file is renamed over the original only if
    /// `guard` has not been aborted, so an interrupted write never leaves a
    /// truncated source file.
    ///
    /// A symlinked `path` is resolved first and its target rewritten in place.
    pub fn update_blocking(
        &self,
        path: &Utf8Path,
        rule: &ExtensionRule,
        guard: &UpdateGuard,
    ) -> Result<UpdateOutcome, FileIoError> {
        let read_error = |source| FileIoError::Read {
            path: path.to_path_buf(),
            source,
        };

        let target = match resolve_link(path) {
            Ok(target) => target,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("{} vanished before update, skipping", path);
                return Ok(UpdateOutcome::Missing);
            }
            Err(source) => return Err(read_error(source)),
        };
        if target.as_path() != path {
            tracing::debug!("{} links to {}, updating the target", path, target);
        }

        let original = match fs::read_to_string(&target) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("{} vanished before update, skipping", path);
                return Ok(UpdateOutcome::Missing);
            }
            Err(source) => return Err(read_error(source)),
        };

        let mut content = FileContent::from_text(&original);
        let scan = content.strip_leading_block(&rule.block_start_token, &rule.block_end_token);

        match scan {
            BlockScan::Absent => {
                tracing::debug!("No comment block on line 1 of {}", path);
            }
            BlockScan::Terminated { end_line } => {
                tracing::debug!("Removed {} line comment block from {}", end_line + 1, path);
            }
            BlockScan::Unterminated => match self.unterminated {
                UnterminatedBlockPolicy::Fail => {
                    return Err(FileIoError::UnterminatedBlock {
                        path: path.to_path_buf(),
                        start_token: rule.block_start_token.clone(),
                        end_token: rule.block_end_token.clone(),
                    });
                }
                UnterminatedBlockPolicy::Truncate => {
                    tracing::warn!(
                        "Unterminated comment block in {}, discarding remaining content",
                        path
                    );
                }
            },
        }

        content.prepend_block(&rule.block_text);
        let rendered = content.render();

        if rendered == original {
            return Ok(UpdateOutcome::Unchanged);
        }
        if guard.is_aborted() {
            return Ok(UpdateOutcome::Aborted);
        }

        let committed = write_atomic(&target, rendered.as_bytes(), guard).map_err(|source| {
            FileIoError::Write {
                path: path.to_path_buf(),
                source,
            }
        })?;
        if !committed {
            return Ok(UpdateOutcome::Aborted);
        }

        Ok(UpdateOutcome::Updated {
            block_replaced: scan.found(),
        })
    }
}

/// Sibling path used for staging writes to `path`.
pub fn temp_path_for(path: &Utf8Path) -> Utf8PathBuf {
    let file_name = path.file_name().unwrap_or_default();
    path.with_file_name(format!(
        ".{}.{}.disclaimer.tmp",
        file_name,
        std::process::id()
    ))
}

/// The file a write to `path` has to land in: `path` itself, or the target of a symlink.
fn resolve_link(path: &Utf8Path) -> std::io::Result<Utf8PathBuf> {
    if !fs::symlink_metadata(path)?.file_type().is_symlink() {
        return Ok(path.to_path_buf());
    }
    let target = fs::canonicalize(path)?;
    Utf8PathBuf::try_from(target).map_err(|e| e.into_io_error())
}

fn discard_temp_file(temp_path: &Utf8Path) {
    match fs::remove_file(temp_path) {
        Ok(()) => tracing::debug!("Removed temp file {}", temp_path),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove temp file {}: {}", temp_path, e),
    }
}

/// Stage `content` next to `path` and rename it into place.
///
/// Returns `Ok(false)` when `guard` was aborted first; the staged file is removed.
fn write_atomic(path: &Utf8Path, content: &[u8], guard: &UpdateGuard) -> std::io::Result<bool> {
    let temp_path = temp_path_for(path);

    if let Err(e) = stage(path, &temp_path, content) {
        discard_temp_file(&temp_path);
        return Err(e);
    }
    if !guard.begin_commit() {
        discard_temp_file(&temp_path);
        return Ok(false);
    }
    if let Err(e) = fs::rename(&temp_path, path) {
        discard_temp_file(&temp_path);
        return Err(e);
    }
    Ok(true)
}

fn stage(path: &Utf8Path, temp_path: &Utf8Path, content: &[u8]) -> std::io::Result<()> {
    let permissions = fs::metadata(path)?.permissions();

    fs::write(temp_path, content)?;
    fs::set_permissions(temp_path, permissions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rule() -> ExtensionRule {
        ExtensionRule {
            extension: ".go".to_string(),
            block_text: "/* LICENSE\n * v2\n */".to_string(),
            block_start_token: "/* LICENSE".to_string(),
            block_end_token: " */".to_string(),
        }
    }

    fn temp_dir() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_temp_path_is_hidden_sibling() {
        let temp = temp_path_for(Utf8Path::new("/src/pkg/main.go"));
        assert_eq!(temp.parent(), Some(Utf8Path::new("/src/pkg")));
        assert!(temp.file_name().unwrap().starts_with(".main.go."));
        assert!(temp.as_str().ends_with(".disclaimer.tmp"));
    }

    #[tokio::test]
    async fn test_update_replaces_block() {
        let (_dir, root) = temp_dir();
        let file = root.join("main.go");
        std::fs::write(&file, "/* LICENSE\n * v1\n */\npackage main\n").unwrap();

        let outcome = FileUpdater::default().update(&file, &rule()).await.unwrap();

        assert_eq!(outcome, UpdateOutcome::Updated { block_replaced: true });
        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            "/* LICENSE\n * v2\n */\npackage main\n"
        );
        assert!(!temp_path_for(&file).exists());
    }

    #[tokio::test]
    async fn test_second_update_is_unchanged() {
        let (_dir, root) = temp_dir();
        let file = root.join("main.go");
        std::fs::write(&file, "package main\n").unwrap();

        let updater = FileUpdater::default();
        let first = updater.update(&file, &rule()).await.unwrap();
        let after_first = std::fs::read_to_string(&file).unwrap();
        let second = updater.update(&file, &rule()).await.unwrap();

        assert_eq!(first, UpdateOutcome::Updated { block_replaced: false });
        assert_eq!(second, UpdateOutcome::Unchanged);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_missing_file_is_noop() {
        let (_dir, root) = temp_dir();
        let outcome = FileUpdater::default()
            .update(&root.join("gone.go"), &rule())
            .await
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::Missing);
        assert!(!root.join("gone.go").exists());
    }

    #[tokio::test]
    async fn test_unterminated_block_fails_by_default() {
        let (_dir, root) = temp_dir();
        let file = root.join("main.go");
        let original = "/* LICENSE\npackage main\n";
        std::fs::write(&file, original).unwrap();

        let err = FileUpdater::default()
            .update(&file, &rule())
            .await
            .unwrap_err();

        assert!(matches!(err, FileIoError::UnterminatedBlock { .. }));
        assert_eq!(err.path(), file.as_path());
        assert_eq!(std::fs::read_to_string(&file).unwrap(), original);
    }

    #[tokio::test]
    async fn test_unterminated_block_truncate_policy() {
        let (_dir, root) = temp_dir();
        let file = root.join("main.go");
        std::fs::write(&file, "/* LICENSE\npackage main\n").unwrap();

        let outcome = FileUpdater::new(UnterminatedBlockPolicy::Truncate)
            .update(&file, &rule())
            .await
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::Updated { block_replaced: true });
        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            "/* LICENSE\n * v2\n */\n"
        );
    }

    #[tokio::test]
    async fn test_non_utf8_file_is_read_error() {
        let (_dir, root) = temp_dir();
        let file = root.join("blob.go");
        std::fs::write(&file, [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let err = FileUpdater::default()
            .update(&file, &rule())
            .await
            .unwrap_err();

        match err {
            FileIoError::Read { source, .. } => assert_eq!(source.kind(), ErrorKind::InvalidData),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permissions_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, root) = temp_dir();
        let file = root.join("run.go");
        std::fs::write(&file, "package main\n").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o750)).unwrap();

        FileUpdater::default().update(&file, &rule()).await.unwrap();

        let mode = std::fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[test]
    fn test_aborted_guard_leaves_file_untouched() {
        let (_dir, root) = temp_dir();
        let file = root.join("main.go");
        std::fs::write(&file, "package main\n").unwrap();

        let guard = UpdateGuard::new();
        assert!(guard.abort());
        let outcome = FileUpdater::default()
            .update_blocking(&file, &rule(), &guard)
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::Aborted);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "package main\n");
        assert!(!temp_path_for(&file).exists());
    }

    #[test]
    fn test_guard_cannot_abort_after_commit() {
        let (_dir, root) = temp_dir();
        let file = root.join("main.go");
        std::fs::write(&file, "package main\n").unwrap();

        let guard = UpdateGuard::new();
        let outcome = FileUpdater::default()
            .update_blocking(&file, &rule(), &guard)
            .unwrap();

        assert_eq!(outcome, UpdateOutcome::Updated { block_replaced: false });
        assert!(!guard.abort());
        assert!(!guard.is_aborted());
    }

    #[tokio::test]
    async fn test_join_within_reports_finished_update() {
        let (_dir, root) = temp_dir();
        let file = root.join("main.go");
        std::fs::write(&file, "package main\n").unwrap();

        let result = FileUpdater::default()
            .spawn(file.clone(), Arc::new(rule()))
            .join_within(Duration::from_secs(10))
            .await;

        assert_eq!(
            result.unwrap().unwrap(),
            UpdateOutcome::Updated { block_replaced: false }
        );
        assert!(std::fs::read_to_string(&file).unwrap().starts_with("/* LICENSE\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_target_is_updated_in_place() {
        let (_dir, root) = temp_dir();
        let target = root.join("real.go");
        let link = root.join("link.go");
        std::fs::write(&target, "package real\n").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let outcome = FileUpdater::default().update(&link, &rule()).await.unwrap();

        assert_eq!(outcome, UpdateOutcome::Updated { block_replaced: false });
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "/* LICENSE\n * v2\n */\npackage real\n"
        );
        assert!(!temp_path_for(&target).exists());
    }
}

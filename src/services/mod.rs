//! Services module - the disclaimer update pipeline.
//!
//! # Components
//!
//! - [`registry`]: [`BlockRegistry`] turns configured rules into an immutable [`RuleSet`]
//!   keyed by normalized extension (`go` and `.go` are the same key).
//! - [`editor`]: [`FileContent`] strips the comment block starting on line 1 and
//!   prepends the current one. Purely textual, no I/O.
//! - [`updater`]: [`FileUpdater`] runs read → strip → prepend → write for one file as
//!   a single blocking job, writing through a sibling temp file and an atomic rename
//!   that an [`UpdateGuard`] can still veto.
//! - [`walker`]: [`TreeWalker`] walks a root directory and dispatches one bounded,
//!   cancellable, time-limited update task per matching file.
//!
//! # Data Flow
//!
//! ```text
//! TreeWalker ──path──▶ RuleSet::lookup_file_name ──rule──▶ FileUpdater
//!                                                          │
//!                                            FileContent::strip_leading_block
//!                                            FileContent::prepend_block
//!                                                          │
//!                                                  temp file + rename
//! ```
//!
//! # Errors
//!
//! - [`ConfigError`]: fatal, raised before any file is touched.
//! - [`WalkError`]: fatal to the traversal; dispatched tasks still finish.
//! - [`FileIoError`]: per file, collected into the [`RunReport`].
//!
//! # Usage Example
//!
//! ```ignore
//! use disclaimer_sync::services::{BlockRegistry, TreeWalker, WalkOptions};
//!
//! let rules = Arc::new(BlockRegistry::load(&specs)?);
//! let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
//!
//! let report = TreeWalker::new(rules, WalkOptions::default())
//!     .run(Utf8Path::new("src"), cancel_rx)
//!     .await?;
//! ```

pub mod editor;
pub mod registry;
pub mod updater;
pub mod walker;

pub use editor::{BlockScan, FileContent, prepend_block, replace_leading_block, strip_leading_block};
pub use registry::{
    BlockRegistry, ConfigError, ExtensionRule, RuleSet, RuleSpec, extension_of, normalize_extension,
};
pub use updater::{FileIoError, FileUpdater, UpdateGuard, UpdateOutcome, UpdateTask};
pub use walker::{FileFailure, FileOutcome, RunReport, TreeWalker, UpdatedFile, WalkError, WalkOptions};

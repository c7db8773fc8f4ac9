//! Data models for disclaimer-sync.
//!
//! - [`DisclaimerConfig`]: the configuration record (root directory + extension rules)
//! - [`RuleConfig`]: one `{fileExtension, commentBlockPath, commentBlockStartsWith, commentBlockEndsWith}` entry
//! - [`RunSettings`]: concurrency, timeout and unterminated-block handling for a run
//!
//! These are plain serde records. The validated, immutable form used during a run is
//! [`RuleSet`](crate::services::RuleSet).

pub mod config;

pub use config::{DisclaimerConfig, RuleConfig, RunSettings, UnterminatedBlockPolicy};

// disclaimer-sync - Keep license/disclaimer comment blocks current across a source tree
//
// This is the library crate containing the block registry, the comment block editor,
// the per-file updater and the concurrent tree walker.
// The binary crate (main.rs) provides the CLI entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use metrics::Metrics;
pub use models::{DisclaimerConfig, RuleConfig, RunSettings, UnterminatedBlockPolicy};
pub use services::{
    BlockRegistry, ConfigError, ExtensionRule, FileContent, FileIoError, FileUpdater, RuleSet,
    RuleSpec, RunReport, TreeWalker, WalkError, WalkOptions,
};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

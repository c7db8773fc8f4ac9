use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Top-level configuration record, loaded from JSON or YAML.
///
/// Relative paths are resolved by [`ConfigManager`](crate::config::ConfigManager)
/// against the directory containing the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisclaimerConfig {
    #[serde(alias = "RootDirectoryToSearch")]
    pub root_directory_to_search: Utf8PathBuf,

    #[serde(alias = "ExtensionsAndBlocks", default)]
    pub extensions_and_blocks: Vec<RuleConfig>,

    #[serde(alias = "Settings", default)]
    pub settings: RunSettings,
}

/// One configured extension rule, as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    #[serde(alias = "FileExtension")]
    pub file_extension: String,

    #[serde(alias = "CommentBlockPath")]
    pub comment_block_path: Utf8PathBuf,

    #[serde(alias = "CommentBlockStartsWith")]
    pub comment_block_starts_with: String,

    #[serde(alias = "CommentBlockEndsWith")]
    pub comment_block_ends_with: String,
}

/// What to do when a file starts a comment block that never ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnterminatedBlockPolicy {
    /// Leave the file untouched and report a per-file error.
    #[default]
    Fail,
    /// Drop everything after the start line, then prepend the block.
    Truncate,
}

/// Execution settings for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSettings {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    #[serde(default)]
    pub unterminated_block: UnterminatedBlockPolicy,

    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            task_timeout_secs: default_task_timeout_secs(),
            unterminated_block: UnterminatedBlockPolicy::default(),
            follow_symlinks: false,
        }
    }
}

fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_task_timeout_secs() -> u64 {
    30
}

impl DisclaimerConfig {
    /// Starter configuration written by `disclaimer-sync init`.
    pub fn example() -> Self {
        Self {
            root_directory_to_search: Utf8PathBuf::from("src"),
            extensions_and_blocks: vec![
                RuleConfig {
                    file_extension: "rs".to_string(),
                    comment_block_path: Utf8PathBuf::from("disclaimers/rust.txt"),
                    comment_block_starts_with: "// DISCLAIMER-START".to_string(),
                    comment_block_ends_with: "// DISCLAIMER-END".to_string(),
                },
                RuleConfig {
                    file_extension: ".go".to_string(),
                    comment_block_path: Utf8PathBuf::from("disclaimers/go.txt"),
                    comment_block_starts_with: "/* DISCLAIMER".to_string(),
                    comment_block_ends_with: "DISCLAIMER */".to_string(),
                },
            ],
            settings: RunSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_settings_defaults() {
        let settings = RunSettings::default();
        assert!(settings.max_concurrency >= 1);
        assert_eq!(settings.task_timeout_secs, 30);
        assert_eq!(settings.unterminated_block, UnterminatedBlockPolicy::Fail);
        assert!(!settings.follow_symlinks);
    }

    #[test]
    fn test_pascal_case_keys_accepted() {
        let json = r#"{
            "RootDirectoryToSearch": "./code/",
            "ExtensionsAndBlocks": [
                {
                    "FileExtension": "go",
                    "CommentBlockPath": "block.txt",
                    "CommentBlockStartsWith": "/*",
                    "CommentBlockEndsWith": "*/"
                }
            ]
        }"#;

        let config: DisclaimerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.root_directory_to_search, "./code/");
        assert_eq!(config.extensions_and_blocks.len(), 1);
        assert_eq!(config.extensions_and_blocks[0].file_extension, "go");
        assert_eq!(config.settings, RunSettings::default());
    }

    #[test]
    fn test_unterminated_policy_parses_lowercase() {
        let settings: RunSettings =
            serde_json::from_str(r#"{ "unterminatedBlock": "truncate" }"#).unwrap();
        assert_eq!(settings.unterminated_block, UnterminatedBlockPolicy::Truncate);
        assert_eq!(settings.task_timeout_secs, 30);
    }
}

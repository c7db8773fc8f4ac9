use crate::services::editor::{BlockScan, FileContent};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs;
use std::sync::Arc;
use thiserror::Error;

/// Separator that prefixes every normalized extension key.
pub const EXTENSION_SEPARATOR: char = '.';

/// Errors raised while building a [`RuleSet`]. All of them are fatal to a run.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read comment block from {path}: {source}")]
    BlockTextUnreadable {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rule for comment block {0} has an empty file extension")]
    EmptyExtension(Utf8PathBuf),

    #[error("Rule for extension {extension} has an empty {which} token")]
    EmptyToken {
        extension: String,
        which: &'static str,
    },
}

/// Input to [`BlockRegistry::load`]: one rule with its block text still on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub extension: String,
    pub block_text_path: Utf8PathBuf,
    pub start_token: String,
    pub end_token: String,
}

/// A loaded rule: the text to insert and the tokens that delimit an existing block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRule {
    /// Normalized, always starts with [`EXTENSION_SEPARATOR`]
    pub extension: String,
    /// Block text without trailing newlines
    pub block_text: String,
    pub block_start_token: String,
    pub block_end_token: String,
}

/// Immutable extension → rule mapping, shared read-only by every update task.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: IndexMap<String, Arc<ExtensionRule>>,
}

impl RuleSet {
    /// Exact-match lookup after normalization. No case folding.
    pub fn lookup(&self, extension: &str) -> Option<&Arc<ExtensionRule>> {
        self.rules.get(&normalize_extension(extension))
    }

    /// Look up the rule for a file name by its last suffix (`a.tar.gz` → `.gz`).
    pub fn lookup_file_name(&self, file_name: &str) -> Option<&Arc<ExtensionRule>> {
        extension_of(file_name).and_then(|ext| self.rules.get(ext))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Normalized extensions in configuration order.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Arc<ExtensionRule>> {
        self.rules.values()
    }
}

/// Builds the [`RuleSet`] once, before any file is touched.
pub struct BlockRegistry;

impl BlockRegistry {
    /// Load every rule, reading its block text into memory.
    ///
    /// Extensions are normalized to carry a leading separator, so `go` and `.go`
    /// produce the same key. When two rules share an extension the later one wins.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a block text file cannot be read or a rule has
    /// an empty extension or token.
    pub fn load(specs: &[RuleSpec]) -> Result<RuleSet, ConfigError> {
        let mut rules = IndexMap::with_capacity(specs.len());

        for spec in specs {
            let rule = Self::load_rule(spec)?;

            tracing::debug!(
                "Loaded rule {} from {} ({} bytes)",
                rule.extension,
                spec.block_text_path,
                rule.block_text.len()
            );

            if let Some(previous) = rules.insert(rule.extension.clone(), Arc::new(rule)) {
                tracing::warn!(
                    "Duplicate rule for extension {}, replacing earlier rule",
                    previous.extension
                );
            }
        }

        tracing::info!("Loaded {} extension rules", rules.len());
        Ok(RuleSet { rules })
    }

    fn load_rule(spec: &RuleSpec) -> Result<ExtensionRule, ConfigError> {
        let extension = normalize_extension(&spec.extension);
        if extension.len() == EXTENSION_SEPARATOR.len_utf8() {
            return Err(ConfigError::EmptyExtension(spec.block_text_path.clone()));
        }

        if spec.start_token.is_empty() {
            return Err(ConfigError::EmptyToken {
                extension,
                which: "start",
            });
        }
        if spec.end_token.is_empty() {
            return Err(ConfigError::EmptyToken {
                extension,
                which: "end",
            });
        }

        let block_text = read_block_text(&spec.block_text_path)?;
        warn_if_not_self_delimiting(&extension, &block_text, spec);

        Ok(ExtensionRule {
            extension,
            block_text,
            block_start_token: spec.start_token.clone(),
            block_end_token: spec.end_token.clone(),
        })
    }
}

fn read_block_text(path: &Utf8Path) -> Result<String, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::BlockTextUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(text.trim_end_matches(['\n', '\r']).to_string())
}

fn warn_if_not_self_delimiting(extension: &str, block_text: &str, spec: &RuleSpec) {
    if let Some(problem) = self_delimiting_problem(block_text, &spec.start_token, &spec.end_token)
    {
        tracing::warn!("Block text for {} is not self-delimiting: {}", extension, problem);
    }
}

/// Describe why the next run would not strip exactly `block_text` back off a
/// file it was prepended to, or `None` when it would.
fn self_delimiting_problem(block_text: &str, start_token: &str, end_token: &str) -> Option<String> {
    let content = FileContent::from_text(block_text);
    let last_line = content.lines().len().saturating_sub(1);

    match content.scan_leading_block(start_token, end_token) {
        BlockScan::Terminated { end_line } if end_line == last_line => None,
        BlockScan::Terminated { end_line } => Some(format!(
            "line {} already contains {:?}, so only {} of {} lines are stripped and the file grows on every run",
            end_line + 1,
            end_token,
            end_line + 1,
            last_line + 1
        )),
        BlockScan::Absent => Some(format!(
            "the first line does not contain {:?}, so repeated runs stack blocks",
            start_token
        )),
        BlockScan::Unterminated => Some(format!(
            "no line contains {:?}, so the next run strips the whole file",
            end_token
        )),
    }
}

use crate::models::DisclaimerConfig;
use crate::services::RuleSpec;
use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// On-disk format of a configuration file, picked from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Utf8Path) -> Result<Self> {
        match path.extension().map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            _ => bail!(
                "Unsupported config file {}: expected .json, .yaml or .yml",
                path
            ),
        }
    }
}

/// Configuration manager for loading and saving the disclaimer configuration.
///
/// Relative paths inside the file (`rootDirectoryToSearch`, `commentBlockPath`)
/// resolve against the directory that contains the configuration file.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: Utf8PathBuf,
    base_dir: Utf8PathBuf,
    format: ConfigFormat,
}

impl ConfigManager {
    /// Create a new ConfigManager for the given configuration file.
    pub fn new<P: AsRef<Utf8Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let format = ConfigFormat::from_path(&config_path)?;
        let base_dir = match config_path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
            _ => Utf8PathBuf::from("."),
        };

        Ok(Self {
            config_path,
            base_dir,
            format,
        })
    }

    /// Load and resolve the configuration file.
    pub fn load(&self) -> Result<DisclaimerConfig> {
        let file_contents = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file: {}", self.config_path))?;

        let mut config: DisclaimerConfig = match self.format {
            ConfigFormat::Json => serde_json::from_str(&file_contents)
                .with_context(|| format!("Failed to parse config file: {}", self.config_path))?,
            ConfigFormat::Yaml => serde_yaml_ng::from_str(&file_contents)
                .with_context(|| format!("Failed to parse config file: {}", self.config_path))?,
        };

        if config.extensions_and_blocks.is_empty() {
            tracing::warn!(
                "Config {} defines no extension rules, nothing will be updated",
                self.config_path
            );
        }

        config.root_directory_to_search = self.resolve(&config.root_directory_to_search);
        for rule in &mut config.extensions_and_blocks {
            rule.comment_block_path = self.resolve(&rule.comment_block_path);
        }

        tracing::info!(
            "Loaded config from {} ({} rules, root {})",
            self.config_path,
            config.extensions_and_blocks.len(),
            config.root_directory_to_search
        );
        Ok(config)
    }

    /// Save a configuration in this manager's format.
    ///
    /// Paths are written exactly as they appear in `config`.
    pub fn save(&self, config: &DisclaimerConfig) -> Result<()> {
        let serialized = match self.format {
            ConfigFormat::Json => serde_json::to_string_pretty(config)
                .context("Failed to serialize config to JSON")?,
            ConfigFormat::Yaml => {
                serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?
            }
        };

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {}", parent))?;
            }
        }

        fs::write(&self.config_path, serialized)
            .with_context(|| format!("Failed to write config file: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Convert the configured rules into [`RuleSpec`]s for the block registry.
    pub fn to_rule_specs(config: &DisclaimerConfig) -> Vec<RuleSpec> {
        config
            .extensions_and_blocks
            .iter()
            .map(|rule| RuleSpec {
                extension: rule.file_extension.clone(),
                block_text_path: rule.comment_block_path.clone(),
                start_token: rule.comment_block_starts_with.clone(),
                end_token: rule.comment_block_ends_with.clone(),
            })
            .collect()
    }

    fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }

    /// Directory relative paths resolve against.
    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    pub fn format(&self) -> ConfigFormat {
        self.format
    }
}

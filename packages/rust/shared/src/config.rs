//! Application configuration for kbexport.
//!
//! User config lives at `~/.kbexport/kbexport.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KbExportError, Result};
use crate::types::MANIFEST_FILE_NAME;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kbexport.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kbexport";

// ---------------------------------------------------------------------------
// Config structs (matching kbexport.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Per-knowledge-base export behaviour.
    #[serde(default)]
    pub export: ExportSettings,

    /// Conversion engine rules.
    #[serde(default)]
    pub markdown: MarkdownConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory whose subdirectories are knowledge-base archives.
    #[serde(default = "default_input_dir")]
    pub input_dir: String,

    /// Directory the Markdown trees are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Knowledge bases exported at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_input_dir() -> String {
    "./docs".into()
}
fn default_output_dir() -> String {
    "./output".into()
}
fn default_concurrency() -> u32 {
    1
}

/// `[export]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Manifest file name inside each knowledge-base directory.
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// Overflow file collecting external links.
    #[serde(default = "default_link_overflow_file")]
    pub link_overflow_file: String,

    /// Overflow file collecting every other unsupported document.
    #[serde(default = "default_other_overflow_file")]
    pub other_overflow_file: String,

    /// Document type tags converted to Markdown (case-insensitive).
    #[serde(default = "default_document_types")]
    pub document_types: Vec<String>,

    /// Remove escape backslashes the converter leaves behind.
    #[serde(default = "default_true")]
    pub strip_backslashes: bool,

    /// Remove directories left empty after the export.
    #[serde(default = "default_true")]
    pub prune_empty_dirs: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            manifest_file: default_manifest_file(),
            link_overflow_file: default_link_overflow_file(),
            other_overflow_file: default_other_overflow_file(),
            document_types: default_document_types(),
            strip_backslashes: true,
            prune_empty_dirs: true,
        }
    }
}

fn default_manifest_file() -> String {
    MANIFEST_FILE_NAME.into()
}
fn default_link_overflow_file() -> String {
    "unexported-links.txt".into()
}
fn default_other_overflow_file() -> String {
    "unexported-documents.txt".into()
}
fn default_document_types() -> Vec<String> {
    vec!["Doc".into()]
}
fn default_true() -> bool {
    true
}

/// `[markdown]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownConfig {
    /// Render HTML tables as pipe tables.
    #[serde(default = "default_true")]
    pub tables: bool,

    /// Render `<del>`/`<s>`/`<strike>` as `~~text~~`.
    #[serde(default = "default_true")]
    pub strikethrough: bool,

    /// Fenced (```lang) rather than indented code blocks.
    #[serde(default = "default_true")]
    pub fenced_code: bool,

    /// Tags dropped together with their content.
    #[serde(default = "default_skip_tags")]
    pub skip_tags: Vec<String>,
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            tables: true,
            strikethrough: true,
            fenced_code: true,
            skip_tags: default_skip_tags(),
        }
    }
}

fn default_skip_tags() -> Vec<String> {
    ["script", "style", "iframe", "noscript", "svg"]
        .into_iter()
        .map(String::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kbexport/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| KbExportError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kbexport/kbexport.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KbExportError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        KbExportError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// Reject configurations that cannot produce a sensible export.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.defaults.concurrency == 0 {
        return Err(KbExportError::config("defaults.concurrency must be at least 1"));
    }
    if config.export.document_types.is_empty() {
        return Err(KbExportError::config(
            "export.document_types must name at least one type",
        ));
    }
    if config.export.link_overflow_file == config.export.other_overflow_file {
        return Err(KbExportError::config(
            "export.link_overflow_file and export.other_overflow_file must differ",
        ));
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KbExportError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| KbExportError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KbExportError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

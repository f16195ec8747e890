//! Error types for kbexport.
//!
//! Library crates use [`KbExportError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all kbexport operations.
#[derive(Debug, thiserror::Error)]
pub enum KbExportError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The knowledge-base manifest is missing, unparseable, or structurally invalid.
    #[error("manifest error in {path:?}: {message}")]
    ManifestParse { path: PathBuf, message: String },

    /// A per-document metadata file could not be parsed.
    #[error("document error in {path:?}: {message}")]
    DocumentParse { path: PathBuf, message: String },

    /// The table of contents contains a parent-link cycle.
    #[error("cycle in table of contents at node {uuid}: {chain}")]
    Cycle { uuid: String, chain: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Markup-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A background export task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KbExportError>;

impl KbExportError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a manifest error for the given manifest path.
    pub fn manifest(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::ManifestParse {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a document error for the given metadata file.
    pub fn document(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::DocumentParse {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

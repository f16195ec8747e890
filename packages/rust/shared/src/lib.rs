//! Shared types, error model, and configuration for kbexport.
//!
//! This crate is the foundation depended on by all other kbexport crates.
//! It provides:
//! - [`KbExportError`], the unified error type
//! - Domain types ([`TocNode`], [`TocEntry`], [`DocumentRecord`], manifest shapes)
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, ExportSettings, MarkdownConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, validate_config,
};
pub use error::{KbExportError, Result};
pub use types::{
    BookInfo, BookMeta, DocumentFile, DocumentRecord, MANIFEST_FILE_NAME, ManifestFile, TocEntry,
    TocNode, TocNodeType,
};

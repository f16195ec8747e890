//! Core export logic for kbexport.
//!
//! This crate resolves a knowledge base's table of contents into folder paths
//! (`toc`), routes every document of one knowledge base into the mirrored
//! Markdown tree (`exporter`), removes folders left empty (`prune`) and runs
//! many knowledge bases side by side (`batch`).

pub mod batch;
pub mod exporter;
pub mod prune;
pub mod toc;

pub use batch::{BatchConfig, BatchReport, KbOutcome, export_all};
pub use exporter::{
    ExportConfig, ExportOutcome, ExportProgress, ExportReport, Exporter, KnowledgeBase,
    SilentProgress, export_knowledge_base,
};
pub use toc::BookTree;

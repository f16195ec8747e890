//! Batch export: every knowledge base under an input root, in parallel.
//!
//! Knowledge bases share nothing on disk, so each one runs on its own blocking
//! task. A failing knowledge base is reported and never stops the others.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, instrument, warn};

use kbexport_markdown::Converter;
use kbexport_shared::{AppConfig, KbExportError, Result};

use crate::exporter::{ExportConfig, ExportProgress, ExportReport, KnowledgeBase, export_in_span};

/// Configuration for [`export_all`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Directory whose subdirectories are knowledge-base archives.
    pub input_root: PathBuf,
    /// Directory receiving one output folder per knowledge base.
    pub output_root: PathBuf,
    pub export: ExportConfig,
    /// Knowledge bases exported at the same time.
    pub concurrency: usize,
    /// Export only these knowledge bases (all when empty).
    pub only: Vec<String>,
    /// Clear the whole output root before exporting.
    pub reset_output: bool,
}

impl BatchConfig {
    /// Batch settings from the loaded app config. Paths are the config defaults.
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            input_root: PathBuf::from(&config.defaults.input_dir),
            output_root: PathBuf::from(&config.defaults.output_dir),
            export: ExportConfig::from(&config.export),
            concurrency: config.defaults.concurrency.max(1) as usize,
            only: Vec::new(),
            reset_output: true,
        }
    }
}

/// The result of one knowledge base in a batch.
#[derive(Debug)]
pub struct KbOutcome {
    pub name: String,
    pub result: Result<ExportReport>,
}

/// Summary of a whole batch run.
#[derive(Debug)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// One entry per knowledge base, ordered by name.
    pub outcomes: Vec<KbOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &ExportReport> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &KbExportError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.name.as_str(), e)))
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Names of the knowledge-base directories under `input_root`, sorted.
/// Files and symlinks are ignored.
pub fn discover_knowledge_bases(input_root: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(input_root).map_err(|e| KbExportError::io(input_root, e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| KbExportError::io(input_root, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| KbExportError::io(entry.path(), e))?;
        if !file_type.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => warn!(name = ?raw, "skipping directory with a non UTF-8 name"),
        }
    }

    names.sort();
    Ok(names)
}

/// Remove everything under `output_root` and recreate it empty.
pub fn reset_output_dir(output_root: &Path) -> Result<()> {
    if output_root.exists() {
        std::fs::remove_dir_all(output_root).map_err(|e| KbExportError::io(output_root, e))?;
    }
    std::fs::create_dir_all(output_root).map_err(|e| KbExportError::io(output_root, e))
}

/// Export every knowledge base under `config.input_root`.
///
/// Only setup problems (unreadable input root, unknown `only` names) fail the
/// whole call; per-knowledge-base errors end up in [`BatchReport::outcomes`].
#[instrument(skip_all, fields(input = %config.input_root.display(), output = %config.output_root.display()))]
pub async fn export_all(
    config: BatchConfig,
    converter: Arc<dyn Converter>,
    progress: Arc<dyn ExportProgress>,
) -> Result<BatchReport> {
    let started_at = Utc::now();
    let start = Instant::now();

    let mut names = discover_knowledge_bases(&config.input_root)?;
    if !config.only.is_empty() {
        if let Some(unknown) = config.only.iter().find(|n| !names.contains(n)) {
            return Err(KbExportError::config(format!(
                "no knowledge base named '{unknown}' in {}",
                config.input_root.display()
            )));
        }
        names.retain(|n| config.only.contains(n));
    }

    if config.reset_output {
        reset_output_dir(&config.output_root)?;
    } else {
        std::fs::create_dir_all(&config.output_root)
            .map_err(|e| KbExportError::io(&config.output_root, e))?;
    }

    info!(
        knowledge_bases = names.len(),
        concurrency = config.concurrency,
        "starting batch export"
    );

    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for name in names {
        let kb = KnowledgeBase::new(name.clone(), &config.input_root, &config.output_root);
        let export = config.export.clone();
        let converter = Arc::clone(&converter);
        let progress = Arc::clone(&progress);
        let semaphore = Arc::clone(&semaphore);
        let span = info_span!("kb", name = %name);

        tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => tokio::task::spawn_blocking(move || {
                    export_in_span(kb, export, converter, span, progress.as_ref())
                })
                .await
                .unwrap_or_else(|e| Err(KbExportError::Task(e.to_string()))),
                Err(e) => Err(KbExportError::Task(e.to_string())),
            };
            KbOutcome { name, result }
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                if let Err(e) = &outcome.result {
                    error!(kb = %outcome.name, error = %e, "knowledge base export failed");
                }
                outcomes.push(outcome);
            }
            Err(e) => error!(error = %e, "export task did not complete"),
        }
    }
    outcomes.sort_by(|a, b| a.name.cmp(&b.name));

    let report = BatchReport {
        started_at,
        elapsed: start.elapsed(),
        outcomes,
    };

    info!(
        succeeded = report.succeeded().count(),
        failed = report.failed().count(),
        elapsed_ms = report.elapsed.as_millis(),
        "batch export complete"
    );

    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

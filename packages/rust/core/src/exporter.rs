//! Export orchestration for one knowledge base.
//!
//! One pass: rebuild the output directory, pre-create every container folder,
//! route each document file (Markdown file, link overflow, or catch-all overflow),
//! then prune the folders that ended up empty.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Span, debug, info, info_span, instrument, warn};

use kbexport_markdown::{Converter, strip_escape_backslashes};
use kbexport_shared::{
    AppConfig, DocumentFile, DocumentRecord, ExportSettings, KbExportError, Result,
};

use crate::prune::prune_empty_dirs;
use crate::toc::{BookTree, sanitize_segment};

/// A knowledge-base archive directory and the directory it exports into.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    pub name: String,
    /// Holds the manifest and the document metadata files.
    pub source_dir: PathBuf,
    /// `<output_root>/<name>`.
    pub output_dir: PathBuf,
}

impl KnowledgeBase {
    pub fn new(name: impl Into<String>, input_root: &Path, output_root: &Path) -> Self {
        let name = name.into();
        Self {
            source_dir: input_root.join(&name),
            output_dir: output_root.join(&name),
            name,
        }
    }
}

/// Per-pass export settings.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Manifest file name inside the knowledge-base directory.
    pub manifest_file: String,
    /// Overflow file for external links, relative to the output directory.
    pub link_overflow_file: String,
    /// Overflow file for every other unsupported document.
    pub other_overflow_file: String,
    /// Type tags converted to Markdown, compared case-insensitively.
    pub document_types: Vec<String>,
    pub strip_backslashes: bool,
    pub prune_empty_dirs: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self::from(&ExportSettings::default())
    }
}

impl From<&ExportSettings> for ExportConfig {
    fn from(settings: &ExportSettings) -> Self {
        Self {
            manifest_file: settings.manifest_file.clone(),
            link_overflow_file: settings.link_overflow_file.clone(),
            other_overflow_file: settings.other_overflow_file.clone(),
            document_types: settings.document_types.clone(),
            strip_backslashes: settings.strip_backslashes,
            prune_empty_dirs: settings.prune_empty_dirs,
        }
    }
}

impl From<&AppConfig> for ExportConfig {
    fn from(config: &AppConfig) -> Self {
        Self::from(&config.export)
    }
}

impl ExportConfig {
    /// Whether documents of this type are converted to Markdown.
    pub fn is_convertible(&self, doc_type: &str) -> bool {
        self.document_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(doc_type))
    }
}

/// Where a single document went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Converted and written to this Markdown file.
    Written(PathBuf),
    /// Recorded in the link overflow file.
    Link,
    /// Recorded in the catch-all overflow file.
    Unsupported,
}

/// Counters for one export pass.
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub kb_name: String,
    pub documents_written: usize,
    /// Link documents and TOC link nodes recorded in the link overflow file.
    pub links_recorded: usize,
    pub unsupported_recorded: usize,
    pub folders_created: usize,
    pub folders_pruned: usize,
    /// Documents with no TOC entry, written under their title.
    pub path_misses: usize,
    /// Documents whose path was already taken in this pass.
    pub path_collisions: usize,
    pub elapsed: Duration,
}

/// Progress callback for reporting export status.
pub trait ExportProgress: Send + Sync {
    /// Called when a knowledge base starts processing its document files.
    fn kb_started(&self, name: &str, documents: usize);
    /// Called after each document file.
    fn document_exported(&self, kb: &str, path: &str, current: usize, total: usize);
    /// Called once per knowledge base with the outcome of its pass.
    fn kb_finished(&self, name: &str, result: &Result<ExportReport>);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ExportProgress for SilentProgress {
    fn kb_started(&self, _name: &str, _documents: usize) {}
    fn document_exported(&self, _kb: &str, _path: &str, _current: usize, _total: usize) {}
    fn kb_finished(&self, _name: &str, _result: &Result<ExportReport>) {}
}

/// Export one knowledge base under its own `kb` span.
pub fn export_knowledge_base(
    kb: KnowledgeBase,
    config: ExportConfig,
    converter: Arc<dyn Converter>,
    progress: &dyn ExportProgress,
) -> Result<ExportReport> {
    let span = info_span!("kb", name = %kb.name);
    export_in_span(kb, config, converter, span, progress)
}

/// Open and run an exporter whose log output goes through `span`, then report
/// the outcome to `progress`.
pub(crate) fn export_in_span(
    kb: KnowledgeBase,
    config: ExportConfig,
    converter: Arc<dyn Converter>,
    span: Span,
    progress: &dyn ExportProgress,
) -> Result<ExportReport> {
    let name = kb.name.clone();
    let result = Exporter::open(kb, config, converter, span).and_then(|e| e.run(progress));
    progress.kb_finished(&name, &result);
    result
}

// ---------------------------------------------------------------------------
// Exporter
// ---------------------------------------------------------------------------

/// Drives one export pass over a single knowledge base.
pub struct Exporter {
    kb: KnowledgeBase,
    config: ExportConfig,
    converter: Arc<dyn Converter>,
    tree: BookTree,
    span: Span,
    written: HashSet<PathBuf>,
    report: ExportReport,
}

impl Exporter {
    /// Load the knowledge base's table of contents. Log output of this exporter
    /// goes through `span`.
    pub fn open(
        kb: KnowledgeBase,
        config: ExportConfig,
        converter: Arc<dyn Converter>,
        span: Span,
    ) -> Result<Self> {
        let manifest_path = kb.source_dir.join(&config.manifest_file);
        let tree = span.in_scope(|| BookTree::load(&manifest_path))?;

        let report = ExportReport {
            kb_name: kb.name.clone(),
            ..ExportReport::default()
        };

        Ok(Self {
            kb,
            config,
            converter,
            tree,
            span,
            written: HashSet::new(),
            report,
        })
    }

    pub fn tree(&self) -> &BookTree {
        &self.tree
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn report(&self) -> &ExportReport {
        &self.report
    }

    /// Run the full pass: prepare, export every document file, finish.
    pub fn run(mut self, progress: &dyn ExportProgress) -> Result<ExportReport> {
        let span = self.span.clone();
        let _guard = span.enter();
        let start = Instant::now();

        info!(
            source = %self.kb.source_dir.display(),
            output = %self.kb.output_dir.display(),
            nodes = self.tree.len(),
            "exporting knowledge base"
        );

        self.prepare()?;

        let files = self.document_files()?;
        let total = files.len();
        progress.kb_started(&self.kb.name, total);

        for (i, file) in files.iter().enumerate() {
            let outcome = self.export_document_file(file)?;
            let label = match &outcome {
                ExportOutcome::Written(path) => path
                    .strip_prefix(&self.kb.output_dir)
                    .unwrap_or(path)
                    .display()
                    .to_string(),
                ExportOutcome::Link => format!("{} (link)", file.display()),
                ExportOutcome::Unsupported => format!("{} (unsupported)", file.display()),
            };
            progress.document_exported(&self.kb.name, &label, i + 1, total);
        }

        self.finish()?;
        self.report.elapsed = start.elapsed();

        info!(
            written = self.report.documents_written,
            links = self.report.links_recorded,
            unsupported = self.report.unsupported_recorded,
            misses = self.report.path_misses,
            pruned = self.report.folders_pruned,
            elapsed_ms = self.report.elapsed.as_millis(),
            "all documents exported"
        );

        Ok(self.report)
    }

    /// Rebuild the output directory and pre-create every container folder.
    ///
    /// TOC link nodes without a document behind them are recorded in the link
    /// overflow file here, since no document file will ever mention them.
    pub fn prepare(&mut self) -> Result<()> {
        let output = &self.kb.output_dir;
        if output.exists() {
            std::fs::remove_dir_all(output).map_err(|e| KbExportError::io(output, e))?;
        }
        std::fs::create_dir_all(output).map_err(|e| KbExportError::io(output, e))?;

        for (_, folder) in self.tree.containers() {
            let dir = output.join(folder);
            if dir.is_dir() {
                continue;
            }
            std::fs::create_dir_all(&dir).map_err(|e| KbExportError::io(&dir, e))?;
            self.report.folders_created += 1;
            debug!(path = %dir.display(), "created folder");
        }

        let toc_links: Vec<(String, String)> = self
            .tree
            .link_nodes()
            .filter(|(node, _)| node.id.is_none())
            .map(|(node, path)| (path.to_string(), node.url.clone().unwrap_or_default()))
            .collect();

        for (path, url) in toc_links {
            self.record_link(&path, &url)?;
        }

        Ok(())
    }

    /// Prune folders left empty by the pass.
    pub fn finish(&mut self) -> Result<()> {
        if self.config.prune_empty_dirs {
            self.report.folders_pruned = prune_empty_dirs(&self.kb.output_dir)?;
        }
        Ok(())
    }

    /// Regular `*.json` files of the knowledge-base directory other than the
    /// manifest, in file-name order.
    pub fn document_files(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.kb.source_dir;
        let mut files = Vec::new();

        for entry in std::fs::read_dir(dir).map_err(|e| KbExportError::io(dir, e))? {
            let entry = entry.map_err(|e| KbExportError::io(dir, e))?;
            let path = entry.path();

            if !entry
                .file_type()
                .map_err(|e| KbExportError::io(&path, e))?
                .is_file()
            {
                continue;
            }
            if entry.file_name().to_string_lossy() == self.config.manifest_file {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                debug!(path = %path.display(), "skipping non-JSON file");
                continue;
            }
            files.push(path);
        }

        files.sort();
        Ok(files)
    }

    /// Parse one document metadata file and export it.
    #[instrument(skip(self), fields(file = %path.display()))]
    pub fn export_document_file(&mut self, path: &Path) -> Result<ExportOutcome> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                KbExportError::document(path, "file is not valid UTF-8")
            } else {
                KbExportError::io(path, e)
            }
        })?;

        let file: DocumentFile = serde_json::from_str(&content)
            .map_err(|e| KbExportError::document(path, e.to_string()))?;

        self.export_document(&file.doc)
    }

    /// Route one document: links and unsupported types go to the overflow files,
    /// convertible documents are written as `<path>.md`.
    pub fn export_document(&mut self, record: &DocumentRecord) -> Result<ExportOutcome> {
        let rel_path = self.document_path(record);

        if record.doc_type.eq_ignore_ascii_case("link") {
            self.record_link(&rel_path, record.url.as_deref().unwrap_or_default())?;
            return Ok(ExportOutcome::Link);
        }

        if !self.config.is_convertible(&record.doc_type) {
            let line = format!("[{}] {rel_path}", record.doc_type);
            self.append_overflow(&self.config.other_overflow_file, &line)?;
            self.report.unsupported_recorded += 1;
            debug!(title = %record.title, doc_type = %record.doc_type, "recorded unsupported document");
            return Ok(ExportOutcome::Unsupported);
        }

        let markup = record.content().unwrap_or_else(|| {
            warn!(title = %record.title, "document has no body, writing an empty file");
            ""
        });

        let mut markdown = self.converter.convert(markup).map_err(|e| match e {
            KbExportError::Conversion(msg) => {
                KbExportError::Conversion(format!("{}: {msg}", record.title))
            }
            other => other,
        })?;

        if self.config.strip_backslashes {
            markdown = strip_escape_backslashes(&markdown);
        }

        let target = self.claim_target(&rel_path, record);
        std::fs::write(&target, markdown).map_err(|e| KbExportError::io(&target, e))?;
        self.report.documents_written += 1;

        info!(title = %record.title, path = %target.display(), "exported document");
        Ok(ExportOutcome::Written(target))
    }

    /// Resolved relative path of a document, falling back to its sanitized title.
    fn document_path(&mut self, record: &DocumentRecord) -> String {
        if let Some(path) = record
            .id
            .as_deref()
            .and_then(|id| self.tree.resolve_document_path(id))
        {
            return path;
        }

        self.report.path_misses += 1;
        info!(
            title = %record.title,
            id = record.id.as_deref().unwrap_or("-"),
            "no TOC entry for document, using its title"
        );
        sanitize_segment(&record.title)
    }

    /// Pick the Markdown file for `rel_path`. A path already written in this pass
    /// gets the document id (or a counter) appended instead of being overwritten.
    fn claim_target(&mut self, rel_path: &str, record: &DocumentRecord) -> PathBuf {
        let mut target = self.kb.output_dir.join(format!("{rel_path}.md"));

        if self.written.contains(&target) {
            let suffix = record
                .id
                .as_deref()
                .map(sanitize_segment)
                .unwrap_or_else(|| self.report.documents_written.to_string());
            let mut candidate = self.kb.output_dir.join(format!("{rel_path}-{suffix}.md"));
            let mut n = 1;
            while self.written.contains(&candidate) {
                n += 1;
                candidate = self
                    .kb
                    .output_dir
                    .join(format!("{rel_path}-{suffix}-{n}.md"));
            }

            warn!(
                title = %record.title,
                taken = %target.display(),
                path = %candidate.display(),
                "output path already used in this export"
            );
            self.report.path_collisions += 1;
            target = candidate;
        }

        self.written.insert(target.clone());
        target
    }

    fn record_link(&mut self, rel_path: &str, url: &str) -> Result<()> {
        let line = format!("[LINK] {rel_path}: {url}");
        self.append_overflow(&self.config.link_overflow_file, &line)?;
        self.report.links_recorded += 1;
        debug!(path = rel_path, url, "recorded link");
        Ok(())
    }

    fn append_overflow(&self, file_name: &str, line: &str) -> Result<()> {
        let path = self.kb.output_dir.join(file_name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| KbExportError::io(&path, e))?;
        writeln!(file, "{line}").map_err(|e| KbExportError::io(&path, e))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use kbexport_markdown::HtmlConverter;
    use serde_json::json;

    fn fixtures_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../../fixtures/kb")
    }

    fn converter() -> Arc<dyn Converter> {
        Arc::new(HtmlConverter::default())
    }

    /// Write a knowledge base with the given tocYml and `(file name, doc)` pairs.
    fn write_kb(input_root: &Path, name: &str, toc_yml: &str, docs: &[(&str, serde_json::Value)]) {
        let dir = input_root.join(name);
        std::fs::create_dir_all(&dir).unwrap();

        let meta = json!({ "book": { "name": name, "tocYml": toc_yml } });
        let manifest = json!({ "meta": meta.to_string() });
        std::fs::write(dir.join("$meta.json"), manifest.to_string()).unwrap();

        for (file, doc) in docs {
            std::fs::write(dir.join(file), json!({ "doc": doc }).to_string()).unwrap();
        }
    }

    fn open(input: &Path, output: &Path, name: &str) -> Exporter {
        let kb = KnowledgeBase::new(name, input, output);
        Exporter::open(kb, ExportConfig::default(), converter(), Span::none()).unwrap()
    }

    fn read(path: impl AsRef<Path>) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    fn record(doc_type: &str, title: &str, id: Option<&str>) -> DocumentRecord {
        DocumentRecord {
            doc_type: doc_type.into(),
            title: title.into(),
            id: id.map(String::from),
            body: Some("<p>body</p>".into()),
            body_draft: None,
            url: None,
        }
    }

    const GUIDE_TOC: &str = "\
- type: TITLE
  title: Guide
  uuid: '1'
  child_uuid: '2'
- type: DOC
  title: Intro
  uuid: '2'
  parent_uuid: '1'
  doc_id: d1
";

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl ExportProgress for RecordingProgress {
        fn kb_started(&self, name: &str, documents: usize) {
            self.events.lock().unwrap().push(format!("start {name} {documents}"));
        }
        fn document_exported(&self, _kb: &str, path: &str, current: usize, total: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("doc {current}/{total} {path}"));
        }
        fn kb_finished(&self, name: &str, result: &Result<ExportReport>) {
            self.events
                .lock()
                .unwrap()
                .push(format!("finish {name} {}", result.is_ok()));
        }
    }

    #[test]
    fn guide_scenario_writes_nested_markdown() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        write_kb(
            &input,
            "kb",
            GUIDE_TOC,
            &[("d1.json", json!({ "type": "Doc", "title": "Intro", "id": "d1", "body": "<p>Hi</p>" }))],
        );

        let report = open(&input, &output, "kb").run(&SilentProgress).unwrap();

        assert!(output.join("kb/Guide").is_dir());
        assert_eq!(read(output.join("kb/Guide/Intro.md")), "Hi\n");
        assert_eq!(report.documents_written, 1);
        assert_eq!(report.folders_created, 1);
        assert_eq!(report.path_misses, 0);
    }

    #[test]
    fn link_document_goes_to_link_overflow() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        write_kb(
            &input,
            "kb",
            "",
            &[("x.json", json!({ "type": "LINK", "title": "External", "url": "http://x" }))],
        );

        let report = open(&input, &output, "kb").run(&SilentProgress).unwrap();

        let links = read(output.join("kb/unexported-links.txt"));
        assert_eq!(links, "[LINK] External: http://x\n");
        assert!(!output.join("kb/External.md").exists());
        assert_eq!(report.links_recorded, 1);
        assert_eq!(report.documents_written, 0);
    }

    #[test]
    fn folder_holding_only_a_link_is_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        let toc = "\
- type: TITLE
  title: Bookmarks
  uuid: f
  child_uuid: s
- type: DOC
  title: Site
  uuid: s
  parent_uuid: f
  doc_id: l1
";
        write_kb(
            &input,
            "kb",
            toc,
            &[("l1.json", json!({ "type": "LINK", "title": "Site", "id": "l1", "url": "https://example.com" }))],
        );

        let report = open(&input, &output, "kb").run(&SilentProgress).unwrap();

        assert!(!output.join("kb/Bookmarks").exists());
        assert_eq!(report.folders_created, 1);
        assert_eq!(report.folders_pruned, 1);
        assert_eq!(
            read(output.join("kb/unexported-links.txt")),
            "[LINK] Bookmarks/Site: https://example.com\n"
        );
    }

    #[test]
    fn unsupported_types_go_to_catch_all_overflow() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        write_kb(&input, "kb", GUIDE_TOC, &[]);

        let mut exporter = open(&input, &output, "kb");
        exporter.prepare().unwrap();
        let outcome = exporter
            .export_document(&record("Sheet", "Budget", Some("d1")))
            .unwrap();

        assert_eq!(outcome, ExportOutcome::Unsupported);
        assert_eq!(
            read(output.join("kb/unexported-documents.txt")),
            "[Sheet] Guide/Intro\n"
        );
        assert!(!output.join("kb/Guide/Intro.md").exists());
    }

    #[test]
    fn doc_type_matching_ignores_case() {
        let config = ExportConfig::default();
        assert!(config.is_convertible("Doc"));
        assert!(config.is_convertible("DOC"));
        assert!(!config.is_convertible("Sheet"));
    }

    #[test]
    fn every_record_is_accounted_for_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        write_kb(&input, "kb", GUIDE_TOC, &[]);

        let records = vec![
            record("Doc", "Intro", Some("d1")),
            record("DOC", "Loose", None),
            record("LINK", "Elsewhere", Some("e")),
            record("Board", "Whiteboard", Some("w")),
            record("Sheet", "Numbers", None),
            record("Doc", "Intro", Some("d1")),
        ];

        let mut exporter = open(&input, &output, "kb");
        exporter.prepare().unwrap();
        let outcomes: Vec<_> = records
            .iter()
            .map(|r| exporter.export_document(r).unwrap())
            .collect();

        let written = outcomes
            .iter()
            .filter(|o| matches!(o, ExportOutcome::Written(_)))
            .count();
        let link_lines = read(output.join("kb/unexported-links.txt")).lines().count();
        let other_lines = read(output.join("kb/unexported-documents.txt")).lines().count();

        assert_eq!(written + link_lines + other_lines, records.len());
        assert_eq!(written, 3);

        let md_files = ["Guide/Intro.md", "Guide/Intro-d1.md", "Loose.md"];
        for file in md_files {
            assert!(output.join("kb").join(file).exists(), "missing {file}");
        }
        assert_eq!(exporter.report().path_collisions, 1);
    }

    #[test]
    fn collision_suffix_from_unsafe_id_stays_in_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        write_kb(&input, "kb", "", &[]);

        let mut exporter = open(&input, &output, "kb");
        exporter.prepare().unwrap();
        let outcomes: Vec<_> = [None, Some("x/y"), Some("../../escaped")]
            .into_iter()
            .map(|id| exporter.export_document(&record("Doc", "Same", id)).unwrap())
            .collect();

        let kb = output.join("kb");
        assert_eq!(
            outcomes,
            vec![
                ExportOutcome::Written(kb.join("Same.md")),
                ExportOutcome::Written(kb.join("Same-x-y.md")),
                ExportOutcome::Written(kb.join("Same-..-..-escaped.md")),
            ]
        );
        assert_eq!(exporter.report().path_collisions, 2);
        assert_eq!(std::fs::read_dir(&kb).unwrap().count(), 3);
        assert!(!tmp.path().join("escaped.md").exists());
    }

    #[test]
    fn missing_toc_entry_falls_back_to_sanitized_title() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        write_kb(&input, "kb", GUIDE_TOC, &[]);

        let mut exporter = open(&input, &output, "kb");
        exporter.prepare().unwrap();
        let outcome = exporter
            .export_document(&record("Doc", "Q1/Q2 plan", Some("unknown")))
            .unwrap();

        assert_eq!(outcome, ExportOutcome::Written(output.join("kb/Q1-Q2 plan.md")));
        assert_eq!(exporter.report().path_misses, 1);
    }

    #[test]
    fn container_document_lands_inside_its_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        let toc = "\
- type: DOC
  title: Reference
  uuid: r
  child_uuid: a
  doc_id: ref
- type: DOC
  title: API
  uuid: a
  parent_uuid: r
  doc_id: api
";
        write_kb(
            &input,
            "kb",
            toc,
            &[
                ("ref.json", json!({ "type": "Doc", "title": "Reference", "id": "ref", "body": "<p>index</p>" })),
                ("api.json", json!({ "type": "Doc", "title": "API", "id": "api", "body": "<p>calls</p>" })),
            ],
        );

        open(&input, &output, "kb").run(&SilentProgress).unwrap();

        assert_eq!(read(output.join("kb/Reference/Reference.md")), "index\n");
        assert_eq!(read(output.join("kb/Reference/API.md")), "calls\n");
    }

    #[test]
    fn body_draft_and_backslashes() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        write_kb(
            &input,
            "kb",
            GUIDE_TOC,
            &[(
                "d1.json",
                json!({ "type": "Doc", "title": "Intro", "id": "d1", "body": "", "body_draft": "<p>1. a_b *c*</p>" }),
            )],
        );

        open(&input, &output, "kb").run(&SilentProgress).unwrap();

        let md = read(output.join("kb/Guide/Intro.md"));
        assert!(md.contains("a_b"), "got: {md}");
        assert!(!md.contains('\\'), "got: {md}");
    }

    #[test]
    fn malformed_document_aborts_the_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        write_kb(&input, "kb", GUIDE_TOC, &[]);
        std::fs::write(input.join("kb/broken.json"), "{ not json").unwrap();

        let err = open(&input, &output, "kb").run(&SilentProgress).unwrap_err();
        match err {
            KbExportError::DocumentParse { path, .. } => {
                assert!(path.ends_with("broken.json"));
            }
            other => panic!("expected document error, got {other:?}"),
        }
    }

    #[test]
    fn document_missing_required_fields_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        write_kb(&input, "kb", GUIDE_TOC, &[("d1.json", json!({ "title": "No type" }))]);

        let err = open(&input, &output, "kb").run(&SilentProgress).unwrap_err();
        assert!(matches!(err, KbExportError::DocumentParse { .. }));
    }

    #[test]
    fn cyclic_manifest_fails_to_open() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        let toc = "\
- type: TITLE
  title: A
  uuid: a
  parent_uuid: b
  child_uuid: b
- type: TITLE
  title: B
  uuid: b
  parent_uuid: a
  child_uuid: a
";
        write_kb(&input, "kb", toc, &[]);

        let kb = KnowledgeBase::new("kb", &input, &output);
        let result = Exporter::open(kb, ExportConfig::default(), converter(), Span::none());
        assert!(matches!(result, Err(KbExportError::Cycle { .. })));
    }

    #[test]
    fn document_files_skip_manifest_and_other_files() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        write_kb(
            &input,
            "kb",
            GUIDE_TOC,
            &[
                ("b.json", json!({ "type": "Doc", "title": "B" })),
                ("a.json", json!({ "type": "Doc", "title": "A" })),
            ],
        );
        std::fs::write(input.join("kb/notes.txt"), "ignore me").unwrap();
        std::fs::create_dir_all(input.join("kb/assets.json")).unwrap();

        let exporter = open(&input, &output, "kb");
        let names: Vec<_> = exporter
            .document_files()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn re_export_rebuilds_the_same_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        write_kb(
            &input,
            "kb",
            GUIDE_TOC,
            &[
                ("d1.json", json!({ "type": "Doc", "title": "Intro", "id": "d1", "body": "<p>Hi</p>" })),
                ("x.json", json!({ "type": "LINK", "title": "External", "url": "http://x" })),
            ],
        );

        open(&input, &output, "kb").run(&SilentProgress).unwrap();
        std::fs::write(output.join("kb/stale.md"), "left over").unwrap();
        open(&input, &output, "kb").run(&SilentProgress).unwrap();

        assert!(!output.join("kb/stale.md").exists());
        assert_eq!(read(output.join("kb/Guide/Intro.md")), "Hi\n");
        assert_eq!(read(output.join("kb/unexported-links.txt")).lines().count(), 1);
    }

    #[test]
    fn progress_is_reported_per_document() {
        let tmp = tempfile::tempdir().unwrap();
        let (input, output) = (tmp.path().join("in"), tmp.path().join("out"));
        write_kb(
            &input,
            "kb",
            GUIDE_TOC,
            &[("d1.json", json!({ "type": "Doc", "title": "Intro", "id": "d1", "body": "<p>Hi</p>" }))],
        );

        let progress = RecordingProgress::default();
        open(&input, &output, "kb").run(&progress).unwrap();

        let events = progress.events.lock().unwrap();
        assert_eq!(events[0], "start kb 1");
        assert_eq!(events[1], format!("doc 1/1 {}", Path::new("Guide/Intro.md").display()));
    }

    #[test]
    fn handbook_fixture_exports_completely() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path();

        let report = export_knowledge_base(
            KnowledgeBase::new("handbook", &fixtures_root(), output),
            ExportConfig::default(),
            converter(),
            &SilentProgress,
        )
        .unwrap();

        let kb = output.join("handbook");
        assert!(read(kb.join("Guide/Intro.md")).contains("# Intro"));
        assert!(read(kb.join("Guide/Setup-Install.md")).contains("make install"));
        assert!(read(kb.join("Reference/Reference.md")).contains("Reference index"));
        assert!(read(kb.join("Reference/API.md")).contains("| Method | Path |"));
        assert!(kb.join("Orphan.md").exists());

        assert_eq!(
            read(kb.join("unexported-links.txt")),
            "[LINK] Links/Homepage: https://example.com\n"
        );
        assert_eq!(read(kb.join("unexported-documents.txt")), "[Sheet] Sheets/Budget\n");
        assert!(!kb.join("Links").exists());
        assert!(!kb.join("Sheets").exists());

        assert_eq!(report.kb_name, "handbook");
        assert_eq!(report.documents_written, 5);
        assert_eq!(report.links_recorded, 1);
        assert_eq!(report.unsupported_recorded, 1);
        assert_eq!(report.folders_created, 4);
        assert_eq!(report.folders_pruned, 2);
        assert_eq!(report.path_misses, 1);
    }
}

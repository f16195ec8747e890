//! Markup-to-Markdown conversion engine.
//!
//! Document bodies arrive as HTML-flavoured markup. [`HtmlConverter`] turns them into
//! Markdown with the `htmd` crate, pre-rendering the constructs `htmd` leaves out
//! (tables, strikethrough, code-block language tags) and then running the cleanup
//! passes in [`cleanup`]. The exporter only depends on the [`Converter`] trait.

mod cleanup;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

use kbexport_shared::{KbExportError, MarkdownConfig, Result};

pub use cleanup::strip_escape_backslashes;

/// Marks where a strikethrough span starts or ends until `htmd` has run.
const STRIKE_MARK: char = '\u{E000}';
/// Wraps the index of a pre-rendered table until `htmd` has run.
const TABLE_MARK: char = '\u{E001}';

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A pluggable markup converter.
pub trait Converter: Send + Sync {
    /// Convert raw markup into Markdown text.
    fn convert(&self, markup: &str) -> Result<String>;
}

/// Rendering rules for [`HtmlConverter`].
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Render `<table>` as pipe tables.
    pub tables: bool,
    /// Render `<del>`, `<s>` and `<strike>` as `~~text~~`.
    pub strikethrough: bool,
    /// Fenced code blocks (with language tag) instead of indented ones.
    pub fenced_code: bool,
    /// Tags dropped together with their content.
    pub skip_tags: Vec<String>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::from(&MarkdownConfig::default())
    }
}

impl From<&MarkdownConfig> for ConvertOptions {
    fn from(config: &MarkdownConfig) -> Self {
        Self {
            tables: config.tables,
            strikethrough: config.strikethrough,
            fenced_code: config.fenced_code,
            skip_tags: config.skip_tags.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// The default engine, built on `htmd`.
#[derive(Debug, Clone, Default)]
pub struct HtmlConverter {
    options: ConvertOptions,
}

impl HtmlConverter {
    pub fn new(options: ConvertOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }
}

impl Converter for HtmlConverter {
    /// Convert HTML to Markdown.
    ///
    /// 1. Tags code blocks with their language
    /// 2. Swaps tables and strikethrough spans for placeholders
    /// 3. Converts HTML → Markdown via `htmd`
    /// 4. Restores the placeholders
    /// 5. Runs the cleanup pipeline
    #[instrument(skip_all, fields(markup_len = markup.len()))]
    fn convert(&self, markup: &str) -> Result<String> {
        let mut html = tag_code_languages(markup);

        let tables = if self.options.tables {
            let (replaced, tables) = extract_tables(&html);
            html = replaced;
            tables
        } else {
            Vec::new()
        };

        if self.options.strikethrough {
            html = mark_strikethrough(&html);
        }

        let code_block_style = if self.options.fenced_code {
            htmd::options::CodeBlockStyle::Fenced
        } else {
            htmd::options::CodeBlockStyle::Indented
        };

        let converter = htmd::HtmlToMarkdown::builder()
            .skip_tags(self.options.skip_tags.iter().map(String::as_str).collect())
            .options(htmd::options::Options {
                code_block_style,
                ..Default::default()
            })
            .build();

        let raw_markdown = converter
            .convert(&html)
            .map_err(|e| KbExportError::Conversion(format!("htmd conversion failed: {e}")))?;

        debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

        let restored = restore_tables(&raw_markdown, &tables).replace(STRIKE_MARK, "~~");

        Ok(cleanup::run_pipeline(&restored))
    }
}

// ---------------------------------------------------------------------------
// Pre-processing
// ---------------------------------------------------------------------------

/// Move a `data-language` attribute on `<pre>` onto the inner `<code>` as a
/// `language-*` class, which is where `htmd` looks for the fence tag.
fn tag_code_languages(html: &str) -> String {
    static PRE_LANG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"<pre([^>]*?)\sdata-lang(?:uage)?="([\w+#-]+)"([^>]*)>\s*<code(?:\s[^>]*)?>"#)
            .expect("valid regex")
    });

    PRE_LANG_RE
        .replace_all(html, r#"<pre$1$3><code class="language-$2">"#)
        .into_owned()
}

/// Replace strikethrough tags with marker characters `htmd` passes through untouched.
fn mark_strikethrough(html: &str) -> String {
    static STRIKE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)</?(?:del|s|strike)(?:\s[^>]*)?>").expect("valid regex")
    });

    STRIKE_RE
        .replace_all(html, STRIKE_MARK.to_string().as_str())
        .into_owned()
}

/// Render every top-level `<table>` to a Markdown pipe table and leave a placeholder
/// paragraph in its place. Returns the rewritten HTML and the rendered tables.
///
/// Table spans are located in the source text by tag depth, so the replaced bytes
/// are exactly the original markup. Nested tables are flattened into their
/// parent's cells; an unclosed table is left to `htmd`.
fn extract_tables(html: &str) -> (String, Vec<String>) {
    static TABLE_TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)<(/?)table\b[^>]*>").expect("valid regex"));
    static TABLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("table").expect("valid selector"));

    let mut result = String::with_capacity(html.len());
    let mut tables = Vec::new();
    let mut copied = 0;
    let mut depth = 0usize;
    let mut start = 0;

    for caps in TABLE_TAG_RE.captures_iter(html) {
        let Some(tag) = caps.get(0) else { continue };
        let closing = caps.get(1).is_some_and(|m| !m.is_empty());

        if !closing {
            if depth == 0 {
                start = tag.start();
            }
            depth += 1;
            continue;
        }
        if depth == 0 {
            continue;
        }
        depth -= 1;
        if depth > 0 {
            continue;
        }

        let doc = Html::parse_fragment(&html[start..tag.end()]);
        match doc.select(&TABLE_SEL).next() {
            Some(table_el) => {
                result.push_str(&html[copied..start]);
                result.push_str(&format!("<p>{TABLE_MARK}{}{TABLE_MARK}</p>", tables.len()));
                tables.push(html_table_to_markdown(&table_el));
                copied = tag.end();
            }
            None => debug!("table span did not parse as a table, leaving it to htmd"),
        }
    }

    result.push_str(&html[copied..]);
    (result, tables)
}

/// Put the rendered tables back where their placeholders ended up.
fn restore_tables(markdown: &str, tables: &[String]) -> String {
    let mut result = markdown.to_string();
    for (i, table) in tables.iter().enumerate() {
        let placeholder = format!("{TABLE_MARK}{i}{TABLE_MARK}");
        result = result.replacen(&placeholder, table.trim(), 1);
    }
    result
}

/// Convert a single HTML table element to a Markdown table string.
fn html_table_to_markdown(table: &ElementRef) -> String {
    static TR_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
    static CELL_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("th, td").expect("valid selector"));

    let mut rows: Vec<Vec<String>> = Vec::new();

    for tr in table.select(&TR_SEL) {
        let cells: Vec<String> = tr.select(&CELL_SEL).map(|cell| cell_text(&cell)).collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }

    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let mut md = String::new();
    let separator = vec!["---"; col_count].join(" | ");

    for (i, row) in rows.iter().enumerate() {
        md.push_str("| ");
        md.push_str(&row.join(" | "));
        md.push_str(" |\n");
        // The first row always serves as the header; pipe tables require one.
        if i == 0 {
            md.push_str("| ");
            md.push_str(&separator);
            md.push_str(" |\n");
        }
    }

    md
}

/// Cell text on a single line, with pipes encoded so they cannot split the cell.
fn cell_text(cell: &ElementRef) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "&#124;")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

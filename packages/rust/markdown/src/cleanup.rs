//! Post-conversion cleanup pipeline for Markdown output.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.to_string();

    result = clean_blank_lines(&result);
    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = normalize_whitespace(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Clean up excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 3+ blank lines into exactly 2.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Fix code block language hints
// ---------------------------------------------------------------------------

/// Handles fence hints like `language-js`, `lang-python`, `highlight-rust`.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^```(?:language-|lang-|highlight-)([\w+#-]+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "```$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Strip leftover layout tags
// ---------------------------------------------------------------------------

/// Remove stray layout tags that survived the conversion, keeping their content.
/// Fenced code is left alone.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|font|card)(?:\s[^>]*)?>")
            .expect("valid regex")
    });

    map_outside_fences(md, |line| HTML_TAG_RE.replace_all(line, "").to_string())
}

// ---------------------------------------------------------------------------
// Pass 4: Normalize whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace on every line. A text line ending in two or more
/// spaces and followed by another text line is a hard line break and keeps
/// exactly two.
fn normalize_whitespace(md: &str) -> String {
    let lines: Vec<&str> = md.lines().collect();

    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let trimmed = line.trim_end();
            let continues = lines
                .get(i + 1)
                .is_some_and(|next| !next.trim().is_empty());
            if line.ends_with("  ") && !trimmed.is_empty() && continues {
                format!("{trimmed}  ")
            } else {
                trimmed.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 5: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the file ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Backslash artifacts
// ---------------------------------------------------------------------------

/// Remove the escape backslashes the converter inserts before Markdown
/// punctuation (`\*`, `\_`, `\[` ...).
///
/// Fenced code blocks and inline code spans keep their backslashes.
pub fn strip_escape_backslashes(md: &str) -> String {
    map_outside_fences(md, |line| {
        line.split('`')
            .enumerate()
            .map(|(i, part)| {
                if i % 2 == 1 {
                    part.to_string()
                } else {
                    part.replace('\\', "")
                }
            })
            .collect::<Vec<_>>()
            .join("`")
    })
}

/// Apply `f` to every line outside fenced code blocks. Preserves whether the input
/// ended with a newline.
fn map_outside_fences(md: &str, f: impl Fn(&str) -> String) -> String {
    let mut result = String::with_capacity(md.len());
    let mut in_code_block = false;

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            result.push_str(line);
        } else if in_code_block {
            result.push_str(line);
        } else {
            result.push_str(&f(line));
        }
        result.push('\n');
    }

    if !md.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

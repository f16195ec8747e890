//! Core domain types for exported knowledge bases.
//!
//! The on-disk archive stores one `$meta.json` manifest per knowledge base and one
//! JSON metadata file per document. The manifest embeds the table of contents as a
//! YAML list inside a JSON-encoded string.

use serde::{Deserialize, Deserializer};

/// Default manifest file name inside a knowledge-base directory.
pub const MANIFEST_FILE_NAME: &str = "$meta.json";

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Outer shape of `$meta.json`: the payload is a JSON document encoded as a string.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestFile {
    pub meta: String,
}

/// Decoded `meta` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BookMeta {
    pub book: BookInfo,
}

/// The `book` object of the decoded payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BookInfo {
    /// YAML-encoded list of table-of-contents entries.
    #[serde(rename = "tocYml")]
    pub toc_yml: String,
    /// Display name of the knowledge base, when the archive records one.
    #[serde(default)]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Table of contents
// ---------------------------------------------------------------------------

/// One raw `tocYml` entry, as written by the exporting service.
///
/// Identifiers show up as strings or bare numbers depending on the archive
/// version; both normalize to strings and empty values read as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TocEntry {
    #[serde(rename = "type", default, deserialize_with = "opt_scalar_string")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub uuid: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub parent_uuid: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub child_uuid: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub doc_id: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub url: Option<String>,
}

impl TocEntry {
    /// Convert into a tree node. Entries without a uuid (the `META` header) are not
    /// part of the tree and yield `None`.
    pub fn into_node(self) -> Option<TocNode> {
        let uuid = self.uuid?;
        Some(TocNode {
            id: self.doc_id,
            uuid,
            parent_uuid: self.parent_uuid,
            title: self.title.unwrap_or_default(),
            node_type: self
                .kind
                .as_deref()
                .map(TocNodeType::from_tag)
                .unwrap_or(TocNodeType::Doc),
            has_children: self.child_uuid.is_some(),
            url: self.url,
        })
    }
}

/// Routing discriminator of a table-of-contents node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TocNodeType {
    /// An ordinary document.
    Doc,
    /// An external link; has no document file.
    Link,
    /// A pure grouping title with no document behind it.
    Title,
    /// Anything else the exporting service emits.
    Other(String),
}

impl TocNodeType {
    /// Classify a raw `type` tag (case-insensitive).
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_uppercase().as_str() {
            "DOC" => Self::Doc,
            "LINK" => Self::Link,
            "TITLE" => Self::Title,
            _ => Self::Other(tag.to_string()),
        }
    }
}

impl std::fmt::Display for TocNodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Doc => write!(f, "DOC"),
            Self::Link => write!(f, "LINK"),
            Self::Title => write!(f, "TITLE"),
            Self::Other(tag) => write!(f, "{tag}"),
        }
    }
}

/// A node of the table-of-contents tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocNode {
    /// Id of the underlying document; absent for pure folder nodes.
    pub id: Option<String>,
    /// Unique identifier of this node.
    pub uuid: String,
    /// Containing node; `None` for root-level nodes.
    pub parent_uuid: Option<String>,
    /// Display name. May contain `/` or `\`.
    pub title: String,
    pub node_type: TocNodeType,
    /// Whether the node is a container (folder).
    pub has_children: bool,
    /// Target of link nodes.
    pub url: Option<String>,
}

impl TocNode {
    /// A root-level, childless document node with no document id.
    pub fn new(uuid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: None,
            uuid: uuid.into(),
            parent_uuid: None,
            title: title.into(),
            node_type: TocNodeType::Doc,
            has_children: false,
            url: None,
        }
    }

    pub fn with_parent(mut self, parent_uuid: impl Into<String>) -> Self {
        self.parent_uuid = Some(parent_uuid.into());
        self
    }

    pub fn with_document(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_type(mut self, node_type: TocNodeType) -> Self {
        self.node_type = node_type;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Mark the node as a container.
    pub fn container(mut self) -> Self {
        self.has_children = true;
        self
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Outer shape of a per-document metadata file.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentFile {
    pub doc: DocumentRecord,
}

/// One exported document.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentRecord {
    /// Free-form type tag (`Doc`, `Sheet`, `Board`, `LINK`, ...).
    #[serde(rename = "type", deserialize_with = "scalar_string")]
    pub doc_type: String,
    #[serde(deserialize_with = "scalar_string")]
    pub title: String,
    /// Correlates with [`TocNode::id`].
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_draft: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar_string")]
    pub url: Option<String>,
}

impl DocumentRecord {
    /// Raw markup to convert: `body`, or `body_draft` when `body` is missing or empty.
    pub fn content(&self) -> Option<&str> {
        self.body
            .as_deref()
            .filter(|b| !b.is_empty())
            .or_else(|| self.body_draft.as_deref().filter(|b| !b.is_empty()))
    }
}

// ---------------------------------------------------------------------------
// Scalar helpers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl From<Scalar> for String {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Str(s) => s,
            Scalar::Int(n) => n.to_string(),
            Scalar::UInt(n) => n.to_string(),
            Scalar::Float(n) => n.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Scalar::deserialize(deserializer).map(String::from)
}

fn opt_scalar_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Scalar> = Option::deserialize(deserializer)?;
    Ok(value.map(String::from).filter(|s| !s.is_empty()))
}

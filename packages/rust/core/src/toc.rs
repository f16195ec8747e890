//! Table-of-contents tree and path resolution.
//!
//! The manifest lists TOC nodes flat, each pointing at its parent by uuid. The
//! tree is stored as an arena (nodes in manifest order) with uuid and document-id
//! indexes; every node's folder path is resolved once at load time, which is also
//! where dangling parents and parent-link cycles are rejected.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{debug, instrument};

use kbexport_shared::{BookMeta, KbExportError, ManifestFile, Result, TocEntry, TocNode, TocNodeType};

/// An immutable, fully resolved table of contents for one knowledge base.
#[derive(Debug, Clone)]
pub struct BookTree {
    nodes: Vec<TocNode>,
    by_uuid: HashMap<String, usize>,
    by_document: HashMap<String, usize>,
    /// Resolved folder path per node, parallel to `nodes`.
    folder_paths: Vec<String>,
    name: Option<String>,
}

impl BookTree {
    /// Load the tree from a `$meta.json` manifest.
    #[instrument(skip_all, fields(path = %manifest_path.display()))]
    pub fn load(manifest_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(manifest_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                KbExportError::manifest(manifest_path, "manifest file not found")
            } else {
                KbExportError::io(manifest_path, e)
            }
        })?;

        let tree = Self::parse_manifest(&content, manifest_path)?;
        debug!(nodes = tree.len(), "table of contents loaded");
        Ok(tree)
    }

    /// Parse manifest text. `path` is only used for error context.
    pub fn parse_manifest(content: &str, path: &Path) -> Result<Self> {
        let manifest: ManifestFile = serde_json::from_str(content)
            .map_err(|e| KbExportError::manifest(path, format!("invalid manifest JSON: {e}")))?;

        let meta: BookMeta = serde_json::from_str(&manifest.meta)
            .map_err(|e| KbExportError::manifest(path, format!("invalid meta payload: {e}")))?;

        let entries: Vec<TocEntry> = if meta.book.toc_yml.trim().is_empty() {
            Vec::new()
        } else {
            serde_yaml::from_str::<Option<Vec<TocEntry>>>(&meta.book.toc_yml)
                .map_err(|e| KbExportError::manifest(path, format!("invalid tocYml: {e}")))?
                .unwrap_or_default()
        };

        let nodes = entries.into_iter().filter_map(TocEntry::into_node).collect();

        let mut tree = Self::from_nodes(nodes).map_err(|e| match e {
            KbExportError::Validation { message } => KbExportError::manifest(path, message),
            other => other,
        })?;
        tree.name = meta.book.name;
        Ok(tree)
    }

    /// Build a tree from nodes in manifest order.
    ///
    /// Fails on duplicate uuids or dangling parents (`Validation`) and on
    /// parent-link cycles (`Cycle`).
    pub fn from_nodes(nodes: Vec<TocNode>) -> Result<Self> {
        let mut by_uuid = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if by_uuid.insert(node.uuid.clone(), i).is_some() {
                return Err(KbExportError::validation(format!(
                    "duplicate node uuid {}",
                    node.uuid
                )));
            }
        }

        let mut by_document = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if let Some(id) = &node.id {
                by_document.entry(id.clone()).or_insert(i);
            }
        }

        let folder_paths = resolve_all(&nodes, &by_uuid)?;

        Ok(Self {
            nodes,
            by_uuid,
            by_document,
            folder_paths,
            name: None,
        })
    }

    /// Full relative folder path of a node: its ancestors' sanitized titles and its
    /// own, joined with `/`.
    ///
    /// Nodes of this tree are answered from the resolved paths. A node from
    /// elsewhere is resolved against its parent in this tree.
    pub fn resolve_folder_path(&self, node: &TocNode) -> Result<String> {
        if let Some(&i) = self.by_uuid.get(&node.uuid) {
            return Ok(self.folder_paths[i].clone());
        }

        let segment = sanitize_segment(&node.title);
        match &node.parent_uuid {
            None => Ok(segment),
            Some(parent) => {
                let &i = self.by_uuid.get(parent).ok_or_else(|| {
                    KbExportError::validation(format!(
                        "node {} references missing parent {parent}",
                        node.uuid
                    ))
                })?;
                Ok(format!("{}/{segment}", self.folder_paths[i]))
            }
        }
    }

    /// Relative output path (without extension) of the document with this id, or
    /// `None` when no node carries it.
    ///
    /// A container document gets its own title appended, so it lands inside its
    /// own folder next to its children.
    pub fn resolve_document_path(&self, document_id: &str) -> Option<String> {
        let &i = self.by_document.get(document_id)?;
        let node = &self.nodes[i];

        let mut path = self.folder_paths[i].clone();
        if node.has_children {
            path.push('/');
            path.push_str(&sanitize_segment(&node.title));
        }
        Some(path)
    }

    /// Resolved folder path of the node with this uuid.
    pub fn folder_path(&self, uuid: &str) -> Option<&str> {
        self.by_uuid
            .get(uuid)
            .map(|&i| self.folder_paths[i].as_str())
    }

    /// All nodes paired with their folder paths, in manifest order.
    pub fn entries(&self) -> impl Iterator<Item = (&TocNode, &str)> {
        self.nodes
            .iter()
            .zip(self.folder_paths.iter().map(String::as_str))
    }

    /// Container nodes paired with their folder paths.
    pub fn containers(&self) -> impl Iterator<Item = (&TocNode, &str)> {
        self.entries().filter(|(node, _)| node.has_children)
    }

    /// Link nodes paired with their folder paths.
    pub fn link_nodes(&self) -> impl Iterator<Item = (&TocNode, &str)> {
        self.entries()
            .filter(|(node, _)| node.node_type == TocNodeType::Link)
    }

    pub fn nodes(&self) -> &[TocNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Knowledge-base name recorded in the manifest, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Turn a title into a single path segment.
///
/// `/` and `\` become `-`. Blank titles become `untitled`, and `.`/`..` are
/// rewritten so a segment never points outside its folder.
pub fn sanitize_segment(title: &str) -> String {
    let segment = title.replace(['/', '\\'], "-");
    match segment.trim() {
        "" => "untitled".to_string(),
        "." | ".." => segment.replace('.', "-"),
        _ => segment,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve every node's folder path. Each node is visited once: the walk from a
/// node climbs until it reaches a root or an already resolved ancestor, then
/// fills in paths on the way back down.
fn resolve_all(nodes: &[TocNode], by_uuid: &HashMap<String, usize>) -> Result<Vec<String>> {
    let mut paths: Vec<Option<String>> = vec![None; nodes.len()];

    for start in 0..nodes.len() {
        if paths[start].is_some() {
            continue;
        }

        let mut chain: Vec<usize> = Vec::new();
        let mut on_chain: HashSet<usize> = HashSet::new();
        let mut base: Option<String> = None;
        let mut current = Some(start);

        while let Some(idx) = current {
            if let Some(resolved) = &paths[idx] {
                base = Some(resolved.clone());
                break;
            }
            if !on_chain.insert(idx) {
                return Err(cycle_error(nodes, &chain, idx));
            }
            chain.push(idx);

            current = match &nodes[idx].parent_uuid {
                None => None,
                Some(parent) => Some(*by_uuid.get(parent).ok_or_else(|| {
                    KbExportError::validation(format!(
                        "node {} references missing parent {parent}",
                        nodes[idx].uuid
                    ))
                })?),
            };
        }

        for &idx in chain.iter().rev() {
            let segment = sanitize_segment(&nodes[idx].title);
            let path = match base.take() {
                Some(parent) => format!("{parent}/{segment}"),
                None => segment,
            };
            paths[idx] = Some(path.clone());
            base = Some(path);
        }
    }

    Ok(paths.into_iter().map(Option::unwrap_or_default).collect())
}

fn cycle_error(nodes: &[TocNode], chain: &[usize], repeated: usize) -> KbExportError {
    let loop_start = chain.iter().position(|&i| i == repeated).unwrap_or(0);
    let chain = chain[loop_start..]
        .iter()
        .chain(std::iter::once(&repeated))
        .map(|&i| nodes[i].uuid.as_str())
        .collect::<Vec<_>>()
        .join(" -> ");

    KbExportError::Cycle {
        uuid: nodes[repeated].uuid.clone(),
        chain,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_json(toc_yml: &str) -> String {
        let meta = serde_json::json!({ "book": { "name": "Handbook", "tocYml": toc_yml } });
        serde_json::json!({ "meta": meta.to_string() }).to_string()
    }

    fn chain_tree() -> BookTree {
        BookTree::from_nodes(vec![
            TocNode::new("c", "C").container(),
            TocNode::new("b", "B").with_parent("c").container(),
            TocNode::new("a", "A").with_parent("b").with_document("doc-a"),
        ])
        .unwrap()
    }

    #[test]
    fn ancestor_chain_orders_root_first() {
        let tree = chain_tree();
        let a = &tree.nodes()[2];
        assert_eq!(tree.resolve_folder_path(a).unwrap(), "C/B/A");
        assert_eq!(tree.folder_path("b"), Some("C/B"));
    }

    #[test]
    fn resolution_is_order_independent() {
        // Children listed before their parents.
        let tree = BookTree::from_nodes(vec![
            TocNode::new("a", "A").with_parent("b"),
            TocNode::new("b", "B").with_parent("c").container(),
            TocNode::new("c", "C").container(),
        ])
        .unwrap();
        assert_eq!(tree.folder_path("a"), Some("C/B/A"));
    }

    #[test]
    fn resolve_folder_path_is_deterministic() {
        let tree = chain_tree();
        let a = tree.nodes()[2].clone();
        let first = tree.resolve_folder_path(&a).unwrap();
        for _ in 0..10 {
            assert_eq!(tree.resolve_folder_path(&a).unwrap(), first);
        }
    }

    #[test]
    fn root_node_returns_its_title() {
        let tree = chain_tree();
        assert_eq!(tree.resolve_folder_path(&tree.nodes()[0]).unwrap(), "C");
    }

    #[test]
    fn titles_are_sanitized_in_every_segment() {
        let tree = BookTree::from_nodes(vec![
            TocNode::new("p", "Input/Output").container(),
            TocNode::new("q", r"C:\Windows").with_parent("p").container(),
            TocNode::new("r", "a/b\\c").with_parent("q"),
        ])
        .unwrap();

        let path = tree.folder_path("r").unwrap();
        assert_eq!(path, "Input-Output/C:-Windows/a-b-c");
        for segment in path.split('/') {
            assert!(!segment.contains('\\'));
        }
        assert_eq!(path.split('/').count(), 3);
    }

    #[test]
    fn sanitize_segment_rejects_traversal() {
        assert_eq!(sanitize_segment(".."), "--");
        assert_eq!(sanitize_segment("."), "-");
        assert_eq!(sanitize_segment("   "), "untitled");
        assert_eq!(sanitize_segment(""), "untitled");
        assert_eq!(sanitize_segment("v1.2"), "v1.2");
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let err = BookTree::from_nodes(vec![TocNode::new("x", "X").with_parent("x")]).unwrap_err();
        match err {
            KbExportError::Cycle { uuid, chain } => {
                assert_eq!(uuid, "x");
                assert_eq!(chain, "x -> x");
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn longer_cycle_is_detected_from_a_descendant() {
        let err = BookTree::from_nodes(vec![
            TocNode::new("d", "D").with_parent("a"),
            TocNode::new("a", "A").with_parent("b").container(),
            TocNode::new("b", "B").with_parent("c").container(),
            TocNode::new("c", "C").with_parent("a").container(),
        ])
        .unwrap_err();

        match err {
            KbExportError::Cycle { chain, .. } => assert_eq!(chain, "a -> b -> c -> a"),
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn dangling_parent_is_rejected() {
        let err = BookTree::from_nodes(vec![TocNode::new("a", "A").with_parent("ghost")]).unwrap_err();
        assert!(err.to_string().contains("missing parent ghost"));
    }

    #[test]
    fn duplicate_uuid_is_rejected() {
        let err = BookTree::from_nodes(vec![TocNode::new("a", "A"), TocNode::new("a", "B")])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate node uuid a"));
    }

    #[test]
    fn document_path_for_leaf() {
        let tree = chain_tree();
        assert_eq!(tree.resolve_document_path("doc-a").as_deref(), Some("C/B/A"));
    }

    #[test]
    fn document_path_for_container_nests_inside_folder() {
        let tree = BookTree::from_nodes(vec![
            TocNode::new("g", "Guide").with_document("d0").container(),
            TocNode::new("i", "Intro").with_parent("g").with_document("d1"),
        ])
        .unwrap();

        assert_eq!(tree.resolve_document_path("d0").as_deref(), Some("Guide/Guide"));
        assert_eq!(tree.resolve_document_path("d1").as_deref(), Some("Guide/Intro"));
    }

    #[test]
    fn document_path_miss_is_none() {
        assert_eq!(chain_tree().resolve_document_path("nope"), None);
    }

    #[test]
    fn foreign_node_resolves_against_parent() {
        let tree = chain_tree();
        let extra = TocNode::new("z", "Z/1").with_parent("b");
        assert_eq!(tree.resolve_folder_path(&extra).unwrap(), "C/B/Z-1");

        let orphan = TocNode::new("o", "O").with_parent("missing");
        assert!(tree.resolve_folder_path(&orphan).is_err());
    }

    #[test]
    fn containers_and_links_are_listed() {
        let tree = BookTree::from_nodes(vec![
            TocNode::new("g", "Guide").container(),
            TocNode::new("l", "Site")
                .with_parent("g")
                .with_type(TocNodeType::Link)
                .with_url("https://example.com"),
        ])
        .unwrap();

        let containers: Vec<_> = tree.containers().map(|(_, p)| p).collect();
        assert_eq!(containers, vec!["Guide"]);

        let links: Vec<_> = tree.link_nodes().map(|(n, p)| (n.title.as_str(), p)).collect();
        assert_eq!(links, vec![("Site", "Guide/Site")]);
    }

    #[test]
    fn parse_manifest_reads_embedded_yaml() {
        let yaml = "\
- type: META
  count: 2
- type: TITLE
  title: Guide
  uuid: '1'
  parent_uuid: ''
  child_uuid: '2'
- type: DOC
  title: Intro
  uuid: '2'
  parent_uuid: '1'
  child_uuid: ''
  doc_id: d1
";
        let tree = BookTree::parse_manifest(&manifest_json(yaml), Path::new("$meta.json")).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.name(), Some("Handbook"));
        assert_eq!(tree.resolve_document_path("d1").as_deref(), Some("Guide/Intro"));
    }

    #[test]
    fn parse_manifest_with_empty_toc() {
        let tree = BookTree::parse_manifest(&manifest_json(""), Path::new("$meta.json")).unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn parse_manifest_reports_bad_json() {
        let err = BookTree::parse_manifest("{not json", Path::new("kb/$meta.json")).unwrap_err();
        assert!(matches!(err, KbExportError::ManifestParse { .. }));
        assert!(err.to_string().contains("invalid manifest JSON"));
    }

    #[test]
    fn parse_manifest_reports_missing_meta_fields() {
        let content = serde_json::json!({ "meta": "{\"book\": {}}" }).to_string();
        let err = BookTree::parse_manifest(&content, Path::new("$meta.json")).unwrap_err();
        assert!(err.to_string().contains("invalid meta payload"));
    }

    #[test]
    fn parse_manifest_maps_dangling_parent_to_manifest_error() {
        let yaml = "- type: DOC\n  title: A\n  uuid: a\n  parent_uuid: nowhere\n";
        let err = BookTree::parse_manifest(&manifest_json(yaml), Path::new("$meta.json")).unwrap_err();
        assert!(matches!(err, KbExportError::ManifestParse { .. }));
    }

    #[test]
    fn load_missing_manifest_is_manifest_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BookTree::load(&dir.path().join("$meta.json")).unwrap_err();
        assert!(matches!(err, KbExportError::ManifestParse { .. }));
    }
}

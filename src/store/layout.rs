//! Storage mapping between entities and git tree objects.
//!
//! One addressable object per entity:
//! - records at `data/<kind>/<id>.json`
//! - tree nodes at `tree/<name>/<id>.json`
//!
//! The `data/` and `tree/` roots keep the two entity namespaces disjoint.
//! Invariant: additions and unrelated deletions never collide at the
//! object level; every real merge conflict is two instances touching the
//! same path.
//!
//! Encoding is single-line JSON with struct field order and sorted tags:
//! equal entities produce identical bytes on every replica.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::{
    NodeId, ParentRef, Record, RecordId, RecordKind, Tag, TreeName, TreeNode, WallClock,
};

/// Top-level tree entry holding record groups.
pub const DATA_ROOT: &str = "data";
/// Top-level tree entry holding named trees.
pub const TREE_ROOT: &str = "tree";

const OBJECT_SUFFIX: &str = ".json";

/// Errors from decoding stored bytes.
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid field value: {0}")]
    InvalidValue(String),
}

/// Stored bytes failed to decode into the expected shape.
///
/// Reported, never auto-repaired: callers detect and quarantine bad data.
#[derive(Error, Debug)]
#[error("corrupt object at {path}: {source}")]
pub struct CorruptObject {
    pub path: String,
    #[source]
    pub source: LayoutError,
}

/// Address of one storage object inside the store tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectPath {
    /// `DATA_ROOT` or `TREE_ROOT`.
    pub root: &'static str,
    /// Record kind or tree name.
    pub group: String,
    /// `<id>.json`.
    pub file: String,
}

impl ObjectPath {
    pub fn record(kind: &RecordKind, id: &RecordId) -> Self {
        Self {
            root: DATA_ROOT,
            group: kind.as_str().to_string(),
            file: format!("{}{}", id.as_str(), OBJECT_SUFFIX),
        }
    }

    pub fn node(tree: &TreeName, id: &NodeId) -> Self {
        Self {
            root: TREE_ROOT,
            group: tree.as_str().to_string(),
            file: format!("{}{}", id.as_str(), OBJECT_SUFFIX),
        }
    }

    pub fn display(&self) -> String {
        format!("{}/{}/{}", self.root, self.group, self.file)
    }
}

/// Which entity namespace a conflicting path belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectNamespace {
    Record,
    Node,
}

/// Classify a slash-separated object path from a merge index.
pub fn classify_path(path: &str) -> Option<ObjectNamespace> {
    let mut parts = path.splitn(3, '/');
    let root = parts.next()?;
    let _group = parts.next()?;
    let file = parts.next()?;
    if !file.ends_with(OBJECT_SUFFIX) || file.contains('/') {
        return None;
    }
    match root {
        DATA_ROOT => Some(ObjectNamespace::Record),
        TREE_ROOT => Some(ObjectNamespace::Node),
        _ => None,
    }
}

// =============================================================================
// Wire format types (intermediate representation for JSON)
// =============================================================================

#[derive(Serialize, Deserialize)]
struct WireRecord {
    id: String,
    kind: String,
    tags: Vec<String>,
    content: Value,
    created_at: u64,
}

#[derive(Serialize, Deserialize)]
struct WireNode {
    id: String,
    label: String,
    /// `None` is the root sentinel.
    parent: Option<String>,
    created_at: u64,
    updated_at: u64,
}

// =============================================================================
// Encoding
// =============================================================================

pub fn encode_record(record: &Record) -> Vec<u8> {
    let wire = WireRecord {
        id: record.id.as_str().to_string(),
        kind: record.kind.as_str().to_string(),
        // BTreeSet iteration keeps tag order canonical.
        tags: record.tags.iter().map(|t| t.as_str().to_string()).collect(),
        content: record.content.clone(),
        created_at: record.created_at.as_millis(),
    };
    let mut bytes = serde_json::to_vec(&wire).expect("record serialization failed");
    bytes.push(b'\n');
    bytes
}

pub fn encode_node(node: &TreeNode) -> Vec<u8> {
    let wire = WireNode {
        id: node.id.as_str().to_string(),
        label: node.label.clone(),
        parent: node.parent.node_id().map(|p| p.as_str().to_string()),
        created_at: node.created_at.as_millis(),
        updated_at: node.updated_at.as_millis(),
    };
    let mut bytes = serde_json::to_vec(&wire).expect("node serialization failed");
    bytes.push(b'\n');
    bytes
}

// =============================================================================
// Decoding
// =============================================================================

pub fn decode_record(path: &str, bytes: &[u8]) -> Result<Record, CorruptObject> {
    let wire: WireRecord = serde_json::from_slice(bytes).map_err(|e| CorruptObject {
        path: path.to_string(),
        source: e.into(),
    })?;

    let corrupt = |reason: String| CorruptObject {
        path: path.to_string(),
        source: LayoutError::InvalidValue(reason),
    };

    let id = RecordId::parse(&wire.id).map_err(|e| corrupt(e.to_string()))?;
    let kind = RecordKind::parse(wire.kind).map_err(|e| corrupt(e.to_string()))?;
    let mut tags = BTreeSet::new();
    for raw in wire.tags {
        tags.insert(Tag::parse(raw).map_err(|e| corrupt(e.to_string()))?);
    }

    Ok(Record {
        id,
        kind,
        tags,
        content: wire.content,
        created_at: WallClock(wire.created_at),
    })
}

pub fn decode_node(path: &str, bytes: &[u8]) -> Result<TreeNode, CorruptObject> {
    let wire: WireNode = serde_json::from_slice(bytes).map_err(|e| CorruptObject {
        path: path.to_string(),
        source: e.into(),
    })?;

    let corrupt = |reason: String| CorruptObject {
        path: path.to_string(),
        source: LayoutError::InvalidValue(reason),
    };

    let id = NodeId::parse(&wire.id).map_err(|e| corrupt(e.to_string()))?;
    let parent = match wire.parent {
        None => ParentRef::Root,
        Some(raw) => ParentRef::Node(NodeId::parse(&raw).map_err(|e| corrupt(e.to_string()))?),
    };

    Ok(TreeNode {
        id,
        label: wire.label,
        parent,
        created_at: WallClock(wire.created_at),
        updated_at: WallClock(wire.updated_at),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::RecordDraft;

    #[test]
    fn record_roundtrip() {
        let draft = RecordDraft::new(
            RecordKind::parse("note").unwrap(),
            json!({"a": 1, "nested": {"b": [1, 2, 3]}}),
        )
        .with_tags([Tag::parse("foo").unwrap(), Tag::parse("bar").unwrap()]);
        let record = Record::from_draft(draft, WallClock(1234));

        let path = ObjectPath::record(&record.kind, &record.id).display();
        let bytes = encode_record(&record);
        let decoded = decode_record(&path, &bytes).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn node_roundtrip_root_and_child() {
        let root_child = TreeNode::create("top".into(), ParentRef::Root, WallClock(10));
        let child = TreeNode::create(
            "leaf".into(),
            ParentRef::Node(root_child.id.clone()),
            WallClock(11),
        );

        for node in [&root_child, &child] {
            let path = ObjectPath::node(&TreeName::parse("outline").unwrap(), &node.id).display();
            let bytes = encode_node(node);
            assert_eq!(&decode_node(&path, &bytes).unwrap(), node);
        }
    }

    #[test]
    fn encoding_is_canonical() {
        let draft = RecordDraft::new(RecordKind::parse("note").unwrap(), json!({"z": 1, "a": 2}));
        let record = Record::from_draft(draft, WallClock(5));
        assert_eq!(encode_record(&record), encode_record(&record.clone()));
    }

    #[test]
    fn corrupt_bytes_are_reported() {
        let err = decode_record("data/note/xx.json", b"not json").unwrap_err();
        assert_eq!(err.path, "data/note/xx.json");

        let bad_id = br#"{"id":"nope","kind":"note","tags":[],"content":null,"created_at":1}"#;
        assert!(decode_record("data/note/xx.json", bad_id).is_err());
    }

    #[test]
    fn classify_paths() {
        assert_eq!(
            classify_path("data/note/0123.json"),
            Some(ObjectNamespace::Record)
        );
        assert_eq!(
            classify_path("tree/outline/0123.json"),
            Some(ObjectNamespace::Node)
        );
        assert_eq!(classify_path("meta/whatever.json"), None);
        assert_eq!(classify_path("data/note"), None);
    }
}

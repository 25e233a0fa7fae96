//! Identity atoms.
//!
//! RecordId/NodeId: collision-resistant object identifiers (uuid v4 hex).
//! RecordKind/TreeName: storage grouping names, constrained to stay
//! path-safe inside the object layout.
//! Tag: free-form classification on records.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{CoreError, InvalidId};

const ID_LEN: usize = 32;

fn is_hex_id(s: &str) -> bool {
    s.len() == ID_LEN && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Grouping names become directory names in the object layout, so the
/// alphabet is restricted to characters that are safe in a git tree path.
fn check_path_safe(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("empty".into());
    }
    if s.starts_with('.') {
        return Err("must not start with '.'".into());
    }
    for c in s.chars() {
        if !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.') {
            return Err(format!("contains disallowed character {c:?}"));
        }
    }
    Ok(())
}

/// Record identifier - 32 lowercase hex characters (uuid v4, no hyphens).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a fresh collision-resistant id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if is_hex_id(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidId::Record {
                raw: s.to_string(),
                reason: "expected 32 lowercase hex characters".into(),
            }
            .into())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tree node identifier - same shape as RecordId, separate namespace.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if is_hex_id(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidId::Node {
                raw: s.to_string(),
                reason: "expected 32 lowercase hex characters".into(),
            }
            .into())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Record classification - immutable after creation, keys the storage
/// group the record lives under.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKind(String);

impl RecordKind {
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        check_path_safe(&s).map_err(|reason| InvalidId::Kind { raw: s.clone(), reason })?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a stored tree.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeName(String);

impl TreeName {
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        check_path_safe(&s).map_err(|reason| InvalidId::Tree { raw: s.clone(), reason })?;
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TreeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record tag - non-empty, no whitespace or path separators.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() {
            return Err(InvalidId::Tag {
                raw: s,
                reason: "empty".into(),
            }
            .into());
        }
        if s.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(InvalidId::Tag {
                raw: s,
                reason: "contains whitespace or '/'".into(),
            }
            .into());
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner reference of a tree node: the root sentinel or another node.
///
/// Set at creation, never changed - nodes are not re-parented.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParentRef {
    Root,
    Node(NodeId),
}

impl ParentRef {
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            ParentRef::Root => None,
            ParentRef::Node(id) => Some(id),
        }
    }
}

impl From<NodeId> for ParentRef {
    fn from(id: NodeId) -> Self {
        ParentRef::Node(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_parse() {
        let id = RecordId::generate();
        assert_eq!(id.as_str().len(), 32);
        assert_eq!(RecordId::parse(id.as_str()).unwrap(), id);

        let nid = NodeId::generate();
        assert_eq!(NodeId::parse(nid.as_str()).unwrap(), nid);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(RecordId::parse("short").is_err());
        assert!(RecordId::parse("ZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZZ").is_err());
        assert!(NodeId::parse("").is_err());
    }

    #[test]
    fn kind_is_path_safe() {
        assert!(RecordKind::parse("note").is_ok());
        assert!(RecordKind::parse("build-log_v2.1").is_ok());
        assert!(RecordKind::parse("").is_err());
        assert!(RecordKind::parse("a/b").is_err());
        assert!(RecordKind::parse(".hidden").is_err());
    }

    #[test]
    fn tag_rejects_whitespace() {
        assert!(Tag::parse("foo").is_ok());
        assert!(Tag::parse("foo bar").is_err());
        assert!(Tag::parse("a/b").is_err());
    }
}

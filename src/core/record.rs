//! The Record - an immutable flat snapshot.
//!
//! Identity (`id`), classification (`kind`) and `created_at` are fixed at
//! creation. There is no in-place edit: `alter` replaces the whole record
//! under a fresh id and deletes the old object. Records are never merged
//! at the field level.

use std::collections::BTreeSet;

use serde_json::Value;

use super::identity::{RecordId, RecordKind, Tag};
use super::time::WallClock;

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub kind: RecordKind,
    /// Sorted so the encoded form is canonical.
    pub tags: BTreeSet<Tag>,
    /// Opaque structured payload - the engine never inspects it.
    pub content: Value,
    pub created_at: WallClock,
}

impl Record {
    /// Materialize a draft into a record with a fresh identity.
    pub(crate) fn from_draft(draft: RecordDraft, created_at: WallClock) -> Self {
        Self {
            id: RecordId::generate(),
            kind: draft.kind,
            tags: draft.tags,
            content: draft.content,
            created_at,
        }
    }

    pub fn has_tags(&self, wanted: &BTreeSet<Tag>) -> bool {
        wanted.iter().all(|t| self.tags.contains(t))
    }
}

/// Caller-supplied shape of a record before the engine assigns identity.
#[derive(Clone, Debug)]
pub struct RecordDraft {
    pub kind: RecordKind,
    pub tags: BTreeSet<Tag>,
    pub content: Value,
}

impl RecordDraft {
    pub fn new(kind: RecordKind, content: Value) -> Self {
        Self {
            kind,
            tags: BTreeSet::new(),
            content,
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }
}

impl From<&Record> for RecordDraft {
    /// Prefill for `alter` closures: same kind/tags/content, identity and
    /// timestamps stripped.
    fn from(record: &Record) -> Self {
        Self {
            kind: record.kind.clone(),
            tags: record.tags.clone(),
            content: record.content.clone(),
        }
    }
}

/// Filter for `each`: both dimensions optional, tags match as a superset.
#[derive(Clone, Debug, Default)]
pub struct RecordFilter {
    pub kind: Option<RecordKind>,
    pub tags: BTreeSet<Tag>,
}

impl RecordFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn kind(kind: RecordKind) -> Self {
        Self {
            kind: Some(kind),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        if let Some(ref kind) = self.kind {
            if record.kind != *kind {
                return false;
            }
        }
        record.has_tags(&self.tags)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(kind: &str, tags: &[&str]) -> Record {
        Record {
            id: RecordId::generate(),
            kind: RecordKind::parse(kind).unwrap(),
            tags: tags.iter().map(|t| Tag::parse(*t).unwrap()).collect(),
            content: json!({"a": 1}),
            created_at: WallClock(1),
        }
    }

    #[test]
    fn filter_matches_kind_and_tag_superset() {
        let r = record("note", &["foo", "bar"]);

        assert!(RecordFilter::any().matches(&r));
        assert!(RecordFilter::kind(RecordKind::parse("note").unwrap()).matches(&r));
        assert!(!RecordFilter::kind(RecordKind::parse("task").unwrap()).matches(&r));

        let by_tag = RecordFilter::any().with_tags([Tag::parse("foo").unwrap()]);
        assert!(by_tag.matches(&r));

        let missing = RecordFilter::any().with_tags([Tag::parse("baz").unwrap()]);
        assert!(!missing.matches(&r));
    }

    #[test]
    fn draft_prefill_drops_identity() {
        let r = record("note", &["foo"]);
        let draft = RecordDraft::from(&r);
        let again = Record::from_draft(draft, WallClock(2));
        assert_ne!(again.id, r.id);
        assert_eq!(again.kind, r.kind);
        assert_eq!(again.tags, r.tags);
        assert_eq!(again.content, r.content);
    }
}

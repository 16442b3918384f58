//! Entry row shapes: the persisted entry, the caller-facing draft, and the
//! partial-update patch.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single content entry in the tree.
///
/// Mirrors the persisted row set: `ordinal` is the primary key, `parent`
/// references another entry's ordinal (None for roots), `ancestor` marks
/// whether any entry currently references this one as parent. `ordinal` and
/// `parent` change only through tree operations, never by direct field edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub ordinal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Maintained by the store: true iff this entry has at least one child.
    /// Serialized as 0/1 to match the persisted numeric column.
    #[serde(
        default,
        serialize_with = "ser_flag",
        deserialize_with = "de_flag"
    )]
    pub ancestor: bool,
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u32>,
    pub content: String,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.slug, self.ordinal)
    }
}

fn ser_flag<S: serde::Serializer>(flag: &bool, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u32(u32::from(*flag))
}

fn de_flag<'de, D: serde::Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let n = u32::deserialize(d)?;
    Ok(n != 0)
}

/// Caller-supplied shape for inserting a new entry.
///
/// The engine mints the ordinal, derives `parent` from the insertion point,
/// and initializes the ancestor flag; none of those are draftable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDraft {
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u32>,
    #[serde(default)]
    pub content: String,
}

impl EntryDraft {
    pub fn new(slug: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            title: title.into(),
            difficulty: None,
            content: String::new(),
        }
    }

    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub(crate) fn into_entry(self, ordinal: String, parent: Option<&str>) -> Entry {
        Entry {
            ordinal,
            parent: parent.map(str::to_string),
            ancestor: false,
            slug: self.slug,
            title: self.title,
            difficulty: self.difficulty,
            content: self.content,
        }
    }
}

/// Partial update for the mutable payload fields.
///
/// `ordinal`, `parent`, and `slug` are structural and cannot be patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPatch {
    pub title: Option<String>,
    pub difficulty: Option<Option<u32>>,
    pub content: Option<String>,
}

impl FieldPatch {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn difficulty(mut self, difficulty: Option<u32>) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.difficulty.is_none() && self.content.is_none()
    }
}

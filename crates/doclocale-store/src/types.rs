use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Canonical identity shared by every locale and mode copy of one logical document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Generates a fresh canonical identity.
    pub fn generate() -> Self {
        DocId(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        DocId(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one physical record, distinct for every (locale, mode) copy.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(String);

impl StorageId {
    /// Generates a fresh storage identity.
    pub fn generate() -> Self {
        StorageId(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        StorageId(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Document mode: the working copy or the externally visible copy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Mutable working copy.
    Draft,
    /// Copy produced by publishing a draft.
    Published,
}

impl Mode {
    /// Both modes, draft first.
    pub const ALL: [Mode; 2] = [Mode::Draft, Mode::Published];

    /// Lowercase name used in index keys and output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Draft => "draft",
            Mode::Published => "published",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Mode::Draft),
            "published" => Ok(Mode::Published),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

/// One stored record: a single (aposDocId, locale, mode) copy of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Storage identity of this copy.
    #[serde(rename = "_id")]
    pub id: StorageId,
    /// Canonical identity shared with sibling copies.
    pub apos_doc_id: DocId,
    /// Locale code this copy belongs to.
    pub locale: String,
    /// Draft or published.
    pub mode: Mode,
    /// Document type name, e.g. `@apostrophecms/home-page`.
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Human readable title.
    pub title: String,
    /// Path-like slug for page types, plain slug for others.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    /// Stable semantic key of parked singletons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parked_id: Option<String>,
    /// Page tree path built from canonical ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Page tree depth, 0 for the home page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    /// Position among siblings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    /// Free-form content fields.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// When this record was inserted.
    pub created_at: DateTime<Utc>,
    /// When this record was last written.
    pub updated_at: DateTime<Utc>,
    /// When the content of this copy was last published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_published_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Creates a brand new logical document with a fresh canonical identity.
    pub fn new(locale: &str, mode: Mode, doc_type: &str, title: &str) -> Self {
        Self::with_doc_id(DocId::generate(), locale, mode, doc_type, title)
    }

    /// Creates a record for an existing canonical identity.
    pub fn with_doc_id(
        apos_doc_id: DocId,
        locale: &str,
        mode: Mode,
        doc_type: &str,
        title: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: StorageId::generate(),
            apos_doc_id,
            locale: locale.to_string(),
            mode,
            doc_type: doc_type.to_string(),
            title: title.to_string(),
            slug: None,
            parked_id: None,
            path: None,
            level: None,
            rank: None,
            fields: Map::new(),
            created_at: now,
            updated_at: now,
            last_published_at: None,
        }
    }

    /// Clones the content of this record into a sibling copy for another
    /// locale and mode. The copy gets a fresh storage id and fresh timestamps
    /// but keeps `apos_doc_id`.
    pub fn copy_for(&self, locale: &str, mode: Mode) -> Self {
        let now = Utc::now();
        Self {
            id: StorageId::generate(),
            apos_doc_id: self.apos_doc_id.clone(),
            locale: locale.to_string(),
            mode,
            doc_type: self.doc_type.clone(),
            title: self.title.clone(),
            slug: self.slug.clone(),
            parked_id: self.parked_id.clone(),
            path: self.path.clone(),
            level: self.level,
            rank: self.rank,
            fields: self.fields.clone(),
            created_at: now,
            updated_at: now,
            last_published_at: None,
        }
    }

    /// True when the content fields of both records match, ignoring identity,
    /// placement and timestamps.
    pub fn same_content(&self, other: &Document) -> bool {
        self.doc_type == other.doc_type
            && self.title == other.title
            && self.slug == other.slug
            && self.parked_id == other.parked_id
            && self.path == other.path
            && self.level == other.level
            && self.rank == other.rank
            && self.fields == other.fields
    }

    /// True for page-like documents, whose slugs are paths.
    pub fn is_page(&self) -> bool {
        self.slug.as_deref().is_some_and(|s| s.starts_with('/'))
    }
}

/// Equality filter over the indexed document fields. Unset fields match anything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocFilter {
    /// Match on canonical identity.
    pub apos_doc_id: Option<DocId>,
    /// Match on locale code.
    pub locale: Option<String>,
    /// Match on mode.
    pub mode: Option<Mode>,
    /// Match on parked id.
    pub parked_id: Option<String>,
    /// Match on document type.
    pub doc_type: Option<String>,
    /// Match on slug.
    pub slug: Option<String>,
}

impl DocFilter {
    /// An empty filter matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one canonical identity.
    pub fn apos_doc_id(mut self, id: &DocId) -> Self {
        self.apos_doc_id = Some(id.clone());
        self
    }

    /// Restricts to one locale.
    pub fn locale(mut self, locale: &str) -> Self {
        self.locale = Some(locale.to_string());
        self
    }

    /// Restricts to one mode.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Restricts to one parked id.
    pub fn parked_id(mut self, parked_id: &str) -> Self {
        self.parked_id = Some(parked_id.to_string());
        self
    }

    /// Restricts to one document type.
    pub fn doc_type(mut self, doc_type: &str) -> Self {
        self.doc_type = Some(doc_type.to_string());
        self
    }

    /// Restricts to one slug.
    pub fn slug(mut self, slug: &str) -> Self {
        self.slug = Some(slug.to_string());
        self
    }

    /// Returns true if the document satisfies every set field.
    pub fn matches(&self, doc: &Document) -> bool {
        self.apos_doc_id.as_ref().map_or(true, |v| *v == doc.apos_doc_id)
            && self.locale.as_ref().map_or(true, |v| *v == doc.locale)
            && self.mode.map_or(true, |v| v == doc.mode)
            && self
                .parked_id
                .as_ref()
                .map_or(true, |v| doc.parked_id.as_ref() == Some(v))
            && self.doc_type.as_ref().map_or(true, |v| *v == doc.doc_type)
            && self
                .slug
                .as_ref()
                .map_or(true, |v| doc.slug.as_ref() == Some(v))
    }
}

/// Partial update applied by `DocumentStore::update`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocPatch {
    /// New title.
    pub title: Option<String>,
    /// New slug.
    pub slug: Option<String>,
    /// New document type.
    pub doc_type: Option<String>,
    /// Replaces all content fields.
    pub fields: Option<Map<String, Value>>,
    /// Merged into content fields after any replacement.
    pub merge_fields: Map<String, Value>,
    /// Publish timestamp to record.
    pub last_published_at: Option<DateTime<Utc>>,
}

impl DocPatch {
    /// Patch that makes a record's content identical to `source`.
    pub fn content_of(source: &Document) -> Self {
        Self {
            title: Some(source.title.clone()),
            slug: source.slug.clone(),
            doc_type: Some(source.doc_type.clone()),
            fields: Some(source.fields.clone()),
            ..Self::default()
        }
    }

    /// Applies the patch in place and bumps `updated_at`.
    pub fn apply(&self, doc: &mut Document) {
        if let Some(title) = &self.title {
            doc.title = title.clone();
        }
        if let Some(slug) = &self.slug {
            doc.slug = Some(slug.clone());
        }
        if let Some(doc_type) = &self.doc_type {
            doc.doc_type = doc_type.clone();
        }
        if let Some(fields) = &self.fields {
            doc.fields = fields.clone();
        }
        for (k, v) in &self.merge_fields {
            doc.fields.insert(k.clone(), v.clone());
        }
        if let Some(at) = self.last_published_at {
            doc.last_published_at = Some(at);
        }
        doc.updated_at = Utc::now();
    }
}

/// Unique indexes enforced by the document store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UniqueIndex {
    /// (aposDocId, locale, mode)
    Identity,
    /// (parkedId, locale, mode)
    Parked,
    /// (slug, locale, mode)
    Slug,
}

impl fmt::Display for UniqueIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UniqueIndex::Identity => "aposDocId/locale/mode",
            UniqueIndex::Parked => "parkedId/locale/mode",
            UniqueIndex::Slug => "slug/locale/mode",
        })
    }
}

/// Errors from the document store and its KV backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique index already holds the key the write would take.
    #[error("duplicate key on {index} for {value} in {locale}:{mode}")]
    DuplicateKey {
        /// Index that rejected the write.
        index: UniqueIndex,
        /// Indexed value (aposDocId, parkedId or slug).
        value: String,
        /// Locale of the rejected record.
        locale: String,
        /// Mode of the rejected record.
        mode: Mode,
    },

    /// No record with this storage id.
    #[error("document {0} not found")]
    NotFound(StorageId),

    /// The record kept changing underneath a read-modify-write.
    #[error("document {0} was modified concurrently")]
    Contended(StorageId),

    /// Another store instance holds the directory.
    #[error("store directory {} is locked by another instance", .0.display())]
    Locked(std::path::PathBuf),

    /// An error occurred in the KV store layer.
    #[error("kv store error: {0}")]
    KvError(String),

    /// A stored record could not be encoded or decoded.
    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A lower-level I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl StoreError {
    /// True for unique-index rejections.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

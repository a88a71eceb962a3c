//! Read-time URL derivation.
//!
//! `_url` is never stored. It is computed from the locale's current prefix and
//! the stored slug every time a document is read, so changing a prefix in
//! configuration needs no migration.

use doclocale_store::Document;
use serde::Serialize;

use crate::locale::LocaleSet;

/// Joins a locale prefix and a page slug. Returns None for slugs that are not
/// paths (non-page documents have no URL).
pub fn derive_url(prefix: &str, slug: &str) -> Option<String> {
    if !slug.starts_with('/') {
        return None;
    }
    Some(format!("{}{}", prefix, slug))
}

/// A document as returned to readers, with its derived `_url`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocView {
    /// The stored record.
    #[serde(flatten)]
    pub doc: Document,
    /// Derived public URL, for pages only.
    #[serde(rename = "_url", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl DocView {
    /// Attaches the derived URL using the document's own locale. Records of
    /// a locale that is no longer configured have no URL.
    pub fn new(doc: Document, locales: &LocaleSet) -> Self {
        let url = match (locales.get(&doc.locale), doc.slug.as_deref()) {
            (Some(locale), Some(slug)) => derive_url(&locale.prefix, slug),
            _ => None,
        };
        Self { doc, url }
    }
}

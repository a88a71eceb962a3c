//! Locale-scoped reads and publish-gated public lookup.

use doclocale_store::{DocFilter, DocumentStore, Mode};
use tracing::debug;

use crate::error::DocError;
use crate::locale::LocaleSet;
use crate::url::DocView;

/// Read side of the document workflow. Every result carries its `_url`.
#[derive(Clone)]
pub struct Lookup {
    store: DocumentStore,
}

impl Lookup {
    /// Creates a lookup over the given store.
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    /// Documents of one locale and mode that also match `filter`. The
    /// filter's own locale and mode, if any, are overridden.
    pub fn find(
        &self,
        locales: &LocaleSet,
        locale: &str,
        mode: Mode,
        filter: DocFilter,
    ) -> Result<Vec<DocView>, DocError> {
        locales.require(locale)?;
        Ok(self
            .store
            .find(&filter.locale(locale).mode(mode))?
            .into_iter()
            .map(|doc| DocView::new(doc, locales))
            .collect())
    }

    /// First match of `find`.
    pub fn find_one(
        &self,
        locales: &LocaleSet,
        locale: &str,
        mode: Mode,
        filter: DocFilter,
    ) -> Result<Option<DocView>, DocError> {
        Ok(self.find(locales, locale, mode, filter)?.into_iter().next())
    }

    /// Resolves a public URL to published content. Drafts are never returned:
    /// a page that exists only as a draft is `NotPublished`.
    pub fn public_get(&self, locales: &LocaleSet, url: &str) -> Result<DocView, DocError> {
        let not_published = || DocError::NotPublished {
            url: url.to_string(),
        };
        let Some((locale, slug)) = locales.resolve_url(url) else {
            return Err(not_published());
        };
        debug!(url, locale = %locale.code, %slug, "public lookup");

        let filter = DocFilter::new().slug(&slug);
        let code = locale.code.clone();
        self.find_one(locales, &code, Mode::Published, filter)?
            .filter(|view| view.url.is_some())
            .ok_or_else(not_published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::LocaleConfig;
    use crate::workflow::{SourceRef, Workflow};
    use doclocale_store::Document;

    fn locales() -> LocaleSet {
        LocaleSet::register(
            &[LocaleConfig::new("en", None), LocaleConfig::new("en-CA", Some("/ca/en"))],
            None,
        )
        .unwrap()
    }

    fn draft(store: &DocumentStore, locale: &str, slug: &str) -> Document {
        let mut doc = Document::new(locale, Mode::Draft, "default-page", "Child Page");
        doc.slug = Some(slug.into());
        store.insert(doc).unwrap()
    }

    #[test]
    fn test_find_attaches_url() {
        let store = DocumentStore::in_memory();
        draft(&store, "en-CA", "/child-page");
        let lookup = Lookup::new(store);

        let views = lookup
            .find(&locales(), "en-CA", Mode::Draft, DocFilter::new())
            .unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].url.as_deref(), Some("/ca/en/child-page"));

        assert!(lookup
            .find(&locales(), "en", Mode::Draft, DocFilter::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_find_overrides_filter_locale() {
        let store = DocumentStore::in_memory();
        draft(&store, "en", "/child-page");
        let lookup = Lookup::new(store);
        let views = lookup
            .find(&locales(), "en-CA", Mode::Draft, DocFilter::new().locale("en"))
            .unwrap();
        assert!(views.is_empty());
    }

    #[test]
    fn test_find_unknown_locale() {
        let lookup = Lookup::new(DocumentStore::in_memory());
        let err = lookup
            .find(&locales(), "de", Mode::Draft, DocFilter::new())
            .unwrap_err();
        assert!(matches!(err, DocError::UnknownLocale { .. }));
    }

    #[test]
    fn test_public_get_is_publish_gated() {
        let store = DocumentStore::in_memory();
        let page = draft(&store, "en-CA", "/child-page");
        let lookup = Lookup::new(store.clone());

        let err = lookup.public_get(&locales(), "/ca/en/child-page").unwrap_err();
        assert!(matches!(err, DocError::NotPublished { .. }));
        assert_eq!(err.http_status(), 404);

        Workflow::new(store)
            .publish(&SourceRef::Storage(page.id))
            .unwrap();
        let view = lookup.public_get(&locales(), "/ca/en/child-page").unwrap();
        assert_eq!(view.doc.title, "Child Page");
        assert_eq!(view.doc.mode, Mode::Published);
        assert_eq!(view.url.as_deref(), Some("/ca/en/child-page"));
    }

    #[test]
    fn test_public_get_wrong_locale_prefix() {
        let store = DocumentStore::in_memory();
        let page = draft(&store, "en-CA", "/child-page");
        Workflow::new(store.clone())
            .publish(&SourceRef::Storage(page.id))
            .unwrap();

        let err = Lookup::new(store)
            .public_get(&locales(), "/child-page")
            .unwrap_err();
        assert!(matches!(err, DocError::NotPublished { .. }));
    }

    #[test]
    fn test_public_get_ignores_non_page_slugs() {
        let store = DocumentStore::in_memory();
        let mut global = Document::new("en", Mode::Published, "@apostrophecms/global", "Global");
        global.slug = Some("global".into());
        store.insert(global).unwrap();

        let err = Lookup::new(store).public_get(&locales(), "global").unwrap_err();
        assert!(matches!(err, DocError::NotPublished { .. }));
    }
}

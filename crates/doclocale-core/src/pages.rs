//! Page insertion and draft editing.
//!
//! New pages are created as a single draft in one locale. Other locales get
//! their copy through `localize`, and visitors only see it after `publish`.

use doclocale_store::{DocFilter, DocPatch, Document, DocumentStore, Mode, StorageId};
use tracing::info;

use crate::error::DocError;
use crate::locale::LocaleSet;
use crate::parking::HOME;

/// Where a new page goes in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    /// The parked home page of the target locale.
    Home,
    /// Any copy of the parent page; its draft in the target locale is used.
    Doc(StorageId),
}

/// Lowercases a title and joins its alphanumeric runs with `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for word in title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.extend(word.chars().flat_map(char::to_lowercase));
    }
    slug
}

fn child_slug(parent: &str, own: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, own)
    } else {
        format!("{}/{}", parent, own)
    }
}

/// Creates pages and edits drafts.
#[derive(Clone)]
pub struct PageManager {
    store: DocumentStore,
}

impl PageManager {
    /// Creates a page manager over the given store.
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    fn resolve_parent(&self, locale: &str, parent: &ParentRef) -> Result<Document, DocError> {
        match parent {
            ParentRef::Home => {
                let filter = DocFilter::new().parked_id(HOME).locale(locale).mode(Mode::Draft);
                self.store.find_one(&filter)?.ok_or_else(|| DocError::NotFound {
                    what: format!("home page in {}", locale),
                })
            }
            ParentRef::Doc(id) => {
                let any = self.store.get(id)?;
                self.store
                    .find_triple(&any.apos_doc_id, locale, Mode::Draft)?
                    .ok_or_else(|| DocError::NotFound {
                        what: format!("draft of {} in {}", any.apos_doc_id, locale),
                    })
            }
        }
    }

    /// Inserts a new page as the last child of `parent`, as one draft record
    /// in `locale` with a fresh canonical id.
    ///
    /// The slug is the parent's slug followed by the slugified title. A slug
    /// already taken in the locale's drafts fails with `DuplicateKey`.
    pub fn insert_page(
        &self,
        locales: &LocaleSet,
        locale: &str,
        parent: &ParentRef,
        title: &str,
        doc_type: &str,
    ) -> Result<Document, DocError> {
        locales.require(locale)?;
        let own = slugify(title);
        if own.is_empty() {
            return Err(DocError::InvalidTitle {
                title: title.to_string(),
            });
        }
        let parent = self.resolve_parent(locale, parent)?;
        let (Some(parent_slug), Some(parent_path)) = (&parent.slug, &parent.path) else {
            return Err(DocError::NotFound {
                what: format!("page tree position of {}", parent.apos_doc_id),
            });
        };
        let level = parent.level.unwrap_or(0) + 1;

        let siblings = self
            .store
            .find(&DocFilter::new().locale(locale).mode(Mode::Draft))?
            .into_iter()
            .filter(|d| {
                d.level == Some(level)
                    && d.path
                        .as_deref()
                        .and_then(|p| p.strip_prefix(parent_path.as_str()))
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .count();

        let mut page = Document::new(locale, Mode::Draft, doc_type, title);
        page.slug = Some(child_slug(parent_slug, &own));
        page.path = Some(format!("{}/{}", parent_path, page.apos_doc_id));
        page.level = Some(level);
        page.rank = Some(siblings as u32);

        let page = self.store.insert(page)?;
        info!(
            apos_doc_id = %page.apos_doc_id,
            locale = %page.locale,
            slug = page.slug.as_deref().unwrap_or_default(),
            "inserted page"
        );
        Ok(page)
    }

    /// Edits a draft. Published records change only through publish.
    pub fn update_draft(&self, id: &StorageId, patch: &DocPatch) -> Result<Document, DocError> {
        let current = self.store.get(id)?;
        if current.mode != Mode::Draft {
            return Err(DocError::NotDraft { id: id.clone() });
        }
        // publish timestamps are owned by publish
        let patch = DocPatch {
            last_published_at: None,
            ..patch.clone()
        };
        Ok(self.store.update(id, &patch)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::LocaleConfig;
    use crate::parking::{default_templates, ParkingManager, StartupContext};
    use crate::replication::ReplicationEngine;

    fn setup() -> (PageManager, LocaleSet, DocumentStore) {
        let store = DocumentStore::in_memory();
        let locales = LocaleSet::register(
            &[LocaleConfig::new("en", None), LocaleConfig::new("en-CA", Some("/ca/en"))],
            None,
        )
        .unwrap();
        ParkingManager::new(ReplicationEngine::new(store.clone()))
            .ensure_parked(&mut StartupContext::new(), &default_templates(), &locales)
            .unwrap();
        (PageManager::new(store.clone()), locales, store)
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Child Page"), "child-page");
        assert_eq!(slugify("  Child   Page!! 2 "), "child-page-2");
        assert_eq!(slugify("Crème Brûlée"), "crème-brûlée");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn test_insert_page_under_home() {
        let (pages, locales, store) = setup();
        let page = pages
            .insert_page(&locales, "en", &ParentRef::Home, "Child Page", "default-page")
            .unwrap();

        assert_eq!(page.slug.as_deref(), Some("/child-page"));
        assert_eq!(page.level, Some(1));
        assert_eq!(page.mode, Mode::Draft);
        assert_eq!(
            store
                .count(&DocFilter::new().apos_doc_id(&page.apos_doc_id))
                .unwrap(),
            1
        );

        let home = store
            .find_one(&DocFilter::new().parked_id("home").locale("en").mode(Mode::Draft))
            .unwrap()
            .unwrap();
        assert_eq!(
            page.path,
            Some(format!("{}/{}", home.apos_doc_id, page.apos_doc_id))
        );
    }

    #[test]
    fn test_rank_counts_existing_children() {
        let (pages, locales, _) = setup();
        // the parked archive page is already a child of home
        let first = pages
            .insert_page(&locales, "en", &ParentRef::Home, "First", "default-page")
            .unwrap();
        let second = pages
            .insert_page(&locales, "en", &ParentRef::Home, "Second", "default-page")
            .unwrap();
        assert_eq!(first.rank, Some(1));
        assert_eq!(second.rank, Some(2));
    }

    #[test]
    fn test_nested_page_slug() {
        let (pages, locales, _) = setup();
        let parent = pages
            .insert_page(&locales, "en", &ParentRef::Home, "About", "default-page")
            .unwrap();
        let child = pages
            .insert_page(&locales, "en", &ParentRef::Doc(parent.id.clone()), "Our Team", "default-page")
            .unwrap();
        assert_eq!(child.slug.as_deref(), Some("/about/our-team"));
        assert_eq!(child.level, Some(2));
        assert_eq!(child.rank, Some(0));
    }

    #[test]
    fn test_parent_missing_in_target_locale() {
        let (pages, locales, _) = setup();
        let parent = pages
            .insert_page(&locales, "en", &ParentRef::Home, "About", "default-page")
            .unwrap();
        let err = pages
            .insert_page(&locales, "en-CA", &ParentRef::Doc(parent.id), "Team", "default-page")
            .unwrap_err();
        assert!(matches!(err, DocError::NotFound { .. }));
    }

    #[test]
    fn test_insert_page_unknown_locale() {
        let (pages, locales, _) = setup();
        let err = pages
            .insert_page(&locales, "de", &ParentRef::Home, "Seite", "default-page")
            .unwrap_err();
        assert!(matches!(err, DocError::UnknownLocale { .. }));
    }

    #[test]
    fn test_duplicate_slug_rejected() {
        let (pages, locales, _) = setup();
        pages
            .insert_page(&locales, "en", &ParentRef::Home, "Child Page", "default-page")
            .unwrap();
        let err = pages
            .insert_page(&locales, "en", &ParentRef::Home, "Child  Page", "default-page")
            .unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn test_title_without_slug_characters_rejected() {
        let (pages, locales, store) = setup();
        let before = store.count(&DocFilter::new()).unwrap();
        let err = pages
            .insert_page(&locales, "en", &ParentRef::Home, "???", "default-page")
            .unwrap_err();
        assert!(matches!(err, DocError::InvalidTitle { ref title } if title == "???"));
        assert_eq!(err.http_status(), 400);
        assert_eq!(store.count(&DocFilter::new()).unwrap(), before);
    }

    #[test]
    fn test_update_draft() {
        let (pages, locales, _) = setup();
        let page = pages
            .insert_page(&locales, "en", &ParentRef::Home, "Child Page", "default-page")
            .unwrap();
        let patch = DocPatch {
            title: Some("Renamed".into()),
            ..DocPatch::default()
        };
        let updated = pages.update_draft(&page.id, &patch).unwrap();
        assert_eq!(updated.title, "Renamed");
        assert!(updated.updated_at >= page.updated_at);
    }

    #[test]
    fn test_update_published_rejected() {
        let (pages, _, store) = setup();
        let published = store
            .find_one(&DocFilter::new().parked_id("home").locale("en").mode(Mode::Published))
            .unwrap()
            .unwrap();
        let err = pages
            .update_draft(&published.id, &DocPatch::default())
            .unwrap_err();
        assert!(matches!(err, DocError::NotDraft { id } if id == published.id));
    }
}

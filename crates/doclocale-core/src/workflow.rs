//! Localize and publish.
//!
//! Both operations write through the same unique indexes as replication but
//! interpret a duplicate key differently: localize reports it to the caller as
//! `AlreadyLocalized`, publish treats it as a lost upsert race and retries as
//! an update.

use chrono::Utc;
use doclocale_store::{DocId, DocPatch, Document, DocumentStore, Mode, StorageId, UniqueIndex};
use tracing::{debug, info};

use crate::error::DocError;
use crate::locale::LocaleSet;

/// How a localize or publish caller names the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// One physical record.
    Storage(StorageId),
    /// The draft of a document in a locale.
    Canonical {
        /// Canonical identity.
        apos_doc_id: DocId,
        /// Locale of the draft.
        locale: String,
    },
}

/// Runs the localize and publish transitions.
#[derive(Clone)]
pub struct Workflow {
    store: DocumentStore,
}

impl Workflow {
    /// Creates a workflow over the given store.
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    fn load(&self, source: &SourceRef) -> Result<Document, DocError> {
        match source {
            SourceRef::Storage(id) => Ok(self.store.get(id)?),
            SourceRef::Canonical {
                apos_doc_id,
                locale,
            } => self
                .store
                .find_triple(apos_doc_id, locale, Mode::Draft)?
                .ok_or_else(|| DocError::NotFound {
                    what: format!("draft of {} in {}", apos_doc_id, locale),
                }),
        }
    }

    /// Creates the draft of `source` in `target`, with the source's current
    /// content and the same canonical id.
    ///
    /// Fails with `UnknownLocale` if `target` is not configured and with
    /// `AlreadyLocalized` if the target draft exists, including when another
    /// worker inserts it first. A slug already used by a different document in
    /// the target locale fails with `DuplicateKey`.
    pub fn localize(
        &self,
        locales: &LocaleSet,
        source: &SourceRef,
        target: &str,
    ) -> Result<Document, DocError> {
        locales.require(target)?;
        let source = self.load(source)?;

        let already = || DocError::AlreadyLocalized {
            apos_doc_id: source.apos_doc_id.to_string(),
            locale: target.to_string(),
        };
        if self
            .store
            .find_triple(&source.apos_doc_id, target, Mode::Draft)?
            .is_some()
        {
            return Err(already());
        }

        let draft = source.copy_for(target, Mode::Draft);
        match self.store.insert(draft) {
            Ok(draft) => {
                info!(
                    apos_doc_id = %draft.apos_doc_id,
                    from = %source.locale,
                    to = %draft.locale,
                    "localized document"
                );
                Ok(draft)
            }
            Err(err) => {
                let err = DocError::from(err);
                match err {
                    DocError::DuplicateKey {
                        index: UniqueIndex::Identity,
                        ..
                    } => Err(already()),
                    other => Err(other),
                }
            }
        }
    }

    /// Copies a draft's current content to the published record of the same
    /// locale, creating it if needed, and stamps `last_published_at` on both.
    ///
    /// Accepts either copy as `source`; a published record is republished
    /// from its draft. Fails with `NotFound` if the draft does not exist.
    pub fn publish(&self, source: &SourceRef) -> Result<Document, DocError> {
        let found = self.load(source)?;
        let draft = match found.mode {
            Mode::Draft => found,
            Mode::Published => self
                .store
                .find_triple(&found.apos_doc_id, &found.locale, Mode::Draft)?
                .ok_or_else(|| DocError::NotFound {
                    what: format!("draft of {} in {}", found.apos_doc_id, found.locale),
                })?,
        };

        let now = Utc::now();
        let patch = DocPatch {
            last_published_at: Some(now),
            ..DocPatch::content_of(&draft)
        };
        let published = self.upsert_published(&draft, &patch)?;

        self.store.update(
            &draft.id,
            &DocPatch {
                last_published_at: Some(now),
                ..DocPatch::default()
            },
        )?;

        info!(
            apos_doc_id = %published.apos_doc_id,
            locale = %published.locale,
            "published document"
        );
        Ok(published)
    }

    fn upsert_published(&self, draft: &Document, patch: &DocPatch) -> Result<Document, DocError> {
        let existing = self
            .store
            .find_triple(&draft.apos_doc_id, &draft.locale, Mode::Published)?;
        if let Some(existing) = existing {
            return Ok(self.store.update(&existing.id, patch)?);
        }

        let mut fresh = draft.copy_for(&draft.locale, Mode::Published);
        fresh.last_published_at = patch.last_published_at;
        match self.store.insert(fresh) {
            Ok(doc) => Ok(doc),
            Err(err) if err.is_duplicate_key() => {
                // another publisher created it; overwrite with our content
                let Some(existing) = self
                    .store
                    .find_triple(&draft.apos_doc_id, &draft.locale, Mode::Published)?
                else {
                    return Err(err.into());
                };
                debug!(
                    apos_doc_id = %draft.apos_doc_id,
                    locale = %draft.locale,
                    "published copy created concurrently, updating"
                );
                Ok(self.store.update(&existing.id, patch)?)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::LocaleConfig;
    use doclocale_store::DocFilter;
    use serde_json::json;

    fn locales() -> LocaleSet {
        LocaleSet::register(
            &[LocaleConfig::new("en", None), LocaleConfig::new("en-CA", Some("/ca/en"))],
            None,
        )
        .unwrap()
    }

    fn seeded() -> (Workflow, DocumentStore, Document) {
        let store = DocumentStore::in_memory();
        let mut page = Document::new("en", Mode::Draft, "default-page", "Child Page");
        page.slug = Some("/child-page".into());
        page.fields.insert("body".into(), json!("hello"));
        let page = store.insert(page).unwrap();
        (Workflow::new(store.clone()), store, page)
    }

    #[test]
    fn test_localize_creates_draft_copy() {
        let (workflow, store, page) = seeded();
        let copy = workflow
            .localize(&locales(), &SourceRef::Storage(page.id.clone()), "en-CA")
            .unwrap();

        assert_eq!(copy.apos_doc_id, page.apos_doc_id);
        assert_ne!(copy.id, page.id);
        assert_eq!(copy.locale, "en-CA");
        assert_eq!(copy.mode, Mode::Draft);
        assert!(copy.same_content(&page));
        assert_eq!(
            store
                .count(&DocFilter::new().apos_doc_id(&page.apos_doc_id))
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_localize_by_canonical_ref() {
        let (workflow, _, page) = seeded();
        let source = SourceRef::Canonical {
            apos_doc_id: page.apos_doc_id.clone(),
            locale: "en".into(),
        };
        let copy = workflow.localize(&locales(), &source, "en-CA").unwrap();
        assert_eq!(copy.apos_doc_id, page.apos_doc_id);
    }

    #[test]
    fn test_localize_twice_fails() {
        let (workflow, store, page) = seeded();
        let source = SourceRef::Storage(page.id.clone());
        workflow.localize(&locales(), &source, "en-CA").unwrap();

        let err = workflow.localize(&locales(), &source, "en-CA").unwrap_err();
        assert!(matches!(err, DocError::AlreadyLocalized { ref locale, .. } if locale == "en-CA"));
        assert_eq!(err.http_status(), 409);
        assert_eq!(store.count(&DocFilter::new()).unwrap(), 2);
    }

    #[test]
    fn test_localize_into_source_locale_fails() {
        let (workflow, _, page) = seeded();
        let err = workflow
            .localize(&locales(), &SourceRef::Storage(page.id), "en")
            .unwrap_err();
        assert!(matches!(err, DocError::AlreadyLocalized { .. }));
    }

    #[test]
    fn test_localize_unknown_locale() {
        let (workflow, store, page) = seeded();
        let err = workflow
            .localize(&locales(), &SourceRef::Storage(page.id), "de")
            .unwrap_err();
        assert!(matches!(err, DocError::UnknownLocale { ref code } if code == "de"));
        assert_eq!(store.count(&DocFilter::new()).unwrap(), 1);
    }

    #[test]
    fn test_localize_missing_source() {
        let (workflow, _, _) = seeded();
        let err = workflow
            .localize(&locales(), &SourceRef::Storage(StorageId::generate()), "en-CA")
            .unwrap_err();
        assert!(matches!(err, DocError::NotFound { .. }));
    }

    #[test]
    fn test_localize_slug_conflict_is_duplicate_key() {
        let (workflow, store, page) = seeded();
        let mut squatter = Document::new("en-CA", Mode::Draft, "default-page", "Other");
        squatter.slug = Some("/child-page".into());
        store.insert(squatter).unwrap();

        let err = workflow
            .localize(&locales(), &SourceRef::Storage(page.id), "en-CA")
            .unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn test_localize_published_source_makes_draft() {
        let (workflow, _, page) = seeded();
        let published = workflow.publish(&SourceRef::Storage(page.id)).unwrap();
        let copy = workflow
            .localize(&locales(), &SourceRef::Storage(published.id), "en-CA")
            .unwrap();
        assert_eq!(copy.mode, Mode::Draft);
        assert!(copy.last_published_at.is_none());
    }

    #[test]
    fn test_concurrent_localize_single_winner() {
        let (workflow, store, page) = seeded();
        let set = locales();

        let wins: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let workflow = workflow.clone();
                    let (set, id) = (&set, page.id.clone());
                    s.spawn(move || {
                        match workflow.localize(set, &SourceRef::Storage(id), "en-CA") {
                            Ok(_) => 1,
                            Err(DocError::AlreadyLocalized { .. }) => 0,
                            Err(other) => panic!("unexpected error: {}", other),
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(wins, 1);
        assert_eq!(store.count(&DocFilter::new().locale("en-CA")).unwrap(), 1);
    }

    #[test]
    fn test_publish_creates_then_refreshes() {
        let (workflow, store, page) = seeded();
        let first = workflow.publish(&SourceRef::Storage(page.id.clone())).unwrap();
        assert_eq!(first.mode, Mode::Published);
        assert!(first.same_content(&page));
        assert!(first.last_published_at.is_some());

        store
            .update(
                &page.id,
                &DocPatch {
                    title: Some("Edited".into()),
                    ..DocPatch::default()
                },
            )
            .unwrap();
        let second = workflow.publish(&SourceRef::Storage(page.id.clone())).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.title, "Edited");

        let draft = store.get(&page.id).unwrap();
        assert_eq!(draft.last_published_at, second.last_published_at);
        assert_eq!(
            store
                .count(&DocFilter::new().apos_doc_id(&page.apos_doc_id))
                .unwrap(),
            2
        );
    }

    #[test]
    fn test_publish_from_published_ref_uses_draft() {
        let (workflow, store, page) = seeded();
        let published = workflow.publish(&SourceRef::Storage(page.id.clone())).unwrap();
        store
            .update(
                &page.id,
                &DocPatch {
                    title: Some("Edited".into()),
                    ..DocPatch::default()
                },
            )
            .unwrap();
        let again = workflow.publish(&SourceRef::Storage(published.id)).unwrap();
        assert_eq!(again.title, "Edited");
    }

    #[test]
    fn test_publish_missing_draft() {
        let (workflow, _, page) = seeded();
        let source = SourceRef::Canonical {
            apos_doc_id: page.apos_doc_id,
            locale: "en-CA".into(),
        };
        assert!(matches!(
            workflow.publish(&source).unwrap_err(),
            DocError::NotFound { .. }
        ));
    }

    #[test]
    fn test_concurrent_publish_single_record() {
        let (workflow, store, page) = seeded();
        std::thread::scope(|s| {
            for _ in 0..8 {
                let workflow = workflow.clone();
                let id = page.id.clone();
                s.spawn(move || workflow.publish(&SourceRef::Storage(id)).unwrap());
            }
        });
        assert_eq!(
            store
                .count(&DocFilter::new().mode(Mode::Published))
                .unwrap(),
            1
        );
    }
}

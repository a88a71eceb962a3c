//! Document store adapter.
//!
//! Records are stored as JSON under `doc/{storage_id}`. Every unique index is a
//! separate key holding the owning storage id:
//!
//! - `idx/id/{aposDocId}/{locale}/{mode}`
//! - `idx/parked/{parkedId}/{locale}/{mode}`
//! - `idx/slug/{locale}/{mode}/{slug}`
//!
//! (components are separated by NUL bytes). A record and its index keys are
//! written in one guarded batch, so two writers racing for the same triple
//! produce one winner and one `DuplicateKey`.

use std::sync::Arc;

use tracing::trace;

use crate::kvstore::{BatchOp, Guard, Key, KvStore, MemoryKvStore};
use crate::types::{DocFilter, DocId, DocPatch, Document, Mode, StorageId, StoreError, UniqueIndex};

/// Key prefix for document records.
const DOC_PREFIX: &[u8] = b"doc/";
const IDX_IDENTITY: &[u8] = b"idx/id/";
const IDX_PARKED: &[u8] = b"idx/parked/";
const IDX_SLUG: &[u8] = b"idx/slug/";

/// Read-modify-write attempts before `update` gives up with `Contended`.
const UPDATE_ATTEMPTS: usize = 8;

fn doc_key(id: &StorageId) -> Key {
    let mut key = DOC_PREFIX.to_vec();
    key.extend_from_slice(id.as_str().as_bytes());
    key
}

fn index_key(prefix: &[u8], parts: &[&str]) -> Key {
    let mut key = prefix.to_vec();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(0);
        }
        key.extend_from_slice(part.as_bytes());
    }
    key
}

fn identity_key(apos_doc_id: &DocId, locale: &str, mode: Mode) -> Key {
    index_key(IDX_IDENTITY, &[apos_doc_id.as_str(), locale, mode.as_str()])
}

/// Every unique key a record occupies, with the index it belongs to.
fn unique_keys(doc: &Document) -> Vec<(UniqueIndex, Key)> {
    let mut keys = vec![(
        UniqueIndex::Identity,
        identity_key(&doc.apos_doc_id, &doc.locale, doc.mode),
    )];
    if let Some(parked_id) = &doc.parked_id {
        keys.push((
            UniqueIndex::Parked,
            index_key(IDX_PARKED, &[parked_id, &doc.locale, doc.mode.as_str()]),
        ));
    }
    if let Some(slug) = &doc.slug {
        keys.push((
            UniqueIndex::Slug,
            index_key(IDX_SLUG, &[&doc.locale, doc.mode.as_str(), slug]),
        ));
    }
    keys
}

fn duplicate_error(doc: &Document, index: UniqueIndex) -> StoreError {
    let value = match index {
        UniqueIndex::Identity => doc.apos_doc_id.to_string(),
        UniqueIndex::Parked => doc.parked_id.clone().unwrap_or_default(),
        UniqueIndex::Slug => doc.slug.clone().unwrap_or_default(),
    };
    StoreError::DuplicateKey {
        index,
        value,
        locale: doc.locale.clone(),
        mode: doc.mode,
    }
}

/// The only component that talks to persistent storage.
#[derive(Clone)]
pub struct DocumentStore {
    kv: Arc<dyn KvStore>,
}

impl DocumentStore {
    /// Creates a document store over the given KV backend.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Creates a document store over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    fn decode(value: &[u8]) -> Result<Document, StoreError> {
        Ok(serde_json::from_slice(value)?)
    }

    fn load_by_index(&self, key: &[u8]) -> Result<Option<Document>, StoreError> {
        let Some(owner) = self.kv.get(key)? else {
            return Ok(None);
        };
        let id = StorageId::new(String::from_utf8_lossy(&owner).into_owned());
        match self.kv.get(&doc_key(&id))? {
            Some(value) => Ok(Some(Self::decode(&value)?)),
            None => Ok(None),
        }
    }

    /// Fetches one record by storage id.
    pub fn get(&self, id: &StorageId) -> Result<Document, StoreError> {
        match self.kv.get(&doc_key(id))? {
            Some(value) => Self::decode(&value),
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    /// Fetches the record for one (aposDocId, locale, mode) triple.
    pub fn find_triple(
        &self,
        apos_doc_id: &DocId,
        locale: &str,
        mode: Mode,
    ) -> Result<Option<Document>, StoreError> {
        self.load_by_index(&identity_key(apos_doc_id, locale, mode))
    }

    /// Returns every record matching the filter, oldest first.
    pub fn find(&self, filter: &DocFilter) -> Result<Vec<Document>, StoreError> {
        if let (Some(apos_doc_id), Some(locale), Some(mode)) =
            (&filter.apos_doc_id, &filter.locale, filter.mode)
        {
            let found = self.find_triple(apos_doc_id, locale, mode)?;
            return Ok(found.into_iter().filter(|d| filter.matches(d)).collect());
        }

        let mut docs = Vec::new();
        for (_key, value) in self.kv.scan_prefix(DOC_PREFIX)? {
            let doc = Self::decode(&value)?;
            if filter.matches(&doc) {
                docs.push(doc);
            }
        }
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    /// Returns the first record matching the filter.
    pub fn find_one(&self, filter: &DocFilter) -> Result<Option<Document>, StoreError> {
        Ok(self.find(filter)?.into_iter().next())
    }

    /// Counts records matching the filter.
    pub fn count(&self, filter: &DocFilter) -> Result<usize, StoreError> {
        Ok(self.find(filter)?.len())
    }

    /// Inserts a new record. Fails with `DuplicateKey` if any unique key the
    /// record would occupy is already taken.
    pub fn insert(&self, doc: Document) -> Result<Document, StoreError> {
        let keys = unique_keys(&doc);
        let owner = doc.id.as_str().as_bytes().to_vec();

        let mut guards = vec![Guard::Absent(doc_key(&doc.id))];
        guards.extend(keys.iter().map(|(_, k)| Guard::Absent(k.clone())));

        let mut ops = vec![BatchOp::Put {
            key: doc_key(&doc.id),
            value: serde_json::to_vec(&doc)?,
        }];
        ops.extend(keys.iter().map(|(_, k)| BatchOp::Put {
            key: k.clone(),
            value: owner.clone(),
        }));

        match self.kv.write_guarded(&guards, ops)? {
            None => {
                trace!(id = %doc.id, apos_doc_id = %doc.apos_doc_id, locale = %doc.locale, mode = %doc.mode, "inserted");
                Ok(doc)
            }
            Some(failed) => {
                let index = keys
                    .iter()
                    .find(|(_, k)| *k == failed)
                    .map(|(index, _)| *index)
                    .unwrap_or(UniqueIndex::Identity);
                Err(duplicate_error(&doc, index))
            }
        }
    }

    /// Applies a patch to one record. Fails with `NotFound` if it is absent and
    /// with `DuplicateKey` if a new slug is already taken in its locale/mode.
    ///
    /// The write is a compare-and-set against the record as read, retried when
    /// another writer got there first.
    pub fn update(&self, id: &StorageId, patch: &DocPatch) -> Result<Document, StoreError> {
        let key = doc_key(id);
        for _ in 0..UPDATE_ATTEMPTS {
            let Some(current_bytes) = self.kv.get(&key)? else {
                return Err(StoreError::NotFound(id.clone()));
            };
            let current = Self::decode(&current_bytes)?;
            let mut next = current.clone();
            patch.apply(&mut next);

            let old_keys = unique_keys(&current);
            let new_keys = unique_keys(&next);

            let mut guards = vec![Guard::Equals(key.clone(), current_bytes)];
            let mut ops = vec![BatchOp::Put {
                key: key.clone(),
                value: serde_json::to_vec(&next)?,
            }];
            for (_, old) in &old_keys {
                if !new_keys.iter().any(|(_, k)| k == old) {
                    ops.push(BatchOp::Delete { key: old.clone() });
                }
            }
            for (_, new) in &new_keys {
                if !old_keys.iter().any(|(_, k)| k == new) {
                    guards.push(Guard::Absent(new.clone()));
                    ops.push(BatchOp::Put {
                        key: new.clone(),
                        value: id.as_str().as_bytes().to_vec(),
                    });
                }
            }

            match self.kv.write_guarded(&guards, ops)? {
                None => return Ok(next),
                Some(failed) if failed == key => continue,
                Some(failed) => {
                    let index = new_keys
                        .iter()
                        .find(|(_, k)| *k == failed)
                        .map(|(index, _)| *index)
                        .unwrap_or(UniqueIndex::Slug);
                    return Err(duplicate_error(&next, index));
                }
            }
        }
        Err(StoreError::Contended(id.clone()))
    }

    /// Re-reads the record currently holding a unique key `doc` would take,
    /// checking identity first, then parked id, then slug.
    pub fn find_conflicting(
        &self,
        doc: &Document,
    ) -> Result<Option<(UniqueIndex, Document)>, StoreError> {
        for (index, key) in unique_keys(doc) {
            if let Some(existing) = self.load_by_index(&key)? {
                if existing.id != doc.id {
                    return Ok(Some((index, existing)));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(locale: &str, mode: Mode, title: &str, slug: &str) -> Document {
        let mut doc = Document::new(locale, mode, "default-page", title);
        doc.slug = Some(slug.to_string());
        doc
    }

    #[test]
    fn test_insert_and_get() {
        let store = DocumentStore::in_memory();
        let doc = store.insert(page("en", Mode::Draft, "Child Page", "/child-page")).unwrap();
        assert_eq!(store.get(&doc.id).unwrap(), doc);
        assert_eq!(
            store.find_triple(&doc.apos_doc_id, "en", Mode::Draft).unwrap(),
            Some(doc)
        );
    }

    #[test]
    fn test_insert_duplicate_triple() {
        let store = DocumentStore::in_memory();
        let doc = store.insert(page("en", Mode::Draft, "A", "/a")).unwrap();

        let mut again = doc.copy_for("en", Mode::Draft);
        again.slug = Some("/other".into());
        let err = store.insert(again).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateKey {
                index: UniqueIndex::Identity,
                ..
            }
        ));
        assert_eq!(store.count(&DocFilter::new()).unwrap(), 1);
    }

    #[test]
    fn test_same_doc_other_locale_and_mode_allowed() {
        let store = DocumentStore::in_memory();
        let doc = store.insert(page("en", Mode::Draft, "A", "/a")).unwrap();
        store.insert(doc.copy_for("en", Mode::Published)).unwrap();
        store.insert(doc.copy_for("en-CA", Mode::Draft)).unwrap();
        assert_eq!(
            store
                .count(&DocFilter::new().apos_doc_id(&doc.apos_doc_id))
                .unwrap(),
            3
        );
    }

    #[test]
    fn test_slug_unique_per_locale_and_mode() {
        let store = DocumentStore::in_memory();
        store.insert(page("en", Mode::Draft, "A", "/a")).unwrap();
        let err = store.insert(page("en", Mode::Draft, "B", "/a")).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateKey {
                index: UniqueIndex::Slug,
                ..
            }
        ));
        store.insert(page("en-CA", Mode::Draft, "B", "/a")).unwrap();
    }

    #[test]
    fn test_parked_unique_per_locale_and_mode() {
        let store = DocumentStore::in_memory();
        let mut home = page("en", Mode::Draft, "Home", "/");
        home.parked_id = Some("home".into());
        store.insert(home).unwrap();

        let mut rival = page("en", Mode::Draft, "Home", "/home-2");
        rival.parked_id = Some("home".into());
        let err = store.insert(rival.clone()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateKey {
                index: UniqueIndex::Parked,
                ..
            }
        ));
        let (index, existing) = store.find_conflicting(&rival).unwrap().unwrap();
        assert_eq!(index, UniqueIndex::Parked);
        assert_eq!(existing.title, "Home");
    }

    #[test]
    fn test_find_by_filters() {
        let store = DocumentStore::in_memory();
        let a = store.insert(page("en", Mode::Draft, "A", "/a")).unwrap();
        store.insert(a.copy_for("en", Mode::Published)).unwrap();
        store.insert(page("en", Mode::Draft, "B", "/b")).unwrap();

        assert_eq!(store.count(&DocFilter::new().mode(Mode::Draft)).unwrap(), 2);
        let found = store
            .find(&DocFilter::new().slug("/a").locale("en").mode(Mode::Published))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].apos_doc_id, a.apos_doc_id);
        assert!(store
            .find_one(&DocFilter::new().doc_type("missing"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_moves_slug_index() {
        let store = DocumentStore::in_memory();
        let doc = store.insert(page("en", Mode::Draft, "A", "/a")).unwrap();

        let patch = DocPatch {
            slug: Some("/renamed".into()),
            ..DocPatch::default()
        };
        let updated = store.update(&doc.id, &patch).unwrap();
        assert_eq!(updated.slug.as_deref(), Some("/renamed"));

        // old slug is free again, new one is taken
        store.insert(page("en", Mode::Draft, "B", "/a")).unwrap();
        assert!(store
            .insert(page("en", Mode::Draft, "C", "/renamed"))
            .unwrap_err()
            .is_duplicate_key());
    }

    #[test]
    fn test_update_to_taken_slug_fails() {
        let store = DocumentStore::in_memory();
        store.insert(page("en", Mode::Draft, "A", "/a")).unwrap();
        let b = store.insert(page("en", Mode::Draft, "B", "/b")).unwrap();

        let patch = DocPatch {
            slug: Some("/a".into()),
            ..DocPatch::default()
        };
        assert!(store.update(&b.id, &patch).unwrap_err().is_duplicate_key());
        assert_eq!(store.get(&b.id).unwrap().slug.as_deref(), Some("/b"));
    }

    #[test]
    fn test_update_missing() {
        let store = DocumentStore::in_memory();
        let id = StorageId::generate();
        let err = store.update(&id, &DocPatch::default()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(missing) if missing == id));
    }

    #[test]
    fn test_update_fields() {
        let store = DocumentStore::in_memory();
        let doc = store.insert(page("en", Mode::Draft, "A", "/a")).unwrap();
        let mut patch = DocPatch::default();
        patch.merge_fields.insert("color".into(), json!("red"));
        store.update(&doc.id, &patch).unwrap();
        assert_eq!(store.get(&doc.id).unwrap().fields["color"], json!("red"));
    }

    #[test]
    fn test_concurrent_inserts_single_winner() {
        let store = DocumentStore::in_memory();
        let template = page("en", Mode::Draft, "Home", "/");

        let wins: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = store.clone();
                    let doc = template.copy_for("en", Mode::Draft);
                    s.spawn(move || store.insert(doc).is_ok() as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(wins, 1);
        assert_eq!(store.count(&DocFilter::new()).unwrap(), 1);
    }
}

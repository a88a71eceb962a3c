//! Identity and replication engine.
//!
//! Produces one copy of a canonical document per (locale x mode) pair, all
//! sharing `apos_doc_id`. Safe to run on every startup: triples that already
//! exist are left untouched, and a triple inserted concurrently by another
//! worker counts as done.

use doclocale_store::{Document, DocumentStore, Mode, StoreError};
use tracing::{debug, info};

use crate::error::DocError;
use crate::locale::LocaleSet;

/// Outcome of inserting one copy.
#[derive(Debug, Clone, PartialEq)]
pub enum Insertion {
    /// This call created the record.
    Created(Document),
    /// Another worker created the same logical record first; this is it.
    Adopted(Document),
}

impl Insertion {
    /// The stored record, whoever created it.
    pub fn into_document(self) -> Document {
        match self {
            Insertion::Created(doc) | Insertion::Adopted(doc) => doc,
        }
    }

    /// The stored record, whoever created it.
    pub fn document(&self) -> &Document {
        match self {
            Insertion::Created(doc) | Insertion::Adopted(doc) => doc,
        }
    }
}

/// What one `replicate_across_locales` call did.
#[derive(Debug, Clone, Default)]
pub struct ReplicationReport {
    /// Every copy of the document across the locale set, in registry order,
    /// draft before published.
    pub documents: Vec<Document>,
    /// Copies created by this call.
    pub created: usize,
    /// Copies that already existed.
    pub existing: usize,
    /// Inserts that lost a race to another worker.
    pub races_lost: usize,
}

/// The replication engine.
#[derive(Clone)]
pub struct ReplicationEngine {
    store: DocumentStore,
}

impl ReplicationEngine {
    /// Creates an engine over the given store.
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Inserts `doc`, treating a duplicate-key rejection as benign when the
    /// record that holds the key belongs to the same logical document (same
    /// `apos_doc_id`, or same `parked_id`). Any other conflict propagates.
    pub fn insert_or_adopt(&self, doc: Document) -> Result<Insertion, DocError> {
        match self.store.insert(doc.clone()) {
            Ok(created) => Ok(Insertion::Created(created)),
            Err(err @ StoreError::DuplicateKey { .. }) => {
                let Some((index, existing)) = self.store.find_conflicting(&doc)? else {
                    // the holder vanished between insert and re-read
                    return Err(err.into());
                };
                let same_doc = existing.apos_doc_id == doc.apos_doc_id
                    || (doc.parked_id.is_some() && existing.parked_id == doc.parked_id);
                if same_doc && existing.locale == doc.locale && existing.mode == doc.mode {
                    debug!(
                        apos_doc_id = %existing.apos_doc_id,
                        locale = %existing.locale,
                        mode = %existing.mode,
                        %index,
                        "copy already created by another worker"
                    );
                    Ok(Insertion::Adopted(existing))
                } else {
                    Err(err.into())
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Ensures a copy of `canonical` exists for every locale and mode.
    ///
    /// Locales are processed in registry order, draft before published. For
    /// each missing triple the canonical content is cloned with a fresh
    /// storage id; existing triples are not modified.
    pub fn replicate_across_locales(
        &self,
        canonical: &Document,
        locales: &LocaleSet,
    ) -> Result<ReplicationReport, DocError> {
        let mut report = ReplicationReport::default();

        for locale in locales.iter() {
            for mode in Mode::ALL {
                if let Some(existing) =
                    self.store
                        .find_triple(&canonical.apos_doc_id, &locale.code, mode)?
                {
                    report.existing += 1;
                    report.documents.push(existing);
                    continue;
                }

                match self.insert_or_adopt(canonical.copy_for(&locale.code, mode))? {
                    Insertion::Created(doc) => {
                        debug!(
                            apos_doc_id = %doc.apos_doc_id,
                            locale = %doc.locale,
                            mode = %doc.mode,
                            "replicated copy"
                        );
                        report.created += 1;
                        report.documents.push(doc);
                    }
                    Insertion::Adopted(doc) => {
                        report.races_lost += 1;
                        report.documents.push(doc);
                    }
                }
            }
        }

        if report.created > 0 {
            info!(
                apos_doc_id = %canonical.apos_doc_id,
                doc_type = %canonical.doc_type,
                created = report.created,
                "replicated document across locales"
            );
        }
        Ok(report)
    }
}

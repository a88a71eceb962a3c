//! Parking manager.
//!
//! Parked documents are singletons (home page, archive, global settings) that
//! must exist exactly once per locale and mode. Parking runs on every startup
//! and converges a possibly partial store to the configured locale set.

use std::collections::HashMap;

use doclocale_store::{DocFilter, DocId, Document, Mode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::DocError;
use crate::locale::LocaleSet;
use crate::replication::{Insertion, ReplicationEngine};

/// Template for a parked document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkedTemplate {
    /// Stable semantic key, e.g. `home`.
    pub parked_id: String,
    /// Document type.
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Initial title.
    pub title: String,
    /// Slug; page types use a path.
    pub slug: String,
    /// Initial content fields.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl ParkedTemplate {
    /// Creates a template with no content fields.
    pub fn new(parked_id: &str, doc_type: &str, title: &str, slug: &str) -> Self {
        Self {
            parked_id: parked_id.to_string(),
            doc_type: doc_type.to_string(),
            title: title.to_string(),
            slug: slug.to_string(),
            fields: Map::new(),
        }
    }

    /// Builds the canonical document for this template. Pages other than the
    /// home page are placed directly under `home_path` when it is known.
    fn instantiate(&self, apos_doc_id: DocId, locale: &str, home_path: Option<&str>) -> Document {
        let mut doc =
            Document::with_doc_id(apos_doc_id, locale, Mode::Draft, &self.doc_type, &self.title);
        doc.slug = Some(self.slug.clone());
        doc.parked_id = Some(self.parked_id.clone());
        doc.fields = self.fields.clone();
        if doc.is_page() {
            if self.slug == "/" {
                doc.level = Some(0);
                doc.path = Some(doc.apos_doc_id.to_string());
            } else {
                doc.level = Some(1);
                doc.path = home_path.map(|home| format!("{}/{}", home, doc.apos_doc_id));
            }
            doc.rank = Some(0);
        }
        doc
    }
}

/// Parked id of the page tree root.
pub const HOME: &str = "home";

/// The home page, archive and global settings singletons.
pub fn default_templates() -> Vec<ParkedTemplate> {
    vec![
        ParkedTemplate::new(HOME, "@apostrophecms/home-page", "Home", "/"),
        ParkedTemplate::new("archive", "@apostrophecms/archive-page", "Archive", "/archive"),
        ParkedTemplate::new("global", "@apostrophecms/global", "Global", "global"),
    ]
}

/// State threaded through one startup's parking calls.
#[derive(Debug, Default)]
pub struct StartupContext {
    parked: HashMap<String, DocId>,
    created: usize,
}

impl StartupContext {
    /// A fresh context for one startup.
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical id resolved for a parked id during this startup.
    pub fn doc_id(&self, parked_id: &str) -> Option<&DocId> {
        self.parked.get(parked_id)
    }

    /// Records created during this startup.
    pub fn created(&self) -> usize {
        self.created
    }

    /// Every parked id resolved so far, sorted.
    pub fn parked(&self) -> Vec<(&str, &DocId)> {
        let mut parked: Vec<_> = self.parked.iter().map(|(k, v)| (k.as_str(), v)).collect();
        parked.sort();
        parked
    }
}

/// Ensures parked documents exist in every locale and mode.
#[derive(Clone)]
pub struct ParkingManager {
    engine: ReplicationEngine,
}

impl ParkingManager {
    /// Creates a parking manager using the given engine.
    pub fn new(engine: ReplicationEngine) -> Self {
        Self { engine }
    }

    /// Parks every template. Call once per startup.
    pub fn ensure_parked(
        &self,
        ctx: &mut StartupContext,
        templates: &[ParkedTemplate],
        locales: &LocaleSet,
    ) -> Result<(), DocError> {
        for template in templates {
            self.park_one(ctx, template, locales)?;
        }
        info!(
            templates = templates.len(),
            locales = locales.len(),
            created = ctx.created,
            "parked documents ensured"
        );
        Ok(())
    }

    fn park_one(
        &self,
        ctx: &mut StartupContext,
        template: &ParkedTemplate,
        locales: &LocaleSet,
    ) -> Result<(), DocError> {
        let store = self.engine.store();
        let first = &locales.first().code;
        let home_path = ctx.parked.get(HOME).map(|id| id.to_string());

        // reuse the id of any copy already in the store, in any locale
        let apos_doc_id = match store.find_one(&DocFilter::new().parked_id(&template.parked_id))? {
            Some(existing) => existing.apos_doc_id,
            None => {
                // claim the identity by taking the first locale's draft slot;
                // a concurrent winner's id is adopted instead of ours
                let proposed = ctx
                    .parked
                    .get(&template.parked_id)
                    .cloned()
                    .unwrap_or_else(DocId::generate);
                let claim = template.instantiate(proposed, first, home_path.as_deref());
                match self.engine.insert_or_adopt(claim)? {
                    Insertion::Created(doc) => {
                        ctx.created += 1;
                        doc.apos_doc_id
                    }
                    Insertion::Adopted(doc) => doc.apos_doc_id,
                }
            }
        };
        ctx.parked.insert(template.parked_id.clone(), apos_doc_id.clone());

        let canonical = template.instantiate(apos_doc_id, first, home_path.as_deref());
        let missing = self.missing_slots(template, locales)?;
        if missing == 0 {
            debug!(parked_id = %template.parked_id, "parked document complete");
            return Ok(());
        }

        let report = self.engine.replicate_across_locales(&canonical, locales)?;
        ctx.created += report.created;
        debug!(
            parked_id = %template.parked_id,
            apos_doc_id = %canonical.apos_doc_id,
            created = report.created,
            "parked document replicated"
        );
        Ok(())
    }

    fn missing_slots(&self, template: &ParkedTemplate, locales: &LocaleSet) -> Result<usize, DocError> {
        let store = self.engine.store();
        let mut missing = 0;
        for locale in locales.iter() {
            for mode in Mode::ALL {
                let filter = DocFilter::new()
                    .parked_id(&template.parked_id)
                    .locale(&locale.code)
                    .mode(mode);
                if store.find_one(&filter)?.is_none() {
                    missing += 1;
                }
            }
        }
        Ok(missing)
    }
}

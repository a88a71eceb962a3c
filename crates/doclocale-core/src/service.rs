//! Async service facade.
//!
//! Owns the store, the validated locale set and the parked templates, and runs
//! every store operation on tokio's blocking pool. The service is cheap to
//! clone; clones share one store, so several tasks behave like concurrent
//! workers against the same collection.

use std::sync::Arc;

use doclocale_store::{
    DocFilter, DocPatch, Document, DocumentStore, KvStore, MemoryKvStore, Mode, PersistentKvStore,
    StorageId,
};
use tokio::task;
use tracing::info;

use crate::config::DoclocaleConfig;
use crate::error::DocError;
use crate::locale::LocaleSet;
use crate::lookup::Lookup;
use crate::pages::{PageManager, ParentRef};
use crate::parking::{ParkedTemplate, ParkingManager, StartupContext};
use crate::replication::ReplicationEngine;
use crate::url::DocView;
use crate::workflow::{SourceRef, Workflow};

struct Inner {
    locales: LocaleSet,
    templates: Vec<ParkedTemplate>,
    checkpoint_on_startup: bool,
    persistent: Option<Arc<PersistentKvStore>>,
    store: DocumentStore,
    parking: ParkingManager,
    pages: PageManager,
    workflow: Workflow,
    lookup: Lookup,
}

/// Handle to one document collection and its locale configuration.
#[derive(Clone)]
pub struct DocService {
    inner: Arc<Inner>,
}

impl DocService {
    /// Validates the locale configuration and opens the configured store.
    pub fn open(config: &DoclocaleConfig) -> Result<Self, DocError> {
        let locales = config.locale_set()?;

        let persistent = match &config.store_dir {
            Some(dir) => Some(Arc::new(PersistentKvStore::open(dir)?)),
            None => None,
        };
        let kv: Arc<dyn KvStore> = match &persistent {
            Some(p) => p.clone() as Arc<dyn KvStore>,
            None => Arc::new(MemoryKvStore::new()),
        };
        let store = DocumentStore::new(kv);

        Ok(Self::assemble(
            locales,
            config.parked.clone(),
            config.checkpoint_on_startup,
            persistent,
            store,
        ))
    }

    /// A service over an existing store, e.g. one shared with another service
    /// that uses a different locale configuration.
    pub fn with_store(
        store: DocumentStore,
        locales: LocaleSet,
        templates: Vec<ParkedTemplate>,
    ) -> Self {
        Self::assemble(locales, templates, false, None, store)
    }

    fn assemble(
        locales: LocaleSet,
        templates: Vec<ParkedTemplate>,
        checkpoint_on_startup: bool,
        persistent: Option<Arc<PersistentKvStore>>,
        store: DocumentStore,
    ) -> Self {
        let engine = ReplicationEngine::new(store.clone());
        Self {
            inner: Arc::new(Inner {
                locales,
                templates,
                checkpoint_on_startup,
                persistent,
                parking: ParkingManager::new(engine),
                pages: PageManager::new(store.clone()),
                workflow: Workflow::new(store.clone()),
                lookup: Lookup::new(store.clone()),
                store,
            }),
        }
    }

    /// The validated locale set.
    pub fn locales(&self) -> &LocaleSet {
        &self.inner.locales
    }

    /// The underlying document store.
    pub fn store(&self) -> &DocumentStore {
        &self.inner.store
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, DocError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, DocError> + Send + 'static,
    {
        let inner = self.inner.clone();
        task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| DocError::Worker { msg: e.to_string() })?
    }

    /// Parks every configured template in every locale and mode, then
    /// checkpoints a persistent store if configured to.
    pub async fn startup(&self) -> Result<StartupContext, DocError> {
        self.blocking(|inner| {
            let mut ctx = StartupContext::new();
            inner
                .parking
                .ensure_parked(&mut ctx, &inner.templates, &inner.locales)?;
            if inner.checkpoint_on_startup {
                if let Some(persistent) = &inner.persistent {
                    persistent.checkpoint()?;
                }
            }
            info!(created = ctx.created(), "startup complete");
            Ok(ctx)
        })
        .await
    }

    /// Compacts the persistent store's log. No-op for in-memory stores.
    pub async fn checkpoint(&self) -> Result<(), DocError> {
        self.blocking(|inner| match &inner.persistent {
            Some(persistent) => Ok(persistent.checkpoint()?),
            None => Ok(()),
        })
        .await
    }

    /// Inserts a new draft page; see [`PageManager::insert_page`].
    pub async fn insert_page(
        &self,
        locale: &str,
        parent: ParentRef,
        title: &str,
        doc_type: &str,
    ) -> Result<DocView, DocError> {
        let (locale, title, doc_type) = (locale.to_string(), title.to_string(), doc_type.to_string());
        self.blocking(move |inner| {
            let page = inner
                .pages
                .insert_page(&inner.locales, &locale, &parent, &title, &doc_type)?;
            Ok(DocView::new(page, &inner.locales))
        })
        .await
    }

    /// Edits a draft; see [`PageManager::update_draft`].
    pub async fn update_draft(&self, id: StorageId, patch: DocPatch) -> Result<DocView, DocError> {
        self.blocking(move |inner| {
            let doc = inner.pages.update_draft(&id, &patch)?;
            Ok(DocView::new(doc, &inner.locales))
        })
        .await
    }

    /// Creates the draft of `source` in `target`; see [`Workflow::localize`].
    pub async fn localize(&self, source: SourceRef, target: &str) -> Result<DocView, DocError> {
        let target = target.to_string();
        self.blocking(move |inner| {
            let doc = inner.workflow.localize(&inner.locales, &source, &target)?;
            Ok(DocView::new(doc, &inner.locales))
        })
        .await
    }

    /// Publishes a draft; see [`Workflow::publish`].
    pub async fn publish(&self, source: SourceRef) -> Result<DocView, DocError> {
        self.blocking(move |inner| {
            let doc = inner.workflow.publish(&source)?;
            Ok(DocView::new(doc, &inner.locales))
        })
        .await
    }

    /// One record by storage id.
    pub async fn get(&self, id: StorageId) -> Result<DocView, DocError> {
        self.blocking(move |inner| Ok(DocView::new(inner.store.get(&id)?, &inner.locales)))
            .await
    }

    /// Locale-scoped query; see [`Lookup::find`].
    pub async fn find(
        &self,
        locale: &str,
        mode: Mode,
        filter: DocFilter,
    ) -> Result<Vec<DocView>, DocError> {
        let locale = locale.to_string();
        self.blocking(move |inner| inner.lookup.find(&inner.locales, &locale, mode, filter))
            .await
    }

    /// Publish-gated lookup by public URL; see [`Lookup::public_get`].
    pub async fn public_get(&self, url: &str) -> Result<DocView, DocError> {
        let url = url.to_string();
        self.blocking(move |inner| inner.lookup.public_get(&inner.locales, &url))
            .await
    }

    /// Every stored copy of one logical document.
    pub async fn copies(&self, doc: &Document) -> Result<Vec<DocView>, DocError> {
        let apos_doc_id = doc.apos_doc_id.clone();
        self.blocking(move |inner| {
            Ok(inner
                .store
                .find(&DocFilter::new().apos_doc_id(&apos_doc_id))?
                .into_iter()
                .map(|d| DocView::new(d, &inner.locales))
                .collect())
        })
        .await
    }
}

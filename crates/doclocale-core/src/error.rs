//! Error types for the localization and replication workflow.

use doclocale_store::{Mode, StorageId, StoreError, UniqueIndex};
use thiserror::Error;

/// Errors surfaced by the locale registry, replication, localize and publish.
#[derive(Debug, Error)]
pub enum DocError {
    /// The locale configuration is invalid. Fatal at startup.
    #[error("invalid locale configuration: {msg}")]
    Config {
        /// What is wrong with the configuration.
        msg: String,
    },

    /// A unique index rejected a write. Only surfaced outside replication.
    #[error("duplicate key on {index} for {value} in {locale}:{mode}")]
    DuplicateKey {
        /// Index that rejected the write.
        index: UniqueIndex,
        /// The conflicting indexed value.
        value: String,
        /// Locale of the rejected record.
        locale: String,
        /// Mode of the rejected record.
        mode: Mode,
    },

    /// The addressed document does not exist.
    #[error("document not found: {what}")]
    NotFound {
        /// Description of what was looked up.
        what: String,
    },

    /// The target locale is not configured.
    #[error("unknown locale: {code}")]
    UnknownLocale {
        /// The unconfigured locale code.
        code: String,
    },

    /// The target locale already has a draft of this document.
    #[error("document {apos_doc_id} already has a draft in locale {locale}")]
    AlreadyLocalized {
        /// Canonical identity of the document.
        apos_doc_id: String,
        /// Target locale that already has the draft.
        locale: String,
    },

    /// The operation needs a draft but was given a published record.
    #[error("document {id} is not a draft")]
    NotDraft {
        /// Storage id of the published record.
        id: StorageId,
    },

    /// A page title with no letters or digits cannot produce a slug.
    #[error("page title {title:?} has no characters usable in a slug")]
    InvalidTitle {
        /// The rejected title.
        title: String,
    },

    /// Public lookup found no published content at this URL.
    #[error("no published document at {url}")]
    NotPublished {
        /// The requested public URL.
        url: String,
    },

    /// Infrastructure failure in the store.
    #[error("store error: {0}")]
    Store(StoreError),

    /// A blocking store task panicked or was cancelled.
    #[error("worker task failed: {msg}")]
    Worker {
        /// Join failure reported by the runtime.
        msg: String,
    },
}

impl From<StoreError> for DocError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey {
                index,
                value,
                locale,
                mode,
            } => DocError::DuplicateKey {
                index,
                value,
                locale,
                mode,
            },
            StoreError::NotFound(id) => DocError::NotFound {
                what: format!("document {}", id),
            },
            other => DocError::Store(other),
        }
    }
}

impl DocError {
    /// Stable machine-readable error code for API layers.
    pub fn code(&self) -> &'static str {
        match self {
            DocError::Config { .. } => "invalid-config",
            DocError::DuplicateKey { .. } => "conflict",
            DocError::NotFound { .. } => "notfound",
            DocError::UnknownLocale { .. } => "invalid-locale",
            DocError::AlreadyLocalized { .. } => "already-localized",
            DocError::NotDraft { .. } => "invalid-mode",
            DocError::InvalidTitle { .. } => "invalid-title",
            DocError::NotPublished { .. } => "notfound",
            DocError::Store(_) | DocError::Worker { .. } => "error",
        }
    }

    /// HTTP-equivalent status for API layers.
    pub fn http_status(&self) -> u16 {
        match self {
            DocError::Config { .. } | DocError::Store(_) | DocError::Worker { .. } => 500,
            DocError::DuplicateKey { .. } | DocError::AlreadyLocalized { .. } => 409,
            DocError::NotFound { .. } | DocError::NotPublished { .. } => 404,
            DocError::UnknownLocale { .. }
            | DocError::NotDraft { .. }
            | DocError::InvalidTitle { .. } => 400,
        }
    }

    /// True for unique-index rejections.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, DocError::DuplicateKey { .. })
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        DocError::Config { msg: msg.into() }
    }
}

#![warn(missing_docs)]

//! doclocale core: locale registry, cross-locale replication, parking of
//! singleton documents, the localize and publish transitions and
//! publish-gated public lookup.

pub mod cli;
pub mod config;
pub mod error;
pub mod locale;
pub mod lookup;
pub mod pages;
pub mod parking;
pub mod replication;
pub mod service;
pub mod url;
pub mod workflow;

pub use config::DoclocaleConfig;
pub use error::DocError;
pub use locale::{Locale, LocaleConfig, LocaleSet};
pub use lookup::Lookup;
pub use pages::{slugify, PageManager, ParentRef};
pub use parking::{default_templates, ParkedTemplate, ParkingManager, StartupContext};
pub use replication::{Insertion, ReplicationEngine, ReplicationReport};
pub use service::DocService;
pub use url::{derive_url, DocView};
pub use workflow::{SourceRef, Workflow};

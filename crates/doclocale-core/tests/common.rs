//! Shared fixtures for doclocale integration tests.

#![allow(dead_code)]

use std::path::Path;

use doclocale_core::{DocService, DoclocaleConfig, LocaleConfig};
use doclocale_store::DocFilter;

/// English plus Canadian English and Canadian French under `/ca`.
pub fn canada_locales() -> Vec<LocaleConfig> {
    vec![
        LocaleConfig::new("en", None).with_label("English"),
        LocaleConfig::new("en-CA", Some("/ca/en")).with_label("Canadian English"),
        LocaleConfig::new("en-FR", Some("/ca/fr")).with_label("Canadian French"),
    ]
}

/// In-memory config with the three Canadian locales and default templates.
pub fn canada_config() -> DoclocaleConfig {
    DoclocaleConfig {
        locales: canada_locales(),
        ..DoclocaleConfig::default()
    }
}

/// Same as [`canada_config`] but backed by a persistent store in `dir`.
pub fn persistent_config(dir: &Path) -> DoclocaleConfig {
    DoclocaleConfig {
        store_dir: Some(dir.to_path_buf()),
        ..canada_config()
    }
}

/// Opens a service and runs startup parking.
pub async fn started(config: &DoclocaleConfig) -> DocService {
    let service = DocService::open(config).expect("open service");
    service.startup().await.expect("startup");
    service
}

/// Counts stored records matching `filter`.
pub fn count(service: &DocService, filter: DocFilter) -> usize {
    service.store().count(&filter).expect("count")
}

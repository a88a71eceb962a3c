//! Service configuration loaded from TOML or JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::DocError;
use crate::locale::{LocaleConfig, LocaleSet};
use crate::parking::{default_templates, ParkedTemplate};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoclocaleConfig {
    /// Directory of the persistent store. In-memory when absent.
    pub store_dir: Option<PathBuf>,
    /// Locales in registry order.
    pub locales: Vec<LocaleConfig>,
    /// Default locale code; the first locale when absent.
    pub default_locale: Option<String>,
    /// Parked document templates.
    pub parked: Vec<ParkedTemplate>,
    /// Compact the persistent store's log after startup parking.
    pub checkpoint_on_startup: bool,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for DoclocaleConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            locales: vec![LocaleConfig::new("en", None)],
            default_locale: None,
            parked: default_templates(),
            checkpoint_on_startup: true,
            log_filter: String::from("info"),
        }
    }
}

impl DoclocaleConfig {
    /// Loads a config file, choosing the format by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: DoclocaleConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: DoclocaleConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Validates the configured locales.
    pub fn locale_set(&self) -> Result<LocaleSet, DocError> {
        LocaleSet::register(&self.locales, self.default_locale.as_deref())
    }
}

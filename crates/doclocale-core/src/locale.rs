//! Locale registry.
//!
//! Validates the configured locales once at startup and then serves as a pure
//! lookup table: registry order, code lookup, prefix lookup and mapping public
//! URLs back to a (locale, slug) pair.

use serde::{Deserialize, Serialize};

use crate::error::DocError;

/// One locale as written in configuration. Missing fields are defaulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocaleConfig {
    /// Unique locale code, e.g. `en-CA`.
    pub code: String,
    /// Display label, defaults to the code.
    #[serde(default)]
    pub label: Option<String>,
    /// URL prefix such as `/ca/en`, defaults to empty.
    #[serde(default)]
    pub prefix: Option<String>,
}

impl LocaleConfig {
    /// Shorthand for a locale with an optional prefix and no label.
    pub fn new(code: &str, prefix: Option<&str>) -> Self {
        Self {
            code: code.to_string(),
            label: None,
            prefix: prefix.map(str::to_string),
        }
    }

    /// Sets the display label.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }
}

/// A validated locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Locale {
    /// Unique locale code.
    pub code: String,
    /// Display label.
    pub label: String,
    /// URL prefix, empty for none.
    pub prefix: String,
}

/// The validated, ordered set of configured locales.
#[derive(Debug, Clone)]
pub struct LocaleSet {
    locales: Vec<Locale>,
    default_index: usize,
}

fn valid_code(code: &str) -> bool {
    !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn valid_prefix(prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    if !prefix.starts_with('/') || prefix.ends_with('/') {
        return false;
    }
    prefix[1..].split('/').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| !c.is_whitespace() && !matches!(c, '?' | '#' | '\\' | '%'))
    })
}

impl LocaleSet {
    /// Validates and normalizes the configured locales.
    ///
    /// Codes must be unique and made of ASCII letters, digits, `-` and `_`.
    /// Prefixes must be empty or `/segment[/segment...]` without a trailing
    /// slash, and unique across locales (at most one locale may have none).
    /// The default locale is `default_locale` if given, else the first one.
    pub fn register(
        configs: &[LocaleConfig],
        default_locale: Option<&str>,
    ) -> Result<Self, DocError> {
        if configs.is_empty() {
            return Err(DocError::config("at least one locale must be configured"));
        }

        let mut locales: Vec<Locale> = Vec::with_capacity(configs.len());
        for config in configs {
            let code = config.code.trim();
            if !valid_code(code) {
                return Err(DocError::config(format!("malformed locale code '{}'", config.code)));
            }
            if locales.iter().any(|l| l.code == code) {
                return Err(DocError::config(format!("duplicate locale code '{}'", code)));
            }

            let prefix = config.prefix.as_deref().unwrap_or("").trim().to_string();
            if !valid_prefix(&prefix) {
                return Err(DocError::config(format!(
                    "locale '{}' has malformed prefix '{}'",
                    code, prefix
                )));
            }
            if let Some(clash) = locales.iter().find(|l| l.prefix == prefix) {
                return Err(DocError::config(format!(
                    "locales '{}' and '{}' share the prefix '{}'",
                    clash.code, code, prefix
                )));
            }

            let label = config
                .label
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .unwrap_or(code)
                .to_string();

            locales.push(Locale {
                code: code.to_string(),
                label,
                prefix,
            });
        }

        let default_index = match default_locale {
            Some(code) => locales
                .iter()
                .position(|l| l.code == code)
                .ok_or_else(|| DocError::config(format!("default locale '{}' is not configured", code)))?,
            None => 0,
        };

        Ok(Self {
            locales,
            default_index,
        })
    }

    /// Locales in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Locale> {
        self.locales.iter()
    }

    /// Calls `f` for every locale in registry order.
    pub fn for_each(&self, f: impl FnMut(&Locale)) {
        self.locales.iter().for_each(f)
    }

    /// Looks up a locale by code.
    pub fn get(&self, code: &str) -> Option<&Locale> {
        self.locales.iter().find(|l| l.code == code)
    }

    /// Looks up a locale by code, failing with `UnknownLocale`.
    pub fn require(&self, code: &str) -> Result<&Locale, DocError> {
        self.get(code).ok_or_else(|| DocError::UnknownLocale {
            code: code.to_string(),
        })
    }

    /// URL prefix of a configured locale.
    pub fn prefix_for(&self, code: &str) -> Result<&str, DocError> {
        self.require(code).map(|l| l.prefix.as_str())
    }

    /// The default locale.
    pub fn default_locale(&self) -> &Locale {
        &self.locales[self.default_index]
    }

    /// The first locale in registry order.
    pub fn first(&self) -> &Locale {
        &self.locales[0]
    }

    /// Number of configured locales.
    pub fn len(&self) -> usize {
        self.locales.len()
    }

    /// Always false for a registered set.
    pub fn is_empty(&self) -> bool {
        self.locales.is_empty()
    }

    /// Maps a public URL path to the locale whose prefix matches it (longest
    /// prefix wins) and the slug below that prefix. Query strings and
    /// fragments are ignored. Returns None if no locale claims the path.
    pub fn resolve_url(&self, url: &str) -> Option<(&Locale, String)> {
        let path = url.split(['?', '#']).next().unwrap_or("");
        if !path.starts_with('/') {
            return None;
        }

        self.locales
            .iter()
            .filter(|l| {
                l.prefix.is_empty()
                    || path == l.prefix
                    || path
                        .strip_prefix(l.prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|l| l.prefix.len())
            .map(|l| {
                let rest = &path[l.prefix.len()..];
                let slug = if rest.is_empty() { "/" } else { rest };
                (l, slug.to_string())
            })
    }
}

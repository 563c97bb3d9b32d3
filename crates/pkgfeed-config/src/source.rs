use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, Result};

/// A remote package feed.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SourceConfig {
    /// Unique name of the source.
    pub name: String,

    /// Service root of the feed, e.g. `https://feed.example.com/api/v2/`.
    pub url: String,

    /// Entity set holding the packages.
    /// Default: Packages
    pub entity_set: Option<String>,

    /// Whether the source is enabled.
    /// Default: true
    pub enabled: Option<bool>,

    /// Extra headers sent with every request to this source.
    pub headers: Option<BTreeMap<String, String>>,

    /// Refuse packages that do not advertise a hash.
    /// Default: the global `require_package_hash`
    pub require_package_hash: Option<bool>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            entity_set: None,
            enabled: None,
            headers: None,
            require_package_hash: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Parses the service root, ensuring it ends with `/` so relative joins stay
    /// below it.
    pub fn service_root(&self) -> Result<Url> {
        let invalid = || {
            ConfigError::InvalidSourceUrl {
                name: self.name.clone(),
                url: self.url.clone(),
            }
        };

        let mut raw = self.url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }

        let url = Url::parse(&raw).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid());
        }
        Ok(url)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptySourceName);
        }
        self.service_root()?;
        Ok(())
    }
}

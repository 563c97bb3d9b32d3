use std::{collections::HashSet, fs, path::PathBuf, str::FromStr, time::Duration};

use pkgfeed_utils::{
    hash::HashAlgorithm,
    path::{resolve_path, xdg_cache_home, xdg_config_home},
    time::parse_duration,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{ConfigError, Result},
    source::SourceConfig,
};

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Returns the config file location: `$PKGFEED_CONFIG`, or
/// `$XDG_CONFIG_HOME/pkgfeed/config.toml`.
pub fn config_path() -> PathBuf {
    match std::env::var("PKGFEED_CONFIG") {
        Ok(path_str) => PathBuf::from(path_str),
        Err(_) => xdg_config_home().join("pkgfeed").join("config.toml"),
    }
}

/// Application's configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Config {
    /// Directory for verified package content.
    /// Default: $XDG_CACHE_HOME/pkgfeed/packages
    pub cache_path: Option<String>,

    /// User agent sent with every request.
    /// Default: pkgfeed/<version>
    pub user_agent: Option<String>,

    /// Global request timeout (e.g. "30s", "2m").
    pub timeout: Option<String>,

    /// Refuse packages that do not advertise a hash.
    /// Default: false
    pub require_package_hash: Option<bool>,

    /// Algorithm assumed when a feed advertises a hash without naming one.
    /// Default: SHA512
    pub hash_algorithm: Option<String>,

    /// Number of entities requested per page.
    /// Default: 100
    pub page_size: Option<usize>,

    /// Configured package feeds.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// A configuration with no sources and every setting at its default.
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Loads the configuration from [`config_path`], falling back to
    /// [`Config::default_config`] when the file does not exist.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default_config());
        }
        Self::from_path(path)
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path).map_err(|err| {
            ConfigError::IoError {
                action: format!("reading config file {}", path.display()),
                source: err,
            }
        })?;
        content.parse()
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.name.as_str()) {
                return Err(ConfigError::DuplicateSourceName(source.name.clone()));
            }
        }

        self.timeout()?;
        self.hash_algorithm()?;

        if self.page_size == Some(0) {
            warn!("page_size of 0 is ignored, using {}", DEFAULT_PAGE_SIZE);
        }

        Ok(())
    }

    /// Looks up an enabled source by name.
    pub fn get_source(&self, name: &str) -> Result<&SourceConfig> {
        let source = self
            .sources
            .iter()
            .find(|source| source.name == name)
            .ok_or_else(|| ConfigError::UnknownSource(name.to_string()))?;

        if !source.is_enabled() {
            return Err(ConfigError::DisabledSource(name.to_string()));
        }
        Ok(source)
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|source| source.is_enabled())
    }

    pub fn get_cache_path(&self) -> Result<PathBuf> {
        match &self.cache_path {
            Some(path) => resolve_path(path).map_err(|err| ConfigError::InvalidPath(err.to_string())),
            None => Ok(xdg_cache_home().join("pkgfeed").join("packages")),
        }
    }

    pub fn timeout(&self) -> Result<Option<Duration>> {
        self.timeout
            .as_deref()
            .map(|value| {
                parse_duration(value).ok_or_else(|| ConfigError::InvalidTimeout(value.to_string()))
            })
            .transpose()
    }

    pub fn hash_algorithm(&self) -> Result<HashAlgorithm> {
        match self.hash_algorithm.as_deref() {
            Some(name) => {
                HashAlgorithm::from_name(name)
                    .map_err(|_| ConfigError::InvalidHashAlgorithm(name.to_string()))
            }
            None => Ok(HashAlgorithm::Sha512),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Whether `source` must reject packages without an advertised hash.
    pub fn require_package_hash(&self, source: &SourceConfig) -> bool {
        source
            .require_package_hash
            .or(self.require_package_hash)
            .unwrap_or(false)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

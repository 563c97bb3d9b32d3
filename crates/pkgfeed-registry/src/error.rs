//! Error types for the registry crate.

use miette::Diagnostic;
use pkgfeed_config::error::ConfigError;
use pkgfeed_dl::error::DownloadError;
use thiserror::Error;

/// Errors that can occur while querying a feed or opening package content.
#[derive(Error, Diagnostic, Debug)]
pub enum RegistryError {
    #[error("Invalid repository configuration: {0}")]
    #[diagnostic(
        code(pkgfeed_registry::invalid_configuration),
        help("Provide a feed, a hash verifier and a downloader when building the repository")
    )]
    InvalidConfiguration(String),

    #[error("Package source {url} is unavailable")]
    #[diagnostic(
        code(pkgfeed_registry::source_unavailable),
        help("Check your network connection and the feed URL")
    )]
    SourceUnavailable {
        url: String,
        #[source]
        source: DownloadError,
    },

    #[error("Malformed metadata in {context}: {reason}")]
    #[diagnostic(
        code(pkgfeed_registry::malformed_metadata),
        help("The feed returned data that could not be understood")
    )]
    MalformedMetadata { context: String, reason: String },

    #[error("Not found: {resource}")]
    #[diagnostic(code(pkgfeed_registry::not_found))]
    NotFound { resource: String },

    #[error("Package {id} {version} does not advertise a content hash")]
    #[diagnostic(
        code(pkgfeed_registry::missing_hash),
        help("The repository requires a package hash; allow unverified content to download it anyway")
    )]
    MissingHash { id: String, version: String },

    #[error("The package repository has been dropped")]
    #[diagnostic(
        code(pkgfeed_registry::repository_closed),
        help("Keep the repository alive while opening package content")
    )]
    RepositoryClosed,

    #[error("Invalid URL: {url}")]
    #[diagnostic(
        code(pkgfeed_registry::invalid_url),
        help("Ensure the URL is valid and properly formatted")
    )]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl RegistryError {
    pub(crate) fn malformed(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::MalformedMetadata {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failed operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SourceUnavailable { .. } => true,
            Self::Download(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Whether downloaded content was rejected because its digest did not match.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::Download(DownloadError::IntegrityCheckFailed { .. })
        )
    }
}

/// A specialized Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

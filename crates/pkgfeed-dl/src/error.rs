use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum DownloadError {
    #[error("Request to {url} failed")]
    #[diagnostic(
        code(pkgfeed_dl::transport),
        help("Check your internet connection or try again later")
    )]
    Transport {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("Not found: {url}")]
    #[diagnostic(
        code(pkgfeed_dl::not_found),
        help("The package content is missing on the server")
    )]
    NotFound { url: String },

    #[error("HTTP {status}: {url}")]
    #[diagnostic(code(pkgfeed_dl::http_error))]
    HttpError { status: u16, url: String },

    #[error("Integrity check failed for {url}: expected {expected}, got {actual}")]
    #[diagnostic(
        code(pkgfeed_dl::integrity),
        help("The downloaded content does not match the advertised hash and was discarded")
    )]
    IntegrityCheckFailed {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid response from {url}: {reason}")]
    #[diagnostic(code(pkgfeed_dl::invalid_response))]
    InvalidResponse { url: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(pkgfeed_dl::io))]
    Io(#[from] std::io::Error),

    #[error("Failed to {action} cache entry {path}")]
    #[diagnostic(code(pkgfeed_dl::cache))]
    Cache {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Builds a [`DownloadError::Transport`] from a ureq failure.
    pub fn transport(url: impl Into<String>, source: ureq::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source: Box::new(source),
        }
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Io(_) => true,
            Self::HttpError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;

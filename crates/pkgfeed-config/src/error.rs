use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("TOML serialization error: {0}")]
    #[diagnostic(
        code(pkgfeed_config::toml_serialize),
        help("Check your configuration structure for invalid values")
    )]
    TomlSerError(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    #[diagnostic(
        code(pkgfeed_config::toml_deserialize),
        help("Check your config.toml syntax and structure")
    )]
    TomlDeError(#[from] toml::de::Error),

    #[error("Error while {action}")]
    #[diagnostic(code(pkgfeed_config::io))]
    IoError {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Source name cannot be empty")]
    #[diagnostic(
        code(pkgfeed_config::empty_source_name),
        help("Give every [[sources]] entry a unique name")
    )]
    EmptySourceName,

    #[error("Duplicate source name: {0}")]
    #[diagnostic(
        code(pkgfeed_config::duplicate_source),
        help("Each source must have a unique name")
    )]
    DuplicateSourceName(String),

    #[error("Invalid URL for source {name}: {url}")]
    #[diagnostic(
        code(pkgfeed_config::invalid_source_url),
        help("Source URLs must be absolute http(s) URLs")
    )]
    InvalidSourceUrl { name: String, url: String },

    #[error("Unknown source: {0}")]
    #[diagnostic(
        code(pkgfeed_config::unknown_source),
        help("Check the configured [[sources]] names")
    )]
    UnknownSource(String),

    #[error("Source {0} is disabled")]
    #[diagnostic(code(pkgfeed_config::disabled_source))]
    DisabledSource(String),

    #[error("Invalid timeout: {0}")]
    #[diagnostic(
        code(pkgfeed_config::invalid_timeout),
        help("Use a duration such as 30s, 2m or 1h")
    )]
    InvalidTimeout(String),

    #[error("Invalid hash algorithm: {0}")]
    #[diagnostic(
        code(pkgfeed_config::invalid_hash_algorithm),
        help("Supported algorithms are SHA1, SHA256, SHA512 and BLAKE3")
    )]
    InvalidHashAlgorithm(String),

    #[error("Invalid header {name} for source {source_name}")]
    #[diagnostic(code(pkgfeed_config::invalid_header))]
    InvalidHeader { source_name: String, name: String },

    #[error("Invalid path: {0}")]
    #[diagnostic(code(pkgfeed_config::invalid_path))]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ConfigError::DuplicateSourceName("nuget".into()).to_string(),
            "Duplicate source name: nuget"
        );
        assert_eq!(
            ConfigError::InvalidSourceUrl {
                name: "local".into(),
                url: "not a url".into(),
            }
            .to_string(),
            "Invalid URL for source local: not a url"
        );
        assert_eq!(
            ConfigError::UnknownSource("missing".into()).to_string(),
            "Unknown source: missing"
        );
    }
}

//! The package repository: a feed whose entities can open their own content.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use pkgfeed_config::{config::Config, error::ConfigError, source::SourceConfig};
use pkgfeed_dl::{
    cache::{DiskCache, MemoryCache},
    download::{DownloadRequest, PackageContent, PackageDownloader},
    error::DownloadError,
    http::OutgoingRequest,
    http_client::{ClientConfig, HttpClient, DEFAULT_USER_AGENT},
    traits::HttpTransport,
};
use pkgfeed_utils::hash::{CryptoHashProvider, HashAlgorithm, HashValue, HashVerifier};
use tracing::{debug, warn};
use ureq::http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::{
    error::{RegistryError, Result},
    feed::FeedContext,
    package::{ContentAccess, EntityKey, PackageEntity, PackageRecord},
    query::{Field, Filter, PackageQuery},
};

/// What to do with a package that advertises no content hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashPolicy {
    /// Download it without verification, trusting the transport.
    #[default]
    AllowUnverified,
    /// Refuse to open its content.
    RequireHash,
}

/// Everything an entity needs to open its content, shared by one repository.
pub struct RepositoryContext {
    feed: FeedContext,
    verifier: Arc<dyn HashVerifier>,
    downloader: Option<Arc<PackageDownloader>>,
    hash_policy: HashPolicy,
}

impl RepositoryContext {
    pub fn feed(&self) -> &FeedContext {
        &self.feed
    }

    pub fn verifier(&self) -> &Arc<dyn HashVerifier> {
        &self.verifier
    }

    pub fn downloader(&self) -> Option<&PackageDownloader> {
        self.downloader.as_deref()
    }

    pub fn hash_policy(&self) -> HashPolicy {
        self.hash_policy
    }

    fn open_content(&self, key: &EntityKey, expected: Option<HashValue>) -> Result<PackageContent> {
        let downloader = self.downloader.as_deref().ok_or_else(|| {
            RegistryError::InvalidConfiguration("no package downloader configured".to_string())
        })?;

        let uri = self.feed.read_stream_uri(key)?;
        let request = match expected {
            Some(hash) => DownloadRequest::verified(uri, hash),
            None => {
                debug!(package = %key, url = %uri, "no advertised hash, content is unverified");
                DownloadRequest::new(uri)
            }
        };

        downloader.download_package(&request).map_err(|err| {
            match err {
                DownloadError::NotFound {
                    url,
                } => {
                    RegistryError::NotFound {
                        resource: url,
                    }
                }
                err => RegistryError::Download(err),
            }
        })
    }
}

impl fmt::Debug for RepositoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryContext")
            .field("feed", &self.feed)
            .field("default_algorithm", &self.verifier.default_algorithm())
            .field("downloader", &self.downloader.is_some())
            .field("hash_policy", &self.hash_policy)
            .finish()
    }
}

/// The advertised hash of one entity, decoded when the entity was read.
enum ExpectedHash {
    Advertised(HashValue),
    Malformed(String),
    Absent,
}

/// Attaches the content capability to a freshly read record.
///
/// The hash is decoded here, once; a decoding failure is kept and reported
/// when the capability is invoked. The content location is not resolved until
/// then either.
fn materialize(
    context: &Weak<RepositoryContext>,
    fallback: HashAlgorithm,
    policy: HashPolicy,
    record: PackageRecord,
) -> PackageEntity {
    let key = record.key();
    let expected = match record.package_hash.as_deref() {
        Some(encoded) => {
            match HashValue::decode(
                encoded,
                record.package_hash_algorithm.as_deref(),
                fallback,
            ) {
                Ok(hash) => ExpectedHash::Advertised(hash),
                Err(err) => {
                    warn!(package = %key, error = %err, "package advertises a malformed hash");
                    ExpectedHash::Malformed(err.to_string())
                }
            }
        }
        None => ExpectedHash::Absent,
    };

    let context = context.clone();
    let access = ContentAccess::new(move || {
        let expected = match &expected {
            ExpectedHash::Advertised(hash) => Some(hash.clone()),
            ExpectedHash::Malformed(reason) => {
                return Err(RegistryError::malformed(format!("package {key}"), reason));
            }
            ExpectedHash::Absent if policy == HashPolicy::RequireHash => {
                return Err(RegistryError::MissingHash {
                    id: key.id.clone(),
                    version: key.version.clone(),
                });
            }
            ExpectedHash::Absent => None,
        };

        let context = context.upgrade().ok_or(RegistryError::RepositoryClosed)?;
        context.open_content(&key, expected)
    });

    PackageEntity::new(record, access)
}

/// A queryable package feed whose entities download and verify their content
/// on demand.
///
/// # Example
///
/// ```no_run
/// use pkgfeed_registry::{Filter, Field, PackageRepository};
///
/// let repo = PackageRepository::open("https://feed.example.com/api/v2/")?;
/// let latest = repo
///     .get_packages()
///     .filter(Filter::eq(Field::Id, "Newtonsoft.Json").and(Filter::is_latest_version()))
///     .first()?;
///
/// if let Some(package) = latest {
///     let content = package.open_content()?;
///     content.write_to(format!("{}.{}.nupkg", package.id(), package.version()))?;
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct PackageRepository {
    context: Arc<RepositoryContext>,
}

impl PackageRepository {
    pub fn builder() -> PackageRepositoryBuilder {
        PackageRepositoryBuilder::default()
    }

    /// Opens a feed with the default HTTP client, SHA-512 verifier and an
    /// in-memory content cache.
    pub fn open(service_root: &str) -> Result<Self> {
        let url = Url::parse(service_root).map_err(|source| {
            RegistryError::InvalidUrl {
                url: service_root.to_string(),
                source,
            }
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RegistryError::InvalidConfiguration(format!(
                "unsupported feed scheme `{}`",
                url.scheme()
            )));
        }

        let transport: Arc<dyn HttpTransport> = Arc::new(HttpClient::default());
        let verifier: Arc<dyn HashVerifier> = Arc::new(CryptoHashProvider::default());
        let downloader = PackageDownloader::new(transport.clone(), verifier.clone())
            .cache(Arc::new(MemoryCache::new()))
            .user_agent(DEFAULT_USER_AGENT);

        Self::builder()
            .feed(FeedContext::new(url, transport))
            .verifier(verifier)
            .downloader(downloader)
            .build()
    }

    /// Opens the configured source named `source_name`, caching verified
    /// content on disk under the configured cache path.
    pub fn from_config(config: &Config, source_name: &str) -> Result<Self> {
        let source = config.get_source(source_name)?;
        let service_root = source.service_root()?;
        let headers = source_headers(source)?;
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let transport: Arc<dyn HttpTransport> = Arc::new(HttpClient::new(ClientConfig {
            user_agent: Some(user_agent.clone()),
            headers: None,
            proxy: None,
            timeout: config.timeout()?,
        }));
        let verifier: Arc<dyn HashVerifier> =
            Arc::new(CryptoHashProvider::new(config.hash_algorithm()?));
        let downloader = PackageDownloader::new(transport.clone(), verifier.clone())
            .cache(Arc::new(DiskCache::new(config.get_cache_path()?)))
            .user_agent(user_agent)
            .headers(headers);

        let mut feed = FeedContext::new(service_root, transport).with_page_size(config.page_size());
        if let Some(entity_set) = &source.entity_set {
            feed = feed.with_entity_set(entity_set.clone());
        }

        let hash_policy = if config.require_package_hash(source) {
            HashPolicy::RequireHash
        } else {
            HashPolicy::AllowUnverified
        };

        debug!(source = %source.name, url = %source.url, "opening package repository");
        Self::builder()
            .feed(feed)
            .verifier(verifier)
            .downloader(downloader)
            .hash_policy(hash_policy)
            .build()
    }

    /// All packages on the feed. Nothing is sent until the query runs.
    pub fn get_packages(&self) -> PackageQuery {
        PackageQuery::new(Arc::clone(&self.context))
    }

    /// Looks up one package version.
    pub fn find_package(&self, id: &str, version: &str) -> Result<Option<PackageEntity>> {
        self.get_packages()
            .filter(Filter::eq(Field::Id, id).and(Filter::eq(Field::Version, version)))
            .first()
    }

    pub fn context(&self) -> &RepositoryContext {
        &self.context
    }

    pub fn service_root(&self) -> &Url {
        self.context.feed.service_root()
    }

    pub fn hash_policy(&self) -> HashPolicy {
        self.context.hash_policy
    }
}

fn source_headers(source: &SourceConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in source.headers.iter().flatten() {
        let invalid = || {
            ConfigError::InvalidHeader {
                source_name: source.name.clone(),
                name: name.clone(),
            }
        };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Builder for [`PackageRepository`].
#[derive(Default)]
pub struct PackageRepositoryBuilder {
    feed: Option<FeedContext>,
    verifier: Option<Arc<dyn HashVerifier>>,
    downloader: Option<PackageDownloader>,
    hash_policy: HashPolicy,
}

impl PackageRepositoryBuilder {
    pub fn feed(mut self, feed: FeedContext) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn HashVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Without a downloader the repository can still be queried, but opening
    /// content fails with [`RegistryError::InvalidConfiguration`].
    pub fn downloader(mut self, downloader: PackageDownloader) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn hash_policy(mut self, hash_policy: HashPolicy) -> Self {
        self.hash_policy = hash_policy;
        self
    }

    /// Wires the feed's hooks and returns the repository.
    ///
    /// Every request the feed sends is prepared by
    /// [`PackageDownloader::initialize_request`], the same method the
    /// downloader applies to content requests. Every record the feed reads
    /// gets its content capability attached before it is yielded.
    pub fn build(self) -> Result<PackageRepository> {
        let mut feed = self.feed.ok_or_else(|| {
            RegistryError::InvalidConfiguration("a metadata feed is required".to_string())
        })?;
        let verifier = self.verifier.ok_or_else(|| {
            RegistryError::InvalidConfiguration("a hash verifier is required".to_string())
        })?;
        // Hooks already on the feed join the downloader's interceptors, so they
        // see content requests as well as metadata requests.
        let downloader = self.downloader.map(|downloader| {
            let downloader = feed
                .take_sending_request_hooks()
                .into_iter()
                .fold(downloader, |downloader, hook| downloader.interceptor(hook));
            Arc::new(downloader)
        });
        let hash_policy = self.hash_policy;

        match &downloader {
            Some(downloader) => {
                let downloader = Arc::clone(downloader);
                feed.on_sending_request(Arc::new(move |request: &mut OutgoingRequest| {
                    downloader.initialize_request(request)
                }));
            }
            None => debug!("no package downloader configured, content will be unavailable"),
        }
        feed.set_ignore_missing_properties(true);

        let fallback = verifier.default_algorithm();
        let context = Arc::new_cyclic(|weak: &Weak<RepositoryContext>| {
            let weak = weak.clone();
            feed.on_reading_entity(Arc::new(move |record: PackageRecord| {
                materialize(&weak, fallback, hash_policy, record)
            }));

            RepositoryContext {
                feed,
                verifier,
                downloader,
                hash_policy,
            }
        });

        Ok(PackageRepository {
            context,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pkgfeed_dl::http::HttpResponse;

    use super::*;

    struct OfflineTransport;

    impl HttpTransport for OfflineTransport {
        fn send(&self, request: OutgoingRequest) -> std::result::Result<HttpResponse, DownloadError> {
            Err(DownloadError::NotFound {
                url: request.url().to_string(),
            })
        }
    }

    fn feed() -> FeedContext {
        FeedContext::new(
            Url::parse("https://feed.example.com/api/v2/").unwrap(),
            Arc::new(OfflineTransport),
        )
    }

    fn verifier() -> Arc<dyn HashVerifier> {
        Arc::new(CryptoHashProvider::default())
    }

    #[test]
    fn test_build_requires_feed_and_verifier() {
        assert!(matches!(
            PackageRepository::builder().verifier(verifier()).build(),
            Err(RegistryError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            PackageRepository::builder().feed(feed()).build(),
            Err(RegistryError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_build_wires_hooks() {
        let downloader = PackageDownloader::new(Arc::new(OfflineTransport), verifier());
        let repo = PackageRepository::builder()
            .feed(feed())
            .verifier(verifier())
            .downloader(downloader)
            .build()
            .unwrap();

        let wired = repo.context().feed();
        assert!(wired.ignore_missing_properties());
        assert_eq!(wired.hooks().sending_request_len(), 1);
        assert!(wired.hooks().has_reading_entity());
        assert_eq!(repo.hash_policy(), HashPolicy::AllowUnverified);

        let without = PackageRepository::builder()
            .feed(feed())
            .verifier(verifier())
            .build()
            .unwrap();
        assert_eq!(without.context().feed().hooks().sending_request_len(), 0);
        assert!(without.context().downloader().is_none());
    }

    #[test]
    fn test_open_validates_url() {
        assert!(matches!(
            PackageRepository::open("not a url"),
            Err(RegistryError::InvalidUrl { .. })
        ));
        assert!(matches!(
            PackageRepository::open("ftp://feed.example.com/"),
            Err(RegistryError::InvalidConfiguration(_))
        ));

        let repo = PackageRepository::open("https://feed.example.com/api/v2").unwrap();
        assert_eq!(repo.service_root().as_str(), "https://feed.example.com/api/v2/");
        assert!(repo.context().downloader().is_some());
    }

    #[test]
    fn test_from_config() {
        let mut source = SourceConfig::new("internal", "https://internal.example.com/odata");
        source.entity_set = Some("Artifacts".into());
        source.headers = Some(BTreeMap::from([("X-Api-Key".to_string(), "secret".to_string())]));

        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_path: Some(dir.path().display().to_string()),
            require_package_hash: Some(true),
            hash_algorithm: Some("sha256".into()),
            page_size: Some(25),
            sources: vec![source],
            ..Config::default_config()
        };

        let repo = PackageRepository::from_config(&config, "internal").unwrap();
        assert_eq!(repo.context().feed().entity_set(), "Artifacts");
        assert_eq!(repo.context().feed().page_size(), 25);
        assert_eq!(repo.hash_policy(), HashPolicy::RequireHash);
        assert_eq!(
            repo.context().verifier().default_algorithm(),
            HashAlgorithm::Sha256
        );

        assert!(matches!(
            PackageRepository::from_config(&config, "missing"),
            Err(RegistryError::Config(ConfigError::UnknownSource(_)))
        ));
    }

    #[test]
    fn test_from_config_rejects_bad_header() {
        let mut source = SourceConfig::new("feed", "https://feed.example.com/");
        source.headers = Some(BTreeMap::from([("Bad Header".to_string(), "x".to_string())]));
        let config = Config {
            sources: vec![source],
            ..Config::default_config()
        };

        assert!(matches!(
            PackageRepository::from_config(&config, "feed"),
            Err(RegistryError::Config(ConfigError::InvalidHeader { .. }))
        ));
    }

    #[test]
    fn test_malformed_hash_fails_before_any_request() {
        let repo = PackageRepository::builder()
            .feed(feed())
            .verifier(verifier())
            .build()
            .unwrap();

        let record = PackageRecord {
            id: "C".into(),
            version: "1.0.0".into(),
            package_hash: Some("not-base64!".into()),
            ..Default::default()
        };
        let entity = repo.context().feed().materialize(record);
        assert!(matches!(
            entity.open_content(),
            Err(RegistryError::MalformedMetadata { .. })
        ));
    }
}

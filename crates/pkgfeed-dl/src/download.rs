use std::{
    fs,
    io::{Cursor, ErrorKind, Read as _},
    path::Path,
    sync::Arc,
};

use pkgfeed_utils::hash::{HashValue, HashVerifier};
use tracing::{debug, trace, warn};
use ureq::http::{header::USER_AGENT, HeaderMap, HeaderValue, StatusCode};
use url::Url;

use crate::{
    cache::{CacheKey, PackageCache},
    error::DownloadError,
    http::{body_read_error, OutgoingRequest},
    traits::{HttpTransport, RequestInterceptor},
    types::{Progress, ProgressCallback},
};

const CHUNK_SIZE: usize = 8192;

/// What to fetch and how to check it. Built fresh for every download.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub uri: Url,
    pub expected_hash: Option<HashValue>,
    pub use_cache: bool,
}

impl DownloadRequest {
    /// An unverified, uncached download.
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            expected_hash: None,
            use_cache: false,
        }
    }

    /// A download checked against `hash`, served from the cache when possible.
    pub fn verified(uri: Url, hash: HashValue) -> Self {
        Self {
            uri,
            expected_hash: Some(hash),
            use_cache: true,
        }
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }
}

/// Package bytes returned by a successful download.
#[derive(Debug, Clone)]
pub struct PackageContent {
    bytes: Vec<u8>,
    hash: Option<HashValue>,
    from_cache: bool,
}

impl PackageContent {
    fn new(bytes: Vec<u8>, hash: Option<HashValue>, from_cache: bool) -> Self {
        Self {
            bytes,
            hash,
            from_cache,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn reader(&self) -> Cursor<&[u8]> {
        Cursor::new(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The digest the content was verified against, if any.
    pub fn hash(&self) -> Option<&HashValue> {
        self.hash.as_ref()
    }

    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Writes the content to `path`, creating parent directories as needed.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), DownloadError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &self.bytes)?;
        Ok(())
    }
}

/// Fetches package content, verifying it against an advertised digest when one exists.
///
/// Failures are returned as they happen; retrying is left to the caller.
pub struct PackageDownloader {
    transport: Arc<dyn HttpTransport>,
    verifier: Arc<dyn HashVerifier>,
    cache: Option<Arc<dyn PackageCache>>,
    user_agent: Option<String>,
    headers: HeaderMap,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl PackageDownloader {
    /// Creates a downloader with no cache, no extra headers and no interceptors.
    pub fn new(transport: Arc<dyn HttpTransport>, verifier: Arc<dyn HashVerifier>) -> Self {
        Self {
            transport,
            verifier,
            cache: None,
            user_agent: None,
            headers: HeaderMap::new(),
            interceptors: Vec::new(),
            on_progress: None,
        }
    }

    /// Sets the cache used for verified downloads requested with `use_cache`.
    pub fn cache(mut self, cache: Arc<dyn PackageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the `User-Agent` header written on every request.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Adds headers written on every request, before interceptors run.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Registers an interceptor. Interceptors run in registration order.
    pub fn interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Registers a progress callback for network downloads.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use pkgfeed_dl::{download::PackageDownloader, http_client::HttpClient, types::Progress};
    /// use pkgfeed_utils::hash::CryptoHashProvider;
    ///
    /// let _downloader = PackageDownloader::new(
    ///     Arc::new(HttpClient::default()),
    ///     Arc::new(CryptoHashProvider::default()),
    /// )
    /// .progress(|event: Progress| match event {
    ///     Progress::Starting { total } => eprintln!("starting, total={}", total),
    ///     Progress::Chunk { current, total } => eprintln!("{}/{}", current, total),
    ///     Progress::Complete { total } => eprintln!("complete, total={}", total),
    /// });
    /// ```
    pub fn progress<F>(mut self, on_progress: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    pub fn verifier(&self) -> &Arc<dyn HashVerifier> {
        &self.verifier
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Prepares a request for sending: user agent, default headers, then interceptors.
    ///
    /// This is the only place outgoing requests are initialized. The metadata feed
    /// calls it for its own requests too.
    pub fn initialize_request(&self, request: &mut OutgoingRequest) {
        if let Some(user_agent) = &self.user_agent {
            match HeaderValue::from_str(user_agent) {
                Ok(value) => request.set_header(USER_AGENT, value),
                Err(_) => warn!(user_agent = %user_agent, "ignoring invalid user agent"),
            }
        }

        for (name, value) in self.headers.iter() {
            request.set_header(name.clone(), value.clone());
        }

        for interceptor in &self.interceptors {
            interceptor.sending_request(request);
        }
    }

    /// Downloads the content described by `request`.
    ///
    /// With an expected hash the body is hashed while it streams and compared once
    /// complete; on mismatch nothing is returned or cached. Without one the body is
    /// returned as received and the cache is not touched.
    ///
    /// # Errors
    ///
    /// * [`DownloadError::Transport`] if the server cannot be reached or the
    ///   connection drops while the body is read
    /// * [`DownloadError::NotFound`] on 404 or 410
    /// * [`DownloadError::HttpError`] on any other non-success status
    /// * [`DownloadError::IntegrityCheckFailed`] if the digest does not match
    pub fn download_package(
        &self,
        request: &DownloadRequest,
    ) -> Result<PackageContent, DownloadError> {
        let Some(expected) = request.expected_hash.as_ref() else {
            debug!(url = %request.uri, "downloading package without hash verification");
            let bytes = self.fetch(&request.uri, None)?;
            return Ok(PackageContent::new(bytes, None, false));
        };

        let cache = self.cache.as_ref().filter(|_| request.use_cache);
        let key = CacheKey::new(&request.uri, expected);

        if let Some(cache) = cache {
            if let Some(bytes) = self.read_cached(cache.as_ref(), &key) {
                debug!(url = %request.uri, hash = %expected, "serving package from cache");
                return Ok(PackageContent::new(bytes, Some(expected.clone()), true));
            }
        }

        let bytes = self.fetch(&request.uri, Some(expected))?;

        if let Some(cache) = cache {
            if let Err(err) = cache.put(&key, &bytes) {
                warn!(url = %request.uri, error = %err, "failed to cache verified package");
            }
        }

        Ok(PackageContent::new(bytes, Some(expected.clone()), false))
    }

    /// Returns a cache entry only if it still matches its key's digest.
    fn read_cached(&self, cache: &dyn PackageCache, key: &CacheKey) -> Option<Vec<u8>> {
        let bytes = match cache.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(url = key.uri(), error = %err, "failed to read package cache");
                return None;
            }
        };

        let expected = key.hash();
        let computed = match self
            .verifier
            .compute(expected.algorithm(), &mut Cursor::new(&bytes))
        {
            Ok(computed) => computed,
            Err(err) => {
                warn!(url = key.uri(), error = %err, "failed to hash cached package");
                return None;
            }
        };

        if self.verifier.verify(&computed, expected.as_bytes()) {
            return Some(bytes);
        }

        warn!(url = key.uri(), "evicting corrupt cache entry");
        if let Err(err) = cache.remove(key) {
            warn!(url = key.uri(), error = %err, "failed to evict cache entry");
        }
        None
    }

    fn fetch(&self, uri: &Url, expected: Option<&HashValue>) -> Result<Vec<u8>, DownloadError> {
        let mut request = OutgoingRequest::get(uri.clone());
        self.initialize_request(&mut request);

        let resp = self.transport.send(request)?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(DownloadError::NotFound {
                url: uri.to_string(),
            });
        }
        if !status.is_success() {
            return Err(DownloadError::HttpError {
                status: status.as_u16(),
                url: uri.to_string(),
            });
        }

        let total = resp.content_length().unwrap_or(0);
        self.emit(Progress::Starting {
            total,
        });

        let mut hasher = expected.map(|hash| self.verifier.hasher(hash.algorithm()));
        let mut reader = resp.into_reader();
        let mut buffer = [0u8; CHUNK_SIZE];
        let mut content = Vec::with_capacity(total.min(64 * 1024 * 1024) as usize);

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(body_read_error(uri, err)),
            };
            if n == 0 {
                break;
            }

            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&buffer[..n]);
            }
            content.extend_from_slice(&buffer[..n]);

            self.emit(Progress::Chunk {
                current: content.len() as u64,
                total,
            });
        }

        if let (Some(hasher), Some(expected)) = (hasher, expected) {
            let computed = hasher.finalize();
            if !self.verifier.verify(&computed, expected.as_bytes()) {
                let actual = HashValue::new(expected.algorithm(), computed)
                    .map(|hash| hash.to_base64())
                    .unwrap_or_default();
                drop(content);
                return Err(DownloadError::IntegrityCheckFailed {
                    url: uri.to_string(),
                    expected: expected.to_base64(),
                    actual,
                });
            }
            trace!(url = %uri, hash = %expected, "package hash verified");
        }

        self.emit(Progress::Complete {
            total: content.len() as u64,
        });

        Ok(content)
    }

    fn emit(&self, event: Progress) {
        if let Some(cb) = &self.on_progress {
            cb(event);
        }
    }
}

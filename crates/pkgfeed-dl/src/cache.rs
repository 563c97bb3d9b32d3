//! Content caches keyed by `(uri, hash)`.
//!
//! Only verified content is ever stored: the key carries the digest the content
//! was checked against, so a URI without an advertised hash never gets an entry.

use std::{
    collections::HashMap,
    fmt::Write as _,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        PoisonError, RwLock,
    },
};

use pkgfeed_utils::hash::{HashAlgorithm, HashValue, Hasher};
use url::Url;

use crate::error::DownloadError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    uri: String,
    hash: HashValue,
}

impl CacheKey {
    pub fn new(uri: &Url, hash: &HashValue) -> Self {
        Self {
            uri: uri.to_string(),
            hash: hash.clone(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn hash(&self) -> &HashValue {
        &self.hash
    }

    /// Stable file name: `<algorithm>-<digest hex>-<uri fingerprint>`.
    pub fn file_name(&self) -> String {
        let mut uri_hasher = Hasher::new(HashAlgorithm::Sha256);
        uri_hasher.update(self.uri.as_bytes());
        let uri_digest = uri_hasher.finalize();

        format!(
            "{}-{}-{}",
            self.hash.algorithm().name().to_ascii_lowercase(),
            to_hex(self.hash.as_bytes()),
            to_hex(&uri_digest[..8])
        )
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Storage for verified package content.
///
/// Concurrent `put`s for the same key may race; the last writer wins.
pub trait PackageCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, DownloadError>;
    fn put(&self, key: &CacheKey, content: &[u8]) -> Result<(), DownloadError>;
    fn remove(&self, key: &CacheKey) -> Result<(), DownloadError>;
}

/// Process-local cache; entries live as long as the cache value.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PackageCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, DownloadError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn put(&self, key: &CacheKey, content: &[u8]) -> Result<(), DownloadError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), content.to_vec());
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<(), DownloadError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One file per entry under `root`, written atomically via rename.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }
}

fn cache_error(action: &'static str, path: &Path, source: std::io::Error) -> DownloadError {
    DownloadError::Cache {
        action,
        path: path.display().to_string(),
        source,
    }
}

impl PackageCache for DiskCache {
    fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, DownloadError> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(cache_error("read", &path, err)),
        }
    }

    fn put(&self, key: &CacheKey, content: &[u8]) -> Result<(), DownloadError> {
        fs::create_dir_all(&self.root).map_err(|err| cache_error("create", &self.root, err))?;

        let path = self.entry_path(key);
        let tmp_path = self.root.join(format!(
            ".{}.{}.{}.tmp",
            key.file_name(),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&tmp_path, content).map_err(|err| cache_error("write", &tmp_path, err))?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(cache_error("write", &path, err));
        }
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<(), DownloadError> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(cache_error("remove", &path, err)),
        }
    }
}

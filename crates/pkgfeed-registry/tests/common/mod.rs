//! In-memory feed server shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use pkgfeed_dl::{
    cache::{MemoryCache, PackageCache},
    download::PackageDownloader,
    error::DownloadError,
    http::{HttpResponse, OutgoingRequest},
    traits::HttpTransport,
};
use pkgfeed_registry::{FeedContext, HashPolicy, PackageRepository};
use pkgfeed_utils::hash::{CryptoHashProvider, HashVerifier};
use serde_json::{json, Value};
use ureq::http::{header::USER_AGENT, HeaderValue, StatusCode};
use url::Url;

pub const ROOT: &str = "https://feed.test/api/";
pub const USER_AGENT_VALUE: &str = "pkgfeed-test/1.0";

/// Body of `hello world`, and its SHA-1 digest.
pub const HELLO: &[u8] = b"hello world";
pub const HELLO_SHA1: &str = "Kq5sNclPz7QV2+lfQIuc6R7oRu0=";

/// Serves canned responses keyed by path, or by path plus decoded query.
///
/// Unknown targets get a 404. Every request is recorded.
#[derive(Default)]
pub struct MockFeed {
    routes: Mutex<HashMap<String, (StatusCode, Vec<u8>)>>,
    requests: Mutex<Vec<OutgoingRequest>>,
}

impl MockFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, target: &str, status: StatusCode, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(target.to_string(), (status, body.into()));
    }

    pub fn json(&self, target: &str, body: Value) {
        self.route(target, StatusCode::OK, body.to_string());
    }

    pub fn remove(&self, target: &str) {
        self.routes.lock().unwrap().remove(target);
    }

    pub fn requests(&self) -> Vec<OutgoingRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests whose path equals `path`, whatever their query.
    pub fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.url().path() == path)
            .count()
    }

    /// `path?name=value&..` with the query decoded, for matching and assertions.
    pub fn target(url: &Url) -> String {
        let pairs: Vec<String> = url
            .query_pairs()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        if pairs.is_empty() {
            url.path().to_string()
        } else {
            format!("{}?{}", url.path(), pairs.join("&"))
        }
    }
}

impl HttpTransport for MockFeed {
    fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, DownloadError> {
        let full = Self::target(request.url());
        let path = request.url().path().to_string();
        self.requests.lock().unwrap().push(request);

        let routes = self.routes.lock().unwrap();
        let response = routes
            .get(&full)
            .or_else(|| routes.get(&path))
            .map(|(status, body)| HttpResponse::from_bytes(*status, body.clone()))
            .unwrap_or_else(|| HttpResponse::from_bytes(StatusCode::NOT_FOUND, Vec::new()));
        Ok(response)
    }
}

/// A repository wired to a [`MockFeed`], counting every run of the
/// outgoing-request hook.
pub struct Harness {
    pub feed: Arc<MockFeed>,
    pub cache: Arc<MemoryCache>,
    pub hook_calls: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            feed: MockFeed::new(),
            cache: Arc::new(MemoryCache::new()),
            hook_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn hook_calls(&self) -> usize {
        self.hook_calls.load(Ordering::SeqCst)
    }

    pub fn downloader(&self) -> PackageDownloader {
        let counter = self.hook_calls.clone();
        PackageDownloader::new(self.transport(), verifier())
            .cache(self.cache.clone() as Arc<dyn PackageCache>)
            .user_agent(USER_AGENT_VALUE)
            .interceptor(Arc::new(move |_: &mut OutgoingRequest| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
    }

    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        self.feed.clone()
    }

    pub fn feed_context(&self) -> FeedContext {
        FeedContext::new(Url::parse(ROOT).unwrap(), self.transport())
    }

    pub fn repository(&self, policy: HashPolicy) -> PackageRepository {
        PackageRepository::builder()
            .feed(self.feed_context())
            .verifier(verifier())
            .downloader(self.downloader())
            .hash_policy(policy)
            .build()
            .unwrap()
    }

    /// Checks that every recorded request went through `initialize_request`.
    pub fn assert_all_requests_initialized(&self) {
        let requests = self.feed.requests();
        assert_eq!(self.hook_calls(), requests.len());
        for request in requests {
            assert_eq!(
                request.headers().get(USER_AGENT),
                Some(&HeaderValue::from_static(USER_AGENT_VALUE)),
                "request to {} was not initialized",
                request.url()
            );
        }
    }
}

pub fn verifier() -> Arc<dyn HashVerifier> {
    Arc::new(CryptoHashProvider::default())
}

pub fn entity_path(id: &str, version: &str) -> String {
    format!("/api/Packages(Id='{id}',Version='{version}')")
}

pub fn content_path(id: &str, version: &str) -> String {
    format!("/api/package/{id}/{version}")
}

/// Routes the entity document of `id` to a verbose-JSON media link.
pub fn serve_entity(feed: &MockFeed, id: &str, version: &str) {
    feed.json(
        &entity_path(id, version),
        json!({
            "d": {
                "__metadata": {
                    "uri": format!("https://feed.test{}", entity_path(id, version)),
                    "media_src": format!("https://feed.test{}", content_path(id, version))
                },
                "Id": id,
                "Version": version
            }
        }),
    );
}

/// The A/B/C feed: A advertises a valid SHA-1, B an empty hash, C garbage.
pub fn serve_abc(feed: &MockFeed) {
    feed.json(
        "/api/Packages",
        json!({
            "d": {
                "results": [
                    {
                        "__metadata": { "type": "NuGetGallery.V2FeedPackage" },
                        "Id": "A",
                        "Version": "1.0.0",
                        "PackageHash": HELLO_SHA1,
                        "Copyright": "ignored by the repository"
                    },
                    { "Id": "B", "Version": "1.0.0", "PackageHash": "" },
                    { "Id": "C", "Version": "1.0.0", "PackageHash": "not-base64!" }
                ]
            }
        }),
    );

    for id in ["A", "B", "C"] {
        serve_entity(feed, id, "1.0.0");
    }
    feed.route(&content_path("A", "1.0.0"), StatusCode::OK, HELLO);
    feed.route(&content_path("B", "1.0.0"), StatusCode::OK, b"unverified bytes".to_vec());
    feed.route(&content_path("C", "1.0.0"), StatusCode::OK, HELLO);
}

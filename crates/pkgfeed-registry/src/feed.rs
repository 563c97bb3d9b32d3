//! The OData metadata feed.
//!
//! [`FeedContext`] knows how to address the package entity set, send requests
//! through its hooks, and parse the two JSON collection envelopes feeds use:
//!
//! - `{"value": [...], "@odata.nextLink": "..."}`
//! - `{"d": {"results": [...], "__next": "..."}}` or `{"d": [...]}`

use std::{fmt, sync::Arc};

use pkgfeed_dl::{
    error::DownloadError,
    http::{HttpResponse, OutgoingRequest},
    traits::{HttpTransport, RequestInterceptor},
};
use serde_json::Value;
use tracing::{debug, trace};
use ureq::http::{header::ACCEPT, HeaderValue, StatusCode};
use url::Url;

use crate::{
    constants::{DEFAULT_PAGE_SIZE, PACKAGE_ENTITY_SET},
    error::{RegistryError, Result},
    hooks::{EntityMaterializer, FeedHooks},
    package::{EntityKey, PackageEntity, PackageRecord},
};

/// One page of a collection response.
#[derive(Debug)]
pub struct FeedPage {
    /// Records in source order. A record that failed to parse is an `Err`.
    pub records: Vec<Result<PackageRecord>>,
    pub next_link: Option<Url>,
}

/// Connection to one feed: where it lives, how to reach it, and the hooks that
/// run around its requests and entities.
pub struct FeedContext {
    service_root: Url,
    entity_set: String,
    transport: Arc<dyn HttpTransport>,
    hooks: FeedHooks,
    ignore_missing_properties: bool,
    page_size: usize,
}

impl FeedContext {
    /// Creates a feed rooted at `service_root`.
    ///
    /// Unknown record properties are rejected until
    /// [`set_ignore_missing_properties`](Self::set_ignore_missing_properties)
    /// turns tolerance on.
    pub fn new(service_root: Url, transport: Arc<dyn HttpTransport>) -> Self {
        let mut service_root = service_root;
        if !service_root.path().ends_with('/') {
            let path = format!("{}/", service_root.path());
            service_root.set_path(&path);
        }

        Self {
            service_root,
            entity_set: PACKAGE_ENTITY_SET.to_string(),
            transport,
            hooks: FeedHooks::default(),
            ignore_missing_properties: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_entity_set(mut self, entity_set: impl Into<String>) -> Self {
        self.entity_set = entity_set.into();
        self
    }

    /// Sets the default number of entities requested per page. Zero is ignored.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        if page_size > 0 {
            self.page_size = page_size;
        }
        self
    }

    /// Adds a hook that runs on every request sent for this feed.
    ///
    /// Once the feed is handed to a repository with a downloader, these hooks
    /// move to the downloader and also run on content requests.
    pub fn on_sending_request(&mut self, hook: Arc<dyn RequestInterceptor>) {
        self.hooks.on_sending_request(hook);
    }

    pub(crate) fn take_sending_request_hooks(&mut self) -> Vec<Arc<dyn RequestInterceptor>> {
        self.hooks.take_sending_request()
    }

    pub fn on_reading_entity(&mut self, hook: Arc<dyn EntityMaterializer>) {
        self.hooks.on_reading_entity(hook);
    }

    pub fn set_ignore_missing_properties(&mut self, ignore: bool) {
        self.ignore_missing_properties = ignore;
    }

    pub fn ignore_missing_properties(&self) -> bool {
        self.ignore_missing_properties
    }

    pub fn service_root(&self) -> &Url {
        &self.service_root
    }

    pub fn entity_set(&self) -> &str {
        &self.entity_set
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn hooks(&self) -> &FeedHooks {
        &self.hooks
    }

    pub fn collection_url(&self) -> Result<Url> {
        append_segments(&self.service_root, &[&self.entity_set])
    }

    pub fn count_url(&self) -> Result<Url> {
        append_segments(&self.service_root, &[&self.entity_set, "$count"])
    }

    /// `{root}/{set}(Id='..',Version='..')`, with single quotes doubled.
    pub fn entity_url(&self, key: &EntityKey) -> Result<Url> {
        let segment = format!(
            "{}(Id='{}',Version='{}')",
            self.entity_set,
            quote(&key.id),
            quote(&key.version)
        );
        append_segments(&self.service_root, &[&segment])
    }

    /// Fetches and parses one collection page.
    ///
    /// A page that cannot be parsed at all fails; a single unparseable record
    /// is returned as an `Err` entry next to its siblings.
    pub fn fetch_page(&self, url: &Url) -> Result<FeedPage> {
        let resp = self.send(url.clone())?;
        ensure_success(resp.status(), url)?;

        let body: Value = resp.read_json(url).map_err(|err| body_error(url, err))?;
        self.parse_page(url, body)
    }

    /// Number of entities matching `url`, a `$count` URL.
    pub fn count(&self, url: &Url) -> Result<u64> {
        let resp = self.send(url.clone())?;
        ensure_success(resp.status(), url)?;

        let text = resp.read_to_string(url).map_err(|err| body_error(url, err))?;
        let text = text.trim().trim_start_matches('\u{feff}');
        text.parse::<u64>().map_err(|_| {
            RegistryError::malformed(url.as_str(), format!("expected an integer count, got `{text}`"))
        })
    }

    /// Resolves where the content of `key` can be read from.
    ///
    /// Always asks the feed; nothing is remembered between calls.
    pub fn read_stream_uri(&self, key: &EntityKey) -> Result<Url> {
        let entity_url = self.entity_url(key)?;
        let resp = self.send(entity_url.clone())?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(RegistryError::NotFound {
                resource: format!("package {key}"),
            });
        }
        ensure_success(status, &entity_url)?;

        let body: Value = resp
            .read_json(&entity_url)
            .map_err(|err| body_error(&entity_url, err))?;
        let entity = body.get("d").unwrap_or(&body);

        match media_link(entity) {
            Some(link) => {
                let uri = self.service_root.join(link).map_err(|source| {
                    RegistryError::InvalidUrl {
                        url: link.to_string(),
                        source,
                    }
                })?;
                trace!(package = %key, url = %uri, "resolved content link");
                Ok(uri)
            }
            None => {
                debug!(package = %key, "no media link advertised, using $value");
                append_segments(&entity_url, &["$value"])
            }
        }
    }

    pub(crate) fn materialize(&self, record: PackageRecord) -> PackageEntity {
        self.hooks.reading_entity(record)
    }

    fn send(&self, url: Url) -> Result<HttpResponse> {
        let mut request = OutgoingRequest::get(url);
        request.set_header(ACCEPT, HeaderValue::from_static("application/json"));
        self.hooks.sending_request(&mut request);

        let url = request.url().to_string();
        trace!(url = %url, "sending feed request");
        self.transport.send(request).map_err(|source| {
            RegistryError::SourceUnavailable {
                url,
                source,
            }
        })
    }

    fn parse_page(&self, url: &Url, body: Value) -> Result<FeedPage> {
        let (items, next) = split_envelope(body)
            .ok_or_else(|| RegistryError::malformed(url.as_str(), "expected an OData collection"))?;

        let next_link = next
            .map(|link| {
                url.join(&link).map_err(|err| {
                    RegistryError::malformed(url.as_str(), format!("invalid next link `{link}`: {err}"))
                })
            })
            .transpose()?;

        let records = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                PackageRecord::from_json(item, self.ignore_missing_properties).map_err(|reason| {
                    RegistryError::malformed(format!("record {index} of {url}"), reason)
                })
            })
            .collect();

        Ok(FeedPage {
            records,
            next_link,
        })
    }
}

impl fmt::Debug for FeedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedContext")
            .field("service_root", &self.service_root.as_str())
            .field("entity_set", &self.entity_set)
            .field("hooks", &self.hooks)
            .field("ignore_missing_properties", &self.ignore_missing_properties)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

/// A body that broke off is the source's fault; one that arrived but does not
/// parse is the metadata's.
fn body_error(url: &Url, err: DownloadError) -> RegistryError {
    match err {
        DownloadError::Transport { .. } => RegistryError::SourceUnavailable {
            url: url.to_string(),
            source: err,
        },
        err => RegistryError::malformed(url.as_str(), err),
    }
}

fn quote(value: &str) -> String {
    value.replace('\'', "''")
}

fn append_segments(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.set_query(None);
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            RegistryError::InvalidConfiguration(format!("{base} cannot be used as a base URL"))
        })?;
        path.pop_if_empty().extend(segments);
    }
    Ok(url)
}

fn ensure_success(status: StatusCode, url: &Url) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    Err(RegistryError::SourceUnavailable {
        url: url.to_string(),
        source: DownloadError::HttpError {
            status: status.as_u16(),
            url: url.to_string(),
        },
    })
}

fn into_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

/// Splits a collection body into its items and next link.
fn split_envelope(body: Value) -> Option<(Vec<Value>, Option<String>)> {
    let Value::Object(mut root) = body else {
        return None;
    };

    if let Some(Value::Array(items)) = root.remove("value") {
        let next = root
            .remove("@odata.nextLink")
            .or_else(|| root.remove("odata.nextLink"))
            .and_then(into_string);
        return Some((items, next));
    }

    match root.remove("d")? {
        Value::Array(items) => Some((items, None)),
        Value::Object(mut d) => {
            let Value::Array(items) = d.remove("results")? else {
                return None;
            };
            Some((items, d.remove("__next").and_then(into_string)))
        }
        _ => None,
    }
}

fn media_link(entity: &Value) -> Option<&str> {
    entity
        .get("@odata.mediaReadLink")
        .or_else(|| entity.get("odata.mediaReadLink"))
        .or_else(|| entity.pointer("/__metadata/media_src"))
        .or_else(|| entity.pointer("/content/src"))
        .and_then(Value::as_str)
        .filter(|link| !link.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    /// Answers every request with the same status and body.
    struct StaticTransport {
        status: StatusCode,
        body: String,
        seen: Mutex<Vec<OutgoingRequest>>,
    }

    impl StaticTransport {
        fn new(status: StatusCode, body: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                status,
                body: body.into(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl HttpTransport for StaticTransport {
        fn send(&self, request: OutgoingRequest) -> std::result::Result<HttpResponse, DownloadError> {
            self.seen.lock().unwrap().push(request);
            Ok(HttpResponse::from_bytes(self.status, self.body.clone().into_bytes()))
        }
    }

    fn feed(transport: Arc<StaticTransport>) -> FeedContext {
        FeedContext::new(Url::parse("https://feed.example.com/api/v2").unwrap(), transport)
    }

    #[test]
    fn test_urls() {
        let feed = feed(StaticTransport::new(StatusCode::OK, ""));

        assert_eq!(feed.service_root().as_str(), "https://feed.example.com/api/v2/");
        assert_eq!(
            feed.collection_url().unwrap().as_str(),
            "https://feed.example.com/api/v2/Packages"
        );
        assert_eq!(
            feed.count_url().unwrap().as_str(),
            "https://feed.example.com/api/v2/Packages/$count"
        );
        assert_eq!(
            feed.entity_url(&EntityKey::new("O'Reilly", "1.0.0")).unwrap().as_str(),
            "https://feed.example.com/api/v2/Packages(Id='O''Reilly',Version='1.0.0')"
        );

        let custom = feed.with_entity_set("Artifacts");
        assert_eq!(
            custom.collection_url().unwrap().as_str(),
            "https://feed.example.com/api/v2/Artifacts"
        );
    }

    #[test]
    fn test_entity_url_escapes_path_characters() {
        let feed = feed(StaticTransport::new(StatusCode::OK, ""));
        let url = feed.entity_url(&EntityKey::new("a/b?c", "1.0")).unwrap();
        assert_eq!(url.path(), "/api/v2/Packages(Id='a%2Fb%3Fc',Version='1.0')");
        assert!(url.query().is_none());
    }

    #[test]
    fn test_parse_v4_envelope() {
        let feed = feed(StaticTransport::new(StatusCode::OK, ""));
        let url = feed.collection_url().unwrap();

        let page = feed
            .parse_page(
                &url,
                json!({
                    "value": [
                        { "Id": "A", "Version": "1.0.0" },
                        { "Id": "B" }
                    ],
                    "@odata.nextLink": "Packages?$skip=2"
                }),
            )
            .unwrap();

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].as_ref().unwrap().id, "A");
        assert!(matches!(
            page.records[1],
            Err(RegistryError::MalformedMetadata { .. })
        ));
        assert_eq!(
            page.next_link.unwrap().as_str(),
            "https://feed.example.com/api/v2/Packages?$skip=2"
        );
    }

    #[test]
    fn test_parse_verbose_envelopes() {
        let feed = feed(StaticTransport::new(StatusCode::OK, ""));
        let url = feed.collection_url().unwrap();

        let page = feed
            .parse_page(
                &url,
                json!({ "d": { "results": [{ "Id": "A", "Version": "1" }], "__next": "https://feed.example.com/api/v2/Packages?page=2" } }),
            )
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.next_link.is_some());

        let page = feed
            .parse_page(&url, json!({ "d": [{ "Id": "A", "Version": "1" }] }))
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.next_link.is_none());

        for body in [json!([]), json!({ "d": { "count": 1 } }), json!({ "items": [] })] {
            assert!(matches!(
                feed.parse_page(&url, body),
                Err(RegistryError::MalformedMetadata { .. })
            ));
        }
    }

    #[test]
    fn test_unknown_properties_follow_setting() {
        let mut feed = feed(StaticTransport::new(StatusCode::OK, ""));
        let url = feed.collection_url().unwrap();
        let body = json!({ "value": [{ "Id": "A", "Version": "1", "Copyright": "x" }] });

        let page = feed.parse_page(&url, body.clone()).unwrap();
        assert!(page.records[0].is_err());

        feed.set_ignore_missing_properties(true);
        let page = feed.parse_page(&url, body).unwrap();
        assert!(page.records[0].is_ok());
    }

    #[test]
    fn test_fetch_page_runs_hooks_and_sets_accept() {
        let transport = StaticTransport::new(StatusCode::OK, r#"{"value":[]}"#);
        let mut feed = feed(transport.clone());
        feed.on_sending_request(Arc::new(|req: &mut OutgoingRequest| {
            req.set_header(
                ureq::http::header::AUTHORIZATION,
                HeaderValue::from_static("Bearer feed"),
            );
        }));

        let page = feed.fetch_page(&feed.collection_url().unwrap()).unwrap();
        assert!(page.records.is_empty());

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].headers().get(ACCEPT).unwrap(), "application/json");
        assert_eq!(
            seen[0].headers().get(ureq::http::header::AUTHORIZATION).unwrap(),
            "Bearer feed"
        );
    }

    #[test]
    fn test_fetch_page_errors() {
        let feed_503 = feed(StaticTransport::new(StatusCode::SERVICE_UNAVAILABLE, ""));
        let err = feed_503
            .fetch_page(&feed_503.collection_url().unwrap())
            .unwrap_err();
        assert!(matches!(err, RegistryError::SourceUnavailable { .. }));
        assert!(err.is_retryable());

        let feed_html = feed(StaticTransport::new(StatusCode::OK, "<html></html>"));
        assert!(matches!(
            feed_html.fetch_page(&feed_html.collection_url().unwrap()),
            Err(RegistryError::MalformedMetadata { .. })
        ));
    }

    /// Accepts every request, then resets the connection mid-body.
    struct ResetTransport;

    struct ResetBody;

    impl std::io::Read for ResetBody {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::ConnectionReset.into())
        }
    }

    impl HttpTransport for ResetTransport {
        fn send(&self, _: OutgoingRequest) -> std::result::Result<HttpResponse, DownloadError> {
            Ok(HttpResponse::new(
                StatusCode::OK,
                ureq::http::HeaderMap::new(),
                Box::new(ResetBody),
            ))
        }
    }

    #[test]
    fn test_reset_body_is_source_unavailable() {
        let feed = FeedContext::new(
            Url::parse("https://feed.example.com/api/v2").unwrap(),
            Arc::new(ResetTransport),
        );

        let errors = [
            feed.fetch_page(&feed.collection_url().unwrap()).unwrap_err(),
            feed.count(&feed.count_url().unwrap()).unwrap_err(),
            feed.read_stream_uri(&EntityKey::new("A", "1.0.0")).unwrap_err(),
        ];
        for err in errors {
            assert!(matches!(err, RegistryError::SourceUnavailable { .. }), "{err:?}");
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn test_count() {
        let feed_ok = feed(StaticTransport::new(StatusCode::OK, "\u{feff}42\n"));
        assert_eq!(feed_ok.count(&feed_ok.count_url().unwrap()).unwrap(), 42);

        let feed_bad = feed(StaticTransport::new(StatusCode::OK, "lots"));
        assert!(matches!(
            feed_bad.count(&feed_bad.count_url().unwrap()),
            Err(RegistryError::MalformedMetadata { .. })
        ));
    }

    #[test]
    fn test_read_stream_uri_link_forms() {
        let key = EntityKey::new("A", "1.0.0");
        let cases = [
            (
                json!({ "@odata.mediaReadLink": "content/A/1.0.0" }),
                "https://feed.example.com/api/v2/content/A/1.0.0",
            ),
            (
                json!({ "d": { "__metadata": { "media_src": "https://cdn.example.com/A.1.0.0.nupkg" } } }),
                "https://cdn.example.com/A.1.0.0.nupkg",
            ),
            (
                json!({ "content": { "type": "application/zip", "src": "/files/A.nupkg" } }),
                "https://feed.example.com/files/A.nupkg",
            ),
            (
                json!({ "Id": "A", "Version": "1.0.0" }),
                "https://feed.example.com/api/v2/Packages(Id='A',Version='1.0.0')/$value",
            ),
        ];

        for (body, expected) in cases {
            let feed = feed(StaticTransport::new(StatusCode::OK, body.to_string()));
            assert_eq!(feed.read_stream_uri(&key).unwrap().as_str(), expected);
        }
    }

    #[test]
    fn test_read_stream_uri_not_found() {
        let feed = feed(StaticTransport::new(StatusCode::NOT_FOUND, ""));
        assert!(matches!(
            feed.read_stream_uri(&EntityKey::new("A", "1.0.0")),
            Err(RegistryError::NotFound { .. })
        ));
    }
}

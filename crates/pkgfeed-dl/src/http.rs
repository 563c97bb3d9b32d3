use std::{
    fmt,
    io::{self, Cursor, Read},
};

use serde::de::DeserializeOwned;
use ureq::http::{
    header::{CONTENT_LENGTH, CONTENT_RANGE},
    HeaderMap, HeaderName, HeaderValue, StatusCode,
};
use url::Url;

use crate::error::DownloadError;

/// A GET request that has not been sent yet.
///
/// Interceptors receive it by `&mut` and may add or replace headers before it
/// reaches the transport.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    url: Url,
    headers: HeaderMap,
}

impl OutgoingRequest {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Sets a header, replacing any previous value with the same name.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn into_parts(self) -> (Url, HeaderMap) {
        (self.url, self.headers)
    }
}

/// Status, headers and a streaming body returned by a transport.
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Box<dyn Read + Send>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Box<dyn Read + Send>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Convenience constructor for in-memory bodies.
    pub fn from_bytes(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        let body: Vec<u8> = body.into();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
        Self::new(status, headers, Box::new(Cursor::new(body)))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Total size of the body, from `Content-Range` or `Content-Length`.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_RANGE)
            .and_then(|h| h.to_str().ok())
            .and_then(|range| range.rsplit_once('/').and_then(|(_, tot)| tot.parse().ok()))
            .or_else(|| {
                self.headers
                    .get(CONTENT_LENGTH)
                    .and_then(|h| h.to_str().ok())
                    .and_then(|len| len.parse::<u64>().ok())
            })
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.body
    }

    /// Reads the whole body as text.
    ///
    /// A connection failure while reading is a [`DownloadError::Transport`];
    /// a body that is not UTF-8 is a [`DownloadError::InvalidResponse`].
    pub fn read_to_string(self, url: &Url) -> Result<String, DownloadError> {
        let mut text = String::new();
        self.into_reader()
            .read_to_string(&mut text)
            .map_err(|err| match err.kind() {
                io::ErrorKind::InvalidData => {
                    DownloadError::InvalidResponse {
                        url: url.to_string(),
                        reason: err.to_string(),
                    }
                }
                _ => body_read_error(url, err),
            })?;
        Ok(text)
    }

    /// Deserializes the body as JSON.
    ///
    /// Errors split the same way as [`read_to_string`](Self::read_to_string).
    pub fn read_json<T: DeserializeOwned>(self, url: &Url) -> Result<T, DownloadError> {
        serde_json::from_reader(self.into_reader()).map_err(|err| {
            if err.is_io() {
                body_read_error(url, err.into())
            } else {
                DownloadError::InvalidResponse {
                    url: url.to_string(),
                    reason: err.to_string(),
                }
            }
        })
    }
}

/// A response body that stopped before it was complete.
pub(crate) fn body_read_error(url: &Url, err: io::Error) -> DownloadError {
    DownloadError::transport(url.as_str(), ureq::Error::Io(err))
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use ureq::http::header::{AUTHORIZATION, USER_AGENT};

    use super::*;

    #[test]
    fn test_outgoing_request_headers() {
        let url = Url::parse("https://example.com/Packages").unwrap();
        let mut req = OutgoingRequest::get(url.clone());
        assert!(req.headers().is_empty());

        req.set_header(USER_AGENT, HeaderValue::from_static("one"));
        req.set_header(USER_AGENT, HeaderValue::from_static("two"));
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer x"));

        assert_eq!(req.headers().get(USER_AGENT).unwrap(), "two");
        assert_eq!(req.headers().len(), 2);

        let (parts_url, headers) = req.into_parts();
        assert_eq!(parts_url, url);
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer x");
    }

    #[test]
    fn test_content_length_prefers_range() {
        let mut resp = HttpResponse::from_bytes(StatusCode::OK, "abc");
        assert_eq!(resp.content_length(), Some(3));

        resp.headers
            .insert(CONTENT_RANGE, HeaderValue::from_static("bytes 0-2/10"));
        assert_eq!(resp.content_length(), Some(10));
    }

    #[test]
    fn test_read_json_and_text() {
        let url = Url::parse("https://example.com/").unwrap();

        let resp = HttpResponse::from_bytes(StatusCode::OK, r#"{"value": 3}"#);
        let json: serde_json::Value = resp.read_json(&url).unwrap();
        assert_eq!(json["value"], 3);

        let resp = HttpResponse::from_bytes(StatusCode::OK, "42");
        assert_eq!(resp.read_to_string(&url).unwrap(), "42");

        let resp = HttpResponse::from_bytes(StatusCode::OK, "{");
        assert!(matches!(
            resp.read_json::<serde_json::Value>(&url),
            Err(DownloadError::InvalidResponse { .. })
        ));

        let resp = HttpResponse::from_bytes(StatusCode::OK, vec![0xff, 0xfe]);
        assert!(matches!(
            resp.read_to_string(&url),
            Err(DownloadError::InvalidResponse { .. })
        ));
    }

    struct ResetBody;

    impl Read for ResetBody {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::ConnectionReset.into())
        }
    }

    fn reset_response() -> HttpResponse {
        HttpResponse::new(StatusCode::OK, HeaderMap::new(), Box::new(ResetBody))
    }

    #[test]
    fn test_interrupted_body_is_transport_error() {
        let url = Url::parse("https://example.com/").unwrap();

        let err = reset_response()
            .read_json::<serde_json::Value>(&url)
            .unwrap_err();
        assert!(matches!(err, DownloadError::Transport { .. }));
        assert!(err.is_transient());

        let err = reset_response().read_to_string(&url).unwrap_err();
        assert!(matches!(err, DownloadError::Transport { .. }));
        assert!(err.is_transient());
    }
}

use std::time::Duration;

use tracing::trace;
use ureq::{http::HeaderMap, Agent, Proxy, RequestBuilder};

use crate::{
    error::DownloadError,
    http::{HttpResponse, OutgoingRequest},
    traits::HttpTransport,
};

pub const DEFAULT_USER_AGENT: &str = concat!("pkgfeed/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub user_agent: Option<String>,
    pub headers: Option<HeaderMap>,
    pub proxy: Option<Proxy>,
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    /// Creates a default ClientConfig with the crate user agent and nothing else set.
    ///
    /// # Examples
    ///
    /// ```
    /// use pkgfeed_dl::http_client::ClientConfig;
    ///
    /// let cfg = ClientConfig::default();
    /// assert!(cfg.user_agent.as_deref().unwrap().starts_with("pkgfeed/"));
    /// assert!(cfg.proxy.is_none());
    /// assert!(cfg.headers.is_none());
    /// assert!(cfg.timeout.is_none());
    /// ```
    fn default() -> Self {
        Self {
            user_agent: Some(DEFAULT_USER_AGENT.into()),
            proxy: None,
            headers: None,
            timeout: None,
        }
    }
}

impl ClientConfig {
    /// Builds an HTTP `Agent` configured from this `ClientConfig`.
    ///
    /// Non-success statuses are returned as responses rather than errors so the
    /// callers can tell a missing package apart from a broken connection.
    pub fn build(&self) -> Agent {
        let mut config = ureq::Agent::config_builder()
            .proxy(self.proxy.clone())
            .timeout_global(self.timeout)
            .http_status_as_error(false);

        if let Some(user_agent) = &self.user_agent {
            config = config.user_agent(user_agent);
        }

        config.build().into()
    }
}

/// The ureq-backed [`HttpTransport`].
///
/// Each client owns its agent; nothing is shared between clients.
#[derive(Clone)]
pub struct HttpClient {
    agent: Agent,
    config: ClientConfig,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            agent: config.build(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl HttpTransport for HttpClient {
    fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, DownloadError> {
        let (url, headers) = request.into_parts();
        trace!(url = %url, "sending request");

        let req = self.agent.get(url.as_str());
        let req = apply_headers(req, &self.config.headers);
        let req = apply_headers(req, &Some(headers));

        let resp = req
            .call()
            .map_err(|err| DownloadError::transport(url.as_str(), err))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.into_body().into_reader();

        Ok(HttpResponse::new(status, headers, Box::new(body)))
    }
}

/// Apply headers from an optional `HeaderMap` to a `RequestBuilder`.
///
/// Headers applied later win over earlier ones with the same name.
fn apply_headers<B>(mut req: RequestBuilder<B>, headers: &Option<HeaderMap>) -> RequestBuilder<B> {
    if let Some(headers) = headers {
        for (key, value) in headers.iter() {
            req = req.header(key, value);
        }
    }
    req
}

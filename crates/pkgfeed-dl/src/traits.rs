use crate::{
    error::DownloadError,
    http::{HttpResponse, OutgoingRequest},
};

/// Sends requests over the wire.
///
/// The production implementation is [`HttpClient`](crate::http_client::HttpClient);
/// anything else that can answer a GET (a fixture server, a recording double) can
/// stand in for it.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: OutgoingRequest) -> Result<HttpResponse, DownloadError>;
}

/// Caller-supplied behaviour applied to every request just before it is sent.
///
/// Typical uses are authentication headers, API keys and conditional headers.
/// Closures of the right shape implement this trait directly.
pub trait RequestInterceptor: Send + Sync {
    fn sending_request(&self, request: &mut OutgoingRequest);
}

impl<F> RequestInterceptor for F
where
    F: Fn(&mut OutgoingRequest) + Send + Sync,
{
    fn sending_request(&self, request: &mut OutgoingRequest) {
        self(request)
    }
}

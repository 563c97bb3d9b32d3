//! HTTP plumbing and verified content downloads for pkgfeed.
//!
//! Every request leaves through an [`HttpTransport`](traits::HttpTransport) after
//! [`PackageDownloader::initialize_request`](download::PackageDownloader::initialize_request)
//! has applied the user agent, default headers and registered
//! [`RequestInterceptor`](traits::RequestInterceptor)s.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pkgfeed_dl::{
//!     download::{DownloadRequest, PackageDownloader},
//!     http_client::{ClientConfig, HttpClient},
//! };
//! use pkgfeed_utils::hash::CryptoHashProvider;
//! use url::Url;
//!
//! let transport = Arc::new(HttpClient::new(ClientConfig::default()));
//! let downloader = PackageDownloader::new(transport, Arc::new(CryptoHashProvider::default()));
//!
//! let uri = Url::parse("https://example.com/packages/foo.1.0.0.nupkg").unwrap();
//! let content = downloader.download_package(&DownloadRequest::new(uri)).unwrap();
//! println!("{} bytes", content.len());
//! ```

pub mod cache;
pub mod download;
pub mod error;
pub mod http;
pub mod http_client;
pub mod traits;
pub mod types;

//! Package feed access for pkgfeed.
//!
//! A [`PackageRepository`] exposes a remote OData package feed as a lazily
//! evaluated [`PackageQuery`]. Each [`PackageEntity`] it yields carries a
//! [`ContentAccess`] capability: nothing about the package content is resolved
//! until that capability is invoked, at which point the content location is
//! looked up, the content is downloaded, and, when the feed advertises a hash,
//! verified before it is returned.
//!
//! Every HTTP request, whether for metadata or content, is prepared by the
//! repository's [`PackageDownloader`](pkgfeed_dl::download::PackageDownloader)
//! exactly once before it is sent.
//!
//! # Example
//!
//! ```no_run
//! use pkgfeed_registry::PackageRepository;
//!
//! let repo = PackageRepository::open("https://feed.example.com/api/v2/")?;
//! for package in repo.get_packages().search("json").take(10) {
//!     let package = package?;
//!     println!("{} {}", package.id(), package.version());
//! }
//! # Ok::<(), pkgfeed_registry::RegistryError>(())
//! ```

pub mod constants;
pub mod error;
pub mod feed;
pub mod hooks;
pub mod package;
pub mod query;
pub mod repository;

pub use constants::PACKAGE_ENTITY_SET;
pub use error::{RegistryError, Result};
pub use feed::FeedContext;
pub use package::{ContentAccess, EntityKey, PackageEntity, PackageRecord};
pub use pkgfeed_dl::download::PackageContent;
pub use query::{Field, Filter, PackageIter, PackageQuery};
pub use repository::{HashPolicy, PackageRepository, PackageRepositoryBuilder, RepositoryContext};

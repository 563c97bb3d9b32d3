/// Entity set holding package versions on a feed.
pub const PACKAGE_ENTITY_SET: &str = "Packages";

/// Number of entities requested per page unless a query asks otherwise.
pub use pkgfeed_config::config::DEFAULT_PAGE_SIZE;

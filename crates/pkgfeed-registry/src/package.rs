//! Package metadata records and the entities built from them.
//!
//! A [`PackageRecord`] is what the feed returns for one package version. It
//! tolerates the usual feed quirks: numbers sent as strings, booleans sent as
//! strings, empty strings standing in for missing values, and authors or tags
//! sent either as a delimited string or as a list.
//!
//! A [`PackageEntity`] pairs a record with the [`ContentAccess`] capability that
//! fetches its content on demand.

use std::{fmt, sync::Arc};

use pkgfeed_dl::download::PackageContent;
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize,
};
use serde_json::Value;

use crate::error::{RegistryError, Result};

/// Internal enum for deserializing boolean values that may be strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum FlexiBool {
    Bool(bool),
    String(String),
}

/// Internal enum for lists that may arrive as one delimited string.
#[derive(Deserialize)]
#[serde(untagged)]
enum FlexiList {
    List(Vec<String>),
    String(String),
}

fn empty_is_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(s.filter(|s| !s.trim().is_empty()))
}

fn optional_number<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OptU64Visitor;

    impl<'de> Visitor<'de> for OptU64Visitor {
        type Value = Option<u64>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a positive integer, string, or null")
        }

        fn visit_none<E>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E> {
            Ok((v >= 0).then_some(v as u64))
        }

        fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.trim().is_empty() {
                return Ok(None);
            }

            v.trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
        }
    }

    deserializer.deserialize_any(OptU64Visitor)
}

fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<FlexiBool>::deserialize(deserializer)? {
        Some(FlexiBool::Bool(b)) => Ok(Some(b)),
        Some(FlexiBool::String(s)) => {
            match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                "" => Ok(None),
                _ => {
                    Err(de::Error::invalid_value(
                        de::Unexpected::Str(&s),
                        &"a valid boolean (true/false, yes/no, 1/0)",
                    ))
                }
            }
        }
        None => Ok(None),
    }
}

fn comma_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    flexible_list(deserializer, |c| c == ',')
}

fn space_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    flexible_list(deserializer, |c: char| c.is_whitespace() || c == ',')
}

fn flexible_list<'de, D>(
    deserializer: D,
    separator: fn(char) -> bool,
) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Option::<FlexiList>::deserialize(deserializer)? {
        Some(FlexiList::List(items)) => items,
        Some(FlexiList::String(s)) => s.split(separator).map(str::to_string).collect(),
        None => Vec::new(),
    };

    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

/// One package version as described by the feed.
///
/// `Id` and `Version` are required; every other property is optional and
/// defaults when the feed omits it.
#[derive(Debug, Default, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PackageRecord {
    pub id: String,
    pub version: String,

    #[serde(default, deserialize_with = "empty_is_none")]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "empty_is_none")]
    pub summary: Option<String>,

    #[serde(default, deserialize_with = "empty_is_none")]
    pub description: Option<String>,

    #[serde(default, deserialize_with = "comma_list")]
    pub authors: Vec<String>,

    #[serde(default, deserialize_with = "space_list")]
    pub tags: Vec<String>,

    #[serde(default, deserialize_with = "empty_is_none")]
    pub project_url: Option<String>,

    #[serde(default, deserialize_with = "empty_is_none")]
    pub license_url: Option<String>,

    #[serde(default, deserialize_with = "empty_is_none")]
    pub icon_url: Option<String>,

    #[serde(default, deserialize_with = "optional_number")]
    pub download_count: Option<u64>,

    #[serde(default, deserialize_with = "optional_number")]
    pub package_size: Option<u64>,

    #[serde(default, deserialize_with = "empty_is_none")]
    pub published: Option<String>,

    /// Base64 digest of the package content. Empty means absent.
    #[serde(default, deserialize_with = "empty_is_none")]
    pub package_hash: Option<String>,

    #[serde(default, deserialize_with = "empty_is_none")]
    pub package_hash_algorithm: Option<String>,

    #[serde(default, deserialize_with = "flexible_bool")]
    pub is_latest_version: Option<bool>,

    #[serde(default, deserialize_with = "flexible_bool")]
    pub is_absolute_latest_version: Option<bool>,

    #[serde(default, deserialize_with = "flexible_bool")]
    pub listed: Option<bool>,
}

/// Property names [`PackageRecord`] understands.
const KNOWN_PROPERTIES: &[&str] = &[
    "Id",
    "Version",
    "Title",
    "Summary",
    "Description",
    "Authors",
    "Tags",
    "ProjectUrl",
    "LicenseUrl",
    "IconUrl",
    "DownloadCount",
    "PackageSize",
    "Published",
    "PackageHash",
    "PackageHashAlgorithm",
    "IsLatestVersion",
    "IsAbsoluteLatestVersion",
    "Listed",
];

/// OData annotations such as `@odata.id`, `__metadata` or `Id@odata.type`.
fn is_annotation(name: &str) -> bool {
    name.starts_with("__") || name.contains('@') || name.starts_with("odata.")
}

impl PackageRecord {
    /// Parses one record from a feed page.
    ///
    /// With `ignore_unknown` unset, a property the record does not know about
    /// is an error, as is any annotation-free extension of the schema.
    pub fn from_json(value: Value, ignore_unknown: bool) -> std::result::Result<Self, String> {
        if !ignore_unknown {
            let Value::Object(map) = &value else {
                return Err("expected a JSON object".to_string());
            };
            if let Some(name) = map
                .keys()
                .find(|name| !is_annotation(name) && !KNOWN_PROPERTIES.contains(&name.as_str()))
            {
                return Err(format!("unknown property `{name}`"));
            }
        }

        serde_json::from_value(value).map_err(|err| err.to_string())
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.id, &self.version)
    }
}

/// Identifies one package version on a feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub id: String,
    pub version: String,
}

impl EntityKey {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

type ContentFn = dyn Fn() -> Result<PackageContent> + Send + Sync;

/// Deferred access to a package's content.
///
/// Nothing is resolved or fetched until [`ContentAccess::open`] is called.
/// Each call starts from scratch, so it may be invoked any number of times.
#[derive(Clone)]
pub struct ContentAccess(Arc<ContentFn>);

impl ContentAccess {
    pub fn new<F>(open: F) -> Self
    where
        F: Fn() -> Result<PackageContent> + Send + Sync + 'static,
    {
        Self(Arc::new(open))
    }

    /// A capability that always fails with [`RegistryError::InvalidConfiguration`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(move || Err(RegistryError::InvalidConfiguration(reason.clone())))
    }

    pub fn open(&self) -> Result<PackageContent> {
        (self.0)()
    }
}

impl fmt::Debug for ContentAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentAccess").finish_non_exhaustive()
    }
}

/// A package version returned by a query.
#[derive(Debug, Clone)]
pub struct PackageEntity {
    record: PackageRecord,
    content: ContentAccess,
}

impl PackageEntity {
    pub fn new(record: PackageRecord, content: ContentAccess) -> Self {
        Self {
            record,
            content,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn version(&self) -> &str {
        &self.record.version
    }

    pub fn key(&self) -> EntityKey {
        self.record.key()
    }

    /// Title, falling back to the id.
    pub fn title(&self) -> &str {
        self.record.title.as_deref().unwrap_or(&self.record.id)
    }

    pub fn description(&self) -> Option<&str> {
        self.record.description.as_deref()
    }

    pub fn authors(&self) -> &[String] {
        &self.record.authors
    }

    pub fn tags(&self) -> &[String] {
        &self.record.tags
    }

    pub fn download_count(&self) -> Option<u64> {
        self.record.download_count
    }

    pub fn package_size(&self) -> Option<u64> {
        self.record.package_size
    }

    pub fn published(&self) -> Option<&str> {
        self.record.published.as_deref()
    }

    pub fn package_hash(&self) -> Option<&str> {
        self.record.package_hash.as_deref()
    }

    pub fn package_hash_algorithm(&self) -> Option<&str> {
        self.record.package_hash_algorithm.as_deref()
    }

    pub fn is_latest_version(&self) -> bool {
        self.record.is_latest_version.unwrap_or(false)
    }

    pub fn record(&self) -> &PackageRecord {
        &self.record
    }

    pub fn content_access(&self) -> &ContentAccess {
        &self.content
    }

    /// Resolves, downloads and (when a hash is advertised) verifies the content.
    pub fn open_content(&self) -> Result<PackageContent> {
        self.content.open()
    }
}

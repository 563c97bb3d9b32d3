//! Composable package queries.
//!
//! A [`PackageQuery`] only describes what to fetch. Nothing is sent until it is
//! iterated or counted, and every [`PackageQuery::iter`] call starts over.

use std::{collections::VecDeque, fmt, iter::FusedIterator, ops::Not, sync::Arc};

use tracing::debug;
use url::Url;

use crate::{
    error::{RegistryError, Result},
    package::{PackageEntity, PackageRecord},
    repository::RepositoryContext,
};

/// Package properties that can be filtered or sorted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Version,
    Title,
    Description,
    Authors,
    Tags,
    DownloadCount,
    Published,
    IsLatestVersion,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Id => "Id",
            Field::Version => "Version",
            Field::Title => "Title",
            Field::Description => "Description",
            Field::Authors => "Authors",
            Field::Tags => "Tags",
            Field::DownloadCount => "DownloadCount",
            Field::Published => "Published",
            Field::IsLatestVersion => "IsLatestVersion",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A literal compared against a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    String(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::String(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A `$filter` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(Field, Literal),
    Contains(Field, String),
    StartsWith(Field, String),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
    IsLatestVersion,
}

impl Filter {
    pub fn eq(field: Field, value: impl Into<Literal>) -> Self {
        Filter::Eq(field, value.into())
    }

    /// Case-insensitive substring match.
    pub fn contains(field: Field, term: impl Into<String>) -> Self {
        Filter::Contains(field, term.into())
    }

    pub fn starts_with(field: Field, prefix: impl Into<String>) -> Self {
        Filter::StartsWith(field, prefix.into())
    }

    pub fn is_latest_version() -> Self {
        Filter::IsLatestVersion
    }

    pub fn and(self, other: Filter) -> Self {
        Filter::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Self {
        Filter::Or(Box::new(self), Box::new(other))
    }

    /// Case-insensitive match on id, title, description or tags.
    pub fn search(term: &str) -> Self {
        [Field::Title, Field::Description, Field::Tags]
            .into_iter()
            .fold(Filter::contains(Field::Id, term), |acc, field| {
                acc.or(Filter::contains(field, term))
            })
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Self::Output {
        Filter::Not(Box::new(self))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Eq(field, value) => write!(f, "{field} eq {value}"),
            Filter::Contains(field, term) => {
                write!(
                    f,
                    "substringof({}, tolower({field}))",
                    Literal::String(term.to_lowercase())
                )
            }
            Filter::StartsWith(field, prefix) => {
                write!(
                    f,
                    "startswith({field}, {})",
                    Literal::String(prefix.clone())
                )
            }
            Filter::And(a, b) => write!(f, "({a}) and ({b})"),
            Filter::Or(a, b) => write!(f, "({a}) or ({b})"),
            Filter::Not(inner) => write!(f, "not ({inner})"),
            Filter::IsLatestVersion => write!(f, "IsLatestVersion eq true"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub field: Field,
    pub descending: bool,
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{} desc", self.field)
        } else {
            write!(f, "{}", self.field)
        }
    }
}

/// A lazily evaluated query over a repository's packages.
#[derive(Debug, Clone)]
pub struct PackageQuery {
    context: Arc<RepositoryContext>,
    filter: Option<Filter>,
    order: Vec<OrderBy>,
    skip: usize,
    take: Option<usize>,
    page_size: Option<usize>,
}

impl PackageQuery {
    pub(crate) fn new(context: Arc<RepositoryContext>) -> Self {
        Self {
            context,
            filter: None,
            order: Vec::new(),
            skip: 0,
            take: None,
            page_size: None,
        }
    }

    /// Adds a filter. Repeated calls are combined with `and`.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    pub fn search(self, term: &str) -> Self {
        self.filter(Filter::search(term))
    }

    pub fn order_by(mut self, field: Field) -> Self {
        self.order.push(OrderBy {
            field,
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, field: Field) -> Self {
        self.order.push(OrderBy {
            field,
            descending: true,
        });
        self
    }

    /// Skips `n` more entities. Repeated calls add up.
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = self.skip.saturating_add(n);
        self.take = self.take.map(|take| take.saturating_sub(n));
        self
    }

    /// Limits the result to at most `n` entities.
    pub fn take(mut self, n: usize) -> Self {
        self.take = Some(self.take.map_or(n, |take| take.min(n)));
        self
    }

    /// Entities requested per round trip. Zero is ignored.
    pub fn page_size(mut self, n: usize) -> Self {
        if n > 0 {
            self.page_size = Some(n);
        }
        self
    }

    pub fn filter_expression(&self) -> Option<String> {
        self.filter.as_ref().map(ToString::to_string)
    }

    pub fn order_expression(&self) -> Option<String> {
        if self.order.is_empty() {
            return None;
        }
        Some(
            self.order
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// URL of the page starting `offset` entities past the query's own skip.
    pub fn page_url(&self, offset: usize, top: usize) -> Result<Url> {
        let mut url = self.context.feed().collection_url()?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(filter) = self.filter_expression() {
                pairs.append_pair("$filter", &filter);
            }
            if let Some(order) = self.order_expression() {
                pairs.append_pair("$orderby", &order);
            }
            let skip = self.skip.saturating_add(offset);
            if skip > 0 {
                pairs.append_pair("$skip", &skip.to_string());
            }
            pairs.append_pair("$top", &top.to_string());
        }
        Ok(url)
    }

    fn effective_page_size(&self) -> usize {
        self.page_size.unwrap_or_else(|| self.context.feed().page_size())
    }

    /// Runs the query. Each call sends its requests afresh.
    pub fn iter(&self) -> PackageIter {
        PackageIter::new(self.clone())
    }

    /// Number of entities the query would yield, using one `$count` request.
    pub fn count(&self) -> Result<u64> {
        let mut url = self.context.feed().count_url()?;
        if let Some(filter) = self.filter_expression() {
            url.query_pairs_mut().append_pair("$filter", &filter);
        }

        let total = self.context.feed().count(&url)?;
        let remaining = total.saturating_sub(self.skip as u64);
        Ok(match self.take {
            Some(take) => remaining.min(take as u64),
            None => remaining,
        })
    }

    /// The first entity, if any.
    pub fn first(&self) -> Result<Option<PackageEntity>> {
        self.clone().take(1).iter().next().transpose()
    }
}

impl IntoIterator for PackageQuery {
    type Item = Result<PackageEntity>;
    type IntoIter = PackageIter;

    fn into_iter(self) -> Self::IntoIter {
        PackageIter::new(self)
    }
}

impl IntoIterator for &PackageQuery {
    type Item = Result<PackageEntity>;
    type IntoIter = PackageIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the results of a [`PackageQuery`].
///
/// Pages are fetched on demand. Follows the feed's next link when it sends
/// one, otherwise keeps requesting while pages come back full. A failed page
/// is yielded as an `Err` and ends the iteration.
#[derive(Debug)]
pub struct PackageIter {
    query: PackageQuery,
    buffer: VecDeque<Result<PackageRecord>>,
    next_url: Option<Url>,
    fetched: usize,
    yielded: usize,
    done: bool,
}

impl PackageIter {
    fn new(query: PackageQuery) -> Self {
        let mut iter = Self {
            query,
            buffer: VecDeque::new(),
            next_url: None,
            fetched: 0,
            yielded: 0,
            done: false,
        };

        match iter.next_page_size() {
            Some(top) => {
                match iter.query.page_url(0, top) {
                    Ok(url) => iter.next_url = Some(url),
                    Err(err) => iter.fail(err),
                }
            }
            None => iter.done = true,
        }
        iter
    }

    fn fail(&mut self, err: RegistryError) {
        self.buffer.push_back(Err(err));
        self.done = true;
    }

    /// Size of the next page, or `None` once `take` is satisfied.
    fn next_page_size(&self) -> Option<usize> {
        let page_size = self.query.effective_page_size();
        match self.query.take {
            Some(take) if self.fetched >= take => None,
            Some(take) => Some(page_size.min(take - self.fetched)),
            None => Some(page_size),
        }
    }

    fn load_next_page(&mut self) {
        let Some(url) = self.next_url.take() else {
            self.done = true;
            return;
        };

        let requested = self.next_page_size().unwrap_or(0);
        let page = match self.query.context.feed().fetch_page(&url) {
            Ok(page) => page,
            Err(err) => {
                self.fail(err);
                return;
            }
        };

        let received = page.records.len();
        self.fetched += received;
        self.buffer.extend(page.records);
        debug!(url = %url, received, "fetched package page");

        if self.next_page_size().is_none() {
            self.done = true;
            return;
        }

        match page.next_link {
            Some(next) if next != url => self.next_url = Some(next),
            Some(_) => self.done = true,
            None if received > 0 && received >= requested => {
                match self.next_page_size() {
                    Some(top) => {
                        match self.query.page_url(self.fetched, top) {
                            Ok(next) => self.next_url = Some(next),
                            Err(err) => self.fail(err),
                        }
                    }
                    None => self.done = true,
                }
            }
            None => self.done = true,
        }
    }
}

impl Iterator for PackageIter {
    type Item = Result<PackageEntity>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(take) = self.query.take {
                if self.yielded >= take {
                    self.buffer.clear();
                    self.done = true;
                    return None;
                }
            }

            if let Some(item) = self.buffer.pop_front() {
                self.yielded += 1;
                let feed = self.query.context.feed();
                return Some(item.map(|record| feed.materialize(record)));
            }

            if self.done {
                return None;
            }
            self.load_next_page();
        }
    }
}

impl FusedIterator for PackageIter {}

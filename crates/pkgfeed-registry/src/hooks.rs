use std::{fmt, sync::Arc};

use pkgfeed_dl::{http::OutgoingRequest, traits::RequestInterceptor};

use crate::package::{ContentAccess, PackageEntity, PackageRecord};

/// Turns a freshly parsed record into the entity handed to the caller.
pub trait EntityMaterializer: Send + Sync {
    fn reading_entity(&self, record: PackageRecord) -> PackageEntity;
}

impl<F> EntityMaterializer for F
where
    F: Fn(PackageRecord) -> PackageEntity + Send + Sync,
{
    fn reading_entity(&self, record: PackageRecord) -> PackageEntity {
        self(record)
    }
}

/// Extension points of a [`FeedContext`](crate::feed::FeedContext).
///
/// `sending_request` hooks run in registration order on every request the feed
/// sends. At most one `reading_entity` hook is installed; without one, entities
/// come back with content access that always fails.
#[derive(Clone, Default)]
pub struct FeedHooks {
    sending_request: Vec<Arc<dyn RequestInterceptor>>,
    reading_entity: Option<Arc<dyn EntityMaterializer>>,
}

impl FeedHooks {
    pub fn on_sending_request(&mut self, hook: Arc<dyn RequestInterceptor>) {
        self.sending_request.push(hook);
    }

    /// Installs the entity hook, replacing any previous one.
    pub fn on_reading_entity(&mut self, hook: Arc<dyn EntityMaterializer>) {
        self.reading_entity = Some(hook);
    }

    pub fn sending_request_len(&self) -> usize {
        self.sending_request.len()
    }

    pub fn has_reading_entity(&self) -> bool {
        self.reading_entity.is_some()
    }

    /// Removes and returns the registered `sending_request` hooks.
    pub(crate) fn take_sending_request(&mut self) -> Vec<Arc<dyn RequestInterceptor>> {
        std::mem::take(&mut self.sending_request)
    }

    pub(crate) fn sending_request(&self, request: &mut OutgoingRequest) {
        for hook in &self.sending_request {
            hook.sending_request(request);
        }
    }

    pub(crate) fn reading_entity(&self, record: PackageRecord) -> PackageEntity {
        match &self.reading_entity {
            Some(hook) => hook.reading_entity(record),
            None => {
                PackageEntity::new(
                    record,
                    ContentAccess::unavailable("the feed is not attached to a package repository"),
                )
            }
        }
    }
}

impl fmt::Debug for FeedHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedHooks")
            .field("sending_request", &self.sending_request.len())
            .field("reading_entity", &self.reading_entity.is_some())
            .finish()
    }
}

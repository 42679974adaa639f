//! Stale-then-fresh feed delivery
//!
//! [`FeedService::snapshots`] yields at most two values:
//!
//! 1. the cached snapshot, immediately, when the cache slot is valid;
//! 2. the fetched snapshot, only when its canonical form differs from the
//!    cached one (it is persisted before being yielded).
//!
//! The stream is lazy: the network request is only issued once the cached
//! value has been consumed. Fetch failures end the stream silently (they are
//! logged); whatever was delivered before remains the final state.

use crate::cache::{CacheStore, CachedSnapshot};
use crate::fetcher::FeedFetcher;
use crate::models::FeedSnapshot;
use futures::{Stream, StreamExt};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// One value produced by [`FeedService::snapshots`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotDelivery {
    /// Last persisted snapshot, possibly stale
    Cached(Arc<FeedSnapshot>),
    /// Freshly fetched snapshot that differs from the cache
    Fresh(Arc<FeedSnapshot>),
}

impl SnapshotDelivery {
    pub fn snapshot(&self) -> &Arc<FeedSnapshot> {
        match self {
            Self::Cached(s) | Self::Fresh(s) => s,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

/// Orchestrates the fetcher and the cache slot
pub struct FeedService {
    fetcher: Arc<dyn FeedFetcher>,
    cache: Arc<dyn CacheStore>,
    current: RwLock<Option<Arc<FeedSnapshot>>>,
}

impl std::fmt::Debug for FeedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedService")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

impl FeedService {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            fetcher,
            cache,
            current: RwLock::new(None),
        }
    }

    /// Latest snapshot delivered by this service, if any
    pub fn current(&self) -> Option<Arc<FeedSnapshot>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_current(&self, snapshot: Arc<FeedSnapshot>) {
        match self.current.write() {
            Ok(mut guard) => *guard = Some(snapshot),
            Err(poisoned) => *poisoned.into_inner() = Some(snapshot),
        }
    }

    /// Cached snapshot (if any), then the fresh one (if fetched and changed)
    pub fn snapshots(&self) -> impl Stream<Item = SnapshotDelivery> + '_ {
        async_stream::stream! {
            let cached_raw = match self.cache.load() {
                Some(CachedSnapshot { raw, snapshot }) => {
                    let snapshot = Arc::new(snapshot);
                    self.replace_current(snapshot.clone());
                    info!("Loaded feed from cache ({} episodes)", snapshot.episodes.len());
                    yield SnapshotDelivery::Cached(snapshot);
                    Some(raw)
                }
                None => None,
            };

            let fresh = match self.fetcher.fetch().await {
                Ok(fresh) => fresh,
                Err(e) if e.is_network() => {
                    warn!("Feed unreachable, keeping cached data: {}", e);
                    return;
                }
                Err(e) if e.is_parse() => {
                    warn!("Feed could not be parsed, keeping cached data: {}", e);
                    return;
                }
                Err(e) => {
                    warn!("Feed fetch failed, keeping cached data: {}", e);
                    return;
                }
            };

            let raw = match fresh.to_canonical_json() {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Cannot serialize fresh feed: {}", e);
                    return;
                }
            };

            if cached_raw.as_deref() == Some(raw.as_str()) {
                debug!("Fresh feed identical to cache, nothing to update");
                return;
            }

            let fresh = Arc::new(fresh);
            self.replace_current(fresh.clone());
            match self.cache.save(&fresh) {
                Ok(()) => info!("Cache updated with fresh data"),
                Err(e) => warn!("Cannot persist fresh feed: {}", e),
            }
            yield SnapshotDelivery::Fresh(fresh);
        }
    }

    /// Drives [`Self::snapshots`] to completion, handing each delivery to
    /// `on_delivery`. Returns the number of deliveries (0, 1 or 2).
    pub async fn get_snapshot<F>(&self, mut on_delivery: F) -> usize
    where
        F: FnMut(SnapshotDelivery),
    {
        let deliveries = self.snapshots();
        futures::pin_mut!(deliveries);

        let mut count = 0;
        while let Some(delivery) = deliveries.next().await {
            on_delivery(delivery);
            count += 1;
        }
        count
    }
}

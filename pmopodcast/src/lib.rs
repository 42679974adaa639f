//! Podcast feed ingestion and playback core for PMOPodcast
//!
//! This crate fetches one podcast RSS feed, keeps the last known version in
//! a single cache slot, and coordinates one audio output.
//!
//! # Features
//!
//! - **Feed fetching**: direct or through a pass-through relay, parsed into a
//!   normalized [`FeedSnapshot`] (HTML stripped, dates formatted, image
//!   fallbacks resolved)
//! - **Cache slot**: last snapshot persisted as canonical JSON, corrupt slots
//!   are treated as empty
//! - **Stale-then-fresh delivery**: [`FeedService`] yields the cached
//!   snapshot first, then the fetched one only if it changed
//! - **Player session**: play/pause/switch/seek/close over an [`AudioElement`]
//!   whose actual state always wins
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use pmopodcast::{FeedService, FileCacheStore, HttpFeedFetcher, SnapshotDelivery};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = HttpFeedFetcher::builder()
//!         .feed_url("https://anchor.fm/s/1004dc564/podcast/rss")
//!         .build()?;
//!     let service = FeedService::new(
//!         Arc::new(fetcher),
//!         Arc::new(FileCacheStore::new("cache", "podcast_feed_cache")),
//!     );
//!
//!     let deliveries = service.snapshots();
//!     futures::pin_mut!(deliveries);
//!     while let Some(delivery) = deliveries.next().await {
//!         let snapshot = delivery.snapshot();
//!         let origin = if delivery.is_cached() { "cache" } else { "network" };
//!         println!("{} ({}): {} episodes", snapshot.title, origin, snapshot.episodes.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Configuration Extension
//!
//! With the `pmoconfig` feature (default), [`PodcastConfigExt`] reads the
//! `podcast.*` settings and builds the fetcher and the cache store from them.

pub mod cache;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod parser;
pub mod player;
pub mod service;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

// Re-exports
pub use cache::{CacheStore, CachedSnapshot, FileCacheStore, MemoryCacheStore};
pub use error::{Error, Result};
pub use fetcher::{FeedFetcher, FetcherBuilder, HttpFeedFetcher};
pub use models::{Episode, FeedSnapshot};
pub use parser::FeedParser;
pub use player::{AudioElement, PlayerEvent, PlayerPhase, PlayerSession, PlayerState};
pub use service::{FeedService, SnapshotDelivery};

#[cfg(feature = "pmoconfig")]
pub use config_ext::PodcastConfigExt;

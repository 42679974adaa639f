//! Podcast settings stored in pmoconfig
//!
//! [`PodcastConfigExt`] adds typed accessors for the `podcast.*` keys to
//! `pmoconfig::Config`, plus constructors for the fetcher and the cache
//! store.
//!
//! Getters persist their default when the key is missing, except
//! `podcast.feed_url` which has none and must be set explicitly.
//!
//! ```no_run
//! use pmoconfig::get_config;
//! use pmopodcast::{FeedService, PodcastConfigExt};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = get_config();
//! config.set_podcast_feed_url("https://anchor.fm/s/1004dc564/podcast/rss")?;
//!
//! let service = FeedService::new(
//!     Arc::new(config.podcast_fetcher()?),
//!     Arc::new(config.podcast_cache_store()?),
//! );
//! # Ok(())
//! # }
//! ```

use crate::cache::{FileCacheStore, DEFAULT_CACHE_KEY};
use crate::fetcher::{HttpFeedFetcher, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::parser::DEFAULT_DATE_FORMAT;
use anyhow::{anyhow, Result};
use pmoconfig::Config;
use std::time::Duration;

/// Default size of the "recent episodes" list
pub const DEFAULT_EPISODES_TO_SHOW: u64 = 10;

/// Image rendered when neither the episode nor the feed has one
pub const DEFAULT_PLACEHOLDER_IMAGE: &str = "podcast-logo.jpg";

/// Default cache directory, relative to the configuration directory
pub const DEFAULT_CACHE_DIR: &str = "cache";

const FEED_URL: &[&str] = &["podcast", "feed_url"];
const RELAY_TEMPLATE: &[&str] = &["podcast", "relay_template"];
const EPISODES_TO_SHOW: &[&str] = &["podcast", "episodes_to_show"];
const DATE_FORMAT: &[&str] = &["podcast", "date_format"];
const REQUEST_TIMEOUT: &[&str] = &["podcast", "request_timeout_secs"];
const PLACEHOLDER_IMAGE: &[&str] = &["podcast", "placeholder_image"];
const CACHE_DIR: &[&str] = &["podcast", "cache", "directory"];
const CACHE_KEY: &[&str] = &["podcast", "cache", "key"];

/// Extension trait for the podcast settings of `pmoconfig::Config`
pub trait PodcastConfigExt {
    // ========================================================================
    // Feed source
    // ========================================================================

    /// Feed URL; an error when unset or empty
    fn get_podcast_feed_url(&self) -> Result<String>;
    fn set_podcast_feed_url(&self, url: &str) -> Result<()>;

    /// Relay template, `None` for direct retrieval
    fn get_podcast_relay_template(&self) -> Result<Option<String>>;
    fn set_podcast_relay_template(&self, template: &str) -> Result<()>;

    fn get_podcast_request_timeout(&self) -> Result<Duration>;
    fn set_podcast_request_timeout(&self, timeout: Duration) -> Result<()>;

    // ========================================================================
    // Presentation
    // ========================================================================

    /// Number of episodes listed after the featured one
    fn get_podcast_episodes_to_show(&self) -> Result<usize>;
    fn set_podcast_episodes_to_show(&self, count: usize) -> Result<()>;

    fn get_podcast_date_format(&self) -> Result<String>;
    fn set_podcast_date_format(&self, format: &str) -> Result<()>;

    fn get_podcast_placeholder_image(&self) -> Result<String>;

    // ========================================================================
    // Cache slot
    // ========================================================================

    /// Cache directory, created if needed
    fn get_podcast_cache_dir(&self) -> Result<std::path::PathBuf>;
    fn get_podcast_cache_key(&self) -> Result<String>;

    // ========================================================================
    // Builders
    // ========================================================================

    /// HTTP fetcher configured from the settings above
    fn podcast_fetcher(&self) -> Result<HttpFeedFetcher>;

    /// File cache store configured from the settings above
    fn podcast_cache_store(&self) -> Result<FileCacheStore>;
}

impl PodcastConfigExt for Config {
    fn get_podcast_feed_url(&self) -> Result<String> {
        self.get_string(FEED_URL)
            .map(|url| url.trim().to_string())
            .ok_or_else(|| anyhow!("podcast.feed_url is not configured"))
    }

    fn set_podcast_feed_url(&self, url: &str) -> Result<()> {
        self.set_string(FEED_URL, url.trim())
    }

    fn get_podcast_relay_template(&self) -> Result<Option<String>> {
        // empty string is a valid value meaning "direct"
        Ok(self.get_string(RELAY_TEMPLATE))
    }

    fn set_podcast_relay_template(&self, template: &str) -> Result<()> {
        self.set_string(RELAY_TEMPLATE, template.trim())
    }

    fn get_podcast_request_timeout(&self) -> Result<Duration> {
        match self.get_u64(REQUEST_TIMEOUT) {
            Some(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => {
                self.set_u64(REQUEST_TIMEOUT, DEFAULT_REQUEST_TIMEOUT_SECS)?;
                Ok(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            }
        }
    }

    fn set_podcast_request_timeout(&self, timeout: Duration) -> Result<()> {
        self.set_u64(REQUEST_TIMEOUT, timeout.as_secs().max(1))
    }

    fn get_podcast_episodes_to_show(&self) -> Result<usize> {
        match self.get_u64(EPISODES_TO_SHOW) {
            Some(count) => Ok(count as usize),
            None => {
                self.set_u64(EPISODES_TO_SHOW, DEFAULT_EPISODES_TO_SHOW)?;
                Ok(DEFAULT_EPISODES_TO_SHOW as usize)
            }
        }
    }

    fn set_podcast_episodes_to_show(&self, count: usize) -> Result<()> {
        self.set_u64(EPISODES_TO_SHOW, count as u64)
    }

    fn get_podcast_date_format(&self) -> Result<String> {
        match self.get_string(DATE_FORMAT) {
            Some(format) => Ok(format),
            None => {
                self.set_string(DATE_FORMAT, DEFAULT_DATE_FORMAT)?;
                Ok(DEFAULT_DATE_FORMAT.to_string())
            }
        }
    }

    fn set_podcast_date_format(&self, format: &str) -> Result<()> {
        self.set_string(DATE_FORMAT, format)
    }

    fn get_podcast_placeholder_image(&self) -> Result<String> {
        match self.get_string(PLACEHOLDER_IMAGE) {
            Some(image) => Ok(image),
            None => {
                self.set_string(PLACEHOLDER_IMAGE, DEFAULT_PLACEHOLDER_IMAGE)?;
                Ok(DEFAULT_PLACEHOLDER_IMAGE.to_string())
            }
        }
    }

    fn get_podcast_cache_dir(&self) -> Result<std::path::PathBuf> {
        self.get_managed_dir(CACHE_DIR, DEFAULT_CACHE_DIR)
    }

    fn get_podcast_cache_key(&self) -> Result<String> {
        match self.get_string(CACHE_KEY) {
            Some(key) => Ok(key),
            None => {
                self.set_string(CACHE_KEY, DEFAULT_CACHE_KEY)?;
                Ok(DEFAULT_CACHE_KEY.to_string())
            }
        }
    }

    fn podcast_fetcher(&self) -> Result<HttpFeedFetcher> {
        let mut builder = HttpFeedFetcher::builder()
            .feed_url(self.get_podcast_feed_url()?)
            .timeout(self.get_podcast_request_timeout()?)
            .date_format(self.get_podcast_date_format()?);
        if let Some(template) = self.get_podcast_relay_template()? {
            builder = builder.relay_template(template);
        }
        Ok(builder.build()?)
    }

    fn podcast_cache_store(&self) -> Result<FileCacheStore> {
        Ok(FileCacheStore::new(
            self.get_podcast_cache_dir()?,
            &self.get_podcast_cache_key()?,
        ))
    }
}

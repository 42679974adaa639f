//! Feed retrieval
//!
//! [`FeedFetcher`] is the seam used by [`crate::FeedService`]; the HTTP
//! implementation downloads the document, directly or through a relay, and
//! hands the text to [`FeedParser`].
//!
//! ```no_run
//! use pmopodcast::{FeedFetcher, HttpFeedFetcher};
//!
//! # async fn example() -> pmopodcast::Result<()> {
//! let fetcher = HttpFeedFetcher::builder()
//!     .feed_url("https://anchor.fm/s/1004dc564/podcast/rss")
//!     .relay_template("https://api.allorigins.win/raw?url={url}")
//!     .build()?;
//!
//! let snapshot = fetcher.fetch().await?;
//! println!("{}: {} episodes", snapshot.title, snapshot.episodes.len());
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::models::FeedSnapshot;
use crate::parser::{FeedParser, DEFAULT_DATE_FORMAT};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::form_urlencoded;
use url::Url;

/// Default timeout for HTTP requests (30 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = "PMOPodcast/0.1 (pmopodcast)";

/// Placeholder substituted by the percent-encoded feed URL in relay templates
pub const RELAY_URL_PLACEHOLDER: &str = "{url}";

/// Source of fresh feed snapshots
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Downloads and parses the feed.
    ///
    /// Network problems ([`Error::is_network`]) and unusable documents
    /// ([`Error::is_parse`]) are reported distinctly.
    async fn fetch(&self) -> Result<FeedSnapshot>;
}

/// Feed fetcher over HTTP
#[derive(Debug, Clone)]
pub struct HttpFeedFetcher {
    client: Client,
    feed_url: Url,
    relay_template: Option<String>,
    timeout: Duration,
    parser: FeedParser,
}

impl HttpFeedFetcher {
    /// Create a builder for configuring the fetcher
    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::default()
    }

    pub fn feed_url(&self) -> &str {
        self.feed_url.as_str()
    }

    /// URL actually requested: the feed itself, or the relay wrapping it
    pub fn request_url(&self) -> Result<Url> {
        match &self.relay_template {
            None => Ok(self.feed_url.clone()),
            Some(template) => Ok(Url::parse(&relay_url(template, self.feed_url.as_str()))?),
        }
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self) -> Result<FeedSnapshot> {
        let url = self.request_url()?;
        debug!("Fetching feed {} via {}", self.feed_url, url);

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(Error::from_request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(Error::from_request)?;
        debug!("Received {} bytes of feed document", body.len());

        self.parser.parse(&body)
    }
}

/// Builds the relay request URL.
///
/// `{url}` in the template is replaced by the percent-encoded feed URL; a
/// template without the placeholder is used as a prefix.
pub fn relay_url(template: &str, feed_url: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(feed_url.as_bytes()).collect();
    if template.contains(RELAY_URL_PLACEHOLDER) {
        template.replace(RELAY_URL_PLACEHOLDER, &encoded)
    } else {
        format!("{}{}", template, encoded)
    }
}

/// Builder for configuring an [`HttpFeedFetcher`]
#[derive(Debug)]
pub struct FetcherBuilder {
    client: Option<Client>,
    feed_url: Option<String>,
    relay_template: Option<String>,
    timeout: Duration,
    user_agent: String,
    date_format: String,
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        Self {
            client: None,
            feed_url: None,
            relay_template: None,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

impl FetcherBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom HTTP client
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the feed URL (required)
    pub fn feed_url(mut self, url: impl Into<String>) -> Self {
        self.feed_url = Some(url.into());
        self
    }

    /// Route requests through a relay; an empty template means direct access
    pub fn relay_template(mut self, template: impl Into<String>) -> Self {
        let template = template.into();
        self.relay_template = if template.trim().is_empty() {
            None
        } else {
            Some(template.trim().to_string())
        };
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// `chrono` pattern used for episode dates
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    /// Build the fetcher
    pub fn build(self) -> Result<HttpFeedFetcher> {
        let raw_url = self
            .feed_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::other("A feed URL is required"))?;
        let feed_url = Url::parse(raw_url.trim())?;
        if let Some(template) = &self.relay_template {
            Url::parse(&relay_url(template, feed_url.as_str()))?;
        }

        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.timeout)
                .build()?,
        };

        Ok(HttpFeedFetcher {
            client,
            feed_url,
            relay_template: self.relay_template,
            timeout: self.timeout,
            parser: FeedParser::new(self.date_format),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_url_with_placeholder() {
        assert_eq!(
            relay_url(
                "https://api.allorigins.win/raw?url={url}",
                "https://anchor.fm/s/1004dc564/podcast/rss"
            ),
            "https://api.allorigins.win/raw?url=https%3A%2F%2Fanchor.fm%2Fs%2F1004dc564%2Fpodcast%2Frss"
        );
    }

    #[test]
    fn test_relay_url_as_prefix() {
        assert_eq!(
            relay_url("https://relay.example/raw?url=", "http://a.b/feed?x=1&y=2"),
            "https://relay.example/raw?url=http%3A%2F%2Fa.b%2Ffeed%3Fx%3D1%26y%3D2"
        );
    }

    #[test]
    fn test_builder_defaults() {
        let builder = FetcherBuilder::default();
        assert_eq!(
            builder.timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
        assert_eq!(builder.date_format, DEFAULT_DATE_FORMAT);
        assert!(builder.relay_template.is_none());
    }

    #[test]
    fn test_builder_requires_feed_url() {
        assert!(HttpFeedFetcher::builder().build().is_err());
        assert!(HttpFeedFetcher::builder().feed_url("  ").build().is_err());
        assert!(matches!(
            HttpFeedFetcher::builder().feed_url("not a url").build(),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_builder_rejects_invalid_relay_template() {
        let result = HttpFeedFetcher::builder()
            .feed_url("https://example.com/rss")
            .relay_template("relay without scheme?u={url}")
            .build();
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_request_url() {
        let direct = HttpFeedFetcher::builder()
            .feed_url("https://example.com/rss")
            .relay_template("")
            .build()
            .unwrap();
        assert_eq!(direct.request_url().unwrap().as_str(), "https://example.com/rss");

        let relayed = HttpFeedFetcher::builder()
            .feed_url("https://example.com/rss")
            .relay_template("https://relay.example/get?u={url}")
            .build()
            .unwrap();
        assert_eq!(
            relayed.request_url().unwrap().as_str(),
            "https://relay.example/get?u=https%3A%2F%2Fexample.com%2Frss"
        );
    }
}

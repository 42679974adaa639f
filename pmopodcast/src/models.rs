//! Data model shared by the fetcher, the cache and the presentation layer
//!
//! A [`FeedSnapshot`] is built once by the parser and never mutated
//! afterwards; consumers hold it behind an `Arc` and replace the whole
//! reference when a newer snapshot arrives.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// One episode of the feed, already normalized for display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub title: String,

    /// Plain text, HTML markup removed
    pub description: String,

    /// Display date; the source timestamp is not kept
    pub published_at: String,

    /// Opaque display string (`"00:42:10"`, `"2530"`...)
    pub duration: String,

    /// Enclosure URL, empty when the item has none
    pub audio_url: String,

    /// Episode image, or the feed image, or empty
    pub image_url: String,
}

impl Episode {
    /// Whether a play control for this episode can do anything
    pub fn is_playable(&self) -> bool {
        !self.audio_url.trim().is_empty()
    }

    /// Image to render, `placeholder` when the model has none
    pub fn display_image<'a>(&'a self, placeholder: &'a str) -> &'a str {
        if self.image_url.is_empty() {
            placeholder
        } else {
            &self.image_url
        }
    }

    /// First `max_chars` characters of the description, with an ellipsis
    /// when it was cut
    pub fn excerpt(&self, max_chars: usize) -> String {
        match self.description.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}...", self.description[..cut].trim_end()),
            None => self.description.clone(),
        }
    }
}

/// A fully parsed feed at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub title: String,
    pub image_url: String,

    /// Document order; index 0 is the latest episode by convention
    pub episodes: Vec<Episode>,
}

impl FeedSnapshot {
    /// The featured (first) episode
    pub fn featured(&self) -> Option<&Episode> {
        self.episodes.first()
    }

    /// Up to `count` episodes following the featured one
    pub fn recent(&self, count: usize) -> &[Episode] {
        let rest = self.episodes.get(1..).unwrap_or_default();
        &rest[..count.min(rest.len())]
    }

    /// Canonical serialized form, used both for persistence and for change
    /// detection (plain string equality)
    pub fn to_canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

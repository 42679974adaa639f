//! Single-slot persistence of the last known snapshot
//!
//! The slot holds the canonical JSON form of a [`FeedSnapshot`]. A slot that
//! cannot be decoded is treated as empty: corruption is logged, never
//! propagated.

use crate::error::Result;
use crate::models::FeedSnapshot;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Default key of the cache slot
pub const DEFAULT_CACHE_KEY: &str = "podcast_feed_cache";

/// Content of the slot: the raw persisted string and its decoded form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSnapshot {
    /// Serialized form exactly as persisted, used for change detection
    pub raw: String,
    pub snapshot: FeedSnapshot,
}

impl CachedSnapshot {
    /// Decodes a persisted string; `None` when it is not a valid snapshot
    pub fn decode(raw: String) -> Option<Self> {
        match FeedSnapshot::from_json(&raw) {
            Ok(snapshot) => Some(Self { raw, snapshot }),
            Err(e) => {
                warn!("Ignoring corrupt cached feed: {}", e);
                None
            }
        }
    }
}

/// Persistent home of the last snapshot
pub trait CacheStore: Send + Sync {
    /// Last persisted snapshot, `None` when absent or corrupt
    fn load(&self) -> Option<CachedSnapshot>;

    /// Serializes and persists `snapshot`, overwriting the previous value
    fn save(&self, snapshot: &FeedSnapshot) -> Result<()>;
}

/// Cache slot stored as `<directory>/<key>.json`
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    path: PathBuf,
}

impl FileCacheStore {
    pub fn new(directory: impl AsRef<Path>, key: &str) -> Self {
        Self {
            path: directory.as_ref().join(format!("{}.json", key)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_raw(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Some(raw),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Cannot read feed cache {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

impl CacheStore for FileCacheStore {
    fn load(&self) -> Option<CachedSnapshot> {
        let cached = self.read_raw().and_then(CachedSnapshot::decode);
        debug!(
            "Feed cache {} {}",
            self.path.display(),
            if cached.is_some() { "hit" } else { "miss" }
        );
        cached
    }

    fn save(&self, snapshot: &FeedSnapshot) -> Result<()> {
        let raw = snapshot.to_canonical_json()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // write then rename so a crash never leaves a half-written slot
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        debug!("Feed cache {} updated", self.path.display());
        Ok(())
    }
}

/// In-process cache slot; counts writes
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    slot: Mutex<Option<String>>,
    writes: AtomicUsize,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with an arbitrary raw value (possibly corrupt)
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(raw.into())),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of successful `save` calls
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn raw(&self) -> Option<String> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self) -> Option<CachedSnapshot> {
        self.raw().and_then(CachedSnapshot::decode)
    }

    fn save(&self, snapshot: &FeedSnapshot) -> Result<()> {
        let raw = snapshot.to_canonical_json()?;
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| crate::Error::other("cache slot lock poisoned"))?;
        *slot = Some(raw);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

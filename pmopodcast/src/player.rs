//! Single audio session
//!
//! [`PlayerSession`] coordinates one [`AudioElement`]: which URL is bound to
//! it, the title shown by the mini-player, and whether it is playing. The
//! element is the source of truth for play/pause; after every attempted
//! transition the session reads the flag back instead of assuming the
//! outcome.
//!
//! ```no_run
//! # use pmopodcast::{AudioElement, PlayerEvent, PlayerSession};
//! # use std::sync::Arc;
//! # async fn example(element: Arc<dyn AudioElement>) {
//! let player = PlayerSession::new(element);
//! player.subscribe(|event| {
//!     if let PlayerEvent::Progress(fraction) = event {
//!         println!("{:.0}%", fraction * 100.0);
//!     }
//! });
//!
//! player.activate("https://example.com/ep1.mp3", "Episode 1").await;
//! player.seek(0.5);
//! player.close();
//! # }
//! ```

use crate::error::Result;
use crate::models::Episode;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Playback engine driven by the session
///
/// Mirrors the subset of an HTML5 media element the session needs.
#[async_trait]
pub trait AudioElement: Send + Sync {
    /// Binds a new source; the element starts paused at position 0
    fn set_source(&self, url: &str);

    /// Requests playback. The host may refuse (autoplay policy, decode
    /// failure...), in which case the element stays paused.
    async fn play(&self) -> Result<()>;

    fn pause(&self);

    fn is_paused(&self) -> bool;

    /// Length in seconds, `NaN` while unknown
    fn duration(&self) -> f64;

    /// Position in seconds
    fn current_time(&self) -> f64;

    fn set_current_time(&self, seconds: f64);
}

/// Coarse state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerPhase {
    Idle,
    Paused,
    Playing,
}

/// Observable fields of the session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerState {
    /// Source currently bound to the element
    pub loaded_url: Option<String>,
    pub display_title: String,
    /// Last value read back from the element
    pub playing: bool,
    /// Whether the mini-player surface is shown
    pub visible: bool,
    /// Last reported position as a fraction of the duration
    pub progress: f64,
}

impl PlayerState {
    pub fn phase(&self) -> PlayerPhase {
        match (&self.loaded_url, self.playing) {
            (None, _) => PlayerPhase::Idle,
            (Some(_), true) => PlayerPhase::Playing,
            (Some(_), false) => PlayerPhase::Paused,
        }
    }
}

/// Notification sent to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlayerState),
    Progress(f64),
    PlaybackFailed { url: String, reason: String },
}

type Observer = Arc<dyn Fn(&PlayerEvent) + Send + Sync>;

/// Coordinator of the single audio element
pub struct PlayerSession {
    element: Arc<dyn AudioElement>,
    state: Mutex<PlayerState>,
    observers: Mutex<Vec<Observer>>,
}

impl std::fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerSession")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PlayerSession {
    pub fn new(element: Arc<dyn AudioElement>) -> Self {
        Self {
            element,
            state: Mutex::new(PlayerState::default()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Registers an observer. Callbacks run synchronously on the thread
    /// performing the transition, after every lock has been released, so
    /// they may call back into the session.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&PlayerEvent) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::new(callback));
    }

    pub fn state(&self) -> PlayerState {
        self.lock_state().clone()
    }

    pub fn phase(&self) -> PlayerPhase {
        self.lock_state().phase()
    }

    pub fn progress(&self) -> f64 {
        self.lock_state().progress
    }

    /// Play/pause/switch for a card's play control.
    ///
    /// Same URL: toggles between playing and paused without reloading.
    /// Other URL (or nothing loaded): binds the source, shows the player and
    /// requests playback.
    ///
    /// Two overlapping calls may race on the element; each completion reads
    /// the element back, so the last one to finish wins.
    pub async fn activate(&self, url: &str, title: &str) {
        if url.trim().is_empty() {
            warn!("Ignoring play request for '{}': no audio URL", title);
            return;
        }

        let already_loaded = self.lock_state().loaded_url.as_deref() == Some(url);
        if already_loaded {
            if self.element.is_paused() {
                // resuming after close() shows the player again
                self.lock_state().visible = true;
                self.request_playback(url).await;
            } else {
                self.element.pause();
                self.publish_state();
            }
            return;
        }

        info!("Loading episode '{}' ({})", title, url);
        self.element.set_source(url);
        {
            let mut state = self.lock_state();
            state.loaded_url = Some(url.to_string());
            state.display_title = title.to_string();
            state.visible = true;
            state.progress = 0.0;
        }
        self.request_playback(url).await;
    }

    /// "Play featured": activates the episode when it has an audio URL
    pub async fn activate_episode(&self, episode: &Episode) -> bool {
        if !episode.is_playable() {
            warn!("Episode '{}' has no audio enclosure", episode.title);
            return false;
        }
        self.activate(&episode.audio_url, &episode.title).await;
        true
    }

    /// Mini-player play/pause button
    pub async fn toggle(&self) {
        let loaded = self.lock_state().loaded_url.clone();
        let Some(url) = loaded else {
            debug!("Toggle ignored: nothing loaded");
            return;
        };

        if self.element.is_paused() {
            self.request_playback(&url).await;
        } else {
            self.element.pause();
            self.publish_state();
        }
    }

    /// Moves the playback position to `fraction` of the duration.
    ///
    /// `fraction` is clamped to `[0, 1]`. Returns `false` without touching
    /// anything when the duration is not known yet.
    pub fn seek(&self, fraction: f64) -> bool {
        let duration = self.element.duration();
        if !duration.is_finite() || duration <= 0.0 || fraction.is_nan() {
            debug!("Seek ignored: duration {} unknown", duration);
            return false;
        }
        self.element
            .set_current_time(fraction.clamp(0.0, 1.0) * duration);
        true
    }

    /// Pauses and hides the player. The loaded URL is kept.
    pub fn close(&self) {
        self.element.pause();
        self.lock_state().visible = false;
        self.publish_state();
    }

    /// Handler for the element's time-update ticks.
    ///
    /// Returns the new fraction, or `None` when the duration is `0` or
    /// unknown (the previous value is kept).
    pub fn on_time_update(&self) -> Option<f64> {
        let duration = self.element.duration();
        if !duration.is_finite() || duration <= 0.0 {
            return None;
        }
        let fraction = (self.element.current_time() / duration).clamp(0.0, 1.0);
        self.lock_state().progress = fraction;
        self.notify(&PlayerEvent::Progress(fraction));
        Some(fraction)
    }

    /// Handler for the element's own play/pause notifications
    pub fn on_element_state_changed(&self) {
        let playing = !self.element.is_paused();
        let changed = {
            let mut state = self.lock_state();
            let changed = state.playing != playing;
            state.playing = playing;
            changed.then(|| state.clone())
        };
        if let Some(state) = changed {
            self.notify(&PlayerEvent::StateChanged(state));
        }
    }

    async fn request_playback(&self, url: &str) {
        if let Err(e) = self.element.play().await {
            warn!("Playback of {} failed: {}", url, e);
            self.notify(&PlayerEvent::PlaybackFailed {
                url: url.to_string(),
                reason: e.to_string(),
            });
        }
        self.publish_state();
    }

    /// Reads the playing flag back from the element and notifies observers
    fn publish_state(&self) {
        let playing = !self.element.is_paused();
        let state = {
            let mut state = self.lock_state();
            state.playing = playing;
            state.clone()
        };
        debug!("Player {:?} ({:?})", state.phase(), state.loaded_url);
        self.notify(&PlayerEvent::StateChanged(state));
    }

    fn notify(&self, event: &PlayerEvent) {
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for observer in &observers {
            observer(event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PlayerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[derive(Debug)]
    struct FakeInner {
        source: Option<String>,
        paused: bool,
        duration: f64,
        time: f64,
        reject_play: bool,
        play_calls: usize,
        source_changes: usize,
    }

    #[derive(Debug)]
    struct FakeAudio(Mutex<FakeInner>);

    impl FakeAudio {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(FakeInner {
                source: None,
                paused: true,
                duration: f64::NAN,
                time: 0.0,
                reject_play: false,
                play_calls: 0,
                source_changes: 0,
            })))
        }

        fn inner(&self) -> MutexGuard<'_, FakeInner> {
            self.0.lock().unwrap()
        }
    }

    #[async_trait]
    impl AudioElement for FakeAudio {
        fn set_source(&self, url: &str) {
            let mut inner = self.inner();
            inner.source = Some(url.to_string());
            inner.paused = true;
            inner.time = 0.0;
            inner.duration = f64::NAN;
            inner.source_changes += 1;
        }

        async fn play(&self) -> Result<()> {
            let mut inner = self.inner();
            inner.play_calls += 1;
            if inner.reject_play {
                return Err(Error::playback("autoplay blocked"));
            }
            inner.paused = false;
            Ok(())
        }

        fn pause(&self) {
            self.inner().paused = true;
        }

        fn is_paused(&self) -> bool {
            self.inner().paused
        }

        fn duration(&self) -> f64 {
            self.inner().duration
        }

        fn current_time(&self) -> f64 {
            self.inner().time
        }

        fn set_current_time(&self, seconds: f64) {
            self.inner().time = seconds;
        }
    }

    fn session() -> (Arc<FakeAudio>, PlayerSession) {
        let audio = FakeAudio::new();
        let player = PlayerSession::new(audio.clone());
        (audio, player)
    }

    #[tokio::test]
    async fn test_activate_same_url_toggles_without_reload() {
        let (audio, player) = session();
        assert_eq!(player.phase(), PlayerPhase::Idle);

        player.activate("A", "T").await;
        assert_eq!(player.phase(), PlayerPhase::Playing);
        assert!(player.state().visible);
        assert_eq!(player.state().display_title, "T");

        player.activate("A", "T").await;
        assert_eq!(player.phase(), PlayerPhase::Paused);

        player.activate("A", "T").await;
        assert_eq!(player.phase(), PlayerPhase::Playing);

        assert_eq!(audio.inner().source_changes, 1);
        assert_eq!(audio.inner().play_calls, 2);
    }

    #[tokio::test]
    async fn test_activate_other_url_switches_source() {
        let (audio, player) = session();
        player.activate("A", "T").await;
        player.activate("A", "T").await; // paused

        player.activate("B", "T2").await;

        let state = player.state();
        assert_eq!(state.loaded_url.as_deref(), Some("B"));
        assert_eq!(state.display_title, "T2");
        assert_eq!(state.phase(), PlayerPhase::Playing);
        assert_eq!(audio.inner().source.as_deref(), Some("B"));
        assert_eq!(audio.inner().source_changes, 2);
    }

    #[tokio::test]
    async fn test_activate_other_url_while_playing() {
        let (audio, player) = session();
        player.activate("A", "T").await;
        assert_eq!(player.phase(), PlayerPhase::Playing);

        player.activate("B", "T2").await;

        let state = player.state();
        assert_eq!(state.loaded_url.as_deref(), Some("B"));
        assert_eq!(state.display_title, "T2");
        assert_eq!(state.phase(), PlayerPhase::Playing);
        assert_eq!(audio.inner().source.as_deref(), Some("B"));
        assert_eq!(audio.inner().source_changes, 2);
        assert_eq!(audio.inner().play_calls, 2);
    }

    #[tokio::test]
    async fn test_observer_may_call_back_into_session() {
        let (audio, player) = session();
        let player = Arc::new(player);
        audio.inner().reject_play = true;

        let weak = Arc::downgrade(&player);
        player.subscribe(move |event| {
            if matches!(event, PlayerEvent::PlaybackFailed { .. }) {
                if let Some(player) = weak.upgrade() {
                    player.close();
                }
            }
        });

        let activated = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            player.activate("A", "T"),
        )
        .await;

        assert!(activated.is_ok());
        let state = player.state();
        assert!(!state.visible);
        assert!(!state.playing);
        assert_eq!(state.loaded_url.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_rejected_play_resyncs_from_element() {
        let (audio, player) = session();
        audio.inner().reject_play = true;

        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        player.subscribe(move |event| {
            if let PlayerEvent::PlaybackFailed { url, .. } = event {
                sink.lock().unwrap().push(url.clone());
            }
        });

        player.activate("A", "T").await;

        let state = player.state();
        assert!(!state.playing);
        assert_eq!(state.phase(), PlayerPhase::Paused);
        assert_eq!(state.loaded_url.as_deref(), Some("A"));
        assert_eq!(*failures.lock().unwrap(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_seek_guard_on_unknown_duration() {
        let (audio, player) = session();
        player.activate("A", "T").await;
        audio.inner().time = 12.0;

        assert!(!player.seek(0.5));
        assert_eq!(audio.inner().time, 12.0);

        audio.inner().duration = 0.0;
        assert!(!player.seek(0.5));
        audio.inner().duration = f64::INFINITY;
        assert!(!player.seek(0.5));
        assert_eq!(audio.inner().time, 12.0);
    }

    #[tokio::test]
    async fn test_seek_clamps_fraction() {
        let (audio, player) = session();
        player.activate("A", "T").await;
        audio.inner().duration = 200.0;

        assert!(player.seek(0.25));
        assert_eq!(audio.inner().time, 50.0);
        assert!(player.seek(1.7));
        assert_eq!(audio.inner().time, 200.0);
        assert!(player.seek(-1.0));
        assert_eq!(audio.inner().time, 0.0);
    }

    #[tokio::test]
    async fn test_close_keeps_loaded_url() {
        let (audio, player) = session();
        player.activate("A", "T").await;

        player.close();

        let state = player.state();
        assert!(!state.visible);
        assert!(!state.playing);
        assert_eq!(state.loaded_url.as_deref(), Some("A"));
        assert!(audio.is_paused());

        // reopening goes through activate and resumes the same source
        player.activate("A", "T").await;
        assert_eq!(player.phase(), PlayerPhase::Playing);
        assert!(player.state().visible);
        assert_eq!(audio.inner().source_changes, 1);
    }

    #[tokio::test]
    async fn test_time_update_progress_guard() {
        let (audio, player) = session();
        player.activate("A", "T").await;
        audio.inner().time = 30.0;

        assert_eq!(player.on_time_update(), None);
        assert_eq!(player.progress(), 0.0);

        audio.inner().duration = 120.0;
        assert_eq!(player.on_time_update(), Some(0.25));
        assert_eq!(player.progress(), 0.25);

        audio.inner().duration = 0.0;
        assert_eq!(player.on_time_update(), None);
        assert_eq!(player.progress(), 0.25);
    }

    #[tokio::test]
    async fn test_toggle_and_element_events() {
        let (audio, player) = session();
        player.toggle().await;
        assert_eq!(player.phase(), PlayerPhase::Idle);
        assert_eq!(audio.inner().play_calls, 0);

        player.activate("A", "T").await;
        player.toggle().await;
        assert_eq!(player.phase(), PlayerPhase::Paused);
        player.toggle().await;
        assert_eq!(player.phase(), PlayerPhase::Playing);

        let changes = Arc::new(Mutex::new(0usize));
        let counter = changes.clone();
        player.subscribe(move |event| {
            if matches!(event, PlayerEvent::StateChanged(_)) {
                *counter.lock().unwrap() += 1;
            }
        });

        // element paused by the host (e.g. end of stream)
        audio.inner().paused = true;
        player.on_element_state_changed();
        player.on_element_state_changed();
        assert_eq!(player.phase(), PlayerPhase::Paused);
        assert_eq!(*changes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_activate_episode_requires_audio() {
        let (audio, player) = session();
        let mut episode = Episode {
            title: "No audio".to_string(),
            ..Default::default()
        };
        assert!(!player.activate_episode(&episode).await);
        assert_eq!(player.phase(), PlayerPhase::Idle);

        episode.audio_url = "https://example.com/1.mp3".to_string();
        assert!(player.activate_episode(&episode).await);
        assert_eq!(audio.inner().source.as_deref(), Some("https://example.com/1.mp3"));
        assert_eq!(player.state().display_title, "No audio");
    }
}

//! Audio playback controller around a single native media handle

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::Error;

/// Playback signals emitted by the native handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    Play,
    Pause,
    Ended,
}

/// A platform audio element
#[async_trait]
pub trait MediaHandle: Send + Sync {
    /// Start or resume playback; the platform may refuse (autoplay policy,
    /// unsupported source)
    async fn play(&self) -> Result<(), Error>;

    fn pause(&self);

    /// Point the handle at a new source
    fn set_source(&self, url: &str);

    /// Start fetching the current source
    fn load(&self) -> Result<(), Error>;

    /// Native play/pause/ended signals, including ones the app did not cause
    fn events(&self) -> broadcast::Receiver<MediaEvent>;
}

#[derive(Debug, Default)]
struct PlayerState {
    playing: bool,
    current_url: Option<String>,
}

/// Transport controls plus the observable playing/track state
///
/// Track identity is the URL last passed to [`set_track`](Self::set_track),
/// not the handle's own source attribute: platforms normalize that to an
/// absolute URL, so comparing a relative URL against it would report a
/// different track and restart playback.
///
/// Every operation is a no-op while no handle is attached.
#[derive(Default)]
pub struct MediaController {
    handle: RwLock<Option<Arc<dyn MediaHandle>>>,
    state: Arc<RwLock<PlayerState>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl MediaController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the media handle, replacing any previous one
    pub fn attach(&self, handle: Arc<dyn MediaHandle>) {
        self.stop_listener();
        *self.handle.write() = Some(handle);
        *self.state.write() = PlayerState::default();
    }

    /// Detach the current handle
    pub fn detach(&self) {
        self.stop_listener();
        *self.handle.write() = None;
        *self.state.write() = PlayerState::default();
    }

    pub fn is_playing(&self) -> bool {
        self.state.read().playing
    }

    /// URL of the loaded track
    pub fn current_track(&self) -> Option<String> {
        self.state.read().current_url.clone()
    }

    fn handle(&self) -> Option<Arc<dyn MediaHandle>> {
        self.handle.read().clone()
    }

    /// Start playback; a refusal is logged and leaves the player paused
    pub async fn play(&self) {
        let Some(handle) = self.handle() else {
            return;
        };

        match handle.play().await {
            Ok(()) => self.state.write().playing = true,
            Err(e) => {
                error!("Play failed: {}", e);
                self.state.write().playing = false;
            }
        }
    }

    pub fn pause(&self) {
        let Some(handle) = self.handle() else {
            return;
        };
        handle.pause();
        self.state.write().playing = false;
    }

    pub async fn toggle_play(&self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play().await;
        }
    }

    /// Switch to `url` and play it; re-selecting the loaded track only
    /// resumes it when paused
    pub async fn set_track(&self, url: &str) {
        let Some(handle) = self.handle() else {
            return;
        };
        if url.is_empty() {
            return;
        }

        let is_different_track = self.state.read().current_url.as_deref() != Some(url);

        if is_different_track {
            info!(url, "Setting new track");
            handle.set_source(url);
            self.state.write().current_url = Some(url.to_string());

            match handle.load() {
                Ok(()) => self.play().await,
                Err(e) => {
                    error!("Failed to load track: {}", e);
                    self.state.write().playing = false;
                }
            }
        } else if !self.is_playing() {
            self.play().await;
        }
    }

    /// Mirror the handle's native playback signals into the playing flag
    ///
    /// Calling it again replaces the previous listener.
    pub fn setup_audio_listeners(&self) {
        let Some(handle) = self.handle() else {
            return;
        };

        let mut events = handle.events();
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        debug!(?event, "Audio event fired");
                        state.write().playing = event == MediaEvent::Play;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Audio listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self.listener.lock().replace(task) {
            previous.abort();
        }
    }

    fn stop_listener(&self) {
        if let Some(task) = self.listener.lock().take() {
            task.abort();
        }
    }
}

impl Drop for MediaController {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

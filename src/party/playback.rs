use serde::{Deserialize, Serialize};

/// Seconds added per background clock tick.
pub const TICK_SECONDS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Idle,
    Downloading,
    Playing,
    Paused,
}

/// Authoritative playback state for one room.
///
/// Transitions: Idle -> Downloading -> Playing <-> Paused. A return to Idle
/// only happens through a failed acquisition with no prior media. All
/// mutating methods return whether the state was actually touched so the
/// caller can decide what to broadcast; rejected calls change nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub media_ref: Option<String>,
    pub position: f64,
    pub duration: Option<f64>,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            media_ref: None,
            position: 0.0,
            duration: None,
        }
    }

    fn controllable(&self) -> bool {
        // Control actions are rejected until acquisition completes.
        self.media_ref.is_some() && self.status != PlaybackStatus::Downloading
    }

    /// Starts playback. Accepted only once media is loaded; idempotent.
    pub fn play(&mut self) -> bool {
        if !self.controllable() {
            return false;
        }
        self.status = PlaybackStatus::Playing;
        true
    }

    /// Pauses playback. Idempotent.
    pub fn pause(&mut self) -> bool {
        if !self.controllable() {
            return false;
        }
        self.status = PlaybackStatus::Paused;
        true
    }

    /// Moves the playhead, clamped to `[0, duration]` when the duration is
    /// known. Does not change the play/pause status. Non-finite input is
    /// dropped.
    pub fn seek(&mut self, time: f64) -> bool {
        if !self.controllable() || !time.is_finite() {
            return false;
        }
        let mut clamped = time.max(0.0);
        if let Some(duration) = self.duration {
            clamped = clamped.min(duration);
        }
        self.position = clamped;
        true
    }

    /// Marks the room as acquiring media and returns the previous state so
    /// the caller can restore it if the acquisition fails.
    pub fn begin_download(&mut self) -> PlaybackState {
        let prior = self.clone();
        self.status = PlaybackStatus::Downloading;
        prior
    }

    /// Installs freshly acquired media. Autoplay-on-ready is the documented
    /// policy: the room starts playing from zero immediately.
    pub fn load(&mut self, media_ref: String, duration: Option<f64>) {
        self.media_ref = Some(media_ref);
        self.position = 0.0;
        self.duration = duration;
        self.status = PlaybackStatus::Playing;
    }

    /// Restores the state captured by [`begin_download`] after a failed
    /// acquisition.
    pub fn restore(&mut self, prior: PlaybackState) {
        *self = prior;
    }

    /// Advances the playhead by one clock tick. Returns the new position
    /// when the room is actively playing, `None` otherwise. The position is
    /// pinned to the duration when it is known, so it can never overshoot
    /// the end of the media by more than one tick.
    pub fn tick(&mut self) -> Option<f64> {
        if self.status != PlaybackStatus::Playing || self.media_ref.is_none() {
            return None;
        }
        let mut next = self.position + TICK_SECONDS;
        if let Some(duration) = self.duration {
            next = next.min(duration);
        }
        self.position = next;
        Some(self.position)
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new()
    }
}

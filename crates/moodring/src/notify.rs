//! Transient, non-blocking error notices for the player.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::warn;

pub const DISPLAY_DURATION: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq)]
pub struct MusicNotice {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Holds the message currently on screen and fans notices out to any UI
/// subscribers. A new message replaces the old one and restarts the timer.
#[derive(Debug)]
pub struct Notifier {
    current: Mutex<Option<(String, Instant)>>,
    display_for: Duration,
    sender: broadcast::Sender<MusicNotice>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DISPLAY_DURATION)
    }
}

impl Notifier {
    pub fn new(display_for: Duration) -> Self {
        let (sender, _) = broadcast::channel(32);
        Self {
            current: Mutex::new(None),
            display_for,
            sender,
        }
    }

    pub fn show_error(&self, message: impl Into<String>) {
        let message = format!("Music System Error: {}", message.into());
        warn!("{}", message);

        if let Ok(mut current) = self.current.lock() {
            *current = Some((message.clone(), Instant::now()));
        }
        // No subscribers is fine
        let _ = self.sender.send(MusicNotice {
            message,
            at: Utc::now(),
        });
    }

    /// Message still within its display window at `now`.
    pub fn current(&self, now: Instant) -> Option<String> {
        let current = self.current.lock().ok()?;
        match current.as_ref() {
            Some((message, shown_at)) if now.saturating_duration_since(*shown_at) < self.display_for => {
                Some(message.clone())
            }
            _ => None,
        }
    }

    pub fn dismiss(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MusicNotice> {
        self.sender.subscribe()
    }
}

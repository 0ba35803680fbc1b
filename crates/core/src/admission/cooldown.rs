//! Per-dedup-key cooldown window.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Tracks the last admission on one dedup key and suppresses near-duplicates
/// until the configured duration has elapsed.
#[derive(Debug, Clone)]
pub struct CooldownWindow {
    duration: Duration,
    last_admitted: Option<DateTime<Utc>>,
}

impl CooldownWindow {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            last_admitted: None,
        }
    }

    /// Time left before the next admission is allowed, or `None` if the
    /// window is open.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_admitted?;
        let elapsed = now.signed_duration_since(last).to_std().ok()?;
        if elapsed < self.duration {
            Some(self.duration - elapsed)
        } else {
            None
        }
    }

    /// Record an admission at `now`, returning the previous admission time
    /// so the caller can undo via [`CooldownWindow::restore`].
    pub fn touch(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.last_admitted.replace(now)
    }

    /// Roll the window back to a previous admission time.
    pub fn restore(&mut self, prev: Option<DateTime<Utc>>) {
        self.last_admitted = prev;
    }
}

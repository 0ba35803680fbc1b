//! Per-device sliding-window rate limiting.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// Sliding window of admission timestamps for one device.
///
/// Admission is denied once the count inside the trailing window reaches the
/// cap; it opens again when the earliest counted admission ages out.
#[derive(Debug, Clone)]
pub struct RateLimitRecord {
    max: usize,
    window: Duration,
    admissions: VecDeque<DateTime<Utc>>,
}

impl RateLimitRecord {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            admissions: VecDeque::with_capacity(max),
        }
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn count_in_window(&self, now: DateTime<Utc>) -> usize {
        let start = self.window_start(now);
        self.admissions.iter().filter(|t| **t > start).count()
    }

    /// `None` if an admission at `now` is allowed; otherwise how long until
    /// the earliest counted admission leaves the window.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.count_in_window(now) < self.max {
            return None;
        }
        let start = self.window_start(now);
        let earliest = self.admissions.iter().find(|t| **t > start)?;
        (*earliest + chrono::Duration::from_std(self.window).ok()?)
            .signed_duration_since(now)
            .to_std()
            .ok()
    }

    /// Record an admission at `now`, pruning entries that left the window.
    pub fn record(&mut self, now: DateTime<Utc>) {
        let start = self.window_start(now);
        while let Some(front) = self.admissions.front() {
            if *front <= start {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
        self.admissions.push_back(now);
    }

    /// Remove the most recent admission recorded at `at`, undoing a
    /// [`RateLimitRecord::record`].
    pub fn unrecord(&mut self, at: DateTime<Utc>) {
        if let Some(pos) = self.admissions.iter().rposition(|t| *t == at) {
            self.admissions.remove(pos);
        }
    }
}

//! Admission gate: per-dedup-key cooldown and per-device rate limiting.
//!
//! Decides whether a newly detected violation becomes a job. Admission is
//! reserved in one critical section: a passing [`AdmissionGate::reserve`]
//! records the cooldown and rate-window bookkeeping immediately, so two
//! concurrent callers cannot both pass within the same cooldown. If the job
//! then fails to enter the queue, [`AdmissionGate::release`] rolls the
//! reservation back and the rejected enqueue leaves no bookkeeping behind.
//!
//! Precedence is fixed: the cooldown is checked before the rate limit. A
//! frame suppressed by cooldown counts only toward the cooldown counter and
//! never consumes rate-limit bookkeeping.

mod cooldown;
mod rate_limit;

pub use cooldown::CooldownWindow;
pub use rate_limit::RateLimitRecord;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for the admission gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Minimum seconds between two admitted violations on the same dedup key.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Maximum admissions per device within the rate-limit window.
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: usize,

    /// Rate-limit window length in seconds.
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Scope the cooldown per device instead of globally.
    #[serde(default)]
    pub multi_device: bool,
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_rate_limit_max() -> usize {
    10
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            multi_device: false,
        }
    }
}

/// Why a violation was suppressed. Expected behavior, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Suppression {
    /// Cooldown for the dedup key has not elapsed.
    Cooldown { remaining_ms: u64 },
    /// The device hit its admission cap for the trailing window.
    RateLimited { retry_after_ms: u64 },
}

const GLOBAL_KEY: &str = "global";

/// An admission reserved by [`AdmissionGate::reserve`], carrying what is
/// needed to roll the bookkeeping back if the job never enters the queue.
#[derive(Debug)]
pub struct Reservation {
    key: String,
    device_id: String,
    at: DateTime<Utc>,
    prev_cooldown: Option<DateTime<Utc>>,
    prev_key: Option<String>,
}

/// Gate deciding admission of detected violations.
pub struct AdmissionGate {
    config: AdmissionConfig,
    cooldowns: HashMap<String, CooldownWindow>,
    rate_limits: HashMap<String, RateLimitRecord>,
    last_key: Option<String>,
}

impl AdmissionGate {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            cooldowns: HashMap::new(),
            rate_limits: HashMap::new(),
            last_key: None,
        }
    }

    fn dedup_key(&self, device_id: &str) -> String {
        if self.config.multi_device {
            device_id.to_string()
        } else {
            GLOBAL_KEY.to_string()
        }
    }

    /// Check whether a violation on `device_id` may be admitted at `now`.
    /// Read-only; admission goes through [`AdmissionGate::reserve`].
    pub fn check(&self, device_id: &str, now: DateTime<Utc>) -> Result<(), Suppression> {
        let key = self.dedup_key(device_id);
        if let Some(window) = self.cooldowns.get(&key) {
            if let Some(remaining) = window.remaining(now) {
                return Err(Suppression::Cooldown {
                    remaining_ms: remaining.as_millis() as u64,
                });
            }
        }

        if let Some(record) = self.rate_limits.get(device_id) {
            if let Some(retry_after) = record.retry_after(now) {
                return Err(Suppression::RateLimited {
                    retry_after_ms: retry_after.as_millis() as u64,
                });
            }
        }

        Ok(())
    }

    /// Check and, if the gate is open, record the admission in the same
    /// critical section. A follower calling `reserve` before the holder's
    /// job is enqueued is already suppressed.
    pub fn reserve(
        &mut self,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Reservation, Suppression> {
        self.check(device_id, now)?;

        let key = self.dedup_key(device_id);
        let cooldown = Duration::from_secs(self.config.cooldown_secs);
        let prev_cooldown = self
            .cooldowns
            .entry(key.clone())
            .or_insert_with(|| CooldownWindow::new(cooldown))
            .touch(now);
        let prev_key = self.last_key.replace(key.clone());

        let window = Duration::from_secs(self.config.rate_limit_window_secs);
        self.rate_limits
            .entry(device_id.to_string())
            .or_insert_with(|| RateLimitRecord::new(self.config.rate_limit_max, window))
            .record(now);

        Ok(Reservation {
            key,
            device_id: device_id.to_string(),
            at: now,
            prev_cooldown,
            prev_key,
        })
    }

    /// Roll back a reservation whose job never entered the queue.
    pub fn release(&mut self, reservation: Reservation) {
        if let Some(window) = self.cooldowns.get_mut(&reservation.key) {
            window.restore(reservation.prev_cooldown);
        }
        if let Some(record) = self.rate_limits.get_mut(&reservation.device_id) {
            record.unrecord(reservation.at);
        }
        self.last_key = reservation.prev_key;
    }

    /// Cooldown remaining on the most recently admitted dedup key, for status
    /// snapshots. Zero when no admission happened or the window elapsed.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Duration {
        self.last_key
            .as_deref()
            .and_then(|key| self.cooldowns.get(key))
            .and_then(|window| window.remaining(now))
            .unwrap_or(Duration::ZERO)
    }
}

use chrono::{DateTime, Utc};
use core::time::Duration;
use serde::Deserialize;

/// Longest single wait for a quota reset.
pub const MAX_RATE_LIMIT_WAIT_SECS: u64 = 3600;

/// Quota state reported alongside every graph response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateBudget {
    pub cost: i64,
    pub remaining: i64,
    #[serde(rename = "resetAt")]
    pub reset_at: DateTime<Utc>,
}

impl RateBudget {
    /// Whether the remaining quota, before or after paying `cost` again, is under `floor`.
    #[must_use]
    pub const fn is_low(&self, floor: i64) -> bool {
        self.remaining < floor || self.remaining.saturating_sub(self.cost) < floor
    }

    /// How long to wait from `now` until the quota resets, capped at one hour.
    #[must_use]
    pub fn wait_time(&self, now: DateTime<Utc>) -> Duration {
        let secs = (self.reset_at - now).num_seconds().max(0).unsigned_abs();
        Duration::from_secs(secs.min(MAX_RATE_LIMIT_WAIT_SECS))
    }
}

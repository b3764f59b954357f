use chrono::{DateTime, Utc};

/// A collection window: the `days` days leading up to and including `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    base: DateTime<Utc>,
    days: u32,
}

impl Window {
    #[must_use]
    pub const fn new(base: DateTime<Utc>, days: u32) -> Self {
        Self { base, days }
    }

    #[must_use]
    pub const fn base(&self) -> DateTime<Utc> {
        self.base
    }

    #[must_use]
    pub const fn days(&self) -> u32 {
        self.days
    }

    /// The oldest instant still inside the window.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.base - chrono::Duration::days(i64::from(self.days))
    }

    /// Whether `t` lies in `[base - days, base]`.
    #[must_use]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start() <= t && t <= self.base
    }

    /// Same as [`Window::contains`] for epoch seconds.
    #[must_use]
    pub fn contains_timestamp(&self, ts: i64) -> bool {
        self.start().timestamp() <= ts && ts <= self.base.timestamp()
    }

    /// Whether `t` is after the base date (such records are skipped by collection).
    #[must_use]
    pub fn is_future(&self, t: DateTime<Utc>) -> bool {
        t > self.base
    }
}

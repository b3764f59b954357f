//! Attribution of commits and bug fixes to the release that shipped them.
//!
//! An entity (commit or bug-fix event) is attributed to the first release whose timestamp is at or
//! after its own. When that release *is* the entity (same id), the entity is a release itself and
//! contributes to no lead-time total. Entities with no later release are unreleased.

use super::bugfix::BugfixLog;
use super::index::{Release, ReleaseIndex};
use crate::Result;
use crate::repo::{Commit, RepositoryMirror, WalkOrder};
use crate::window::Window;
use serde::Serialize;
use std::collections::HashSet;

const LOG_TARGET: &str = "  releases";

/// Outcome of attributing one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution<'i> {
    /// Shipped in this release.
    Matched(&'i Release),

    /// The candidate release is the entity itself.
    SelfMatch,

    /// No release at or after the entity.
    Unreleased,
}

/// Aggregate lead-time statistics over a commit walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AttributionResult {
    /// Sum of lead times divided by `release count + 1`.
    pub mean_lead_time_secs: f64,

    /// Lead time of commits shipped by in-window releases, averaged over those releases.
    pub windowed_mean_lead_time_secs: f64,

    pub unreleased: u64,

    /// Every walked commit, including skipped ones.
    pub total: u64,
}

/// Mean time to release for bug fixes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BugfixAttribution {
    pub mttr_secs: f64,
    pub windowed_mttr_secs: f64,
}

/// Running lead-time totals, split by whether the shipping release is in the window.
#[derive(Debug, Default)]
struct LeadTimes<'i> {
    total: i64,
    matched: u64,
    windowed_total: i64,
    windowed_releases: HashSet<&'i str>,
}

impl<'i> LeadTimes<'i> {
    fn record(&mut self, release: &'i Release, timestamp: i64, window: &Window) {
        let lead = release.timestamp - timestamp;
        self.total += lead;
        self.matched += 1;

        if window.contains_timestamp(release.timestamp) {
            let _ = self.windowed_releases.insert(&release.id);
            self.windowed_total += lead;
        }
    }

    #[expect(clippy::cast_precision_loss, reason = "lead-time sums stay far below 2^52 seconds")]
    fn windowed_mean(&self) -> f64 {
        if self.windowed_releases.is_empty() {
            0.0
        } else {
            self.windowed_total as f64 / self.windowed_releases.len() as f64
        }
    }
}

/// Attributes entities against one [`ReleaseIndex`].
#[derive(Debug, Clone, Copy)]
pub struct AttributionEngine<'i> {
    index: &'i ReleaseIndex,
}

impl<'i> AttributionEngine<'i> {
    #[must_use]
    pub const fn new(index: &'i ReleaseIndex) -> Self {
        Self { index }
    }

    /// Attribute the entity `id` observed at `timestamp`.
    #[must_use]
    pub fn attribute(&self, id: &str, timestamp: i64) -> Attribution<'i> {
        match self.index.first_at_or_after(timestamp) {
            Some(release) if release.id == id => Attribution::SelfMatch,
            Some(release) => Attribution::Matched(release),
            None => Attribution::Unreleased,
        }
    }

    /// Attribute every commit of `commits`.
    ///
    /// Commits older than the earliest release predate release tracking: they are counted in
    /// `total` but neither matched nor unreleased.
    #[expect(clippy::cast_precision_loss, reason = "lead-time sums stay far below 2^52 seconds")]
    pub fn match_commits<I>(&self, commits: I, window: &Window) -> Result<AttributionResult>
    where
        I: IntoIterator<Item = Result<Commit>>,
    {
        let earliest = self.index.earliest().map(|r| r.timestamp);
        let mut leads = LeadTimes::default();
        let mut unreleased = 0u64;
        let mut total = 0u64;

        for commit in commits {
            let commit = commit?;
            total += 1;

            if earliest.is_some_and(|first| commit.timestamp < first) {
                continue;
            }

            match self.attribute(&commit.id, commit.timestamp) {
                Attribution::Matched(release) => leads.record(release, commit.timestamp, window),
                Attribution::SelfMatch => {}
                Attribution::Unreleased => unreleased += 1,
            }
        }

        let result = AttributionResult {
            mean_lead_time_secs: leads.total as f64 / (self.index.len() as f64 + 1.0),
            windowed_mean_lead_time_secs: leads.windowed_mean(),
            unreleased,
            total,
        };

        log::debug!(
            target: LOG_TARGET,
            "Attributed {} of {total} commits ({unreleased} unreleased)",
            leads.matched
        );

        Ok(result)
    }

    /// Attribute the main branch history of `mirror`, oldest first.
    pub fn commit_release_matching(&self, mirror: &RepositoryMirror, window: &Window) -> Result<AttributionResult> {
        let walk = mirror.walk_commits(mirror.main_branch(), WalkOrder::TopologicalReverse, None)?;
        self.match_commits(walk, window)
    }

    /// Mean time from bug-fix merge to release.
    ///
    /// The overall mean divides by the number of matched events; the windowed mean by the number
    /// of distinct in-window releases.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "lead-time sums stay far below 2^52 seconds")]
    pub fn match_bugfixes(&self, events: &BugfixLog, window: &Window) -> BugfixAttribution {
        let mut leads = LeadTimes::default();

        for event in events {
            if let Attribution::Matched(release) = self.attribute(&event.commit, event.timestamp) {
                leads.record(release, event.timestamp, window);
            }
        }

        let mttr_secs = if leads.matched == 0 {
            0.0
        } else {
            leads.total as f64 / leads.matched as f64
        };

        BugfixAttribution {
            mttr_secs,
            windowed_mttr_secs: leads.windowed_mean(),
        }
    }
}

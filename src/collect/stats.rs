use crate::releases::BugfixEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Everything collected for one repository.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepoStats {
    pub org: String,
    pub name: String,
    pub collection_date: DateTime<Utc>,
    pub window_days: u32,
    pub collection_time_secs: f64,
    pub pull_requests: PullRequestStats,
    pub commits: CommitStats,
    pub branches: BranchStats,
    pub releases: ReleaseStats,
    pub workflows: WorkflowStats,
    pub insights: InsightStats,
    pub users: BTreeMap<String, UserStats>,

    /// Number of references matched by each tag pattern.
    pub tag_matches: BTreeMap<String, u64>,
    pub bug_matches: Vec<BugfixEvent>,
    pub mttr_secs: f64,
    pub windowed_mttr_secs: f64,

    /// Sections whose API data could not be fetched; their counters are left at zero.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_sections: Vec<String>,
}

impl RepoStats {
    #[must_use]
    pub fn new(org: &str, name: &str, collection_date: DateTime<Utc>, window_days: u32) -> Self {
        Self {
            org: org.to_string(),
            name: name.to_string(),
            collection_date,
            window_days,
            ..Self::default()
        }
    }

    /// The entry for `user`, created empty on first use.
    pub fn user(&mut self, user: &str) -> &mut UserStats {
        self.users.entry(user.to_string()).or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WindowCount {
    pub total: u64,
    pub window: u64,
}

impl WindowCount {
    pub const fn record(&mut self, in_window: bool) {
        self.total += 1;
        if in_window {
            self.window += 1;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PullRequestStats {
    pub total: u64,
    pub open: u64,
    pub draft: u64,

    /// Closed without being merged.
    pub closed: u64,
    pub merged: u64,
    pub window: u64,
    pub total_time_open_secs: i64,
    pub avg_time_open_secs: f64,
    pub labels: BTreeMap<String, WindowCount>,
    pub collection_time_secs: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BranchCommits {
    pub total: u64,
    pub window: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitStats {
    pub total: u64,
    pub window: u64,
    pub branch_commits: BTreeMap<String, BranchCommits>,
    pub avg_commit_time_secs: f64,
    pub windowed_commit_time_secs: f64,
    pub unreleased: u64,
    pub collection_time_secs: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BranchStats {
    pub total: u64,
    pub window: u64,

    /// Branches the graph API reports without a commit author.
    pub empty: u64,
    pub protected: u64,

    /// Whether the main branch was among the listed branches.
    pub main_branch: bool,
    pub collection_time_secs: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReleaseStats {
    pub total: u64,
    pub window: u64,

    /// Hosted releases by name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub releases: BTreeMap<String, ReleaseSummary>,
    pub collection_time_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseSummary {
    pub created_at: DateTime<Utc>,
    pub author: String,
    pub body: Option<String>,
}

/// Run count and accumulated runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub count: u64,
    pub runtime_secs: i64,
}

impl RunTotals {
    pub const fn record(&mut self, runtime_secs: i64) {
        self.count += 1;
        self.runtime_secs += runtime_secs;
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowSummary {
    /// Runs with more than one attempt.
    pub retries: u64,

    /// Highest run number seen.
    pub last_run: u64,
    pub window_runs: u64,

    /// In-window runs by conclusion.
    pub runs: BTreeMap<String, RunTotals>,
    pub window_runs_of_total_percentage: f64,
    pub run_success_percentage: f64,
    pub run_failure_percentage: f64,
    pub run_cancelled_percentage: f64,
    pub run_startup_failure_percentage: f64,
    pub run_skipped_percentage: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowStats {
    pub workflows: BTreeMap<String, WorkflowSummary>,
    pub events: BTreeMap<String, WindowCount>,
    pub collection_time_secs: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserStats {
    pub pull_requests: u64,
    pub open_pull_requests: u64,
    pub draft_pull_requests: u64,
    pub closed_pull_requests: u64,
    pub merged_pull_requests: u64,
    pub window_pull_requests: u64,
    pub pr_time_open_secs: i64,
    pub avg_pr_time_open_secs: f64,
    pub commits: u64,
    pub window_commits: u64,
    pub last_commit_time: i64,
    pub releases: u64,
    pub window_releases: u64,
    pub branches: u64,
    pub window_branches: u64,
    pub events: BTreeMap<String, u64>,

    /// Workflow name to conclusion to totals.
    pub workflows: BTreeMap<String, BTreeMap<String, RunTotals>>,
    pub workflow_totals: BTreeMap<String, RunTotals>,
}

/// Repository insight statistics for the weeks leading up to the collection date.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InsightStats {
    /// Week start to line changes.
    pub code_frequency: BTreeMap<String, LineChanges>,
    pub commit_activity: BTreeMap<String, WeekActivity>,
    pub contributors: BTreeMap<String, ContributorInsight>,
    pub punch_card: PunchCard,
    pub collection_time_secs: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineChanges {
    pub additions: i64,
    pub deletions: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WeekActivity {
    /// Day to commit count.
    pub daily: BTreeMap<String, u64>,
    pub total_commits: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContributorInsight {
    pub total_commits: u64,
    pub weeks: BTreeMap<String, ContributorWeekStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContributorWeekStats {
    pub commits: u64,
    pub additions: u64,
    pub deletions: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PunchCard {
    pub total_commits: u64,
    pub days: BTreeMap<String, PunchCardDay>,

    /// Days by descending commit count.
    pub sorted_days: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PunchCardDay {
    /// Hour of day to commit count.
    pub hours: BTreeMap<u32, u64>,
    pub total_commits: u64,
    pub busiest_hour: u32,
}

/// `part / whole` as a percentage rounded to two decimals, zero when `whole` is zero.
#[must_use]
#[expect(clippy::cast_precision_loss, reason = "run counts stay far below 2^52")]
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 || part == 0 {
        return 0.0;
    }

    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}

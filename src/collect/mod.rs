//! Per-repository aggregation of mirror and API data into [`RepoStats`].
//!
//! A [`Collector`] runs the sections in a fixed order: contributors, pull requests, the release
//! index, commits, branches, insights, workflows, then MTTR. Git failures abort the run so the caller
//! can retry the repository as a whole. API failures only void the affected section, which is named
//! in [`RepoStats::failed_sections`].

mod branches;
mod commits;
mod insights;
mod pull_requests;
mod releases;
mod stats;
mod workflows;

pub use pull_requests::BugMatcher;
pub use stats::{
    BranchCommits, BranchStats, CommitStats, ContributorInsight, ContributorWeekStats, InsightStats, LineChanges,
    PullRequestStats, PunchCard, PunchCardDay, ReleaseStats, ReleaseSummary, RepoStats, RunTotals, UserStats,
    WeekActivity, WindowCount, WorkflowStats, WorkflowSummary, percentage,
};

use crate::Result;
use crate::config::RepoConfig;
use crate::hosting::models::UserRef;
use crate::hosting::{Client, GraphClient, UserDirectory};
use crate::releases::{AttributionEngine, BugfixLog};
use crate::repo::RepositoryMirror;
use crate::window::Window;
use std::time::Instant;

const LOG_TARGET: &str = "   collect";

/// Name under which activity of unresolvable authors is recorded.
pub const UNKNOWN_USER: &str = "unknown";

/// Collects the statistics of one repository.
#[derive(Debug)]
pub struct Collector<'a> {
    repo: &'a RepoConfig,
    client: &'a Client,
    graph: &'a GraphClient,
    mirror: &'a RepositoryMirror,
    window: Window,
    users: UserDirectory,
    bug_matcher: BugMatcher,
    bugfixes: BugfixLog,
    stats: RepoStats,
}

impl<'a> Collector<'a> {
    pub fn new(
        repo: &'a RepoConfig,
        client: &'a Client,
        graph: &'a GraphClient,
        mirror: &'a RepositoryMirror,
        window: Window,
    ) -> Result<Self> {
        Ok(Self {
            repo,
            client,
            graph,
            mirror,
            window,
            users: UserDirectory::new(&repo.special_logins),
            bug_matcher: repo.bug_matcher()?,
            bugfixes: BugfixLog::new(),
            stats: RepoStats::new(&repo.org, &repo.name, window.base(), window.days()),
        })
    }

    /// Run every section and return the finished statistics.
    pub async fn collect(mut self) -> Result<RepoStats> {
        let start = Instant::now();
        let mode = self.repo.release_mode()?;
        log::info!(target: LOG_TARGET, "Collecting {} as of {}", self.repo.full_name(), self.window.base());

        if let Err(e) = self.load_contributors().await {
            self.section_failed("contributors", &e);
        }

        if let Err(e) = self.load_pull_requests().await {
            self.section_failed("pull_requests", &e);
        }

        let index = self.load_releases(mode).await?;
        let engine = AttributionEngine::new(&index);

        self.load_commits(mode, &engine)?;
        self.load_branches().await?;

        if let Err(e) = self.load_insights().await {
            self.section_failed("insights", &e);
        }

        if let Err(e) = self.load_workflows().await {
            self.section_failed("workflows", &e);
        }

        let mttr = engine.match_bugfixes(&self.bugfixes, &self.window);
        self.stats.mttr_secs = mttr.mttr_secs;
        self.stats.windowed_mttr_secs = mttr.windowed_mttr_secs;
        self.stats.bug_matches = self.bugfixes.iter().cloned().collect();
        self.stats.collection_time_secs = start.elapsed().as_secs_f64();

        log::info!(
            target: LOG_TARGET,
            "Collected {} in {:.1}s",
            self.repo.full_name(),
            self.stats.collection_time_secs
        );

        Ok(self.stats)
    }

    async fn load_contributors(&mut self) -> Result<()> {
        let start = Instant::now();
        let count = self.users.load_contributors(self.client, &self.repo.org, &self.repo.name).await?;
        let _ = self.stats.user(UNKNOWN_USER);

        log::info!(
            target: LOG_TARGET,
            "Loaded {count} contributors in {:.1}s",
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    /// The user name for an API user reference, falling back to [`UNKNOWN_USER`].
    async fn user_for(&mut self, user: Option<&UserRef>) -> String {
        let name = match user {
            Some(user) => self.users.resolve_login(self.client, &user.login).await,
            None => None,
        };

        name.unwrap_or_else(|| UNKNOWN_USER.to_string())
    }

    fn section_failed(&mut self, section: &str, error: &ohno::AppError) {
        log::warn!(
            target: LOG_TARGET,
            "Could not collect {section} for {}: {error:#}",
            self.repo.full_name()
        );
        self.stats.failed_sections.push(section.to_string());
    }
}

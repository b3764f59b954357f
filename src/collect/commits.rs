use super::releases::tally_branch_release;
use super::stats::RepoStats;
use super::{Collector, LOG_TARGET, UNKNOWN_USER};
use crate::Result;
use crate::config::ReleaseMode;
use crate::releases::AttributionEngine;
use crate::repo::Commit;
use crate::window::Window;
use std::time::Instant;

impl Collector<'_> {
    /// Count the commits of every branch, then attribute main's history to releases.
    pub(super) fn load_commits(&mut self, mode: ReleaseMode, engine: &AttributionEngine<'_>) -> Result<()> {
        let start = Instant::now();
        log::info!(target: LOG_TARGET, "Loading commit history...");

        let mirror = self.mirror;
        let release_branch = mirror.release_branch();

        for branch in mirror.list_branches() {
            let (branch, _) = branch?;
            log::debug!(target: LOG_TARGET, "Processing commits of '{branch}'");

            let count_releases = mode == ReleaseMode::Branch && branch == release_branch;

            for commit in mirror.branch_commit_log(&branch)? {
                let commit = commit?;
                if commit.timestamp > self.window.base().timestamp() {
                    log::debug!(target: LOG_TARGET, "{} by '{}' is after the collection date, skipping", commit.id, commit.author);
                    continue;
                }

                let user = self
                    .users
                    .resolve_name(commit.author_name())
                    .unwrap_or_else(|| UNKNOWN_USER.to_string());

                tally_commit(&mut self.stats, &user, &commit, &self.window);
                if count_releases {
                    tally_branch_release(&mut self.stats, &user, &commit, &self.window);
                }
            }
        }

        let matched = engine.commit_release_matching(mirror, &self.window)?;
        let commits = &mut self.stats.commits;
        commits.avg_commit_time_secs = matched.mean_lead_time_secs;
        commits.windowed_commit_time_secs = matched.windowed_mean_lead_time_secs;
        commits.unreleased = matched.unreleased;
        commits.total = matched.total;
        commits.collection_time_secs = start.elapsed().as_secs_f64();

        log::info!(
            target: LOG_TARGET,
            "Loaded commit history in {:.1}s ({} on main, {} unreleased)",
            commits.collection_time_secs,
            commits.total,
            commits.unreleased
        );
        Ok(())
    }
}

fn tally_commit(stats: &mut RepoStats, user: &str, commit: &Commit, window: &Window) {
    let in_window = window.contains_timestamp(commit.timestamp);

    stats.commits.window += u64::from(in_window);
    let branch = stats.commits.branch_commits.entry(commit.branch.clone()).or_default();
    branch.total += 1;
    branch.window += u64::from(in_window);

    let user = stats.user(user);
    user.commits += 1;
    user.window_commits += u64::from(in_window);
    user.last_commit_time = user.last_commit_time.max(commit.timestamp);
}

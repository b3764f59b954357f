use super::stats::RepoStats;
use super::{Collector, LOG_TARGET};
use crate::Result;
use crate::hosting::models::{PullRequest, PullState};
use crate::releases::BugfixEvent;
use crate::window::Window;
use core::pin::pin;
use futures::TryStreamExt;
use ohno::IntoAppError;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

/// Decides which merged pull requests are bug fixes.
#[derive(Debug, Clone, Default)]
pub struct BugMatcher {
    patterns: Vec<Regex>,
    labels: HashSet<String>,
}

impl BugMatcher {
    pub fn new(patterns: &[String], labels: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p).into_app_err_with(|| format!("invalid bug pattern '{p}'")))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            labels: labels.iter().cloned().collect(),
        })
    }

    /// Whether some pattern matches at the start of `title`.
    #[must_use]
    pub fn title_matches(&self, title: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.find(title).is_some_and(|m| m.start() == 0))
    }

    #[must_use]
    pub fn is_bug_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// A merged pull request carrying a bug label or a matching title.
    #[must_use]
    pub fn is_bugfix(&self, pr: &PullRequest) -> bool {
        pr.merged_at.is_some() && (pr.labels.iter().any(|l| self.is_bug_label(&l.name)) || self.title_matches(&pr.title))
    }
}

impl Collector<'_> {
    pub(super) async fn load_pull_requests(&mut self) -> Result<()> {
        let start = Instant::now();
        log::info!(target: LOG_TARGET, "Loading pull requests...");

        let client = self.client;
        let path = format!("repos/{}/pulls", self.repo.full_name());
        let mut pulls = pin!(client.query_as::<PullRequest>(&path, None, &[("state", "all")]));

        while let Some(pr) = pulls.try_next().await? {
            if self.window.is_future(pr.created_at) {
                log::debug!(target: LOG_TARGET, "'{}' was created after the collection date, skipping", pr.title);
                continue;
            }

            let author = self.user_for(pr.user.as_ref()).await;
            tally_pull(&mut self.stats, &author, &pr, &self.window, &self.repo.additional_labels);

            if self.bug_matcher.is_bugfix(&pr)
                && let Some(merged) = pr.merged_at
            {
                let _ = self
                    .bugfixes
                    .insert(BugfixEvent::new(&pr.title, &pr.head.sha, merged.timestamp()));
            }
        }

        finish_pull_averages(&mut self.stats);
        self.stats.pull_requests.collection_time_secs = start.elapsed().as_secs_f64();

        log::info!(
            target: LOG_TARGET,
            "Loaded {} pull requests in {:.1}s",
            self.stats.pull_requests.total,
            self.stats.pull_requests.collection_time_secs
        );
        Ok(())
    }
}

/// Count one pull request into the repository and author totals.
fn tally_pull(
    stats: &mut RepoStats,
    author: &str,
    pr: &PullRequest,
    window: &Window,
    label_groups: &BTreeMap<String, Vec<String>>,
) {
    let in_window = window.contains(pr.created_at) || window.contains(pr.updated_at);
    let updated_in_window = window.contains(pr.updated_at);
    let time_open = pr
        .merged_at
        .or(pr.closed_at)
        .map(|end| (end - pr.created_at).num_seconds());

    let merged = pr.merged_at.is_some();
    let closed_unmerged = pr.state == PullState::Closed && !merged;

    let totals = &mut stats.pull_requests;
    totals.total += 1;
    totals.open += u64::from(pr.state == PullState::Open);
    totals.draft += u64::from(pr.draft);
    totals.window += u64::from(in_window);
    totals.merged += u64::from(merged);
    totals.closed += u64::from(closed_unmerged);
    totals.total_time_open_secs += time_open.unwrap_or(0);

    for label in &pr.labels {
        let mut grouped = false;
        for (group, members) in label_groups {
            if members.contains(&label.name) {
                totals.labels.entry(group.clone()).or_default().record(updated_in_window);
            }
            grouped |= *group == label.name;
        }

        if !grouped {
            totals.labels.entry(label.name.clone()).or_default().record(updated_in_window);
        }
    }

    let user = stats.user(author);
    user.pull_requests += 1;
    user.open_pull_requests += u64::from(pr.state == PullState::Open);
    user.draft_pull_requests += u64::from(pr.draft);
    user.window_pull_requests += u64::from(in_window);
    user.merged_pull_requests += u64::from(merged);
    user.closed_pull_requests += u64::from(closed_unmerged);
    user.pr_time_open_secs += time_open.unwrap_or(0);
}

#[expect(clippy::cast_precision_loss, reason = "pull request counts stay far below 2^52")]
fn finish_pull_averages(stats: &mut RepoStats) {
    let totals = &mut stats.pull_requests;
    if totals.total > 0 {
        totals.avg_time_open_secs = totals.total_time_open_secs as f64 / totals.total as f64;
    }

    for user in stats.users.values_mut().filter(|u| u.pull_requests > 0) {
        user.avg_pr_time_open_secs = user.pr_time_open_secs as f64 / user.pull_requests as f64;
    }
}

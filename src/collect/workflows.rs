use super::stats::{RepoStats, percentage};
use super::{Collector, LOG_TARGET};
use crate::Result;
use crate::config::RepoConfig;
use crate::hosting::models::WorkflowRun;
use crate::window::Window;
use core::pin::pin;
use futures::TryStreamExt;
use std::time::Instant;

const RUNS_KEY: &str = "workflow_runs";

impl Collector<'_> {
    pub(super) async fn load_workflows(&mut self) -> Result<()> {
        let start = Instant::now();
        log::info!(target: LOG_TARGET, "Loading workflow runs...");

        let client = self.client;
        let path = format!("repos/{}/actions/runs", self.repo.full_name());
        let mut runs = pin!(client.query_as::<WorkflowRun>(&path, Some(RUNS_KEY), &[]));

        while let Some(run) = runs.try_next().await? {
            if let Some(reason) = skip_reason(&run, self.repo, &self.window) {
                log::debug!(target: LOG_TARGET, "Skipping run {} of '{}': {reason}", run.run_number, run.name);
                continue;
            }

            let Some(user) = self.run_user(&run).await else {
                continue;
            };

            tally_run(&mut self.stats, &user, &run, &self.window, &self.repo.non_user_events);
        }

        finish_workflow_percentages(&mut self.stats);
        self.stats.workflows.collection_time_secs = start.elapsed().as_secs_f64();

        log::info!(
            target: LOG_TARGET,
            "Loaded {} workflows in {:.1}s",
            self.stats.workflows.workflows.len(),
            self.stats.workflows.collection_time_secs
        );
        Ok(())
    }

    /// The user behind a run: its triggering actor, else the head commit's author.
    async fn run_user(&mut self, run: &WorkflowRun) -> Option<String> {
        if let Some(actor) = run.triggering_actor.as_ref()
            && let Some(user) = self.users.resolve_login(self.client, &actor.login).await
        {
            return Some(user);
        }

        let name = run
            .head_commit
            .as_ref()
            .and_then(|c| c.author.as_ref())
            .and_then(|a| a.name.as_deref())?;

        if self.repo.broken_users.iter().any(|u| u == name) {
            return None;
        }

        let user = self.users.resolve_name(name);
        if user.is_none() {
            log::warn!(target: LOG_TARGET, "'{name}' is neither a known user nor a special login, skipping run");
        }
        user
    }
}

fn skip_reason(run: &WorkflowRun, repo: &RepoConfig, window: &Window) -> Option<&'static str> {
    if repo.ignored_workflows.contains(&run.name) {
        return Some("workflow is ignored");
    }

    if run.status.as_ref().is_some_and(|s| repo.ignored_statuses.contains(s)) {
        return Some("status is ignored");
    }

    if run.conclusion.as_deref().is_none_or(str::is_empty) {
        return Some("no conclusion");
    }

    if window.is_future(run.created_at) {
        return Some("created after the collection date");
    }

    None
}

fn tally_run(stats: &mut RepoStats, user: &str, run: &WorkflowRun, window: &Window, non_user_events: &[String]) {
    let conclusion = run.conclusion.clone().unwrap_or_default();
    let runtime = run
        .run_started_at
        .map_or(0, |started| (run.updated_at - started).num_seconds());
    let in_window = window.contains(run.created_at);

    stats.workflows.events.entry(run.event.clone()).or_default().record(in_window);

    if !non_user_events.contains(&run.event) {
        let user = stats.user(user);
        *user.events.entry(run.event.clone()).or_default() += 1;
        user.workflows
            .entry(run.name.clone())
            .or_default()
            .entry(conclusion.clone())
            .or_default()
            .record(runtime);
        user.workflow_totals.entry(conclusion.clone()).or_default().record(runtime);
    }

    let summary = stats.workflows.workflows.entry(run.name.clone()).or_default();
    if in_window {
        summary.window_runs += 1;
        summary.runs.entry(conclusion).or_default().record(runtime);
    }
    summary.retries += u64::from(run.run_attempt > 1);
    summary.last_run = summary.last_run.max(run.run_number);
}

fn finish_workflow_percentages(stats: &mut RepoStats) {
    for summary in stats.workflows.workflows.values_mut() {
        let count = |conclusion: &str| summary.runs.get(conclusion).map_or(0, |r| r.count);
        let window = summary.window_runs;

        let success = percentage(count("success"), window);
        let failure = percentage(count("failure"), window);
        let cancelled = percentage(count("cancelled"), window);
        let startup_failure = percentage(count("startup_failure"), window);
        let skipped = percentage(count("skipped"), window);

        summary.window_runs_of_total_percentage = percentage(window, summary.last_run);
        summary.run_success_percentage = success;
        summary.run_failure_percentage = failure;
        summary.run_cancelled_percentage = cancelled;
        summary.run_startup_failure_percentage = startup_failure;
        summary.run_skipped_percentage = skipped;
    }
}

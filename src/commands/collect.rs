use super::Host;
use super::common::{LogLevel, init_logging};
use crate::Result;
use crate::collect::{Collector, RepoStats};
use crate::config::{Config, RepoConfig};
use crate::hosting::{Client, GraphClient};
use crate::report::{self, FailedRepository};
use crate::repo::{MirrorOptions, RepositoryMirror};
use crate::window::Window;
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use clap::Parser;
use ohno::{IntoAppError, bail};
use std::fs;
use std::io::Write;
use tick::Clock;

const LOG_TARGET: &str = "  velocity";

#[derive(Parser, Debug)]
pub struct CollectArgs {
    /// Path to configuration file (default is `velocity.toml`)
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<Utf8PathBuf>,

    /// GitHub personal access token
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Collection date in RFC 3339 form (default is now)
    #[arg(long, value_name = "DATE")]
    pub date: Option<DateTime<Utc>>,

    /// Days before the collection date counted as the window (overrides the configuration)
    #[arg(long, value_name = "DAYS")]
    pub window_days: Option<u32>,

    /// Only collect these repositories, given as `org/name`
    #[arg(long = "repo", value_name = "ORG/NAME")]
    pub repos: Vec<String>,

    /// Write the JSON report to this file instead of standard output
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<Utf8PathBuf>,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none")]
    pub log_level: LogLevel,
}

pub async fn process_collect<H: Host>(host: &mut H, args: &CollectArgs) -> Result<()> {
    init_logging(args.log_level);

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            let _ = writeln!(host.error(), "❌ {e}");
            host.exit(1);
            return Err(e);
        }
    };

    let token = args.github_token.clone().or_else(|| config.github_token.clone());
    let base = args.date.unwrap_or_else(Utc::now);
    let window = Window::new(base, args.window_days.unwrap_or(config.window_days));
    let clock = Clock::new_tokio();

    let selected = select_repos(&config.repos, &args.repos)?;
    if selected.is_empty() {
        log::warn!(target: LOG_TARGET, "No repositories configured, nothing to collect");
    }

    let mut collected = Vec::with_capacity(selected.len());
    let mut failures = Vec::new();

    for repo in selected {
        match collect_with_retries(&config, repo, token.as_deref(), window, &clock).await {
            Ok(stats) => collected.push(stats),
            Err(e) => {
                log::error!(target: LOG_TARGET, "Giving up on {}: {e:#}", repo.full_name());
                let _ = writeln!(host.error(), "❌ Could not collect {}: {e}", repo.full_name());
                failures.push(FailedRepository {
                    org: repo.org.clone(),
                    name: repo.name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    let mut text = String::new();
    report::generate(&collected, &failures, &mut text)?;

    if let Some(path) = &args.output {
        fs::write(path, &text).into_app_err_with(|| format!("writing report to '{path}'"))?;
        let _ = writeln!(host.output(), "Wrote statistics for {} repositories to {path}", collected.len());
    } else {
        let _ = write!(host.output(), "{text}");
    }

    if !failures.is_empty() {
        host.exit(1);
    }

    Ok(())
}

/// The configured repositories named by `filters`, or all of them when there are no filters.
fn select_repos<'c>(repos: &'c [RepoConfig], filters: &[String]) -> Result<Vec<&'c RepoConfig>> {
    if filters.is_empty() {
        return Ok(repos.iter().collect());
    }

    filters
        .iter()
        .map(|wanted| {
            repos
                .iter()
                .find(|r| r.full_name() == *wanted)
                .into_app_err_with(|| format!("repository '{wanted}' is not configured"))
        })
        .collect()
}

/// Collect `repo`, starting over up to `collection_retries` times.
async fn collect_with_retries(
    config: &Config,
    repo: &RepoConfig,
    token: Option<&str>,
    window: Window,
    clock: &Clock,
) -> Result<RepoStats> {
    let attempts = config.collection_retries.max(1);
    let mut attempt = 1;

    loop {
        match collect_repository(config, repo, token, window, clock).await {
            Ok(stats) => return Ok(stats),
            Err(e) if attempt < attempts => {
                log::warn!(
                    target: LOG_TARGET,
                    "Collecting {} failed (attempt {attempt}/{attempts}), starting over: {e:#}",
                    repo.full_name()
                );
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn collect_repository(
    config: &Config,
    repo: &RepoConfig,
    token: Option<&str>,
    window: Window,
    clock: &Clock,
) -> Result<RepoStats> {
    let Some(graph_token) = token else {
        bail!("a GitHub token is required; pass --github-token, set GITHUB_TOKEN, or set github_token in the configuration");
    };

    let mirror = RepositoryMirror::ensure_mirror(&MirrorOptions {
        path: config.mirror_path(repo),
        clone_url: repo.clone_url(),
        token: token.map(str::to_string),
        main_branch: repo.branches.main.clone(),
        release_branch: repo.branches.release.clone(),
        fetch_timeout: config.fetch_timeout,
    })
    .await?;

    let client = Client::new(token, &config.api_url, config.client_options(), clock.clone())?;
    let graph = GraphClient::new(
        graph_token,
        config.graph_url.clone(),
        repo.org.clone(),
        repo.name.clone(),
        config.graph_options(),
        clock.clone(),
    )?;

    Collector::new(repo, &client, &graph, &mirror, window)?.collect().await
}

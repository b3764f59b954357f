use crate::Result;
use crate::collect::BugMatcher;
use crate::hosting::{ClientOptions, GraphOptions, RetryPolicy};
use crate::releases::TagPattern;
use camino::{Utf8Path, Utf8PathBuf};
use core::time::Duration;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../default_config.toml");

/// Configuration file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "velocity.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding one mirror per repository
    #[serde(default = "default_repo_folder")]
    pub repo_folder: Utf8PathBuf,

    /// Token used when none is given on the command line or in the environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,

    /// Base URL of the REST API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Endpoint of the graph API
    #[serde(default = "default_graph_url")]
    pub graph_url: String,

    /// Days before the collection date that count as "in the window"
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Items requested per REST page
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Items requested per graph page
    #[serde(default = "default_graph_page_size")]
    pub graph_page_size: u32,

    /// Graph quota floor below which requests wait for a reset
    #[serde(default = "default_rate_limit_buffer")]
    pub rate_limit_buffer: i64,

    /// Per-request timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Total attempts for requests answered with an empty body
    #[serde(default = "default_empty_retries")]
    pub empty_retries: u32,

    /// Delay between attempts on empty bodies
    #[serde(default = "default_empty_retry_delay", with = "humantime_serde")]
    pub empty_retry_delay: Duration,

    /// Transport retry budgets
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Attempts at collecting a whole repository before giving up on it
    #[serde(default = "default_collection_retries")]
    pub collection_retries: u32,

    /// Ceiling for a single clone or fetch
    #[serde(default = "default_fetch_timeout", with = "humantime_serde")]
    pub fetch_timeout: Duration,

    #[serde(default)]
    pub repos: Vec<RepoConfig>,
}

fn default_repo_folder() -> Utf8PathBuf {
    Utf8PathBuf::from("repos")
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_graph_url() -> String {
    "https://api.github.com/graphql".to_string()
}

const fn default_window_days() -> u32 {
    1
}

const fn default_per_page() -> u32 {
    100
}

const fn default_graph_page_size() -> u32 {
    30
}

const fn default_rate_limit_buffer() -> i64 {
    10
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_empty_retries() -> u32 {
    3
}

const fn default_empty_retry_delay() -> Duration {
    Duration::from_secs(3)
}

const fn default_collection_retries() -> u32 {
    3
}

const fn default_fetch_timeout() -> Duration {
    Duration::from_secs(300)
}

/// One repository to collect.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    pub org: String,
    pub name: String,

    /// Defaults to `https://github.com/{org}/{name}.git`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_url: Option<String>,

    #[serde(default)]
    pub branches: BranchConfig,

    /// Releases are references matching `tag_patterns`
    #[serde(default)]
    pub tagged_releases: bool,

    /// Releases are the commits of the release branch
    #[serde(default)]
    pub branch_releases: bool,

    #[serde(default)]
    pub tag_patterns: Vec<TagPatternConfig>,

    #[serde(default)]
    pub bug_matching: BugMatchingConfig,

    /// Label groups: every label listed under a group counts towards that group
    #[serde(default)]
    pub additional_labels: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub ignored_workflows: Vec<String>,

    #[serde(default = "default_ignored_statuses")]
    pub ignored_statuses: Vec<String>,

    /// Workflow events not attributed to users
    #[serde(default = "default_non_user_events")]
    pub non_user_events: Vec<String>,

    /// Display name to login, for authors the platform cannot resolve
    #[serde(default)]
    pub special_logins: BTreeMap<String, String>,

    /// Commit author names whose workflow runs are dropped
    #[serde(default)]
    pub broken_users: Vec<String>,
}

fn default_ignored_statuses() -> Vec<String> {
    vec!["queued".to_string()]
}

fn default_non_user_events() -> Vec<String> {
    vec!["schedule".to_string()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BranchConfig {
    #[serde(default = "default_branch")]
    pub main: String,

    #[serde(default = "default_branch")]
    pub release: String,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            main: default_branch(),
            release: default_branch(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TagPatternConfig {
    pub name: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BugMatchingConfig {
    /// Regular expressions matched against the start of pull request titles
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Labels marking a pull request as a bug fix
    #[serde(default)]
    pub labels: Vec<String>,
}

/// How a repository's releases are identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    Tags,
    Branch,

    /// Releases published on the hosting platform
    Hosted,
}

impl RepoConfig {
    /// `org/name`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.org, self.name)
    }

    #[must_use]
    pub fn clone_url(&self) -> String {
        self.clone_url
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}/{}.git", self.org, self.name))
    }

    pub fn release_mode(&self) -> Result<ReleaseMode> {
        match (self.tagged_releases, self.branch_releases) {
            (true, true) => Err(app_err!(
                "repository '{}' cannot track both tagged releases and branch releases",
                self.full_name()
            )),
            (true, false) => Ok(ReleaseMode::Tags),
            (false, true) => Ok(ReleaseMode::Branch),
            (false, false) => Ok(ReleaseMode::Hosted),
        }
    }

    pub fn tag_patterns(&self) -> Result<Vec<TagPattern>> {
        self.tag_patterns.iter().map(|t| TagPattern::new(&t.name, &t.pattern)).collect()
    }

    pub fn bug_matcher(&self) -> Result<BugMatcher> {
        BugMatcher::new(&self.bug_matching.patterns, &self.bug_matching.labels)
    }

    fn validate(&self) -> Result<()> {
        if self.org.is_empty() || self.name.is_empty() {
            return Err(app_err!("repository entries need both 'org' and 'name'"));
        }

        let mode = self.release_mode()?;
        if mode == ReleaseMode::Tags && self.tag_patterns.is_empty() {
            return Err(app_err!(
                "repository '{}' tracks tagged releases but has no tag_patterns",
                self.full_name()
            ));
        }

        let _ = self.tag_patterns()?;
        let _ = self.bug_matcher()?;
        Ok(())
    }
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// Without an explicit path, `velocity.toml` in the current directory is used when present.
    pub fn load(config_path: Option<&Utf8Path>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading configuration file '{path}'"))?;
            (path.to_path_buf(), text)
        } else {
            let path = Utf8PathBuf::from(DEFAULT_CONFIG_FILE);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Self::from_toml(DEFAULT_CONFIG_TOML);
                }
                Err(e) => return Err(e).into_app_err_with(|| format!("reading configuration file '{path}'")),
            }
        };

        Self::from_toml(&text).map_err(|e| app_err!("invalid configuration file '{final_path}': {e}"))
    }

    /// Parse and validate configuration text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).into_app_err("parsing configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Save the default configuration to a TOML file
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.per_page == 0 {
            return Err(app_err!("per_page must be greater than zero"));
        }

        if !(1..=100).contains(&self.graph_page_size) {
            return Err(app_err!("graph_page_size must be between 1 and 100, got {}", self.graph_page_size));
        }

        if self.rate_limit_buffer < 0 {
            return Err(app_err!("rate_limit_buffer cannot be negative, got {}", self.rate_limit_buffer));
        }

        if self.empty_retries == 0 {
            return Err(app_err!("empty_retries must be at least 1"));
        }

        if self.collection_retries == 0 {
            return Err(app_err!("collection_retries must be at least 1"));
        }

        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 0.0 {
            return Err(app_err!("retry.backoff_factor must be a non-negative number, got {}", self.retry.backoff_factor));
        }

        let mut seen = HashSet::new();
        for repo in &self.repos {
            repo.validate()?;
            if !seen.insert(repo.full_name()) {
                return Err(app_err!("repository '{}' is configured more than once", repo.full_name()));
            }
        }

        Ok(())
    }

    #[must_use]
    pub const fn client_options(&self) -> ClientOptions {
        ClientOptions {
            per_page: self.per_page,
            request_timeout: self.request_timeout,
            empty_retries: self.empty_retries,
            empty_retry_delay: self.empty_retry_delay,
            retry: self.retry,
        }
    }

    #[must_use]
    pub const fn graph_options(&self) -> GraphOptions {
        GraphOptions {
            page_size: self.graph_page_size,
            rate_limit_buffer: self.rate_limit_buffer,
            request_timeout: self.request_timeout,
            retry: self.retry,
        }
    }

    /// Where the mirror of `repo` lives.
    #[must_use]
    pub fn mirror_path(&self, repo: &RepoConfig) -> Utf8PathBuf {
        self.repo_folder.join(&repo.name)
    }
}

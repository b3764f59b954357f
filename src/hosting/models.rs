//! Typed views over GitHub API payloads, restricted to the fields the collector reads.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct UserRef {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Entry of `/repos/{org}/{repo}/contributors`; anonymous contributors carry no login.
#[derive(Debug, Clone, Deserialize)]
pub struct Contributor {
    #[serde(default)]
    pub login: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadRef {
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub title: String,
    pub state: PullState,
    #[serde(default)]
    pub draft: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<UserRef>,
    pub head: HeadRef,
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitAuthor {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadCommit {
    #[serde(default)]
    pub author: Option<CommitAuthor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    pub event: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub run_started_at: Option<DateTime<Utc>>,
    pub run_number: u64,
    #[serde(default = "first_attempt")]
    pub run_attempt: u64,
    #[serde(default)]
    pub triggering_actor: Option<UserRef>,
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
}

const fn first_attempt() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostedRelease {
    #[serde(default)]
    pub name: Option<String>,
    pub tag_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<UserRef>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Week entry of `/stats/commit_activity`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitActivityWeek {
    pub days: Vec<u64>,
    pub total: u64,
    pub week: i64,
}

/// Entry of `/stats/contributors`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContributorActivity {
    #[serde(default)]
    pub author: Option<UserRef>,
    pub total: u64,
    #[serde(default)]
    pub weeks: Vec<ContributorWeek>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ContributorWeek {
    pub w: i64,
    pub a: u64,
    pub d: u64,
    pub c: u64,
}

/// A node of the graph `refs` connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchNode {
    pub name: String,
    #[serde(default)]
    pub branch_protection_rule: Option<ProtectionRule>,
    #[serde(default)]
    pub target: Option<BranchTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtectionRule {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchTarget {
    #[serde(default)]
    pub author: Option<GitActor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitActor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<UserRef>,
}

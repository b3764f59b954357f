use super::stats::RepoStats;
use super::{Collector, LOG_TARGET};
use crate::Result;
use crate::hosting::GraphQuery;
use crate::hosting::models::BranchNode;
use crate::window::Window;
use core::pin::pin;
use futures::TryStreamExt;
use ohno::IntoAppError;
use serde_json::Value;
use std::time::Instant;

const REFS_FRAGMENT: &str = r#"    refs(first: $pagination, refPrefix: "refs/heads/") {
      nodes {
        name
        branchProtectionRule { id }
        target {
          ... on Commit {
            author { name date user { login } }
          }
        }
      }
      pageInfo { endCursor hasNextPage }
    }"#;

/// What a branch node contributes once classified.
#[derive(Debug, PartialEq, Eq)]
enum BranchClass<'n> {
    /// No commit author to speak of.
    Empty,

    /// Last touched after the collection date.
    Future,
    Active {
        protected: bool,
        in_window: bool,
        login: Option<&'n str>,
    },
}

impl Collector<'_> {
    /// Count branches from the mirror, then protection and ownership from the graph API.
    pub(super) async fn load_branches(&mut self) -> Result<()> {
        let start = Instant::now();
        log::info!(target: LOG_TARGET, "Loading branch details...");

        let mirror = self.mirror;
        for branch in mirror.list_branches() {
            let (name, tip) = branch?;
            tally_mirror_branch(&mut self.stats, &name, tip, mirror.main_branch(), &self.window);
        }

        if let Err(e) = self.load_branch_owners().await {
            self.section_failed("branches", &e);
        }

        self.stats.branches.collection_time_secs = start.elapsed().as_secs_f64();
        log::info!(
            target: LOG_TARGET,
            "Loaded {} branches in {:.1}s",
            self.stats.branches.total,
            self.stats.branches.collection_time_secs
        );
        Ok(())
    }

    async fn load_branch_owners(&mut self) -> Result<()> {
        let graph = self.graph;
        let query = GraphQuery::new("refs", REFS_FRAGMENT, true)?;
        let mut pages = pin!(graph.query(&query));

        while let Some(mut page) = pages.try_next().await? {
            let nodes: Vec<BranchNode> = serde_json::from_value(page.get_mut("nodes").map_or(Value::Null, Value::take))
                .into_app_err("unexpected branch nodes in graph response")?;

            for node in &nodes {
                match classify(node, &self.window) {
                    BranchClass::Empty => {
                        log::debug!(target: LOG_TARGET, "'{}' has no commit author, counting as empty", node.name);
                        self.stats.branches.empty += 1;
                    }
                    BranchClass::Future => {
                        log::debug!(target: LOG_TARGET, "'{}' was updated after the collection date, skipping", node.name);
                    }
                    BranchClass::Active {
                        protected,
                        in_window,
                        login,
                    } => {
                        self.stats.branches.protected += u64::from(protected);

                        if let Some(login) = login
                            && let Some(user) = self.users.resolve_login(self.client, login).await
                        {
                            let user = self.stats.user(&user);
                            user.branches += 1;
                            user.window_branches += u64::from(in_window);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

fn tally_mirror_branch(stats: &mut RepoStats, name: &str, tip: i64, main_branch: &str, window: &Window) {
    let branches = &mut stats.branches;
    branches.total += 1;
    branches.window += u64::from(window.contains_timestamp(tip));
    branches.main_branch |= name == main_branch;
}

fn classify<'n>(node: &'n BranchNode, window: &Window) -> BranchClass<'n> {
    let Some(author) = node
        .target
        .as_ref()
        .and_then(|t| t.author.as_ref())
        .filter(|a| a.name.as_deref().is_some_and(|n| !n.is_empty()))
    else {
        return BranchClass::Empty;
    };

    let Some(updated) = author.date else {
        return BranchClass::Empty;
    };

    if window.is_future(updated) {
        return BranchClass::Future;
    }

    BranchClass::Active {
        protected: node.branch_protection_rule.is_some(),
        in_window: window.contains(updated),
        login: author.user.as_ref().map(|u| u.login.as_str()),
    }
}

use crate::Result;
use crate::hosting::models::HostedRelease;
use crate::repo::{RepositoryMirror, WalkOrder};
use git2::ReferenceType;
use ohno::IntoAppError;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

const LOG_TARGET: &str = "  releases";

/// A point in history at which code shipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Release {
    /// Commit id for tag and branch releases, tag name for hosted releases.
    pub id: String,

    /// Seconds since the epoch.
    pub timestamp: i64,

    /// Author identity; `Name <email>` for git-derived releases, a login for hosted ones.
    pub author: String,
}

/// A named pattern selecting release tags.
#[derive(Debug, Clone)]
pub struct TagPattern {
    pub name: String,
    pub regex: Regex,
}

impl TagPattern {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let name = name.into();
        let regex = Regex::new(pattern).into_app_err_with(|| format!("invalid tag pattern '{name}': '{pattern}'"))?;
        Ok(Self { name, regex })
    }
}

/// Releases of one repository, ascending by timestamp.
///
/// Built once per collection run and only ever borrowed afterwards.
#[derive(Debug, Clone, Default)]
pub struct ReleaseIndex {
    releases: Vec<Release>,
    tag_matches: BTreeMap<String, u64>,
}

impl ReleaseIndex {
    /// Build an index from releases in any order.
    #[must_use]
    pub fn new(mut releases: Vec<Release>) -> Self {
        releases.sort_by_key(|r| r.timestamp);
        Self {
            releases,
            tag_matches: BTreeMap::new(),
        }
    }

    /// Every direct reference whose short name matches one of `patterns`, peeled to its commit.
    ///
    /// Per-pattern match counts are kept in [`ReleaseIndex::tag_matches`].
    pub fn from_tags(mirror: &RepositoryMirror, patterns: &[TagPattern]) -> Result<Self> {
        let repo = mirror.repository();
        let mut tag_matches: BTreeMap<String, u64> = patterns.iter().map(|p| (p.name.clone(), 0)).collect();
        let mut releases = Vec::new();

        for reference in repo.references().into_app_err("could not enumerate references")? {
            let reference = reference.into_app_err("could not read reference")?;
            if reference.kind() != Some(ReferenceType::Direct) {
                continue;
            }

            let Some(short) = reference.shorthand() else {
                continue;
            };

            let mut matched = false;
            for pattern in patterns.iter().filter(|p| p.regex.is_match(short)) {
                *tag_matches.entry(pattern.name.clone()).or_default() += 1;
                matched = true;
            }

            if !matched {
                continue;
            }

            match reference.peel_to_commit() {
                Ok(commit) => {
                    let author = commit.author();
                    releases.push(Release {
                        id: commit.id().to_string(),
                        timestamp: commit.time().seconds(),
                        author: format!(
                            "{} <{}>",
                            String::from_utf8_lossy(author.name_bytes()),
                            String::from_utf8_lossy(author.email_bytes())
                        ),
                    });
                }
                Err(e) => log::debug!(target: LOG_TARGET, "Tag '{short}' does not point at a commit: {e}"),
            }
        }

        log::debug!(target: LOG_TARGET, "Found {} tagged releases ({tag_matches:?})", releases.len());

        let mut index = Self::new(releases);
        index.tag_matches = tag_matches;
        Ok(index)
    }

    /// Every commit reachable from the release branch.
    pub fn from_branch(mirror: &RepositoryMirror) -> Result<Self> {
        let releases = mirror
            .walk_commits(mirror.release_branch(), WalkOrder::TopologicalReverse, None)?
            .map(|commit| {
                commit.map(|c| Release {
                    id: c.id,
                    timestamp: c.timestamp,
                    author: c.author,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(target: LOG_TARGET, "Found {} commits on '{}'", releases.len(), mirror.release_branch());
        Ok(Self::new(releases))
    }

    /// Releases published on the hosting platform, keyed by tag name.
    #[must_use]
    pub fn from_hosted(releases: &[HostedRelease]) -> Self {
        Self::new(
            releases
                .iter()
                .map(|r| Release {
                    id: r.tag_name.clone(),
                    timestamp: r.created_at.timestamp(),
                    author: r.author.as_ref().map(|a| a.login.clone()).unwrap_or_default(),
                })
                .collect(),
        )
    }

    /// The first release at or after `timestamp`.
    #[must_use]
    pub fn first_at_or_after(&self, timestamp: i64) -> Option<&Release> {
        let idx = self.releases.partition_point(|r| r.timestamp < timestamp);
        self.releases.get(idx)
    }

    #[must_use]
    pub fn earliest(&self) -> Option<&Release> {
        self.releases.first()
    }

    #[must_use]
    pub fn releases(&self) -> &[Release] {
        &self.releases
    }

    #[must_use]
    pub const fn tag_matches(&self) -> &BTreeMap<String, u64> {
        &self.tag_matches
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.releases.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }
}

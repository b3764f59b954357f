use super::stats::{ReleaseSummary, RepoStats};
use super::{Collector, LOG_TARGET, UNKNOWN_USER};
use crate::Result;
use crate::config::ReleaseMode;
use crate::hosting::UserDirectory;
use crate::hosting::models::HostedRelease;
use crate::releases::{Release, ReleaseIndex};
use crate::repo::Commit;
use crate::window::Window;
use core::pin::pin;
use futures::TryStreamExt;
use std::time::Instant;

impl Collector<'_> {
    /// Build the release index for `mode` and count releases.
    ///
    /// Branch-mode releases are counted while walking commits, since they are the release branch's
    /// commits. A failed hosted listing leaves an empty index.
    pub(super) async fn load_releases(&mut self, mode: ReleaseMode) -> Result<ReleaseIndex> {
        let start = Instant::now();

        let index = match mode {
            ReleaseMode::Tags => {
                log::info!(target: LOG_TARGET, "Loading tagged releases...");
                let index = ReleaseIndex::from_tags(self.mirror, &self.repo.tag_patterns()?)?;
                self.stats.tag_matches.clone_from(index.tag_matches());
                tally_git_releases(&mut self.stats, &self.users, index.releases(), &self.window);
                index
            }
            ReleaseMode::Branch => {
                log::info!(target: LOG_TARGET, "Tracking releases as commits to '{}'", self.mirror.release_branch());
                ReleaseIndex::from_branch(self.mirror)?
            }
            ReleaseMode::Hosted => {
                log::info!(target: LOG_TARGET, "Loading published releases...");
                match self.load_hosted_releases().await {
                    Ok(hosted) => ReleaseIndex::from_hosted(&hosted),
                    Err(e) => {
                        self.section_failed("releases", &e);
                        ReleaseIndex::default()
                    }
                }
            }
        };

        self.stats.releases.collection_time_secs = start.elapsed().as_secs_f64();
        log::info!(
            target: LOG_TARGET,
            "Indexed {} releases in {:.1}s",
            index.len(),
            self.stats.releases.collection_time_secs
        );

        Ok(index)
    }

    /// Fetch and count the releases published up to the collection date.
    async fn load_hosted_releases(&mut self) -> Result<Vec<HostedRelease>> {
        let client = self.client;
        let path = format!("repos/{}/releases", self.repo.full_name());
        let mut listing = pin!(client.query_as::<HostedRelease>(&path, None, &[]));
        let mut kept = Vec::new();

        while let Some(release) = listing.try_next().await? {
            if self.window.is_future(release.created_at) {
                log::debug!(target: LOG_TARGET, "Release '{}' was created after the collection date, skipping", release.tag_name);
                continue;
            }

            let author = self.user_for(release.author.as_ref()).await;
            let in_window = self.window.contains(release.created_at);

            let totals = &mut self.stats.releases;
            totals.total += 1;
            totals.window += u64::from(in_window);
            let _ = totals.releases.insert(
                release.name.clone().unwrap_or_else(|| release.tag_name.clone()),
                ReleaseSummary {
                    created_at: release.created_at,
                    author: author.clone(),
                    body: release.body.clone(),
                },
            );

            let user = self.stats.user(&author);
            user.releases += 1;
            user.window_releases += u64::from(in_window);

            kept.push(release);
        }

        Ok(kept)
    }
}

/// Count tag releases per commit author, skipping those after the collection date.
fn tally_git_releases(stats: &mut RepoStats, users: &UserDirectory, releases: &[Release], window: &Window) {
    for release in releases.iter().filter(|r| r.timestamp <= window.base().timestamp()) {
        let in_window = window.contains_timestamp(release.timestamp);
        stats.releases.total += 1;
        stats.releases.window += u64::from(in_window);

        let user = users
            .resolve_name(author_name(&release.author))
            .unwrap_or_else(|| UNKNOWN_USER.to_string());
        let user = stats.user(&user);
        user.releases += 1;
        user.window_releases += u64::from(in_window);
    }
}

/// Count one release-branch commit as a release.
pub(super) fn tally_branch_release(stats: &mut RepoStats, user: &str, commit: &Commit, window: &Window) {
    let in_window = window.contains_timestamp(commit.timestamp);
    stats.releases.total += 1;
    stats.releases.window += u64::from(in_window);

    let user = stats.user(user);
    user.releases += 1;
    user.window_releases += u64::from(in_window);
}

/// The display name of a `Name <email>` identity.
fn author_name(identity: &str) -> &str {
    identity.split_once(" <").map_or(identity, |(name, _)| name).trim()
}

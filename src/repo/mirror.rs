use super::commit::Commit;
use crate::Result;
use camino::{Utf8Path, Utf8PathBuf};
use core::time::Duration;
use git2::build::RepoBuilder;
use git2::{AutotagOption, BranchType, Cred, FetchOptions, FetchPrune, Oid, RemoteCallbacks, Repository, Revwalk, Sort};
use ohno::{IntoAppError, bail};
use std::collections::HashSet;
use std::fs;
use std::time::Instant;
use tokio::task::spawn_blocking;

const LOG_TARGET: &str = "    mirror";
const REMOTE: &str = "origin";
const TOKEN_USER: &str = "x-access-token";

/// Order in which [`RepositoryMirror::walk_commits`] yields commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrder {
    /// Parents before children, oldest first.
    TopologicalReverse,

    /// Newest commit time first.
    TimeDescending,
}

impl WalkOrder {
    const fn sort(self) -> Sort {
        match self {
            Self::TopologicalReverse => Sort::TOPOLOGICAL.union(Sort::REVERSE),
            Self::TimeDescending => Sort::TIME,
        }
    }
}

/// Where and how to mirror a repository.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub path: Utf8PathBuf,
    pub clone_url: String,
    pub token: Option<String>,
    pub main_branch: String,
    pub release_branch: String,

    /// Ceiling for a single clone or fetch transfer.
    pub fetch_timeout: Duration,
}

/// A local clone of a remote repository.
pub struct RepositoryMirror {
    repo: Repository,
    path: Utf8PathBuf,
    main_branch: String,
    release_branch: String,
}

impl core::fmt::Debug for RepositoryMirror {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RepositoryMirror")
            .field("path", &self.path)
            .field("main_branch", &self.main_branch)
            .field("release_branch", &self.release_branch)
            .finish_non_exhaustive()
    }
}

impl RepositoryMirror {
    /// Clone the repository if it is not present locally, otherwise fetch `origin`.
    ///
    /// Tags are fetched and deleted remote branches pruned. A transfer that does not complete
    /// within `fetch_timeout` is reported as an error, including one where the server stops
    /// responding. An existing path that is not a repository is only cloned into when it is an
    /// empty directory; anything else there is left alone and reported.
    pub async fn ensure_mirror(options: &MirrorOptions) -> Result<Self> {
        let start_time = Instant::now();
        let path = options.path.as_path();

        let owned = options.clone();
        let transfer = spawn_blocking(move || sync_mirror(&owned));
        let repo = match tokio::time::timeout(options.fetch_timeout, transfer).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => return Err(e).into_app_err_with(|| format!("mirroring task for '{}' failed", options.clone_url)),
            Err(_) => bail!(
                "mirroring '{}' into '{path}' did not complete within {}s",
                options.clone_url,
                options.fetch_timeout.as_secs()
            ),
        };

        log::info!(
            target: LOG_TARGET,
            "'{path}' is up to date ({:.3}s)",
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            repo,
            path: options.path.clone(),
            main_branch: options.main_branch.clone(),
            release_branch: options.release_branch.clone(),
        })
    }

    /// Open an existing local repository without touching the network.
    pub fn open(path: impl AsRef<Utf8Path>, main_branch: &str, release_branch: &str) -> Result<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path).into_app_err_with(|| format!("could not open repository '{path}'"))?;

        Ok(Self {
            repo,
            path: path.to_path_buf(),
            main_branch: main_branch.to_string(),
            release_branch: release_branch.to_string(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    #[must_use]
    pub fn main_branch(&self) -> &str {
        &self.main_branch
    }

    #[must_use]
    pub fn release_branch(&self) -> &str {
        &self.release_branch
    }

    #[must_use]
    pub const fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Resolve a branch name to the commit it points at.
    ///
    /// Remote-tracking branches win over local ones, with a final fallback to revision syntax.
    #[must_use]
    pub fn resolve_branch(&self, name: &str) -> Option<Oid> {
        for candidate in [format!("refs/remotes/{REMOTE}/{name}"), format!("refs/heads/{name}")] {
            if let Ok(reference) = self.repo.find_reference(&candidate)
                && let Ok(commit) = reference.peel_to_commit()
            {
                return Some(commit.id());
            }
        }

        self.repo
            .revparse_single(name)
            .and_then(|obj| obj.peel_to_commit())
            .map(|c| c.id())
            .ok()
    }

    /// Every branch with the time of its latest commit, main and release first.
    ///
    /// Remote-tracking branches are reported without their `origin/` prefix; each name is reported
    /// once. A missing main or release branch is logged and skipped.
    pub fn list_branches(&self) -> impl Iterator<Item = Result<(String, i64)>> + '_ {
        let mut seen = HashSet::new();

        let primaries = [self.main_branch.clone(), self.release_branch.clone()]
            .into_iter()
            .filter_map(|name| match self.branch_tip_time(&name) {
                Some(ts) => Some(Ok((name, ts))),
                None => {
                    log::warn!(target: LOG_TARGET, "Branch '{name}' not found in '{}'", self.path);
                    None
                }
            });

        let (failure, remotes) = match self
            .repo
            .branches(Some(BranchType::Remote))
            .into_app_err("could not enumerate remote branches")
        {
            Ok(branches) => (None, Some(remote_branches(branches))),
            Err(e) => (Some(Err(e)), None),
        };

        primaries
            .chain(failure)
            .chain(remotes.into_iter().flatten())
            .filter(move |item| match item {
                Ok((name, _)) => seen.insert(name.clone()),
                Err(_) => true,
            })
    }

    fn branch_tip_time(&self, name: &str) -> Option<i64> {
        let oid = self.resolve_branch(name)?;
        self.repo.find_commit(oid).ok().map(|c| c.time().seconds())
    }

    /// Walk the history reachable from `start_ref` in `order`, hiding the ancestry of `exclude_ref`.
    ///
    /// A `start_ref` that does not resolve produces an empty walk and a warning.
    pub fn walk_commits(&self, start_ref: &str, order: WalkOrder, exclude_ref: Option<&str>) -> Result<CommitWalk<'_>> {
        let Some(start) = self.resolve_branch(start_ref) else {
            log::warn!(target: LOG_TARGET, "Reference '{start_ref}' not found in '{}', nothing to walk", self.path);
            return Ok(CommitWalk::empty(&self.repo, start_ref));
        };

        let mut walk = self.repo.revwalk().into_app_err("could not start history walk")?;
        walk.set_sorting(order.sort()).into_app_err("could not set walk order")?;
        walk.push(start).into_app_err_with(|| format!("could not walk from '{start_ref}'"))?;

        if let Some(exclude) = exclude_ref {
            match self.resolve_branch(exclude) {
                Some(oid) => walk.hide(oid).into_app_err_with(|| format!("could not exclude '{exclude}'"))?,
                None => log::warn!(target: LOG_TARGET, "Reference '{exclude}' not found, not excluding it"),
            }
        }

        Ok(CommitWalk {
            repo: &self.repo,
            walk: Some(walk),
            branch: start_ref.to_string(),
        })
    }

    /// Newest-first commits of `branch`.
    ///
    /// For any branch but main, main's history is hidden. This approximates the commits unique to
    /// the branch; it is not a merge-base diff.
    pub fn branch_commit_log(&self, branch: &str) -> Result<CommitWalk<'_>> {
        let exclude = (branch != self.main_branch).then_some(self.main_branch.as_str());
        self.walk_commits(branch, WalkOrder::TimeDescending, exclude)
    }
}

/// Remote-tracking branches with the time of their tip, without the `origin/` prefix.
fn remote_branches<'r>(branches: git2::Branches<'r>) -> impl Iterator<Item = Result<(String, i64)>> + 'r {
    let prefix = format!("{REMOTE}/");

    branches.filter_map(move |entry| {
        let (branch, _) = match entry.into_app_err("could not read remote branch") {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };

        let full = branch.name().ok().flatten()?;
        let name = full.strip_prefix(&prefix).unwrap_or(full);
        if name == "HEAD" {
            return None;
        }

        let ts = branch.get().peel_to_commit().ok()?.time().seconds();
        Some(Ok((name.to_string(), ts)))
    })
}

/// Clone or fetch, blocking the calling thread.
fn sync_mirror(options: &MirrorOptions) -> Result<Repository> {
    let path = options.path.as_path();

    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).into_app_err_with(|| format!("could not create directory '{parent}'"))?;
        }
        return clone_repo(options);
    }

    match Repository::open(path) {
        Ok(repo) => {
            fetch_repo(&repo, options)?;
            Ok(repo)
        }
        Err(e) => {
            let mut entries = fs::read_dir(path).into_app_err_with(|| format!("'{path}' is not a usable mirror ({e})"))?;
            if entries.next().is_some() {
                bail!("'{path}' exists but is not a git repository ({e}); move it aside or choose another repo_folder");
            }

            log::info!(target: LOG_TARGET, "'{path}' is an empty directory, cloning into it");
            clone_repo(options)
        }
    }
}

fn callbacks(options: &MirrorOptions, started: Instant) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();

    if let Some(token) = options.token.as_deref() {
        let _ = callbacks.credentials(move |_url, _username, _allowed| Cred::userpass_plaintext(TOKEN_USER, token));
    }

    let ceiling = options.fetch_timeout;
    let _ = callbacks.transfer_progress(move |progress| {
        log::trace!(
            target: LOG_TARGET,
            "received {}/{} objects",
            progress.received_objects(),
            progress.total_objects()
        );

        // Returning false aborts the transfer.
        started.elapsed() <= ceiling
    });

    callbacks
}

fn fetch_options(options: &MirrorOptions, started: Instant) -> FetchOptions<'_> {
    let mut fetch = FetchOptions::new();
    let _ = fetch
        .remote_callbacks(callbacks(options, started))
        .download_tags(AutotagOption::All)
        .prune(FetchPrune::On);
    fetch
}

fn clone_repo(options: &MirrorOptions) -> Result<Repository> {
    log::info!(target: LOG_TARGET, "Cloning '{}' into '{}'", options.clone_url, options.path);
    let started = Instant::now();

    let mut builder = RepoBuilder::new();
    let _ = builder.fetch_options(fetch_options(options, started));

    builder
        .clone(&options.clone_url, options.path.as_std_path())
        .map_err(|e| transfer_error(e, options, started, "clone"))
}

fn fetch_repo(repo: &Repository, options: &MirrorOptions) -> Result<()> {
    log::info!(target: LOG_TARGET, "Updating '{}'", options.path);
    let started = Instant::now();

    let mut remote = repo
        .find_remote(REMOTE)
        .into_app_err_with(|| format!("'{}' has no '{REMOTE}' remote", options.path))?;

    let mut fetch = fetch_options(options, started);
    let no_refspecs: &[&str] = &[];
    remote
        .fetch(no_refspecs, Some(&mut fetch), None)
        .map_err(|e| transfer_error(e, options, started, "fetch"))?;

    let stats = remote.stats();
    if stats.received_objects() < stats.total_objects() {
        bail!(
            "fetch of '{}' incomplete: received {} of {} objects",
            options.clone_url,
            stats.received_objects(),
            stats.total_objects()
        );
    }

    Ok(())
}

fn transfer_error(e: git2::Error, options: &MirrorOptions, started: Instant, operation: &str) -> ohno::AppError {
    if started.elapsed() > options.fetch_timeout {
        return ohno::app_err!(
            "{operation} of '{}' did not complete within {}s",
            options.clone_url,
            options.fetch_timeout.as_secs()
        );
    }

    ohno::app_err!("{operation} of '{}' failed: {e}", options.clone_url)
}

/// Lazy history walk yielding [`Commit`]s.
pub struct CommitWalk<'r> {
    repo: &'r Repository,
    walk: Option<Revwalk<'r>>,
    branch: String,
}

impl core::fmt::Debug for CommitWalk<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommitWalk").field("branch", &self.branch).finish_non_exhaustive()
    }
}

impl<'r> CommitWalk<'r> {
    fn empty(repo: &'r Repository, branch: &str) -> Self {
        Self {
            repo,
            walk: None,
            branch: branch.to_string(),
        }
    }
}

impl Iterator for CommitWalk<'_> {
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        let oid = self.walk.as_mut()?.next()?;

        Some(
            oid.and_then(|oid| self.repo.find_commit(oid))
                .into_app_err("could not read commit during history walk")
                .map(|commit| {
                    let author = commit.author();
                    Commit {
                        id: commit.id().to_string(),
                        author: format!(
                            "{} <{}>",
                            String::from_utf8_lossy(author.name_bytes()),
                            String::from_utf8_lossy(author.email_bytes())
                        ),
                        timestamp: commit.time().seconds(),
                        branch: self.branch.clone(),
                    }
                }),
        )
    }
}

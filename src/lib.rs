//! repo-velocity crate
//!
//! This crate mirrors a git repository and its GitHub API surface, then derives engineering-velocity
//! metrics from them: pull-request throughput, release cadence, mean time to release, and branch and
//! workflow health.
//!
//! # Module Organization
//!
//! - [`hosting`]: Paginated REST client, rate-limited graph client, and identity cache
//! - [`repo`]: Local repository mirror and commit graph walks
//! - [`releases`]: Release index construction and release attribution (lead time, MTTR)
//! - [`collect`]: Per-repository aggregation of everything above into [`collect::RepoStats`]
//! - [`report`]: JSON rendering of the collected statistics
//! - [`config`]: TOML configuration
//! - [`commands`]: Command-line interface and orchestration
//! - [`window`]: The collection window

/// Result type alias using `ohno::AppError` as the default error type.
pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

pub mod collect;
pub mod commands;
pub mod config;
pub mod hosting;
pub mod releases;
pub mod repo;
pub mod report;
pub mod window;

pub use commands::{Host, run};

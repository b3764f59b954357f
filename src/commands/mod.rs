//! Command-line interface and orchestration for repo-velocity
//!
//! # Commands
//!
//! - **collect**: For every configured repository, refresh the local mirror, build the REST and
//!   graph clients, run the [`Collector`](crate::collect::Collector), and emit one JSON report.
//!   A repository whose collection fails is retried from scratch up to `collection_retries` times
//!   before it is listed as a failure.
//! - **init**: Generate a default configuration file
//! - **validate**: Check configuration file syntax and patterns
//!
//! The `run` function parses command-line arguments using clap and routes to the appropriate
//! command handler. All output goes through a [`Host`] so the commands can be exercised in tests.

mod collect;
mod common;
mod host;
mod init;
mod run;
mod validate;

pub use collect::{CollectArgs, process_collect};
pub use common::LogLevel;
pub use host::Host;
pub use init::{InitArgs, init_config};
pub use run::run;
pub use validate::{ValidateArgs, validate_config};

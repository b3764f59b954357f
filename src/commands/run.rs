//! Command dispatch logic for repo-velocity

use super::{CollectArgs, InitArgs, ValidateArgs, init_config, process_collect, validate_config};
use crate::{Host, Result};
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "repo-velocity", author, version, long_about = None)]
#[command(about = "Derive engineering-velocity metrics from git history and the GitHub API")]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(subcommand)]
    command: VelocitySubcommand,
}

#[derive(Subcommand, Debug)]
enum VelocitySubcommand {
    /// Collect statistics for the configured repositories and emit a JSON report
    Collect(Box<CollectArgs>),
    /// Generate a default configuration file
    Init(InitArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
}

/// Dispatch command-line arguments to the appropriate handler
///
/// This function parses the command-line arguments and executes the corresponding
/// subcommand. It's designed to be called from main.rs with the program arguments.
///
/// # Errors
///
/// Returns an error if command parsing fails or if the executed command fails
pub async fn run<I, T, H>(host: &mut H, args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    H: Host,
{
    match &Cli::parse_from(args).command {
        VelocitySubcommand::Collect(collect_args) => process_collect(host, collect_args).await,
        VelocitySubcommand::Init(init_args) => init_config(host, init_args),
        VelocitySubcommand::Validate(validate_args) => validate_config(host, validate_args),
    }
}

//! CLI surface for git-wmem.
//!
//! Command tree + thin handlers; all real work lives in the library
//! modules.

use std::ffi::OsString;

use clap::{ArgAction, Parser, Subcommand};

use crate::Result;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "git-wmem",
    version,
    about = "Meta-versioning for a set of git working directories",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Errors only.
    #[arg(short = 'q', long, global = true, default_value_t = false)]
    pub quiet: bool,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize an empty directory as a meta-repository.
    Init(commands::init::InitArgs),

    /// Snapshot every configured workdir and record a summary commit.
    Commit,

    /// Show the recorded snapshot history.
    Log,
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init(args) => commands::init::handle(&args),
        Commands::Commit => commands::commit::handle(),
        Commands::Log => commands::log::handle(),
    }
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "normstore",
    about = "normstore: replay cache scenarios against a normalized record store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Store configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a JSON scenario script against a fresh store
    Replay(ReplayArgs),
    /// Print the effective store configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ReplayArgs {
    pub script: PathBuf,
    /// Also print the store events each step produced
    #[arg(long)]
    pub events: bool,
}

#[derive(Args)]
pub struct ConfigArgs {}

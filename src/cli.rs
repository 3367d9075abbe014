use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Extract CSV and Excel attachments from a mailbox export as typed records",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Infer each table's schema and write a catalog
    Discover(DiscoverArgs),
    /// Stream new records for every table, emitting schema, record and state messages
    Sync(SyncArgs),
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// Config file (JSON, or YAML with a .yaml/.yml extension)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Destination catalog file (stdout if omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// State file whose bookmarks limit which files are sampled
    #[arg(short, long)]
    pub state: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Config file (JSON, or YAML with a .yaml/.yml extension)
    #[arg(short, long)]
    pub config: PathBuf,
    /// State file holding the bookmarks of a previous run
    #[arg(short, long)]
    pub state: Option<PathBuf>,
    /// Catalog whose schemas replace inference for the tables it lists
    #[arg(short = 'p', long = "catalog", visible_alias = "properties")]
    pub catalog: Option<PathBuf>,
    /// Rewrite this file with the latest state after every completed file
    #[arg(long = "state-output")]
    pub state_output: Option<PathBuf>,
}

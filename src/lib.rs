pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod header;
pub mod inference;
pub mod io_utils;
pub mod mailbox;
pub mod normalize;
pub mod output;
pub mod rows;
pub mod schema;
pub mod sync;

use std::{
    env,
    fs::File,
    io::{self, BufWriter},
    path::Path,
    sync::OnceLock,
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    checkpoint::{CheckpointTracker, State},
    cli::{Cli, Commands},
    config::Config,
    mailbox::ManifestMailbox,
    output::MessageWriter,
    schema::Catalog,
    sync::SyncOptions,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("mail_csv_tap", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Discover(args) => handle_discover(&args),
        Commands::Sync(args) => handle_sync(&args),
    }
}

fn load_state(path: Option<&Path>) -> Result<State> {
    match path {
        Some(path) => State::load(path),
        None => Ok(State::default()),
    }
}

fn open_mailbox(config: &Config) -> Result<ManifestMailbox> {
    ManifestMailbox::load(&config.mailbox, &config.email_address)
        .with_context(|| format!("Loading mailbox from {:?}", config.mailbox))
}

fn handle_discover(args: &cli::DiscoverArgs) -> Result<()> {
    info!("Starting discovery with config {:?}", args.config);
    let config = Config::load(&args.config)?;
    let mailbox = open_mailbox(&config)?;
    let tracker = CheckpointTracker::new(config.start_date()?, load_state(args.state.as_deref())?);

    let (catalog, failed) =
        sync::discover(&mailbox, config.table_specs(), &tracker, &config.sampling);
    match &args.output {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("Creating catalog file {path:?}"))?;
            catalog.write_to(BufWriter::new(file))?;
            info!(
                "Catalog with {} stream(s) written to {path:?}",
                catalog.streams.len()
            );
        }
        None => catalog.write_to(io::stdout().lock())?,
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("Discovery failed for table(s): {}", failed.join(", ")))
    }
}

fn handle_sync(args: &cli::SyncArgs) -> Result<()> {
    info!("Starting sync with config {:?}", args.config);
    let config = Config::load(&args.config)?;
    let mailbox = open_mailbox(&config)?;
    let state = load_state(args.state.as_deref())?;
    let mut tracker = CheckpointTracker::new(config.start_date()?, state);
    let catalog = match &args.catalog {
        Some(path) => Some(Catalog::load(path)?),
        None => None,
    };
    let options = SyncOptions {
        sampling: &config.sampling,
        catalog: catalog.as_ref(),
        state_output: args.state_output.as_deref(),
    };

    let mut writer = MessageWriter::new(BufWriter::new(io::stdout().lock()));
    let summary = sync::sync_all(
        &mailbox,
        config.table_specs(),
        &mut tracker,
        &mut writer,
        &options,
    )?;
    info!(
        "Done syncing: {} record(s) across {} table(s)",
        writer.records_written(),
        summary.tables.len()
    );
    if summary.is_success() {
        Ok(())
    } else {
        Err(anyhow!(
            "Sync failed for table(s): {}",
            summary.failed.join(", ")
        ))
    }
}

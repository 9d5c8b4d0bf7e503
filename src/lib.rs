pub mod cli;
pub mod data;
pub mod detect;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod fields;
pub mod ingest;
pub mod io_utils;
pub mod mapping;
pub mod reconcile;
pub mod report;
pub mod schema;
pub mod source;
pub mod stats;
pub mod store;
pub mod table;
pub mod transform;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

pub use crate::{
    error::HarmonizeError,
    ingest::ingest,
    schema::Schema,
    stats::RunStatistics,
    store::{MemoryStore, RecordStore},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_harmonizer", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => ingest::execute(&args),
        Commands::Fields(args) => fields::execute(&args),
        Commands::Detect(args) => detect::execute(&args),
        Commands::Export(args) => export::execute(&args),
    }
}

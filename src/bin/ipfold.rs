mod cli_utils;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::{cmd_build, cmd_inspect, BuildArgs};

#[derive(Parser)]
#[command(name = "ipfold")]
#[command(
    about = "Build and enrich IPv4 lookup databases (MMDB) from line-delimited JSON",
    long_about = "ipfold - Build and enrich MaxMind DB compatible IPv4 databases\n\n\
    Reads newline-delimited JSON objects with an \"ip\" field (address or CIDR)\n\
    and merges each record into a new or existing database file.\n\n\
    Examples:\n\
      ipfold build -i ips.ndjson -o geoip.mmdb\n\
      ipfold build -d GeoLite2-Country.mmdb -i ips.ndjson -o enriched.mmdb\n\
      ipfold build -i assets.ndjson.gz -o assets.mmdb --profile raw --on-error skip\n\
      ipfold inspect geoip.mmdb --networks"
)]
#[command(version)]
struct Cli {
    /// Log debug details (node splits, skipped reserved networks)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert NDJSON records into a new or existing database
    Build(BuildArgs),

    /// Show metadata and networks of a database
    Inspect {
        /// Path to the database file
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,

        /// List every network with its record
        #[arg(short, long)]
        networks: bool,
    },
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "ipfold=debug" } else { "ipfold=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Build(args) => cmd_build(args),
        Commands::Inspect {
            database,
            json,
            networks,
        } => cmd_inspect(database, json, networks),
    }
}

use anyhow::{anyhow, Context, Result};
use clap::Args;
use ipfold::{
    file_reader, BuildPipeline, ErrorPolicy, GeoDefaults, MergeStrategy, Profile, RecordSize,
    Tree, TreeOptions,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use crate::cli_utils::{format_bytes, format_number};

const DEFAULT_DATABASE_TYPE: &str = "GeoIP-City";
const DEFAULT_DESCRIPTION: &str = "Simple Database for GeoIP lookups";
const DEFAULT_LANGUAGES: [&str; 2] = ["en", "de"];

#[derive(Args)]
pub struct BuildArgs {
    /// NDJSON input file (.gz is decompressed, "-" reads stdin)
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Output database file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Existing database to enrich instead of starting empty
    #[arg(short = 'd', long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Database type written to the metadata [default: GeoIP-City, or the
    /// existing database's type]
    #[arg(short = 't', long = "type", value_name = "NAME")]
    database_type: Option<String>,

    /// How input objects become records: geo or raw
    #[arg(long, default_value = "geo")]
    profile: Profile,

    /// Merge strategy: top-level, replace, deep or remove
    #[arg(long, default_value = "top-level")]
    strategy: MergeStrategy,

    /// What to do with a bad input line: halt or skip
    #[arg(long, default_value = "halt")]
    on_error: ErrorPolicy,

    /// JSON file overriding the geo profile's fixed values
    #[arg(long, value_name = "FILE")]
    defaults: Option<PathBuf>,

    /// Description text
    #[arg(long)]
    description: Option<String>,

    /// Language code for the description
    #[arg(long, default_value = "en")]
    desc_lang: String,

    /// Language code for the metadata (repeatable) [default: en, de]
    #[arg(long = "language", value_name = "CODE")]
    languages: Vec<String>,

    /// Leave special-purpose networks (RFC 1918, loopback, ...) empty
    #[arg(long)]
    exclude_reserved: bool,

    /// Reject merges that change the type of an existing field
    #[arg(long)]
    strict_types: bool,

    /// Record size in bits: 24, 28 or 32 [default: smallest that fits]
    #[arg(long, value_name = "BITS")]
    record_size: Option<u64>,

    /// Build timestamp [default: $SOURCE_DATE_EPOCH, else now]
    #[arg(long, value_name = "SECONDS")]
    build_epoch: Option<u64>,
}

pub fn cmd_build(args: BuildArgs) -> Result<()> {
    let start = Instant::now();
    let build_epoch = match args.build_epoch {
        Some(epoch) => Some(epoch),
        None => source_date_epoch()?,
    };
    let record_size = args
        .record_size
        .map(RecordSize::from_bits)
        .transpose()
        .map_err(|e| anyhow!("--record-size: {}", e))?;

    let description = args
        .description
        .map(|text| BTreeMap::from([(args.desc_lang.clone(), text)]));
    let languages = (!args.languages.is_empty()).then_some(args.languages);

    let mut options = TreeOptions {
        database_type: args.database_type,
        languages,
        description,
        include_reserved_networks: !args.exclude_reserved,
        record_size,
        build_epoch,
        strict_types: args.strict_types,
        ..TreeOptions::default()
    };

    let tree = match &args.database {
        Some(path) => Tree::load(path, options)
            .with_context(|| format!("Failed to load database: {}", path.display()))?,
        None => {
            options
                .database_type
                .get_or_insert_with(|| DEFAULT_DATABASE_TYPE.to_string());
            options
                .languages
                .get_or_insert_with(|| DEFAULT_LANGUAGES.iter().map(|l| l.to_string()).collect());
            options.description.get_or_insert_with(|| {
                BTreeMap::from([("en".to_string(), DEFAULT_DESCRIPTION.to_string())])
            });
            Tree::new(options)
        }
    };

    let geo_defaults = match &args.defaults {
        Some(path) => GeoDefaults::from_json_file(path)
            .with_context(|| format!("Failed to read defaults: {}", path.display()))?,
        None => GeoDefaults::default(),
    };

    let mut pipeline = BuildPipeline::new(tree)
        .with_profile(args.profile)
        .with_geo_defaults(geo_defaults)
        .with_strategy(args.strategy)
        .with_error_policy(args.on_error);

    let reader = file_reader::open(&args.input)
        .with_context(|| format!("Failed to open input: {}", args.input.display()))?;
    let report = pipeline.process_reader(reader).with_context(|| {
        format!(
            "Failed to process {} (line {})",
            args.input.display(),
            pipeline.last_line()
        )
    })?;

    let tree = pipeline.into_tree();
    let written = tree
        .save(&args.output)
        .with_context(|| format!("Failed to write database: {}", args.output.display()))?;

    println!("Wrote {}", args.output.display());
    println!("  Lines read:  {}", format_number(report.lines_read));
    println!("  Inserted:    {}", format_number(report.inserted));
    if report.skipped > 0 {
        println!("  Skipped:     {}", format_number(report.skipped));
    }
    println!("  Size:        {}", format_bytes(written as usize));
    println!("  Time:        {:.2?}", start.elapsed());
    Ok(())
}

fn source_date_epoch() -> Result<Option<u64>> {
    match std::env::var("SOURCE_DATE_EPOCH") {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid SOURCE_DATE_EPOCH: {:?}", value)),
        Err(_) => Ok(None),
    }
}

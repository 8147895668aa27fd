/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::{io::Write, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use shard_agg::{
    aggregate::AggregateFn,
    catalog::{FilterClause, PartitionScheme},
    config::{AggregateQuery, DriverConfig},
    driver::Driver,
    formats::{CsvFormat, JsonLinesFormat, ShardFormat},
    reader::Projection,
    source::FileSource,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Csv,
    Jsonl,
    #[cfg(feature = "bincode")]
    Bincode,
}

#[derive(Parser)]
#[command(about = "Grouped aggregation over a directory of partitioned shard files.")]
struct Args {
    /// Dataset root directory.
    root: PathBuf,

    /// Shard file format. Compressed `.zst` shards are detected by name.
    #[arg(long, value_enum, default_value_t = FormatArg::Csv)]
    format: FormatArg,

    /// CSV field delimiter.
    #[arg(long)]
    delimiter: Option<char>,

    /// CSV shards have no header row; columns are named "0", "1", ...
    #[arg(long)]
    no_headers: bool,

    /// Directory layout: `flat`, `hive`, `hive:<key>,<key>` or
    /// `dir:<key>,<key>`.
    #[arg(long, default_value = "flat", value_parser = parse_scheme)]
    partitioning: PartitionScheme,

    /// Grouping column or partition key (repeatable, in order).
    #[arg(long = "key")]
    keys: Vec<String>,

    /// Column the function reads. Not needed for `count`.
    #[arg(long)]
    value: Option<String>,

    #[arg(long, value_enum, default_value_t = AggregateFn::Count)]
    function: AggregateFn,

    /// Rows per batch. Overrides the config file.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Worker threads. Overrides the config file.
    #[arg(long)]
    parallelism: Option<usize>,

    /// Partition filter, `key=value` or `key=value,value` (repeatable).
    #[arg(long = "filter")]
    filters: Vec<FilterClause>,

    /// JSON driver config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pretty-print the JSON result.
    #[arg(long)]
    pretty: bool,
}

fn parse_scheme(arg: &str) -> Result<PartitionScheme, String> {
    let keys = |list: &str| {
        list.split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    };
    match arg.split_once(':') {
        None if arg == "flat" => Ok(PartitionScheme::Flat),
        None if arg == "hive" => Ok(PartitionScheme::Hive { keys: vec![] }),
        Some(("hive", list)) => Ok(PartitionScheme::Hive { keys: keys(list) }),
        Some(("dir", list)) if !keys(list).is_empty() => {
            Ok(PartitionScheme::Directory { keys: keys(list) })
        }
        _ => Err(format!(
            "unknown partitioning {arg:?}, expected flat, hive, hive:<keys> or dir:<keys>"
        )),
    }
}

fn shard_format(args: &Args) -> Result<ShardFormat> {
    Ok(match args.format {
        FormatArg::Csv => {
            let delimiter = args
                .delimiter
                .map(|delimiter| u8::try_from(delimiter).context("delimiter must be ASCII"))
                .transpose()?;
            ShardFormat::Csv(CsvFormat {
                delimiter,
                has_headers: Some(!args.no_headers),
                ..Default::default()
            })
        }
        FormatArg::Jsonl => ShardFormat::JsonLines(JsonLinesFormat::default()),
        #[cfg(feature = "bincode")]
        FormatArg::Bincode => ShardFormat::Bincode(Default::default()),
    })
}

fn driver_config(args: &Args) -> Result<DriverConfig> {
    let mut config = match &args.config {
        Some(path) => DriverConfig::from_json_path(path)?,
        None => DriverConfig::default(),
    };
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(parallelism) = args.parallelism {
        config.parallelism = parallelism;
    }
    for clause in &args.filters {
        config.partition_filter = config.partition_filter.with(clause.clone());
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if !args.root.is_dir() {
        bail!("{:?} is not a directory", args.root);
    }

    let format = shard_format(&args)?;
    let config = driver_config(&args)?;
    let query = AggregateQuery::new(
        Projection {
            key_columns: args.keys.clone(),
            value_column: args.value.clone(),
        },
        args.function,
    );
    info!(root = ?args.root, ?config, "starting");

    let mut driver = Driver::new(FileSource::new(format), query, config)?;
    let result = driver
        .run(&args.root, &args.partitioning)
        .with_context(|| format!("aggregating {:?}", args.root))?;

    let mut stdout = std::io::stdout().lock();
    if args.pretty {
        serde_json::to_writer_pretty(&mut stdout, &result)?;
    } else {
        serde_json::to_writer(&mut stdout, &result)?;
    }
    writeln!(stdout)?;
    Ok(())
}

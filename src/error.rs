/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*!
Error types for every stage of an aggregation run.

Catalog and read failures abort a run. Nothing here is retried; wrap the
[`Driver`][`crate::driver::Driver`] call if retries are wanted.
*/

use std::path::PathBuf;

use thiserror::Error;

use crate::aggregate::AggregateFn;

/// Failure to enumerate shards under a root.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog root {0:?} does not exist")]
    MissingRoot(PathBuf),
    #[error("catalog root {0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("no shards under {root:?} match the partitioning scheme")]
    NoShards { root: PathBuf },
    #[error("{path:?} does not fit the partitioning scheme: {reason}")]
    SchemeMismatch { path: PathBuf, reason: String },
    #[error("failed to list {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to turn stored bytes into records.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "csv")]
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "bincode")]
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error("column {0:?} is in neither the shard nor its partition key")]
    MissingColumn(String),
    #[error("column {column:?} holds {value:?}, which is not a number")]
    InvalidNumber { column: String, value: String },
    #[error("record has {found} fields, expected {expected}")]
    RecordWidth { expected: usize, found: usize },
    #[error("expected a JSON object per line")]
    NotAnObject,
    #[error("shard ended after {found} of {expected} rows")]
    Truncated { expected: u64, found: u64 },
    #[error("{0} shards are not supported by this build")]
    Unsupported(&'static str),
}

fn row_suffix(row: &Option<u64>) -> String {
    match row {
        Some(row) => format!(" at row {row}"),
        None => String::new(),
    }
}

/// A shard could not be read. Identifies the shard and, when available,
/// the shard-relative row offset.
#[derive(Debug, Error)]
#[error("failed to read shard {path:?}{}", row_suffix(.row))]
pub struct ReadError {
    pub path: PathBuf,
    pub row: Option<u64>,
    #[source]
    pub kind: DecodeError,
}

impl ReadError {
    pub fn new(path: impl Into<PathBuf>, row: Option<u64>, kind: impl Into<DecodeError>) -> Self {
        Self {
            path: path.into(),
            row,
            kind: kind.into(),
        }
    }
}

/// Two accumulators cannot be combined.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("cannot merge a {left:?} accumulator with a {right:?} accumulator")]
    IncompatibleFunction {
        left: AggregateFn,
        right: AggregateFn,
    },
}

/// Invalid driver configuration or query.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("batch_size must be at least 1")]
    ZeroBatchSize,
    #[error("parallelism must be at least 1")]
    ZeroParallelism,
    #[error("{0:?} needs a value column")]
    MissingValueColumn(AggregateFn),
    #[error("invalid filter clause {0:?}, expected key=value[,value...]")]
    InvalidFilter(String),
    #[error("source is not backed by shard files, run it from a catalog")]
    NotFileBacked,
    #[error("failed to read config {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A [`Table`][`crate::record::Table`] was built with inconsistent rows.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("row {row} has {found} fields, expected {expected}")]
    WidthMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("unknown column {0:?}")]
    UnknownColumn(String),
}

/// Failure to write shards out.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "csv")]
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "bincode")]
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("partition value {0:?} cannot be used as a directory name")]
    InvalidPartitionValue(String),
    #[error("max_rows_per_file must be at least 1")]
    ZeroRowsPerFile,
    #[error("{0} shards are not supported by this build")]
    Unsupported(&'static str),
}

/// Any failure of a [`Driver`][`crate::driver::Driver`] run.
#[derive(Debug, Error)]
pub enum AggError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("run was cancelled")]
    Cancelled,
    #[error("driver is {0}, runs start from idle")]
    InvalidState(crate::driver::DriverState),
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[cfg(feature = "tokio")]
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_shard_and_row() {
        let err = ReadError::new(
            "/data/year=2020/part-0.csv",
            Some(41),
            DecodeError::MissingColumn("amount".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "failed to read shard \"/data/year=2020/part-0.csv\" at row 41"
        );

        let err = ReadError::new("part-1.csv", None, DecodeError::NotAnObject);
        assert_eq!(err.to_string(), "failed to read shard \"part-1.csv\"");
    }
}

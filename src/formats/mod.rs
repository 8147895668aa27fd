/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*!
Defines the encoding/decoding formats for shard files.

Decoders stream records: nothing beyond the record being decoded is held
in memory, so arbitrarily large shards can be read.
*/

use std::{
    io::{Read, Write},
    iter::Peekable,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{DecodeError, WriteError},
    record::{Field, Table},
};

/// Lazily decoded records of one shard.
pub struct RecordStream<'a> {
    columns: Vec<String>,
    records: Peekable<Records<'a>>,
}

type Records<'a> = Box<dyn Iterator<Item = Result<Vec<Field>, DecodeError>> + 'a>;

impl<'a> RecordStream<'a> {
    pub fn new<I>(columns: Vec<String>, records: I) -> Self
    where
        I: Iterator<Item = Result<Vec<Field>, DecodeError>> + 'a,
    {
        Self {
            columns,
            records: (Box::new(records) as Records<'a>).peekable(),
        }
    }

    pub fn empty() -> Self {
        Self::new(vec![], std::iter::empty())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// True when there are neither columns nor records left.
    ///
    /// May decode the next record ahead of time.
    pub fn is_empty(&mut self) -> bool {
        self.columns.is_empty() && self.records.peek().is_none()
    }
}

impl Iterator for RecordStream<'_> {
    type Item = Result<Vec<Field>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }
}

/// A format decoder that can be used synchronously.
pub trait Decoder {
    /// Starts streaming records out of `source`.
    ///
    /// Column names are resolved eagerly, records lazily.
    fn decode<'a, R: Read + 'a>(&self, source: R) -> Result<RecordStream<'a>, DecodeError>;
}

/// A format encoder that can be used synchronously.
///
/// # Implementation
/// It is the responsibility of trait implementors to call
/// [`Write::flush`] to ensure encodings write out to disk. Any implementor
/// that does not to call this may fail to put all data on disk, making the
/// encoding invalid and causing read failure.
pub trait Encoder {
    /// Fully write out `table` to a target disk.
    fn encode<W: Write>(&self, table: &Table, target: W) -> Result<(), WriteError>;
}

#[cfg(feature = "csv")]
pub mod csv;
#[cfg(feature = "csv")]
pub use self::csv::CsvFormat;

#[cfg(feature = "bincode")]
mod bincode;
#[cfg(feature = "bincode")]
pub use self::bincode::BincodeFormat;

mod json_lines;
pub use json_lines::JsonLinesFormat;

/// Every shard format this build supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShardFormat {
    #[cfg(feature = "csv")]
    Csv(CsvFormat),
    JsonLines(JsonLinesFormat),
    #[cfg(feature = "bincode")]
    Bincode(BincodeFormat),
}

impl ShardFormat {
    /// Base file extension of shards in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            #[cfg(feature = "csv")]
            Self::Csv(_) => "csv",
            Self::JsonLines(_) => "jsonl",
            #[cfg(feature = "bincode")]
            Self::Bincode(_) => "bin",
        }
    }
}

impl Decoder for ShardFormat {
    fn decode<'a, R: Read + 'a>(&self, source: R) -> Result<RecordStream<'a>, DecodeError> {
        match self {
            #[cfg(feature = "csv")]
            Self::Csv(format) => format.decode(source),
            Self::JsonLines(format) => format.decode(source),
            #[cfg(feature = "bincode")]
            Self::Bincode(format) => format.decode(source),
        }
    }
}

impl Encoder for ShardFormat {
    fn encode<W: Write>(&self, table: &Table, target: W) -> Result<(), WriteError> {
        match self {
            #[cfg(feature = "csv")]
            Self::Csv(format) => format.encode(table, target),
            Self::JsonLines(format) => format.encode(table, target),
            #[cfg(feature = "bincode")]
            Self::Bincode(format) => format.encode(table, target),
        }
    }
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::io::{ErrorKind, Read, Write};

use bincode::{serialize_into, DefaultOptions, Options};
use serde::{Deserialize, Serialize};

use crate::{
    error::{DecodeError, WriteError},
    record::{Field, Table},
};

use super::{Decoder, Encoder, RecordStream};

/// Written ahead of the rows, so truncation is detectable.
#[derive(Debug, Serialize, Deserialize)]
struct BincodeHeader {
    columns: Vec<String>,
    rows: u64,
}

/// Binary encoding format.
///
/// A header with the column names and row count, then one encoded row at
/// a time.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BincodeFormat {}

/// Largest header or row a decode will allocate for.
const MAX_RECORD_BYTES: u64 = 1 << 28;

/// The layout `serialize_into` writes, bounded so a corrupt length prefix
/// fails instead of allocating.
fn decode_options() -> impl Options + Copy {
    DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(MAX_RECORD_BYTES)
}

fn is_eof(err: &bincode::Error) -> bool {
    matches!(&**err, bincode::ErrorKind::Io(io) if io.kind() == ErrorKind::UnexpectedEof)
}

impl Decoder for BincodeFormat {
    fn decode<'a, R: Read + 'a>(&self, mut source: R) -> Result<RecordStream<'a>, DecodeError> {
        let header: BincodeHeader = decode_options().deserialize_from(&mut source)?;
        let expected = header.rows;
        let records = (0..expected).map(move |found| {
            decode_options().deserialize_from(&mut source).map_err(|err| {
                if is_eof(&err) {
                    DecodeError::Truncated { expected, found }
                } else {
                    DecodeError::Bincode(err)
                }
            })
        });
        Ok(RecordStream::new(header.columns, records))
    }
}

impl Encoder for BincodeFormat {
    fn encode<W: Write>(&self, table: &Table, mut target: W) -> Result<(), WriteError> {
        let header = BincodeHeader {
            columns: table.columns().clone(),
            rows: table.len() as u64,
        };
        serialize_into(&mut target, &header)?;
        for row in table.rows() {
            serialize_into(&mut target, row)?;
        }
        target.flush()?; // Make sure buffer is emptied
        Ok(())
    }
}

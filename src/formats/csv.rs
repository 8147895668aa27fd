/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::io::{Read, Write};

use csv::{QuoteStyle, ReaderBuilder, StringRecord, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    error::{DecodeError, WriteError},
    record::{Field, Table},
};

use super::{Decoder, Encoder, RecordStream};

#[derive(Deserialize, Serialize)]
#[serde(remote = "csv::Trim", rename_all = "snake_case")]
#[non_exhaustive]
pub enum TrimSerial {
    None,
    Headers,
    Fields,
    All,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrimWrapper(#[serde(with = "TrimSerial")] pub Trim);

#[derive(Deserialize, Serialize)]
#[serde(remote = "csv::QuoteStyle", rename_all = "snake_case")]
#[non_exhaustive]
pub enum QuoteStyleSerial {
    Always,
    Necessary,
    NonNumeric,
    Never,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuoteStyleWrapper(#[serde(with = "QuoteStyleSerial")] pub QuoteStyle);

/// Unified [`csv::ReaderBuilder`] and [`csv::WriterBuilder`] configuration.
///
/// Options are applied if set. Without headers, columns are named by their
/// zero-based position (`"0"`, `"1"`, ...).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvFormat {
    pub comment: Option<u8>,
    pub delimiter: Option<u8>,
    pub escape: Option<u8>,
    pub flexible: Option<bool>,
    pub has_headers: Option<bool>,
    pub quote: Option<u8>,
    pub quote_style: Option<QuoteStyleWrapper>,
    pub trim: Option<TrimWrapper>,
}

impl CsvFormat {
    fn has_headers(&self) -> bool {
        self.has_headers.unwrap_or(true)
    }

    fn reader_builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder.comment(self.comment);
        builder.escape(self.escape);
        builder.has_headers(self.has_headers());
        if let Some(delimiter) = self.delimiter {
            builder.delimiter(delimiter);
        };
        if let Some(flexible) = self.flexible {
            builder.flexible(flexible);
        };
        if let Some(quote) = self.quote {
            builder.quote(quote);
        };
        if let Some(trim) = &self.trim {
            builder.trim(trim.0);
        };

        builder
    }

    fn writer_builder(&self) -> WriterBuilder {
        let mut builder = WriterBuilder::new();
        builder.comment(self.comment);
        builder.has_headers(self.has_headers());
        if let Some(delimiter) = self.delimiter {
            builder.delimiter(delimiter);
        };
        if let Some(escape) = self.escape {
            builder.escape(escape);
        };
        if let Some(flexible) = self.flexible {
            builder.flexible(flexible);
        };
        if let Some(quote) = self.quote {
            builder.quote(quote);
        };
        if let Some(quote_style) = &self.quote_style {
            builder.quote_style(quote_style.0);
        };

        builder
    }
}

fn to_fields(record: StringRecord) -> Vec<Field> {
    record.iter().map(Field::from).collect()
}

impl Decoder for CsvFormat {
    fn decode<'a, R: Read + 'a>(&self, source: R) -> Result<RecordStream<'a>, DecodeError> {
        let mut reader = self.reader_builder().from_reader(source);
        let first = reader.headers()?;
        let columns = if self.has_headers() {
            first.iter().map(str::to_string).collect()
        } else {
            (0..first.len()).map(|idx| idx.to_string()).collect()
        };

        let records = reader
            .into_records()
            .map(|record| Ok(to_fields(record?)));
        Ok(RecordStream::new(columns, records))
    }
}

impl Encoder for CsvFormat {
    fn encode<W: Write>(&self, table: &Table, target: W) -> Result<(), WriteError> {
        let mut writer = self.writer_builder().from_writer(target);
        if self.has_headers() {
            writer.write_record(table.columns())?;
        }
        for row in table.rows() {
            writer.write_record(row.iter().map(|field| field.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::test_utils::zipcodes::{FIRST_ENTRY, LAST_ENTRY, ZIPCODES_STUB};

    use super::*;

    #[test]
    fn load() {
        let format = CsvFormat::default();
        let stream = format.decode(Cursor::new(ZIPCODES_STUB)).unwrap();
        assert_eq!(stream.columns()[0], "zip");

        let rows = stream.collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(rows[0], *FIRST_ENTRY);
        assert_eq!(rows[rows.len() - 1], *LAST_ENTRY);
    }

    #[test]
    fn write_and_load() {
        let format = CsvFormat::default();
        let stream = format.decode(Cursor::new(ZIPCODES_STUB)).unwrap();
        let columns = stream.columns().to_vec();
        let table = Table::from_rows(columns, stream.collect::<Result<_, _>>().unwrap()).unwrap();

        let mut write_buf = Vec::new();
        format.encode(&table, &mut write_buf).unwrap();

        let second = format.decode(Cursor::new(write_buf)).unwrap();
        assert_eq!(second.columns(), table.columns().as_slice());
        let rows = second.collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(rows[0], *FIRST_ENTRY);
        assert_eq!(rows[rows.len() - 1], *LAST_ENTRY);
    }

    #[test]
    fn headerless_columns_are_positional() {
        let format = CsvFormat {
            has_headers: Some(false),
            delimiter: Some(b';'),
            ..Default::default()
        };
        let stream = format.decode(Cursor::new("A;1\nB;2\n")).unwrap();
        assert_eq!(stream.columns(), ["0", "1"]);
        assert_eq!(stream.count(), 2);
    }

    #[test]
    fn empty_source_has_no_columns() {
        let stream = CsvFormat::default().decode(Cursor::new("")).unwrap();
        assert!(stream.columns().is_empty());
        assert_eq!(stream.count(), 0);
    }

    #[test]
    fn ragged_rows_error() {
        let stream = CsvFormat::default()
            .decode(Cursor::new("k,v\nA,1\nB\n"))
            .unwrap();
        let rows: Vec<_> = stream.collect();
        assert!(rows[0].is_ok());
        assert!(matches!(rows[1], Err(DecodeError::Csv(_))));
    }

    #[test]
    fn options_from_config() {
        let format: CsvFormat =
            serde_json::from_str(r#"{"delimiter": 9, "trim": "all"}"#).unwrap();
        assert_eq!(format.delimiter, Some(b'\t'));
        assert!(format.trim.is_some());
    }
}

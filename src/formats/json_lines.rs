/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::{
    error::{DecodeError, WriteError},
    record::{Field, Table},
};

use super::{Decoder, Encoder, RecordStream};

/// One JSON object per line.
///
/// Columns are taken from the first non-empty object, sorted by name.
/// Every object is projected onto those columns: absent keys read as null,
/// extra keys are ignored. Leading `{}` lines are all-null rows.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct JsonLinesFormat {}

fn to_field(value: Value) -> Field {
    match value {
        Value::Null => Field::Null,
        Value::Number(number) => number.as_f64().map_or(Field::Null, Field::Number),
        Value::String(text) => Field::Text(text),
        other => Field::Text(other.to_string()),
    }
}

fn to_value(field: &Field) -> Value {
    match field {
        Field::Null => Value::Null,
        Field::Number(x) => Number::from_f64(*x).map_or(Value::Null, Value::Number),
        Field::Text(text) => Value::String(text.clone()),
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>, DecodeError> {
    match value {
        Value::Object(object) => Ok(object),
        _ => Err(DecodeError::NotAnObject),
    }
}

impl Decoder for JsonLinesFormat {
    fn decode<'a, R: Read + 'a>(&self, source: R) -> Result<RecordStream<'a>, DecodeError> {
        let mut values = serde_json::Deserializer::from_reader(source).into_iter::<Value>();

        let mut blank = 0;
        let first = loop {
            match values.next() {
                Some(value) => {
                    let object = into_object(value?)?;
                    if !object.is_empty() {
                        break Some(object);
                    }
                    blank += 1;
                }
                None => break None,
            }
        };
        let columns: Vec<String> = first
            .as_ref()
            .map(|object| object.keys().cloned().collect())
            .unwrap_or_default();

        let projected = columns.clone();
        let project = move |mut object: Map<String, Value>| -> Vec<Field> {
            projected
                .iter()
                .map(|column| to_field(object.remove(column).unwrap_or(Value::Null)))
                .collect()
        };

        let width = columns.len();
        let blanks = std::iter::repeat_with(move || Ok(vec![Field::Null; width])).take(blank);
        let first_row = first.map(|object| Ok(project(object)));
        let rest = values.map(move |value| -> Result<Vec<Field>, DecodeError> {
            Ok(project(into_object(value?)?))
        });

        Ok(RecordStream::new(
            columns,
            blanks.chain(first_row).chain(rest),
        ))
    }
}

impl Encoder for JsonLinesFormat {
    fn encode<W: Write>(&self, table: &Table, mut target: W) -> Result<(), WriteError> {
        for row in table.rows() {
            let object: Map<String, Value> = table
                .columns()
                .iter()
                .cloned()
                .zip(row.iter().map(to_value))
                .collect();
            serde_json::to_writer(&mut target, &object)?;
            target.write_all(b"\n")?;
        }
        target.flush()?;
        Ok(())
    }
}

/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*!
Untyped row model shared by shard formats and the dataset writer.
*/

use std::fmt::Display;

use derive_getters::{Dissolve, Getters};
use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// Text values treated as missing, both as numbers and as group keys.
pub const MISSING_MARKERS: &[&str] = &["", "NA", "null", "NULL"];

/// Group key of a missing field.
pub const NULL_KEY: &str = "NA";

/// One cell of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field {
    Null,
    Number(f64),
    Text(String),
}

impl Field {
    /// Null, or text that is a missing marker once trimmed.
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Number(_) => false,
            Self::Text(text) => MISSING_MARKERS.contains(&text.trim()),
        }
    }

    /// Numeric view of the field.
    ///
    /// Missing markers become `None`, other text is parsed. Returns the
    /// unparseable text on failure.
    pub fn as_number(&self) -> Result<Option<f64>, &str> {
        match self {
            Self::Null => Ok(None),
            Self::Number(x) => Ok(Some(*x)),
            Self::Text(text) => {
                let trimmed = text.trim();
                if MISSING_MARKERS.contains(&trimmed) {
                    Ok(None)
                } else {
                    trimmed.parse().map(Some).map_err(|_| text.as_str())
                }
            }
        }
    }

    /// Grouping view of the field. Missing fields group under [`NULL_KEY`],
    /// so a null written out as text regroups the same way.
    pub fn as_key(&self) -> String {
        match self {
            Self::Number(x) => x.to_string(),
            Self::Text(text) if !self.is_missing() => text.clone(),
            _ => NULL_KEY.to_string(),
        }
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Number(x) => write!(f, "{x}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for Field {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Field {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Field>> From<Option<T>> for Field {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// In-memory rows under named columns.
///
/// Every row has exactly one field per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Getters, Dissolve)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Field>>,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: vec![],
        }
    }

    /// Builds a table, checking every row's width.
    pub fn from_rows<I, S>(columns: I, rows: Vec<Vec<Field>>) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn push_row(&mut self, row: Vec<Field>) -> Result<&mut Self, TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::WidthMismatch {
                row: self.rows.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(self)
    }

    pub fn column_index(&self, name: &str) -> Result<usize, TableError> {
        self.columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

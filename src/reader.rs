/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*!
Reads one shard as a sequence of bounded row batches.
*/

use std::path::PathBuf;

use derive_getters::{Dissolve, Getters};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    aggregate::GroupKey,
    catalog::{PartitionKey, ShardDescriptor},
    error::{DecodeError, ReadError},
    formats::RecordStream,
    record::Field,
    source::ShardSource,
};

/// Which columns a read keeps.
///
/// Key columns name shard columns or, failing that, partition keys.
/// No key columns puts every row in one group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub key_columns: Vec<String>,
    pub value_column: Option<String>,
}

impl Projection {
    pub fn new<I, S>(key_columns: I, value_column: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_columns: key_columns.into_iter().map(Into::into).collect(),
            value_column: value_column.map(str::to_string),
        }
    }
}

/// One projected record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub key: GroupKey,
    pub value: Option<f64>,
}

/// Consecutive rows of one shard, in on-disk order.
#[derive(Debug, Clone, PartialEq, Getters, Dissolve)]
pub struct RowBatch {
    /// Shard-relative index of the first row.
    offset: u64,
    rows: Vec<Row>,
}

impl RowBatch {
    pub fn new(offset: u64, rows: Vec<Row>) -> Self {
        Self { offset, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug)]
enum KeySource {
    Column(usize),
    Partition(String),
}

/// [`Projection`] resolved against one shard's columns.
#[derive(Debug)]
struct BoundProjection {
    keys: Vec<KeySource>,
    value: Option<(usize, String)>,
}

impl BoundProjection {
    fn bind(
        projection: &Projection,
        columns: &[String],
        partition: &PartitionKey,
    ) -> Result<Self, DecodeError> {
        let position = |name: &str| columns.iter().position(|column| column == name);

        let keys = projection
            .key_columns
            .iter()
            .map(|name| {
                position(name)
                    .map(KeySource::Column)
                    .or_else(|| {
                        partition
                            .get(name)
                            .map(|value| KeySource::Partition(Field::from(value).as_key()))
                    })
                    .ok_or_else(|| DecodeError::MissingColumn(name.clone()))
            })
            .collect::<Result<_, _>>()?;

        let value = projection
            .value_column
            .as_ref()
            .map(|name| {
                position(name)
                    .map(|idx| (idx, name.clone()))
                    .ok_or_else(|| DecodeError::MissingColumn(name.clone()))
            })
            .transpose()?;

        Ok(Self { keys, value })
    }

    fn project(&self, fields: Vec<Field>) -> Result<Row, DecodeError> {
        static NULL: Field = Field::Null;
        // Flexible formats may yield short records
        let field = |idx: usize| fields.get(idx).unwrap_or(&NULL);

        let key = self
            .keys
            .iter()
            .map(|source| match source {
                KeySource::Column(idx) => field(*idx).as_key(),
                KeySource::Partition(value) => value.clone(),
            })
            .collect();

        let value = match &self.value {
            Some((idx, column)) => {
                field(*idx)
                    .as_number()
                    .map_err(|value| DecodeError::InvalidNumber {
                        column: column.clone(),
                        value: value.to_string(),
                    })?
            }
            None => None,
        };

        Ok(Row {
            key: GroupKey::new(key),
            value,
        })
    }
}

/// Upper bound on rows reserved ahead of reading a batch.
const PREALLOCATED_ROWS: usize = 4096;

/// Lazily reads one shard as [`RowBatch`]es of at most `batch_size` rows.
///
/// Holds a single batch at a time. The final batch may be short; no empty
/// batch is ever produced. After the last batch or the first error the
/// reader is exhausted and cannot be restarted.
pub struct ChunkedReader<'s> {
    path: PathBuf,
    batch_size: usize,
    records: Option<RecordStream<'s>>,
    projection: Option<BoundProjection>,
    offset: u64,
}

impl<'s> ChunkedReader<'s> {
    /// Opens `shard` from `source`.
    ///
    /// A zero `batch_size` is treated as one.
    pub fn open<S>(
        source: &'s S,
        shard: &ShardDescriptor,
        projection: &Projection,
        batch_size: usize,
    ) -> Result<Self, ReadError>
    where
        S: ShardSource + ?Sized,
    {
        let path = shard.path().clone();
        let mut records = source
            .open(shard)
            .map_err(|err| ReadError::new(path.clone(), None, err))?;

        // Nothing to bind against a shard without columns or records
        let projection = if records.is_empty() {
            None
        } else {
            Some(
                BoundProjection::bind(projection, records.columns(), shard.partition())
                    .map_err(|err| ReadError::new(path.clone(), None, err))?,
            )
        };

        Ok(Self {
            path,
            batch_size: batch_size.max(1),
            records: projection.as_ref().map(|_| records),
            projection,
            offset: 0,
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Rows produced so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn fail(&mut self, err: DecodeError) -> ReadError {
        self.records = None;
        ReadError::new(self.path.clone(), Some(self.offset), err)
    }
}

impl Iterator for ChunkedReader<'_> {
    type Item = Result<RowBatch, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let records = self.records.as_mut()?;
        let projection = self.projection.as_ref()?;
        let start = self.offset;
        let mut rows = Vec::with_capacity(self.batch_size.min(PREALLOCATED_ROWS));

        while rows.len() < self.batch_size {
            match records.next() {
                Some(Ok(fields)) => match projection.project(fields) {
                    Ok(row) => {
                        rows.push(row);
                        self.offset += 1;
                    }
                    Err(err) => return Some(Err(self.fail(err))),
                },
                Some(Err(err)) => return Some(Err(self.fail(err))),
                None => {
                    self.records = None;
                    break;
                }
            }
        }

        if rows.is_empty() {
            return None;
        }
        trace!(path = ?self.path, offset = start, rows = rows.len(), "read batch");
        Some(Ok(RowBatch::new(start, rows)))
    }
}

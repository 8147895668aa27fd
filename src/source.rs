/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*!
Where shard records come from.

The reader only needs the capability to open a shard as a record stream.
[`FileSource`] does this for shard files on disk, [`MemorySource`] for
tables already in memory.
*/

use std::{collections::BTreeMap, path::PathBuf};

use crate::{
    catalog::{Catalog, PartitionKey, ShardDescriptor},
    disks::ReadDisk,
    error::DecodeError,
    formats::{Decoder, RecordStream, ShardFormat},
    record::Table,
};

/// Opens a shard as a lazy record stream.
pub trait ShardSource {
    /// Base file extension of the shards, for sources backed by files.
    fn extension(&self) -> Option<&str> {
        None
    }

    fn open<'s>(&'s self, shard: &ShardDescriptor) -> Result<RecordStream<'s>, DecodeError>;
}

/// Shard files on disk, in one format.
#[derive(Debug, Clone)]
pub struct FileSource {
    format: ShardFormat,
}

impl FileSource {
    pub fn new(format: ShardFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> &ShardFormat {
        &self.format
    }
}

impl ShardSource for FileSource {
    fn extension(&self) -> Option<&str> {
        Some(self.format.extension())
    }

    fn open<'s>(&'s self, shard: &ShardDescriptor) -> Result<RecordStream<'s>, DecodeError> {
        let disk = shard.file().read_disk()?;
        self.format.decode(disk)
    }
}

/// Tables held in memory, addressed by shard path.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    shards: BTreeMap<PathBuf, (PartitionKey, Table)>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        path: impl Into<PathBuf>,
        partition: PartitionKey,
        table: Table,
    ) -> &mut Self {
        self.shards.insert(path.into(), (partition, table));
        self
    }

    /// Catalog of every held shard, ordered by path.
    pub fn catalog(&self) -> Catalog {
        Catalog::from_shards(
            self.shards
                .iter()
                .map(|(path, (partition, _))| ShardDescriptor::new(path.clone(), partition.clone()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

impl ShardSource for MemorySource {
    fn open<'s>(&'s self, shard: &ShardDescriptor) -> Result<RecordStream<'s>, DecodeError> {
        let (_, table) = self.shards.get(shard.path()).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no shard at {:?}", shard.path()),
            )
        })?;
        Ok(RecordStream::new(
            table.columns().clone(),
            table.rows().iter().cloned().map(Ok),
        ))
    }
}

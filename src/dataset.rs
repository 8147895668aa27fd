/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*!
Writes tables out as hive-partitioned shard directories.

The layout is exactly what [`Catalog::scan`][`crate::catalog::Catalog::scan`]
reads back with [`PartitionScheme::Hive`][`crate::catalog::PartitionScheme::Hive`].
*/

use std::{
    collections::BTreeMap,
    fs::create_dir_all,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    catalog::{PartitionKey, ShardDescriptor, HIVE_DEFAULT_PARTITION},
    disks::{Compression, ShardFile, WriteDisk},
    error::WriteError,
    formats::{Encoder, JsonLinesFormat, ShardFormat},
    record::{Field, Table, NULL_KEY},
};

/// Rows per shard file unless configured otherwise.
pub const DEFAULT_MAX_ROWS_PER_FILE: usize = 1 << 20;

/// How [`write_dataset`] lays out shards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Columns turned into `name=value` directory levels, outermost first.
    /// They are not repeated inside the shard files.
    pub partition_by: Vec<String>,
    pub format: ShardFormat,
    pub compression: Compression,
    pub max_rows_per_file: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            partition_by: vec![],
            format: ShardFormat::JsonLines(JsonLinesFormat::default()),
            compression: Compression::None,
            max_rows_per_file: DEFAULT_MAX_ROWS_PER_FILE,
        }
    }
}

/// Directory-safe rendering of one partition value.
fn partition_value(field: &Field) -> Result<String, WriteError> {
    if field.is_missing() {
        return Ok(HIVE_DEFAULT_PARTITION.to_string());
    }
    let value = field.to_string();
    if value.contains(['/', '\\', '=']) || value == "." || value == ".." {
        return Err(WriteError::InvalidPartitionValue(value));
    }
    Ok(value)
}

fn check_partition_name(name: &str) -> Result<(), WriteError> {
    // Names starting like this would be skipped by a scan
    if name.starts_with(['.', '_']) || name.contains(['/', '\\', '=']) {
        return Err(WriteError::InvalidPartitionValue(name.to_string()));
    }
    Ok(())
}

/// Writes `table` under `root`, one directory level per partition column.
///
/// Each partition gets one or more `part-<uuid>` shard files of at most
/// `max_rows_per_file` rows. Missing partition values go to
/// [`HIVE_DEFAULT_PARTITION`]. An empty table writes nothing.
///
/// Returns the written shards ordered by path.
pub fn write_dataset(
    table: &Table,
    root: impl AsRef<Path>,
    options: &WriteOptions,
) -> Result<Vec<ShardDescriptor>, WriteError> {
    if options.max_rows_per_file == 0 {
        return Err(WriteError::ZeroRowsPerFile);
    }
    let root = root.as_ref();

    let partition_idx = options
        .partition_by
        .iter()
        .map(|name| {
            check_partition_name(name)?;
            Ok(table.column_index(name)?)
        })
        .collect::<Result<Vec<_>, WriteError>>()?;
    let data_idx: Vec<usize> = (0..table.columns().len())
        .filter(|idx| !partition_idx.contains(idx))
        .collect();
    let data_columns: Vec<String> = data_idx
        .iter()
        .map(|idx| table.columns()[*idx].clone())
        .collect();

    // Row order is kept within each partition
    let mut partitions: BTreeMap<Vec<(String, String)>, Vec<Vec<Field>>> = BTreeMap::new();
    for row in table.rows() {
        let key = options
            .partition_by
            .iter()
            .zip(&partition_idx)
            .map(|(name, idx)| Ok((name.clone(), partition_value(&row[*idx])?)))
            .collect::<Result<Vec<_>, WriteError>>()?;
        let data = data_idx.iter().map(|idx| row[*idx].clone()).collect();
        partitions.entry(key).or_default().push(data);
    }

    let suffix = options.compression.file_suffix(options.format.extension());
    let mut written = vec![];
    for (pairs, rows) in partitions {
        let dir = pairs
            .iter()
            .fold(root.to_path_buf(), |dir, (name, value)| {
                dir.join(format!("{name}={value}"))
            });
        create_dir_all(&dir)?;
        let partition = PartitionKey::new(
            pairs
                .iter()
                .map(|(name, value)| {
                    let value = if value == HIVE_DEFAULT_PARTITION {
                        NULL_KEY
                    } else {
                        value.as_str()
                    };
                    (name.clone(), value.to_string())
                })
                .collect(),
        );

        for chunk in rows.chunks(options.max_rows_per_file) {
            let shard = Table::from_rows(data_columns.clone(), chunk.to_vec())?;
            let path = dir.join(format!("part-{}.{suffix}", Uuid::new_v4()));
            write_shard(&shard, path.clone(), options)?;
            written.push(ShardDescriptor::new(path, partition.clone()));
        }
    }

    written.sort_unstable_by(|lhs, rhs| lhs.path().cmp(rhs.path()));
    info!(
        root = ?root,
        shards = written.len(),
        rows = table.len(),
        "wrote dataset"
    );
    Ok(written)
}

fn write_shard(shard: &Table, path: PathBuf, options: &WriteOptions) -> Result<(), WriteError> {
    let file = ShardFile::new(path, options.compression);
    let mut disk = file.write_disk()?;
    options.format.encode(shard, &mut disk)?;
    disk.finish()?;
    Ok(())
}

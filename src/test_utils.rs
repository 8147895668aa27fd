/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*!
Defines tools used for ONLY testing.

This should not be used by any library consumer code.
*/

use std::{
    env::temp_dir,
    fs::remove_dir_all,
    path::{Path, PathBuf},
};

use crate::{
    catalog::PartitionKey,
    record::{Field, Table},
    source::MemorySource,
};

/// Fresh scratch directory under the system temp dir.
///
/// Any leftovers from an earlier run with the same name are removed first.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = temp_dir().join(format!("shard_agg-{name}"));
    let _ = remove_dir_all(&dir);
    dir
}

/// Writes `contents` to `root/relative`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

pub fn partition(pairs: &[(&str, &str)]) -> PartitionKey {
    PartitionKey::new(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

/// Three shards, grouped on `k`, averaging `v`:
///
/// | shard   | rows               |
/// |---------|--------------------|
/// | part-0  | (A, 1), (A, 3)     |
/// | part-1  | (B, 10)            |
/// | part-2  | (A, 2)             |
///
/// The mean per group is `{A: 2.0, B: 10.0}`.
pub fn three_shards() -> MemorySource {
    let shard = |rows: &[(&str, f64)]| {
        Table::from_rows(
            ["k", "v"],
            rows.iter()
                .map(|(k, v)| vec![Field::from(*k), Field::from(*v)])
                .collect(),
        )
        .unwrap()
    };

    let mut source = MemorySource::new();
    source
        .insert("part-0", PartitionKey::default(), shard(&[("A", 1.0), ("A", 3.0)]))
        .insert("part-1", PartitionKey::default(), shard(&[("B", 10.0)]))
        .insert("part-2", PartitionKey::default(), shard(&[("A", 2.0)]));
    source
}

/// `count` shards of `rows` rows each, cycling through `groups` keys.
pub fn many_shards(count: usize, rows: usize, groups: usize) -> MemorySource {
    let mut source = MemorySource::new();
    for shard in 0..count {
        let table = Table::from_rows(
            ["k", "v"],
            (0..rows)
                .map(|row| {
                    let idx = shard * rows + row;
                    vec![
                        Field::from(format!("g{}", idx % groups)),
                        Field::from((idx % 97) as f64),
                    ]
                })
                .collect(),
        )
        .unwrap();
        source.insert(format!("part-{shard:04}"), PartitionKey::default(), table);
    }
    source
}

pub mod zipcodes {
    use std::sync::LazyLock;

    use crate::record::Field;

    pub static ZIPCODES_STUB: &str = include_str!("../test_data/iou_zipcodes_2020_stub.csv");

    fn entry(fields: [&str; 9]) -> Vec<Field> {
        fields.into_iter().map(Field::from).collect()
    }

    pub static FIRST_ENTRY: LazyLock<Vec<Field>> = LazyLock::new(|| {
        entry([
            "85321",
            "176",
            "Ajo Improvement Co",
            "AZ",
            "Bundled",
            "Investor Owned",
            "0.08789049919484701",
            "0.0",
            "0.09388714733542321",
        ])
    });

    pub static LAST_ENTRY: LazyLock<Vec<Field>> = LazyLock::new(|| {
        entry([
            "66542",
            "22500",
            "Evergy Kansas Central Inc",
            "KS",
            "Bundled",
            "Investor Owned",
            "0.10279097417015817",
            "0.07538060017009698",
            "0.13218924598706063",
        ])
    });
}

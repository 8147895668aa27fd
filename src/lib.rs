/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

/*!
Out-of-core grouped aggregation over partitioned shard directories.

A dataset is a directory tree of immutable shard files, optionally laid out
as hive (`year=2020/`) or bare directory partitions. The
[`driver::Driver`] catalogs the shards, reads each one a bounded
[`reader::RowBatch`] at a time, folds batches into mergeable per-group
state ([`aggregate::Aggregator`]) on one or more workers, and merges and
finalizes the worker states once.

Only one batch per worker is ever resident, so datasets far larger than
memory can be aggregated.

```
use shard_agg::{
    aggregate::AggregateFn,
    catalog::PartitionKey,
    config::{AggregateQuery, DriverConfig},
    driver::Driver,
    reader::Projection,
    record::{Field, Table},
    source::MemorySource,
};

let mut source = MemorySource::new();
source.insert(
    "part-0",
    PartitionKey::default(),
    Table::from_rows(
        ["k", "v"],
        vec![
            vec![Field::from("A"), Field::from(1.0)],
            vec![Field::from("A"), Field::from(3.0)],
            vec![Field::from("B"), Field::from(10.0)],
        ],
    )?,
);
let catalog = source.catalog();

let query = AggregateQuery::new(Projection::new(["k"], Some("v")), AggregateFn::Mean);
let result = Driver::new(source, query, DriverConfig::default())?.run_catalog(catalog)?;
assert_eq!(result.get(&["A"]), Some(Some(2.0)));
assert_eq!(result.get(&["B"]), Some(Some(10.0)));
# Ok::<(), Box<dyn std::error::Error>>(())
```

# Features
* `csv`, `bincode`: shard formats beyond JSON lines (default on).
* `zstd`: read and write `.zst` compressed shards (default on).
* `tokio`: [`driver::Driver::a_run_catalog`], folding shards on blocking
  tasks.
* `cli`: the `shard_agg` binary.
*/

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod disks;
pub mod driver;
pub mod error;
pub mod formats;
pub mod reader;
pub mod record;
pub mod source;

#[cfg(test)]
mod test_utils;

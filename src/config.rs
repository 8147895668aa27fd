/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*!
Run configuration and the query being run.
*/

use std::{fs::File, io::BufReader, num::NonZeroUsize, path::Path, thread::available_parallelism};

use serde::{Deserialize, Serialize};

use crate::{
    aggregate::AggregateFn,
    catalog::PartitionFilter,
    error::ConfigError,
    reader::Projection,
};

/// Rows per batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 1 << 16;

fn default_parallelism() -> usize {
    available_parallelism().map_or(1, NonZeroUsize::get)
}

/// How a [`Driver`][`crate::driver::Driver`] executes.
///
/// Missing fields take their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Upper bound on rows per batch, and so on rows resident per worker.
    pub batch_size: usize,
    /// Workers folding shards at once. One runs on the calling thread.
    pub parallelism: usize,
    /// Applied to the catalog before any shard is read.
    pub partition_filter: PartitionFilter,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parallelism: default_parallelism(),
            partition_filter: PartitionFilter::default(),
        }
    }
}

impl DriverConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_filter(mut self, partition_filter: PartitionFilter) -> Self {
        self.partition_filter = partition_filter;
        self
    }

    /// Loads a JSON config file.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.parallelism == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        Ok(())
    }
}

/// What to compute: the grouping and value columns, and the function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateQuery {
    #[serde(flatten)]
    pub projection: Projection,
    pub function: AggregateFn,
}

impl AggregateQuery {
    pub fn new(projection: Projection, function: AggregateFn) -> Self {
        Self {
            projection,
            function,
        }
    }

    /// Rejects functions other than count that lack a value column.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.function.needs_value() && self.projection.value_column.is_none() {
            return Err(ConfigError::MissingValueColumn(self.function));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs::{create_dir_all, remove_dir_all, write};

    use crate::{catalog::FilterClause, test_utils::scratch_dir};

    use super::*;

    #[test]
    fn partial_config_takes_defaults() {
        let config: DriverConfig = serde_json::from_str(r#"{"batch_size": 10}"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.parallelism, default_parallelism());
        assert!(config.partition_filter.is_empty());
        assert!(config.validate().is_ok());

        assert!(serde_json::from_str::<DriverConfig>(r#"{"batch": 10}"#).is_err());
    }

    #[test]
    fn rejects_zeroes() {
        let config = DriverConfig::default().with_batch_size(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroBatchSize)));

        let config = DriverConfig::default().with_parallelism(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroParallelism)
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = scratch_dir("config_load");
        create_dir_all(&dir).unwrap();

        let path = dir.join("config.json");
        write(
            &path,
            r#"{
                "batch_size": 128,
                "parallelism": 2,
                "partition_filter": [{"op": "equals", "key": "year", "value": "2020"}]
            }"#,
        )
        .unwrap();
        let config = DriverConfig::from_json_path(&path).unwrap();
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.parallelism, 2);
        assert_eq!(
            config.partition_filter.clauses(),
            [FilterClause::Equals {
                key: "year".to_string(),
                value: "2020".to_string()
            }]
        );

        write(&path, r#"{"batch_size": 0}"#).unwrap();
        assert!(matches!(
            DriverConfig::from_json_path(&path),
            Err(ConfigError::ZeroBatchSize)
        ));

        write(&path, "{").unwrap();
        assert!(matches!(
            DriverConfig::from_json_path(&path),
            Err(ConfigError::Parse { .. })
        ));

        assert!(matches!(
            DriverConfig::from_json_path(dir.join("absent.json")),
            Err(ConfigError::Io { .. })
        ));

        remove_dir_all(dir).unwrap();
    }

    #[test]
    fn query_needs_value_column() {
        let count = AggregateQuery::new(Projection::new(["k"], None), AggregateFn::Count);
        assert!(count.validate().is_ok());

        let mean = AggregateQuery::new(Projection::new(["k"], None), AggregateFn::Mean);
        assert!(matches!(
            mean.validate(),
            Err(ConfigError::MissingValueColumn(AggregateFn::Mean))
        ));

        let query: AggregateQuery = serde_json::from_str(
            r#"{"key_columns": ["year"], "value_column": "amount", "function": "sum"}"#,
        )
        .unwrap();
        assert_eq!(
            query,
            AggregateQuery::new(Projection::new(["year"], Some("amount")), AggregateFn::Sum)
        );
    }
}

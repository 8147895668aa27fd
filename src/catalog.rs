/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*!
Enumerates the shards of a partitioned dataset.

A dataset is a directory tree. Directory levels between the root and the
shard files carry partition key values, either named (`year=2020`, see
[`PartitionScheme::Hive`]) or positional (`2020`, see
[`PartitionScheme::Directory`]). Files and directories starting with `.` or
`_` are never shards.
*/

use std::{
    cmp::Ordering,
    fmt::Display,
    fs::read_dir,
    path::{Path, PathBuf},
    str::FromStr,
};

use derive_getters::Getters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    disks::{Compression, ShardFile, ZSTD_SUFFIX},
    error::{CatalogError, ConfigError},
    record::NULL_KEY,
};

/// Ordered `(name, value)` pairs locating a shard in its dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(Vec<(String, String)>);

impl PartitionKey {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .join("/");
        f.write_str(&joined)
    }
}

/// One immutable shard file and the partition it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct ShardDescriptor {
    path: PathBuf,
    partition: PartitionKey,
    compression: Compression,
}

impl ShardDescriptor {
    pub fn new(path: PathBuf, partition: PartitionKey) -> Self {
        let compression = Compression::from_path(&path);
        Self {
            path,
            partition,
            compression,
        }
    }

    /// Backing file handle.
    pub fn file(&self) -> ShardFile {
        ShardFile::new(self.path.clone(), self.compression)
    }
}

/// Directory value holding rows whose partition column is missing. Read
/// back as [`NULL_KEY`], the key missing fields group under.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// How directory levels map to partition keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionScheme {
    /// Shards sit directly under the root.
    #[default]
    Flat,
    /// `key=value` directory levels.
    ///
    /// With `keys` set, every shard sits exactly `keys.len()` levels deep and
    /// the level names must match in order. An empty `keys` accepts any
    /// depth and takes the names from the directories.
    Hive { keys: Vec<String> },
    /// Bare value directory levels, one per key.
    Directory { keys: Vec<String> },
}

impl PartitionScheme {
    /// Maps one directory name at `depth` to a partition pair.
    fn level(&self, depth: usize, name: &str) -> Result<(String, String), String> {
        match self {
            Self::Flat => Err("flat datasets have no directory levels".to_string()),
            Self::Hive { keys } => {
                let (key, value) = name
                    .split_once('=')
                    .ok_or_else(|| format!("directory {name:?} is not key=value"))?;
                match keys.get(depth) {
                    Some(expected) if expected != key => Err(format!(
                        "directory key {key:?} at level {depth}, expected {expected:?}"
                    )),
                    None if !keys.is_empty() => {
                        Err(format!("more than {} partition levels", keys.len()))
                    }
                    _ if value == HIVE_DEFAULT_PARTITION => {
                        Ok((key.to_string(), NULL_KEY.to_string()))
                    }
                    _ => Ok((key.to_string(), value.to_string())),
                }
            }
            Self::Directory { keys } => keys
                .get(depth)
                .map(|key| (key.clone(), name.to_string()))
                .ok_or_else(|| format!("more than {} partition levels", keys.len())),
        }
    }

    /// Number of directory levels a shard must sit under, if fixed.
    fn depth(&self) -> Option<usize> {
        match self {
            Self::Flat => Some(0),
            Self::Hive { keys } if keys.is_empty() => None,
            Self::Hive { keys } | Self::Directory { keys } => Some(keys.len()),
        }
    }
}

/// One clause of a [`PartitionFilter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterClause {
    Equals { key: String, value: String },
    In { key: String, values: Vec<String> },
    NotIn { key: String, values: Vec<String> },
    /// Inclusive range. Compared as numbers when both sides parse.
    Between { key: String, min: String, max: String },
}

fn compare_values(lhs: &str, rhs: &str) -> Ordering {
    match (lhs.parse::<f64>(), rhs.parse::<f64>()) {
        (Ok(lhs), Ok(rhs)) => lhs.total_cmp(&rhs),
        _ => lhs.cmp(rhs),
    }
}

impl FilterClause {
    pub fn key(&self) -> &str {
        match self {
            Self::Equals { key, .. }
            | Self::In { key, .. }
            | Self::NotIn { key, .. }
            | Self::Between { key, .. } => key,
        }
    }

    /// A partition without the clause's key never matches.
    pub fn matches(&self, partition: &PartitionKey) -> bool {
        let Some(actual) = partition.get(self.key()) else {
            return false;
        };
        match self {
            Self::Equals { value, .. } => actual == value,
            Self::In { values, .. } => values.iter().any(|value| value == actual),
            Self::NotIn { values, .. } => !values.iter().any(|value| value == actual),
            Self::Between { min, max, .. } => {
                compare_values(actual, min) != Ordering::Less
                    && compare_values(actual, max) != Ordering::Greater
            }
        }
    }
}

/// Parses `key=value` or `key=value,value,...`.
impl FromStr for FilterClause {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, values) = s
            .split_once('=')
            .filter(|(key, values)| !key.is_empty() && !values.is_empty())
            .ok_or_else(|| ConfigError::InvalidFilter(s.to_string()))?;
        let key = key.trim().to_string();
        let mut values = values.split(',').map(|v| v.trim().to_string()).collect_vec();
        Ok(if values.len() == 1 {
            Self::Equals {
                key,
                value: values.remove(0),
            }
        } else {
            Self::In { key, values }
        })
    }
}

/// Restricts which shards are read. Every clause must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionFilter {
    clauses: Vec<FilterClause>,
}

impl PartitionFilter {
    pub fn new(clauses: Vec<FilterClause>) -> Self {
        Self { clauses }
    }

    pub fn with(mut self, clause: FilterClause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, partition: &PartitionKey) -> bool {
        self.clauses.iter().all(|clause| clause.matches(partition))
    }
}

/// Ordered shards of one dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct Catalog {
    root: Option<PathBuf>,
    shards: Vec<ShardDescriptor>,
}

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_')
}

fn is_shard_name(name: &str, extension: &str) -> bool {
    let name = name.strip_suffix(&format!(".{ZSTD_SUFFIX}")).unwrap_or(name);
    name.strip_suffix(extension)
        .is_some_and(|stem| stem.ends_with('.') && stem.len() > 1)
}

impl Catalog {
    /// Lists every shard under `root` with the given base extension
    /// (`"csv"` matches `*.csv` and `*.csv.zst`).
    ///
    /// Shards are ordered by path. Fails if `root` is unusable, a shard
    /// does not fit `scheme`, or nothing matches.
    pub fn scan(
        root: impl AsRef<Path>,
        scheme: &PartitionScheme,
        extension: &str,
    ) -> Result<Self, CatalogError> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(CatalogError::MissingRoot(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(CatalogError::NotADirectory(root.to_path_buf()));
        }

        let mut shards = vec![];
        Self::walk(root, scheme, extension, &mut vec![], &mut shards)?;
        if shards.is_empty() {
            return Err(CatalogError::NoShards {
                root: root.to_path_buf(),
            });
        }
        shards.sort_unstable_by(|lhs, rhs| lhs.path.cmp(&rhs.path));

        info!(root = ?root, shards = shards.len(), "scanned catalog");
        Ok(Self {
            root: Some(root.to_path_buf()),
            shards,
        })
    }

    fn walk(
        dir: &Path,
        scheme: &PartitionScheme,
        extension: &str,
        levels: &mut Vec<(String, String)>,
        shards: &mut Vec<ShardDescriptor>,
    ) -> Result<(), CatalogError> {
        let io_err = |source| CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let entries = read_dir(dir)
            .map_err(io_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;

        for entry in entries {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_ignored(&name) {
                continue;
            }
            let file_type = entry.file_type().map_err(|source| CatalogError::Io {
                path: path.clone(),
                source,
            })?;

            if file_type.is_dir() {
                if matches!(scheme, PartitionScheme::Flat) {
                    debug!(path = ?path, "skipping subdirectory of flat dataset");
                    continue;
                }
                let level = scheme
                    .level(levels.len(), &name)
                    .map_err(|reason| CatalogError::SchemeMismatch {
                        path: path.clone(),
                        reason,
                    })?;
                levels.push(level);
                Self::walk(&path, scheme, extension, levels, shards)?;
                levels.pop();
            } else if is_shard_name(&name, extension) {
                if let Some(depth) = scheme.depth() {
                    if levels.len() != depth {
                        return Err(CatalogError::SchemeMismatch {
                            path,
                            reason: format!(
                                "shard is {} levels deep, expected {depth}",
                                levels.len()
                            ),
                        });
                    }
                }
                shards.push(ShardDescriptor::new(
                    path,
                    PartitionKey::new(levels.clone()),
                ));
            }
        }
        Ok(())
    }

    /// Catalog over explicit shards, kept in the given order.
    pub fn from_shards(shards: Vec<ShardDescriptor>) -> Self {
        Self { root: None, shards }
    }

    /// Keeps the shards whose partition matches `filter`.
    ///
    /// May leave the catalog empty.
    pub fn filter(mut self, filter: &PartitionFilter) -> Self {
        if !filter.is_empty() {
            let before = self.shards.len();
            self.shards.retain(|shard| filter.matches(&shard.partition));
            debug!(before, after = self.shards.len(), "filtered catalog");
        }
        self
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ShardDescriptor> {
        self.shards.iter()
    }
}

impl IntoIterator for Catalog {
    type Item = ShardDescriptor;
    type IntoIter = std::vec::IntoIter<ShardDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.shards.into_iter()
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a ShardDescriptor;
    type IntoIter = std::slice::Iter<'a, ShardDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.shards.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        env::temp_dir,
        fs::{create_dir_all, remove_dir_all, write},
    };

    use super::*;

    fn layout(name: &str, files: &[&str]) -> PathBuf {
        let root = temp_dir().join(name);
        let _ = remove_dir_all(&root);
        create_dir_all(&root).unwrap();
        for file in files {
            let path = root.join(file);
            create_dir_all(path.parent().unwrap()).unwrap();
            write(path, b"k,v\n").unwrap();
        }
        root
    }

    fn relative(catalog: &Catalog, root: &Path) -> Vec<String> {
        catalog
            .iter()
            .map(|shard| {
                shard
                    .path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn hive_scan_orders_and_keys() {
        let root = layout(
            "shard_agg_catalog_hive",
            &[
                "year=2021/month=02/part-0.csv",
                "year=2020/month=12/part-1.csv.zst",
                "year=2020/month=01/part-0.csv",
                "year=2020/month=01/_SUCCESS",
                "year=2020/month=01/notes.txt",
                ".hidden/part-0.csv",
            ],
        );

        let scheme = PartitionScheme::Hive {
            keys: vec!["year".to_string(), "month".to_string()],
        };
        let catalog = Catalog::scan(&root, &scheme, "csv").unwrap();
        assert_eq!(
            relative(&catalog, &root),
            [
                "year=2020/month=01/part-0.csv",
                "year=2020/month=12/part-1.csv.zst",
                "year=2021/month=02/part-0.csv",
            ]
        );
        let first = &catalog.shards()[0];
        assert_eq!(first.partition().get("year"), Some("2020"));
        assert_eq!(first.partition().get("month"), Some("01"));
        assert_eq!(first.partition().to_string(), "year=2020/month=01");
        assert_eq!(*first.compression(), Compression::None);
        assert!(matches!(
            catalog.shards()[1].compression(),
            Compression::Zstd(_)
        ));

        // Inferred keys accept the same layout
        let inferred = Catalog::scan(&root, &PartitionScheme::Hive { keys: vec![] }, "csv").unwrap();
        assert_eq!(inferred.len(), 3);

        remove_dir_all(root).unwrap();
    }

    #[test]
    fn hive_default_partition_reads_as_null_key() {
        let root = layout(
            "shard_agg_catalog_hive_default",
            &["region=__HIVE_DEFAULT_PARTITION__/part-0.csv", "region=EU/part-0.csv"],
        );
        let scheme = PartitionScheme::Hive {
            keys: vec!["region".to_string()],
        };
        let catalog = Catalog::scan(&root, &scheme, "csv").unwrap();
        let values = catalog
            .iter()
            .map(|shard| shard.partition().get("region").unwrap().to_string())
            .collect_vec();
        assert_eq!(values, ["EU", NULL_KEY]);

        remove_dir_all(root).unwrap();
    }

    #[test]
    fn directory_scheme_names_levels() {
        let root = layout(
            "shard_agg_catalog_directory",
            &["2020/01/a.jsonl", "2020/02/b.jsonl"],
        );
        let scheme = PartitionScheme::Directory {
            keys: vec!["year".to_string(), "month".to_string()],
        };
        let catalog = Catalog::scan(&root, &scheme, "jsonl").unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.shards()[1].partition().get("month"), Some("02"));

        remove_dir_all(root).unwrap();
    }

    #[test]
    fn flat_scan_ignores_subdirectories() {
        let root = layout(
            "shard_agg_catalog_flat",
            &["b.csv", "a.csv", "nested/c.csv"],
        );
        let catalog = Catalog::scan(&root, &PartitionScheme::Flat, "csv").unwrap();
        assert_eq!(relative(&catalog, &root), ["a.csv", "b.csv"]);
        assert!(catalog.shards()[0].partition().is_empty());

        remove_dir_all(root).unwrap();
    }

    #[test]
    fn scan_errors() {
        let missing = temp_dir().join("shard_agg_catalog_missing");
        let _ = remove_dir_all(&missing);
        assert!(matches!(
            Catalog::scan(&missing, &PartitionScheme::Flat, "csv"),
            Err(CatalogError::MissingRoot(_))
        ));

        let root = layout("shard_agg_catalog_errors", &["only.txt"]);
        assert!(matches!(
            Catalog::scan(root.join("only.txt"), &PartitionScheme::Flat, "csv"),
            Err(CatalogError::NotADirectory(_))
        ));
        assert!(matches!(
            Catalog::scan(&root, &PartitionScheme::Flat, "csv"),
            Err(CatalogError::NoShards { .. })
        ));
        remove_dir_all(&root).unwrap();

        let root = layout(
            "shard_agg_catalog_mismatch",
            &["year=2020/part-0.csv", "region/part-0.csv"],
        );
        let scheme = PartitionScheme::Hive {
            keys: vec!["year".to_string()],
        };
        assert!(matches!(
            Catalog::scan(&root, &scheme, "csv"),
            Err(CatalogError::SchemeMismatch { .. })
        ));
        remove_dir_all(&root).unwrap();

        let root = layout("shard_agg_catalog_shallow", &["part-0.csv"]);
        assert!(matches!(
            Catalog::scan(&root, &scheme, "csv"),
            Err(CatalogError::SchemeMismatch { .. })
        ));
        remove_dir_all(root).unwrap();
    }

    #[test]
    fn filter_clauses() {
        let partition = PartitionKey::new(vec![
            ("year".to_string(), "2020".to_string()),
            ("month".to_string(), "9".to_string()),
        ]);

        assert!("year=2020".parse::<FilterClause>().unwrap().matches(&partition));
        assert!("year=2019,2020"
            .parse::<FilterClause>()
            .unwrap()
            .matches(&partition));
        assert!(!"region=eu".parse::<FilterClause>().unwrap().matches(&partition));
        assert!("year".parse::<FilterClause>().is_err());

        // Numeric comparison: "9" sits between "1" and "12"
        let between = FilterClause::Between {
            key: "month".to_string(),
            min: "1".to_string(),
            max: "12".to_string(),
        };
        assert!(between.matches(&partition));

        let not_in = FilterClause::NotIn {
            key: "year".to_string(),
            values: vec!["2020".to_string()],
        };
        assert!(!not_in.matches(&partition));

        let filter = PartitionFilter::default()
            .with("year=2020".parse().unwrap())
            .with(between);
        assert!(filter.matches(&partition));
        assert!(PartitionFilter::default().matches(&PartitionKey::default()));
    }

    #[test]
    fn filter_may_empty_catalog() {
        let catalog = Catalog::from_shards(vec![ShardDescriptor::new(
            PathBuf::from("year=2020/part-0.csv"),
            PartitionKey::new(vec![("year".to_string(), "2020".to_string())]),
        )]);
        let filtered = catalog.filter(&PartitionFilter::new(vec!["year=2021".parse().unwrap()]));
        assert!(filtered.is_empty());
    }

    #[test]
    fn filter_config_round_trip() {
        let filter: PartitionFilter = serde_json::from_str(
            r#"[{"op": "in", "key": "year", "values": ["2020", "2021"]}]"#,
        )
        .unwrap();
        assert_eq!(
            filter.clauses(),
            [FilterClause::In {
                key: "year".to_string(),
                values: vec!["2020".to_string(), "2021".to_string()],
            }]
        );
    }
}

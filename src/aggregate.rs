/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*!
Mergeable per-group partial state.

An [`Aggregator`] is folded batch by batch, combined with other
aggregators in any order and grouping, and finalized exactly once.
*/

use std::{collections::HashMap, fmt::Display, str::FromStr};

use derive_getters::Getters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{error::MergeError, reader::RowBatch};

/// Aggregate function computed per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    /// Rows in the group, missing values included.
    Count,
    Sum,
    Mean,
    Min,
    Max,
}

impl AggregateFn {
    /// Whether the function reads the value column.
    pub fn needs_value(&self) -> bool {
        !matches!(self, Self::Count)
    }
}

impl Display for AggregateFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
        })
    }
}

impl FromStr for AggregateFn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "mean" | "avg" => Ok(Self::Mean),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(format!("unknown aggregate function {other:?}")),
        }
    }
}

/// Ordered key-column values of one group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(Vec<String>);

impl GroupKey {
    pub fn new(values: Vec<String>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[String] {
        &self.0
    }
}

impl From<&[&str]> for GroupKey {
    fn from(value: &[&str]) -> Self {
        Self(value.iter().map(|v| v.to_string()).collect())
    }
}

impl Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.0.iter().join(", "))
    }
}

/// Partial state of one group. Every field merges independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, Getters)]
pub struct GroupState {
    /// Rows folded, missing values included.
    rows: u64,
    /// Non-missing values folded.
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl GroupState {
    fn push(&mut self, value: Option<f64>) {
        self.rows += 1;
        if let Some(value) = value {
            self.count += 1;
            self.sum += value;
            self.min = Some(self.min.map_or(value, |min| min.min(value)));
            self.max = Some(self.max.map_or(value, |max| max.max(value)));
        }
    }

    fn absorb(&mut self, other: &Self) {
        self.rows += other.rows;
        self.count += other.count;
        self.sum += other.sum;
        self.min = extremum(self.min, other.min, f64::min);
        self.max = extremum(self.max, other.max, f64::max);
    }

    fn finalize(&self, function: AggregateFn) -> Option<f64> {
        match function {
            AggregateFn::Count => Some(self.rows as f64),
            AggregateFn::Sum => Some(self.sum),
            AggregateFn::Mean => (self.count > 0).then(|| self.sum / self.count as f64),
            AggregateFn::Min => self.min,
            AggregateFn::Max => self.max,
        }
    }
}

fn extremum(lhs: Option<f64>, rhs: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => Some(pick(lhs, rhs)),
        (lhs, rhs) => lhs.or(rhs),
    }
}

/// Per-group accumulator for one [`AggregateFn`].
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct Aggregator {
    function: AggregateFn,
    groups: HashMap<GroupKey, GroupState>,
    /// Total rows folded. Always the sum of per-group `rows`.
    rows: u64,
    /// Shards fully folded.
    shards: u64,
}

impl Aggregator {
    pub fn new(function: AggregateFn) -> Self {
        Self {
            function,
            groups: HashMap::new(),
            rows: 0,
            shards: 0,
        }
    }

    /// Folds every row of `batch` into its group.
    pub fn fold(&mut self, batch: RowBatch) {
        let (_, rows) = batch.dissolve();
        self.rows += rows.len() as u64;
        for row in rows {
            self.groups.entry(row.key).or_default().push(row.value);
        }
    }

    /// Records that one more shard has been folded completely.
    pub fn finish_shard(&mut self) {
        self.shards += 1;
    }

    /// Combines two accumulators key by key.
    ///
    /// Order and grouping of merges do not affect the result.
    pub fn merge(self, other: Self) -> Result<Self, MergeError> {
        if self.function != other.function {
            return Err(MergeError::IncompatibleFunction {
                left: self.function,
                right: other.function,
            });
        }

        // Fold the smaller map into the larger one
        let (mut into, from) = if self.groups.len() >= other.groups.len() {
            (self, other)
        } else {
            (other, self)
        };
        for (key, state) in from.groups {
            into.groups.entry(key).or_default().absorb(&state);
        }
        into.rows += from.rows;
        into.shards += from.shards;
        Ok(into)
    }

    /// Derives the final value of every group.
    ///
    /// Leaves the accumulator untouched, so this can report progress
    /// before folding is complete.
    pub fn finalize(&self) -> AggregateResult {
        let groups = self
            .groups
            .iter()
            .map(|(key, state)| GroupValue {
                key: key.clone(),
                value: state.finalize(self.function),
            })
            .sorted_unstable_by(|lhs, rhs| lhs.key.cmp(&rhs.key))
            .collect();

        AggregateResult {
            function: self.function,
            rows: self.rows,
            shards: self.shards,
            groups,
        }
    }
}

/// One finalized group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupValue {
    pub key: GroupKey,
    /// `None` when the group held no usable value.
    pub value: Option<f64>,
}

/// Finalized aggregate, ordered by group key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct AggregateResult {
    function: AggregateFn,
    rows: u64,
    shards: u64,
    groups: Vec<GroupValue>,
}

impl AggregateResult {
    /// Result of aggregating nothing.
    pub fn empty(function: AggregateFn) -> Self {
        Aggregator::new(function).finalize()
    }

    /// Value of the group with the given key, if the group exists.
    pub fn get(&self, key: &[&str]) -> Option<Option<f64>> {
        let key = GroupKey::from(key);
        self.groups
            .binary_search_by(|group| group.key.cmp(&key))
            .ok()
            .map(|idx| self.groups[idx].value)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::reader::Row;

    use super::*;

    fn batch(rows: &[(&str, Option<f64>)]) -> RowBatch {
        RowBatch::new(
            0,
            rows.iter()
                .map(|(key, value)| Row {
                    key: GroupKey::from(&[*key][..]),
                    value: *value,
                })
                .collect(),
        )
    }

    fn folded(function: AggregateFn, rows: &[(&str, Option<f64>)]) -> Aggregator {
        let mut agg = Aggregator::new(function);
        agg.fold(batch(rows));
        agg.finish_shard();
        agg
    }

    #[test]
    fn mean_over_three_shards() {
        let a = folded(AggregateFn::Mean, &[("A", Some(1.0)), ("A", Some(3.0))]);
        let b = folded(AggregateFn::Mean, &[("B", Some(10.0))]);
        let c = folded(AggregateFn::Mean, &[("A", Some(2.0))]);

        let result = a.merge(b).unwrap().merge(c).unwrap().finalize();
        assert_eq!(result.get(&["A"]), Some(Some(2.0)));
        assert_eq!(result.get(&["B"]), Some(Some(10.0)));
        assert_eq!(result.get(&["C"]), None);
        assert_eq!(result.rows(), &4);
        assert_eq!(result.shards(), &3);
    }

    #[test]
    fn merge_order_is_irrelevant() {
        for function in [
            AggregateFn::Count,
            AggregateFn::Sum,
            AggregateFn::Mean,
            AggregateFn::Min,
            AggregateFn::Max,
        ] {
            let parts = || {
                [
                    folded(function, &[("A", Some(1.0)), ("B", None)]),
                    folded(function, &[("A", Some(-4.0)), ("C", Some(8.0))]),
                    folded(function, &[("B", Some(0.5)), ("A", Some(2.0))]),
                ]
            };

            let [a, b, c] = parts();
            let left = a.merge(b).unwrap().merge(c).unwrap().finalize();
            let [a, b, c] = parts();
            let right = a.merge(c.merge(b).unwrap()).unwrap().finalize();
            let [a, b, c] = parts();
            let swapped = c.merge(a).unwrap().merge(b).unwrap().finalize();

            assert_eq!(left, right, "{function}");
            assert_eq!(left, swapped, "{function}");
        }
    }

    #[test]
    fn missing_values() {
        let rows = [("A", None), ("A", Some(4.0)), ("B", None)];
        let finalize = |function| folded(function, &rows).finalize();

        let count = finalize(AggregateFn::Count);
        assert_eq!(count.get(&["A"]), Some(Some(2.0)));
        assert_eq!(count.get(&["B"]), Some(Some(1.0)));

        let sum = finalize(AggregateFn::Sum);
        assert_eq!(sum.get(&["A"]), Some(Some(4.0)));
        assert_eq!(sum.get(&["B"]), Some(Some(0.0)));

        let mean = finalize(AggregateFn::Mean);
        assert_eq!(mean.get(&["A"]), Some(Some(4.0)));
        assert_eq!(mean.get(&["B"]), Some(None));

        assert_eq!(finalize(AggregateFn::Min).get(&["B"]), Some(None));
        assert_eq!(finalize(AggregateFn::Max).get(&["A"]), Some(Some(4.0)));
    }

    #[test]
    fn group_rows_sum_to_total() {
        let agg = folded(
            AggregateFn::Sum,
            &[("A", Some(1.0)), ("B", None), ("A", Some(1.0))],
        )
        .merge(folded(AggregateFn::Sum, &[("C", Some(2.0))]))
        .unwrap();
        let per_group: u64 = agg.groups().values().map(|state| state.rows()).sum();
        assert_eq!(per_group, *agg.rows());
        assert_eq!(per_group, 4);
    }

    #[test]
    fn incompatible_merge() {
        let err = Aggregator::new(AggregateFn::Sum)
            .merge(Aggregator::new(AggregateFn::Max))
            .unwrap_err();
        assert_eq!(
            err,
            MergeError::IncompatibleFunction {
                left: AggregateFn::Sum,
                right: AggregateFn::Max
            }
        );
    }

    #[test]
    fn finalize_is_repeatable() {
        let mut agg = folded(AggregateFn::Max, &[("A", Some(1.0))]);
        let early = agg.finalize();
        assert_eq!(early, agg.finalize());

        agg.fold(batch(&[("A", Some(5.0))]));
        assert_eq!(agg.finalize().get(&["A"]), Some(Some(5.0)));
        assert_eq!(early.get(&["A"]), Some(Some(1.0)));
    }

    #[test]
    fn global_group_and_empty() {
        let mut agg = Aggregator::new(AggregateFn::Sum);
        agg.fold(RowBatch::new(
            0,
            vec![
                Row {
                    key: GroupKey::default(),
                    value: Some(1.5),
                },
                Row {
                    key: GroupKey::default(),
                    value: Some(2.5),
                },
            ],
        ));
        let result = agg.finalize();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(&[]), Some(Some(4.0)));

        assert!(AggregateResult::empty(AggregateFn::Mean).is_empty());
    }

    #[test]
    fn function_names() {
        assert_eq!("avg".parse::<AggregateFn>(), Ok(AggregateFn::Mean));
        assert_eq!("MAX".parse::<AggregateFn>(), Ok(AggregateFn::Max));
        assert!("median".parse::<AggregateFn>().is_err());
        assert_eq!(
            serde_json::to_string(&AggregateFn::Count).unwrap(),
            "\"count\""
        );
    }
}

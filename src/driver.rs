/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*!
Runs one aggregation from catalog to finalized result.

Each worker folds whole shards into its own [`Aggregator`]. Only fully
folded aggregators are merged, and only by the driver.

```text
Idle -> Cataloging -> Folding -> Merging -> Finalized
            \             \          \
             +-------------+----------+--> Aborted
```
*/

use std::{
    fmt::Display,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use rayon::{prelude::*, ThreadPoolBuilder};
use tracing::{debug, info, info_span, warn};

use crate::{
    aggregate::{AggregateResult, Aggregator},
    catalog::{Catalog, PartitionScheme, ShardDescriptor},
    config::{AggregateQuery, DriverConfig},
    error::{AggError, ConfigError},
    reader::{ChunkedReader, Projection},
    source::ShardSource,
};

/// Lifecycle of a [`Driver`]. `Finalized` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Cataloging,
    Folding,
    Merging,
    Finalized,
    Aborted,
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Aborted)
    }
}

impl Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Cataloging => "cataloging",
            Self::Folding => "folding",
            Self::Merging => "merging",
            Self::Finalized => "finalized",
            Self::Aborted => "aborted",
        })
    }
}

/// Stops a run from issuing new reads.
///
/// Clones share the same flag. Batches already read are still folded, but
/// the run fails with [`AggError::Cancelled`] and merges nothing.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Abort state shared by the workers of one run.
#[derive(Debug)]
struct RunControl {
    cancel: CancelToken,
    aborted: AtomicBool,
    first_error: Mutex<Option<AggError>>,
}

impl RunControl {
    fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            aborted: AtomicBool::new(false),
            first_error: Mutex::new(None),
        }
    }

    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.aborted.load(Ordering::Relaxed)
    }

    /// Stops every other worker. Keeps the first real failure and hands
    /// back a placeholder.
    fn fail(&self, err: AggError) -> AggError {
        self.aborted.store(true, Ordering::Relaxed);
        if !matches!(err, AggError::Cancelled) {
            self.first_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_or_insert(err);
        }
        AggError::Cancelled
    }

    /// The first real failure, otherwise `fallback`.
    fn take_error(&self, fallback: AggError) -> AggError {
        self.first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(fallback)
    }
}

/// Reads and folds every batch of `shard` into `agg`.
///
/// Checks for cancellation before each read.
fn fold_shard<S>(
    source: &S,
    shard: &ShardDescriptor,
    projection: &Projection,
    batch_size: usize,
    control: &RunControl,
    agg: &mut Aggregator,
) -> Result<(), AggError>
where
    S: ShardSource + ?Sized,
{
    if control.should_stop() {
        return Err(AggError::Cancelled);
    }
    let mut reader = ChunkedReader::open(source, shard, projection, batch_size)?;
    loop {
        if control.should_stop() {
            return Err(AggError::Cancelled);
        }
        match reader.next() {
            Some(batch) => agg.fold(batch?),
            None => break,
        }
    }
    agg.finish_shard();
    debug!(path = ?shard.path(), rows = reader.offset(), "folded shard");
    Ok(())
}

/// Orchestrates a single aggregation over a shard source.
///
/// A driver runs once. Build a new one for every run.
#[derive(Debug)]
pub struct Driver<S> {
    source: Arc<S>,
    query: AggregateQuery,
    config: DriverConfig,
    state: DriverState,
    cancel: CancelToken,
}

impl<S: ShardSource> Driver<S> {
    /// Validates `config` and `query` up front.
    pub fn new(source: S, query: AggregateQuery, config: DriverConfig) -> Result<Self, AggError> {
        config.validate()?;
        query.validate()?;
        Ok(Self {
            source: Arc::new(source),
            query,
            config,
            state: DriverState::Idle,
            cancel: CancelToken::new(),
        })
    }

    /// Uses an existing token, e.g. one shared with a signal handler.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn query(&self) -> &AggregateQuery {
        &self.query
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn begin(&mut self) -> Result<(), AggError> {
        if self.state != DriverState::Idle {
            return Err(AggError::InvalidState(self.state));
        }
        self.state = DriverState::Cataloging;
        Ok(())
    }

    fn conclude(
        &mut self,
        result: Result<AggregateResult, AggError>,
    ) -> Result<AggregateResult, AggError> {
        match &result {
            Ok(result) => {
                self.state = DriverState::Finalized;
                info!(
                    rows = result.rows(),
                    shards = result.shards(),
                    groups = result.len(),
                    "aggregation finished"
                );
            }
            Err(err) => {
                self.state = DriverState::Aborted;
                warn!(error = %err, "aggregation aborted");
            }
        }
        result
    }

    /// Applies the partition filter. `None` when nothing is left to read.
    fn prepare(&self, catalog: Catalog) -> Result<Option<Catalog>, AggError> {
        if self.cancel.is_cancelled() {
            return Err(AggError::Cancelled);
        }
        let catalog = catalog.filter(&self.config.partition_filter);
        if catalog.is_empty() {
            info!("no shards left after filtering");
            return Ok(None);
        }
        Ok(Some(catalog))
    }

    fn merge_all(&mut self, partials: Vec<Aggregator>) -> Result<AggregateResult, AggError> {
        self.state = DriverState::Merging;
        let merged = partials
            .into_iter()
            .try_fold(Aggregator::new(self.query.function), Aggregator::merge)?;
        Ok(merged.finalize())
    }
}

impl<S: ShardSource + Sync> Driver<S> {
    /// Catalogs `root` under `scheme`, then aggregates it.
    ///
    /// Needs a file-backed source to know which files are shards.
    pub fn run(
        &mut self,
        root: impl AsRef<Path>,
        scheme: &PartitionScheme,
    ) -> Result<AggregateResult, AggError> {
        self.begin()?;
        let root = root.as_ref();
        let span = info_span!("run", root = ?root, function = %self.query.function);
        let _guard = span.enter();

        let catalog = match self.source.extension() {
            Some(extension) => Catalog::scan(root, scheme, extension).map_err(AggError::from),
            None => Err(ConfigError::NotFileBacked.into()),
        };
        let result = catalog.and_then(|catalog| self.aggregate(catalog));
        self.conclude(result)
    }

    /// Aggregates an already built catalog.
    pub fn run_catalog(&mut self, catalog: Catalog) -> Result<AggregateResult, AggError> {
        self.begin()?;
        let span = info_span!("run", shards = catalog.len(), function = %self.query.function);
        let _guard = span.enter();

        let result = self.aggregate(catalog);
        self.conclude(result)
    }

    fn aggregate(&mut self, catalog: Catalog) -> Result<AggregateResult, AggError> {
        let Some(catalog) = self.prepare(catalog)? else {
            return Ok(AggregateResult::empty(self.query.function));
        };

        self.state = DriverState::Folding;
        info!(
            shards = catalog.len(),
            parallelism = self.config.parallelism,
            batch_size = self.config.batch_size,
            "folding shards"
        );
        let partials = if self.config.parallelism == 1 {
            vec![self.fold_sequential(&catalog)?]
        } else {
            self.fold_parallel(&catalog)?
        };
        self.merge_all(partials)
    }

    fn fold_sequential(&self, catalog: &Catalog) -> Result<Aggregator, AggError> {
        let control = RunControl::new(self.cancel.clone());
        let mut agg = Aggregator::new(self.query.function);
        for shard in catalog {
            fold_shard(
                &*self.source,
                shard,
                &self.query.projection,
                self.config.batch_size,
                &control,
                &mut agg,
            )?;
        }
        Ok(agg)
    }

    /// One aggregator per rayon work split, each fully folded.
    fn fold_parallel(&self, catalog: &Catalog) -> Result<Vec<Aggregator>, AggError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism)
            .thread_name(|idx| format!("shard-fold-{idx}"))
            .build()?;

        let control = RunControl::new(self.cancel.clone());
        let source = &*self.source;
        let projection = &self.query.projection;
        let function = self.query.function;
        let batch_size = self.config.batch_size;

        let partials = pool.install(|| {
            catalog
                .shards()
                .par_iter()
                .try_fold(
                    || Aggregator::new(function),
                    |mut agg, shard| {
                        fold_shard(source, shard, projection, batch_size, &control, &mut agg)
                            .map(|()| agg)
                            .map_err(|err| control.fail(err))
                    },
                )
                .collect::<Result<Vec<_>, _>>()
        });
        partials.map_err(|err| control.take_error(err))
    }
}

#[cfg(feature = "tokio")]
impl<S: ShardSource + Send + Sync + 'static> Driver<S> {
    /// Aggregates `catalog` with shards folded on blocking tasks.
    ///
    /// Up to `parallelism` tasks each pull shards into their own aggregator.
    /// The worker aggregators are merged once every task has finished.
    pub async fn a_run_catalog(&mut self, catalog: Catalog) -> Result<AggregateResult, AggError> {
        self.begin()?;
        info!(shards = catalog.len(), function = %self.query.function, "async run");
        let result = self.a_aggregate(catalog).await;
        self.conclude(result)
    }

    async fn a_aggregate(&mut self, catalog: Catalog) -> Result<AggregateResult, AggError> {
        let Some(catalog) = self.prepare(catalog)? else {
            return Ok(AggregateResult::empty(self.query.function));
        };
        self.state = DriverState::Folding;
        let partials = self.a_fold(&catalog).await?;
        self.merge_all(partials)
    }

    /// One fully folded aggregator per blocking task.
    async fn a_fold(&self, catalog: &Catalog) -> Result<Vec<Aggregator>, AggError> {
        use std::sync::atomic::AtomicUsize;

        use tokio::task::JoinSet;

        let control = Arc::new(RunControl::new(self.cancel.clone()));
        let shards: Arc<[ShardDescriptor]> = Arc::from(catalog.shards().as_slice());
        let next = Arc::new(AtomicUsize::new(0));
        let workers = self.config.parallelism.min(shards.len());

        let mut tasks = JoinSet::new();
        for _ in 0..workers {
            let source = self.source.clone();
            let query = self.query.clone();
            let control = control.clone();
            let shards = shards.clone();
            let next = next.clone();
            let batch_size = self.config.batch_size;
            tasks.spawn_blocking(move || -> Result<Aggregator, AggError> {
                let mut agg = Aggregator::new(query.function);
                while let Some(shard) = shards.get(next.fetch_add(1, Ordering::Relaxed)) {
                    fold_shard(
                        &*source,
                        shard,
                        &query.projection,
                        batch_size,
                        &control,
                        &mut agg,
                    )
                    .map_err(|err| control.fail(err))?;
                }
                Ok(agg)
            });
        }

        // After a failure the remaining workers are drained and dropped
        let mut partials = Vec::with_capacity(workers);
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined? {
                Ok(agg) if failure.is_none() => partials.push(agg),
                Ok(_) => (),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        match failure {
            Some(err) => Err(control.take_error(err)),
            None => Ok(partials),
        }
    }
}

//! The cache component: construction and the update state machine.
//!
//! One instance owns the published snapshot slot, the two composed
//! statements and the shard handles. Updates are serialised by the
//! scheduler; readers take lock-free snapshot handles at any time.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::container::CacheContainer;
use crate::cluster::{
    ClusterProvider, ClusterShard, CommandControl, FromRow, Query, QueryParams, ShardCursor,
};
use crate::config::PgCacheConfig;
use crate::error::{CacheError, CacheResult, RowParseError};
use crate::policy::{self, CachePolicy, DeltaBound};
use crate::query;
use crate::relax::{self, CpuRelax};
use crate::snapshot::SnapshotHolder;
use crate::stats::{self, ScopeTime, UpdateStatsScope};
use crate::updater::{UpdateHandler, UpdateKind};

/// Periodically materialised, policy-described PostgreSQL cache.
///
/// `P` describes the cached entity, `S` is the shard type produced by the
/// [`ClusterProvider`] handed to [`PostgresCache::new`]. The policy's raw
/// type must decode from the shard's row representation.
pub struct PostgresCache<P, S>
where
    P: CachePolicy,
    S: ClusterShard,
    P::Raw: FromRow<S::Row>,
{
    config: PgCacheConfig,
    correction: chrono::Duration,
    shards: Vec<Arc<S>>,
    full_query: Query,
    delta_query: Query,
    snapshot: SnapshotHolder<P::Container>,
    relax_iterations: AtomicUsize,
    _policy: PhantomData<fn() -> P>,
}

impl<P, S> std::fmt::Debug for PostgresCache<P, S>
where
    P: CachePolicy,
    S: ClusterShard,
    P::Raw: FromRow<S::Row>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCache").finish_non_exhaustive()
    }
}

impl<P, S> PostgresCache<P, S>
where
    P: CachePolicy,
    S: ClusterShard,
    P::Raw: FromRow<S::Row>,
{
    /// Validate the policy and configuration, enumerate the shard set and
    /// compose both statements.
    pub fn new<C>(config: PgCacheConfig, provider: &C) -> CacheResult<Self>
    where
        C: ClusterProvider<Shard = S>,
    {
        policy::validate::<P>()?;
        config.validate(P::NAME)?;

        let correction = chrono::Duration::from_std(config.update_correction)
            .map_err(|_| CacheError::config(P::NAME, "update-correction out of range"))?;

        let shards: Vec<_> = (0..provider.shard_count())
            .map(|shard| provider.shard_for(shard))
            .collect();

        let full_query = query::full_query::<P>();
        let delta_query = query::delta_query::<P>();

        tracing::info!(
            cache = P::NAME,
            pgcomponent = %config.pgcomponent,
            shards = shards.len(),
            full_update_query = full_query.statement(),
            incremental_update_query = delta_query.statement(),
            "constructed postgres cache"
        );

        Ok(Self {
            config,
            correction,
            shards,
            full_query,
            delta_query,
            snapshot: SnapshotHolder::new(),
            relax_iterations: AtomicUsize::new(0),
            _policy: PhantomData,
        })
    }

    /// Shared handle to the published snapshot, or `None` before the first
    /// successful update.
    pub fn snapshot(&self) -> Option<Arc<P::Container>> {
        self.snapshot.current()
    }

    /// The number of shards this cache fans out to.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    async fn run_update(
        &self,
        kind: UpdateKind,
        last_update: DateTime<Utc>,
        stats: &mut UpdateStatsScope,
    ) -> CacheResult<()> {
        // A policy without an updated field can only reload.
        let kind = if P::wants_incremental_updates() {
            kind
        } else {
            UpdateKind::Full
        };

        let (query, timeout) = match kind {
            UpdateKind::Full => (&self.full_query, self.config.full_update_op_timeout),
            UpdateKind::Incremental => (
                &self.delta_query,
                self.config.incremental_update_op_timeout,
            ),
        };
        let control = CommandControl::network_only(timeout);

        let mut scope = ScopeTime::new();
        scope.switch(stats::COPY_STAGE);
        let mut working = self.snapshot.working_copy(kind);

        let mut changes: usize = 0;
        for shard in &self.shards {
            scope.switch(stats::FETCH_STAGE);
            let params = self.delta_params(kind, &working, last_update);

            if self.config.chunk_size > 0 {
                let mut cursor = shard
                    .open_cursor(P::HOST_FLAGS, control, query, params)
                    .await?;
                loop {
                    scope.switch(stats::FETCH_STAGE);
                    let rows = cursor.fetch(self.config.chunk_size).await?;
                    let fetched = rows.len();
                    if fetched > 0 {
                        stats.add_documents_read(fetched);
                        scope.switch(stats::PARSE_STAGE);
                        self.cache_rows(rows, &mut working, stats).await;
                        changes += fetched;
                    }
                    if fetched < self.config.chunk_size {
                        break;
                    }
                }
                cursor.commit().await?;
            } else {
                let rows = shard.execute(P::HOST_FLAGS, control, query, params).await?;
                let fetched = rows.len();
                stats.add_documents_read(fetched);
                scope.switch(stats::PARSE_STAGE);
                self.cache_rows(rows, &mut working, stats).await;
                changes += fetched;
            }
        }
        scope.stop();

        if changes > 0 {
            let parse_elapsed = scope.elapsed_total(stats::PARSE_STAGE);
            if let Some(iterations) = relax::compute_relax_iterations(changes, parse_elapsed) {
                self.relax_iterations.store(iterations, Ordering::Relaxed);
                tracing::trace!(
                    cache = P::NAME,
                    parse_ms = parse_elapsed.as_millis() as u64,
                    changes,
                    iterations,
                    "parse time over threshold, will relax cpu between rows"
                );
            }
        }

        if changes > 0 || kind == UpdateKind::Full {
            stats.finish(working.len());
            self.snapshot.publish(working);
        } else {
            stats.finish_no_changes();
        }
        Ok(())
    }

    /// Bound parameters for one shard execution. Empty for full reloads;
    /// the delta bound otherwise, computed from the working snapshot with
    /// the corrected wall clock as fallback.
    fn delta_params(
        &self,
        kind: UpdateKind,
        working: &P::Container,
        last_update: DateTime<Utc>,
    ) -> QueryParams {
        if kind == UpdateKind::Full {
            return Vec::new();
        }
        // Construction-time validation proved one of the two bound sources
        // answers: either the updated field type derives from a timestamp,
        // or last_known_updated answered on the empty-container probe and
        // is contracted to keep answering.
        let bound = P::last_known_updated(working)
            .or_else(|| P::Updated::from_last_update(last_update - self.correction))
            .unwrap_or_else(|| {
                unreachable!(
                    "cache '{}': no delta bound source after construction-time validation",
                    P::NAME
                )
            });
        vec![Box::new(bound)]
    }

    /// Decode and upsert one batch of rows. A row that fails either the
    /// wire decode or the raw-to-value conversion is counted and skipped;
    /// the batch continues.
    async fn cache_rows(
        &self,
        rows: Vec<S::Row>,
        working: &mut P::Container,
        stats: &mut UpdateStatsScope,
    ) {
        let mut relax = CpuRelax::new(self.relax_iterations.load(Ordering::Relaxed));
        for row in rows {
            relax.relax().await;
            let decoded: Result<P::Value, RowParseError> = P::Raw::from_row(&row)
                .and_then(|raw| raw.try_into().map_err(Into::into));
            match decoded {
                Ok(value) => {
                    let key = P::key_of(&value);
                    working.upsert(key, value);
                }
                Err(e) => {
                    stats.add_parse_failures(1);
                    tracing::error!(
                        cache = P::NAME,
                        value_type = std::any::type_name::<P::Value>(),
                        error = %e,
                        "failed to decode cached row, skipping it"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl<P, S> UpdateHandler for PostgresCache<P, S>
where
    P: CachePolicy,
    S: ClusterShard,
    P::Raw: FromRow<S::Row>,
{
    fn name(&self) -> &str {
        P::NAME
    }

    fn supports_incremental(&self) -> bool {
        P::wants_incremental_updates()
    }

    async fn update(
        &self,
        kind: UpdateKind,
        last_update: DateTime<Utc>,
        _now: DateTime<Utc>,
        stats: &mut UpdateStatsScope,
    ) -> CacheResult<()> {
        self.run_update(kind, last_update, stats).await
    }
}

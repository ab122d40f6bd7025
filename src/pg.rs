//! PostgreSQL implementation of the cluster contract.
//!
//! Each shard holds deadpool-managed connection pools, one per replica
//! role. The single-statement path is a pooled query with a network
//! timeout; the chunked path runs a read-only transaction with a
//! protocol-level portal on a dedicated task that owns the pooled
//! connection for the cursor's lifetime, so fetches stream rows without
//! borrowing across await points.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio::sync::{mpsc, oneshot};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::cluster::{
    ClusterHostFlags, ClusterProvider, ClusterShard, CommandControl, Query, QueryParams,
    ShardCursor,
};
use crate::error::{CacheError, CacheResult};

/// Connection settings for one shard endpoint.
#[derive(Debug, Clone)]
pub struct PgShardSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub pool_size: usize,
}

impl Default for PgShardSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            pool_size: 4,
        }
    }
}

impl PgShardSettings {
    /// Build a lazy connection pool for this endpoint.
    pub fn create_pool(&self) -> CacheResult<Pool> {
        let mut cfg = PoolConfig::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(self.pool_size));

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| CacheError::pool(&self.host, format!("failed to create pool: {e}")))
    }
}

/// One shard of the cluster, with a pool per configured replica role.
pub struct PgShard {
    master: Option<Pool>,
    replica: Option<Pool>,
}

impl PgShard {
    /// A shard backed by a single endpoint serving every role.
    pub fn single(pool: Pool) -> Self {
        Self {
            master: Some(pool.clone()),
            replica: Some(pool),
        }
    }

    /// A shard with distinct primary and replica endpoints.
    pub fn with_roles(master: Option<Pool>, replica: Option<Pool>) -> Self {
        Self { master, replica }
    }

    fn pool_for(&self, host: ClusterHostFlags, context: &str) -> CacheResult<&Pool> {
        if host.intersects(ClusterHostFlags::SLAVE | ClusterHostFlags::SYNC_SLAVE) {
            if let Some(pool) = &self.replica {
                return Ok(pool);
            }
        }
        if host.contains(ClusterHostFlags::MASTER) {
            if let Some(pool) = &self.master {
                return Ok(pool);
            }
        }
        Err(CacheError::config(
            context,
            format!("no endpoint configured for requested host roles {host:?}"),
        ))
    }
}

fn param_refs(params: &QueryParams) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait]
impl ClusterShard for PgShard {
    type Row = tokio_postgres::Row;
    type Cursor = PgShardCursor;

    async fn execute(
        &self,
        host: ClusterHostFlags,
        control: CommandControl,
        query: &Query,
        params: QueryParams,
    ) -> CacheResult<Vec<tokio_postgres::Row>> {
        let pool = self.pool_for(host, query.name())?;
        let conn = pool
            .get()
            .await
            .map_err(|e| CacheError::pool(query.name(), e.to_string()))?;

        let refs = param_refs(&params);
        match tokio::time::timeout(
            control.network_timeout,
            conn.query(query.statement(), &refs),
        )
        .await
        {
            Ok(rows) => rows.map_err(|e| CacheError::transport(query.name(), e.to_string())),
            Err(_) => Err(CacheError::timeout(query.name(), control.network_timeout)),
        }
    }

    async fn open_cursor(
        &self,
        host: ClusterHostFlags,
        control: CommandControl,
        query: &Query,
        params: QueryParams,
    ) -> CacheResult<PgShardCursor> {
        let pool = self.pool_for(host, query.name())?.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (request_tx, request_rx) = mpsc::channel(1);

        tokio::spawn(cursor_task(
            pool,
            query.clone(),
            params,
            control,
            ready_tx,
            request_rx,
        ));

        match tokio::time::timeout(control.network_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(PgShardCursor {
                requests: request_tx,
                context: query.name().to_string(),
                network_timeout: control.network_timeout,
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(CacheError::transport(
                query.name(),
                "cursor task terminated before the portal was opened",
            )),
            Err(_) => Err(CacheError::timeout(query.name(), control.network_timeout)),
        }
    }
}

enum CursorRequest {
    Fetch {
        max_rows: i32,
        reply: oneshot::Sender<CacheResult<Vec<tokio_postgres::Row>>>,
    },
    Commit {
        reply: oneshot::Sender<CacheResult<()>>,
    },
}

/// Handle to a portal held open on a dedicated connection task.
///
/// Dropping the handle without committing ends the task and rolls the
/// transaction back.
pub struct PgShardCursor {
    requests: mpsc::Sender<CursorRequest>,
    context: String,
    network_timeout: Duration,
}

#[async_trait]
impl ShardCursor for PgShardCursor {
    type Row = tokio_postgres::Row;

    async fn fetch(&mut self, max_rows: usize) -> CacheResult<Vec<tokio_postgres::Row>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(CursorRequest::Fetch {
                max_rows: max_rows.min(i32::MAX as usize) as i32,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CacheError::transport(&self.context, "cursor task terminated"))?;

        match tokio::time::timeout(self.network_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CacheError::transport(
                &self.context,
                "cursor task dropped the reply",
            )),
            Err(_) => Err(CacheError::timeout(&self.context, self.network_timeout)),
        }
    }

    async fn commit(self) -> CacheResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(CursorRequest::Commit { reply: reply_tx })
            .await
            .map_err(|_| CacheError::transport(&self.context, "cursor task terminated"))?;

        match tokio::time::timeout(self.network_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CacheError::transport(
                &self.context,
                "cursor task dropped the reply",
            )),
            Err(_) => Err(CacheError::timeout(&self.context, self.network_timeout)),
        }
    }
}

/// Owns connection, transaction and portal for one cursor's lifetime.
async fn cursor_task(
    pool: Pool,
    query: Query,
    params: QueryParams,
    control: CommandControl,
    ready: oneshot::Sender<CacheResult<()>>,
    mut requests: mpsc::Receiver<CursorRequest>,
) {
    let transport = |e: tokio_postgres::Error| CacheError::transport(query.name(), e.to_string());

    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            let _ = ready.send(Err(CacheError::pool(query.name(), e.to_string())));
            return;
        }
    };

    let open = async {
        let tx = conn.transaction().await.map_err(transport)?;
        tx.batch_execute("SET TRANSACTION READ ONLY")
            .await
            .map_err(transport)?;
        let refs = param_refs(&params);
        let portal = tx.bind(query.statement(), &refs).await.map_err(transport)?;
        Ok::<_, CacheError>((tx, portal))
    };
    let (tx, portal) = match tokio::time::timeout(control.network_timeout, open).await {
        Ok(Ok(opened)) => opened,
        Ok(Err(e)) => {
            let _ = ready.send(Err(e));
            return;
        }
        Err(_) => {
            let _ = ready.send(Err(CacheError::timeout(
                query.name(),
                control.network_timeout,
            )));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut commit_reply = None;
    while let Some(request) = requests.recv().await {
        match request {
            CursorRequest::Fetch { max_rows, reply } => {
                let result = tx
                    .query_portal(&portal, max_rows)
                    .await
                    .map_err(transport);
                let _ = reply.send(result);
            }
            CursorRequest::Commit { reply } => {
                commit_reply = Some(reply);
                break;
            }
        }
    }

    match commit_reply {
        Some(reply) => {
            let _ = reply.send(tx.commit().await.map_err(transport));
        }
        // Handle dropped mid-update: dropping the transaction rolls back.
        None => drop(tx),
    }
}

/// Shard set built from per-endpoint settings, iterated in index order.
pub struct PgClusterProvider {
    shards: Vec<Arc<PgShard>>,
}

impl PgClusterProvider {
    pub fn new(shards: Vec<PgShard>) -> Self {
        Self {
            shards: shards.into_iter().map(Arc::new).collect(),
        }
    }

    /// One single-endpoint shard per settings entry.
    pub fn from_settings(settings: &[PgShardSettings]) -> CacheResult<Self> {
        let shards = settings
            .iter()
            .map(|entry| Ok(PgShard::single(entry.create_pool()?)))
            .collect::<CacheResult<Vec<_>>>()?;
        Ok(Self::new(shards))
    }
}

impl ClusterProvider for PgClusterProvider {
    type Shard = PgShard;

    fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, shard: usize) -> Arc<PgShard> {
        Arc::clone(&self.shards[shard])
    }
}

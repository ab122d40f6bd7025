//! Database contract consumed by the update driver.
//!
//! The driver never talks to PostgreSQL directly; it goes through the traits
//! in this module. A shard is one independent database endpoint; a provider
//! yields the shard set in a deterministic order. The production
//! implementation lives in [`crate::pg`], tests supply in-memory shards.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bitflags::bitflags;
use tokio_postgres::types::ToSql;

use crate::error::{CacheResult, RowParseError};

/// A SQL statement together with the name used to attribute statistics
/// and log lines to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    statement: String,
    name: String,
}

impl Query {
    pub fn new(statement: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            name: name.into(),
        }
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

bitflags! {
    /// Replica roles a query may be routed to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClusterHostFlags: u8 {
        /// The writable primary.
        const MASTER = 0b0000_0001;
        /// A synchronous replica.
        const SYNC_SLAVE = 0b0000_0010;
        /// Any read replica.
        const SLAVE = 0b0000_0100;
    }
}

impl ClusterHostFlags {
    /// Every bit naming a host role.
    pub const ROLE_MASK: Self = Self::all();
}

/// Execution limits attached to every statement the driver issues.
///
/// The statement timeout is deliberately left off for cache loads; only the
/// network timeout bounds an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandControl {
    pub network_timeout: Duration,
    pub statement_timeout: Option<Duration>,
}

impl CommandControl {
    /// Control with only the network timeout set.
    pub fn network_only(network_timeout: Duration) -> Self {
        Self {
            network_timeout,
            statement_timeout: None,
        }
    }
}

/// Bound parameters for a statement, owned so they can cross task boundaries.
pub type QueryParams = Vec<Box<dyn ToSql + Send + Sync>>;

/// Decoding of one fetched row into the policy's raw value type.
///
/// Implemented per row representation: `tokio_postgres::Row` in production,
/// plain structs in tests.
pub trait FromRow<R>: Sized {
    fn from_row(row: &R) -> Result<Self, RowParseError>;
}

/// A server-side cursor bound to one query inside a read-only transaction.
///
/// `fetch` returns at most `max_rows` rows; a short batch signals
/// exhaustion. Dropping the cursor without `commit` rolls the transaction
/// back.
#[async_trait]
pub trait ShardCursor: Send {
    type Row: Send;

    async fn fetch(&mut self, max_rows: usize) -> CacheResult<Vec<Self::Row>>;

    async fn commit(self) -> CacheResult<()>;
}

/// One shard endpoint of the cluster.
#[async_trait]
pub trait ClusterShard: Send + Sync {
    type Row: Send;
    type Cursor: ShardCursor<Row = Self::Row>;

    /// Run the query in a single round trip and return all rows.
    async fn execute(
        &self,
        host: ClusterHostFlags,
        control: CommandControl,
        query: &Query,
        params: QueryParams,
    ) -> CacheResult<Vec<Self::Row>>;

    /// Begin a read-only transaction and open a cursor over the query.
    async fn open_cursor(
        &self,
        host: ClusterHostFlags,
        control: CommandControl,
        query: &Query,
        params: QueryParams,
    ) -> CacheResult<Self::Cursor>;
}

/// Factory yielding the shard set, iterated in index order by every update.
pub trait ClusterProvider: Send + Sync {
    type Shard: ClusterShard;

    fn shard_count(&self) -> usize;

    fn shard_for(&self, shard: usize) -> Arc<Self::Shard>;
}

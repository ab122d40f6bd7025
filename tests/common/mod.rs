//! In-memory cluster and policies shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgcache::{
    CacheError, CacheMap, CachePolicy, CacheResult, ClusterHostFlags, ClusterProvider,
    ClusterShard, CommandControl, FromRow, NoDelta, Query, QueryParams, RowParseError,
    ShardCursor,
};

/// Wire-level row as the mock database produces it.
#[derive(Debug, Clone)]
pub struct TestRow {
    pub id: i64,
    pub name: String,
    pub poisoned: bool,
}

pub fn row(id: i64, name: &str) -> TestRow {
    TestRow {
        id,
        name: name.to_string(),
        poisoned: false,
    }
}

pub fn poisoned_row(id: i64) -> TestRow {
    TestRow {
        id,
        name: String::new(),
        poisoned: true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Employee {
    pub id: i64,
    pub name: String,
}

impl FromRow<TestRow> for Employee {
    fn from_row(row: &TestRow) -> Result<Self, RowParseError> {
        if row.poisoned {
            return Err(RowParseError::new("corrupt test row"));
        }
        Ok(Employee {
            id: row.id,
            name: row.name.clone(),
        })
    }
}

/// Policy with incremental updates on a timestamp column.
pub struct EmployeePolicy;

impl CachePolicy for EmployeePolicy {
    const NAME: &'static str = "employees";
    const UPDATED_FIELD: &'static str = "updated";

    type Value = Employee;
    type Raw = Employee;
    type Key = i64;
    type Updated = DateTime<Utc>;
    type Container = CacheMap<Self>;

    fn query() -> Query {
        Query::new("SELECT id, name FROM employees", "select_employees")
    }

    fn key_of(value: &Employee) -> i64 {
        value.id
    }
}

/// Full-only policy: no updated field, so every update is a reload.
pub struct RosterPolicy;

impl CachePolicy for RosterPolicy {
    const NAME: &'static str = "roster";
    const UPDATED_FIELD: &'static str = "";

    type Value = Employee;
    type Raw = Employee;
    type Key = i64;
    type Updated = NoDelta;
    type Container = CacheMap<Self>;

    fn query() -> Query {
        Query::new("SELECT id, name FROM t", "select_roster")
    }

    fn key_of(value: &Employee) -> i64 {
        value.id
    }
}

/// Wire shape for orders: the status arrives as text.
#[derive(Debug, Clone)]
pub struct RawOrder {
    pub id: i64,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Shipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: i64,
    pub status: OrderStatus,
}

impl FromRow<TestRow> for RawOrder {
    fn from_row(row: &TestRow) -> Result<Self, RowParseError> {
        if row.poisoned {
            return Err(RowParseError::new("corrupt test row"));
        }
        Ok(RawOrder {
            id: row.id,
            status: row.name.clone(),
        })
    }
}

impl TryFrom<RawOrder> for Order {
    type Error = RowParseError;

    fn try_from(raw: RawOrder) -> Result<Self, RowParseError> {
        let status = match raw.status.as_str() {
            "pending" => OrderStatus::Pending,
            "shipped" => OrderStatus::Shipped,
            other => {
                return Err(RowParseError::new(format!(
                    "unknown order status '{other}'"
                )))
            }
        };
        Ok(Order {
            id: raw.id,
            status,
        })
    }
}

/// Policy whose raw row shape differs from the cached value and whose
/// conversion can fail.
pub struct OrderPolicy;

impl CachePolicy for OrderPolicy {
    const NAME: &'static str = "orders";
    const UPDATED_FIELD: &'static str = "";

    type Value = Order;
    type Raw = RawOrder;
    type Key = i64;
    type Updated = NoDelta;
    type Container = CacheMap<Self>;

    fn query() -> Query {
        Query::new("SELECT id, status FROM orders", "select_orders")
    }

    fn key_of(value: &Order) -> i64 {
        value.id
    }
}

/// One statement execution or cursor opening observed by a mock shard.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub statement: String,
    pub param_count: usize,
    pub chunked: bool,
}

/// Mock shard replaying queued result sets in order.
#[derive(Default)]
pub struct MockShard {
    results: Mutex<VecDeque<CacheResult<Vec<TestRow>>>>,
    pub calls: Mutex<Vec<RecordedCall>>,
    pub fetch_calls: Arc<AtomicUsize>,
    pub commits: Arc<AtomicUsize>,
    pub cursors_opened: AtomicUsize,
}

impl MockShard {
    pub fn push_rows(&self, rows: Vec<TestRow>) {
        self.results.lock().unwrap().push_back(Ok(rows));
    }

    pub fn push_error(&self, reason: &str) {
        self.results
            .lock()
            .unwrap()
            .push_back(Err(CacheError::transport("mock", reason)));
    }

    fn next_result(&self) -> CacheResult<Vec<TestRow>> {
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn record(&self, query: &Query, params: &QueryParams, chunked: bool) {
        self.calls.lock().unwrap().push(RecordedCall {
            statement: query.statement().to_string(),
            param_count: params.len(),
            chunked,
        });
    }
}

#[async_trait]
impl ClusterShard for MockShard {
    type Row = TestRow;
    type Cursor = MockCursor;

    async fn execute(
        &self,
        _host: ClusterHostFlags,
        _control: CommandControl,
        query: &Query,
        params: QueryParams,
    ) -> CacheResult<Vec<TestRow>> {
        self.record(query, &params, false);
        self.next_result()
    }

    async fn open_cursor(
        &self,
        _host: ClusterHostFlags,
        _control: CommandControl,
        query: &Query,
        params: QueryParams,
    ) -> CacheResult<MockCursor> {
        self.record(query, &params, true);
        self.cursors_opened.fetch_add(1, Ordering::SeqCst);
        let rows = self.next_result()?;
        Ok(MockCursor {
            remaining: rows.into(),
            fetch_calls: Arc::clone(&self.fetch_calls),
            commits: Arc::clone(&self.commits),
        })
    }
}

pub struct MockCursor {
    remaining: VecDeque<TestRow>,
    fetch_calls: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
}

#[async_trait]
impl ShardCursor for MockCursor {
    type Row = TestRow;

    async fn fetch(&mut self, max_rows: usize) -> CacheResult<Vec<TestRow>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let take = max_rows.min(self.remaining.len());
        Ok(self.remaining.drain(..take).collect())
    }

    async fn commit(self) -> CacheResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockProvider {
    shards: Vec<Arc<MockShard>>,
}

impl MockProvider {
    pub fn new(shard_count: usize) -> Self {
        Self {
            shards: (0..shard_count)
                .map(|_| Arc::new(MockShard::default()))
                .collect(),
        }
    }

    pub fn shard(&self, index: usize) -> Arc<MockShard> {
        Arc::clone(&self.shards[index])
    }
}

impl ClusterProvider for MockProvider {
    type Shard = MockShard;

    fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, shard: usize) -> Arc<MockShard> {
        Arc::clone(&self.shards[shard])
    }
}

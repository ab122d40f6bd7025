//! Cache policy contract.
//!
//! A policy describes one cached entity: the query that materialises it,
//! the decoded value type, how to key it, and which column drives
//! incremental updates. Most of the contract is enforced by the compiler
//! through the trait's associated items; the remaining checks run once at
//! cache construction and fail before the first update.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

use crate::cluster::{ClusterHostFlags, Query};
use crate::container::CacheContainer;
use crate::error::{CacheError, CacheResult, RowParseError};

/// Value bound to the delta query's `$1` placeholder.
///
/// Timestamp types derive the bound from the scheduler-supplied fallback;
/// revision-style types return `None` here and must be produced by
/// [`CachePolicy::last_known_updated`] instead.
pub trait DeltaBound: ToSql + Send + Sync {
    fn from_last_update(fallback: DateTime<Utc>) -> Option<Self>
    where
        Self: Sized;
}

impl DeltaBound for DateTime<Utc> {
    fn from_last_update(fallback: DateTime<Utc>) -> Option<Self> {
        Some(fallback)
    }
}

impl DeltaBound for NaiveDateTime {
    fn from_last_update(fallback: DateTime<Utc>) -> Option<Self> {
        Some(fallback.naive_utc())
    }
}

/// Placeholder bound type for policies without incremental updates.
///
/// Such policies never run a delta query, so the value is never bound;
/// the `ToSql` impl exists only to satisfy the trait bound and refuses
/// to serialise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoDelta;

impl ToSql for NoDelta {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Err("a full-only cache policy has no delta bound".into())
    }

    fn accepts(_ty: &Type) -> bool {
        false
    }

    to_sql_checked!();
}

impl DeltaBound for NoDelta {
    fn from_last_update(_fallback: DateTime<Utc>) -> Option<Self> {
        None
    }
}

/// Description of one cached entity.
///
/// # Example
///
/// ```ignore
/// struct EmployeePolicy;
///
/// impl CachePolicy for EmployeePolicy {
///     const NAME: &'static str = "employees";
///     const UPDATED_FIELD: &'static str = "updated";
///
///     type Value = Employee;
///     type Raw = Employee;
///     type Key = i64;
///     type Updated = DateTime<Utc>;
///     type Container = CacheMap<Self>;
///
///     fn query() -> Query {
///         Query::new("SELECT id, name, updated FROM employees", "select_employees")
///     }
///
///     fn key_of(value: &Employee) -> i64 {
///         value.id
///     }
/// }
/// ```
pub trait CachePolicy: Send + Sync + 'static {
    /// Cache name; also the component key. Must be non-empty.
    const NAME: &'static str;

    /// Column driving incremental updates. The empty string disables them.
    const UPDATED_FIELD: &'static str;

    /// Extra predicate appended to the base query.
    const WHERE_CLAUSE: Option<&'static str> = None;

    /// Replica roles the cache loads from.
    const HOST_FLAGS: ClusterHostFlags = ClusterHostFlags::SLAVE;

    /// Decoded row type stored in the cache.
    type Value: Send + Sync + 'static;

    /// On-wire row shape, converted into [`CachePolicy::Value`] after
    /// decoding. The conversion may fail; a failed row is counted as a
    /// parse failure and skipped, exactly like a failed decode. Set
    /// `type Raw = Self::Value` when no conversion is needed (the identity
    /// conversion is infallible).
    type Raw: TryInto<Self::Value, Error: Into<RowParseError>> + Send;

    /// Key extracted from a value via [`CachePolicy::key_of`].
    type Key: Clone + Send + Sync + 'static;

    /// Type of the delta bound. Use [`NoDelta`] for full-only policies.
    type Updated: DeltaBound + 'static;

    /// Snapshot container; [`crate::CacheMap`] unless the policy needs
    /// ordering or a custom structure.
    type Container: CacheContainer<Self::Key, Self::Value>;

    /// The base `SELECT` statement and its statistics name.
    fn query() -> Query;

    /// Extract the key of a value.
    fn key_of(value: &Self::Value) -> Self::Key;

    /// High-water mark computed from the current snapshot instead of from
    /// wall-clock time. The default defers to
    /// `last_update - update_correction`.
    ///
    /// An override must keep answering `Some` for every container state
    /// once it answers `Some` for the empty container: construction-time
    /// validation relies on that probe, and the update driver treats a
    /// later `None` from both bound sources as a contract violation.
    fn last_known_updated(container: &Self::Container) -> Option<Self::Updated> {
        let _ = container;
        None
    }

    /// Whether the policy participates in incremental updates.
    fn wants_incremental_updates() -> bool {
        !Self::UPDATED_FIELD.is_empty()
    }
}

/// Construction-time validation of everything the compiler cannot reject.
pub(crate) fn validate<P: CachePolicy>() -> CacheResult<()> {
    if P::NAME.trim().is_empty() {
        return Err(CacheError::policy(
            "<unnamed>",
            "policy name must not be empty",
        ));
    }
    let query = P::query();
    if query.statement().trim().is_empty() {
        return Err(CacheError::policy(
            P::NAME,
            "policy query statement must not be empty",
        ));
    }
    if let Some(predicate) = P::WHERE_CLAUSE {
        if predicate.trim().is_empty() {
            return Err(CacheError::policy(
                P::NAME,
                "where fragment must not be empty when provided",
            ));
        }
    }
    if P::HOST_FLAGS.is_empty() || !ClusterHostFlags::ROLE_MASK.contains(P::HOST_FLAGS) {
        return Err(CacheError::policy(
            P::NAME,
            "cluster host flags must name at least one valid replica role",
        ));
    }
    if P::wants_incremental_updates() {
        let timestamp_bound = P::Updated::from_last_update(DateTime::UNIX_EPOCH).is_some();
        let custom_bound = P::last_known_updated(&P::Container::default()).is_some();
        if !timestamp_bound && !custom_bound {
            return Err(CacheError::policy(
                P::NAME,
                "updated field type is not a timestamp and the policy does not \
                 provide last_known_updated",
            ));
        }
    }
    Ok(())
}

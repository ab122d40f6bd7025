//! Composition of the full and delta statements from a policy.
//!
//! Both strings are composed once per cache instance. The policy-supplied
//! query name is carried through so statistics and logs attribute to it.

use crate::cluster::Query;
use crate::policy::CachePolicy;

/// The statement for a full reload: the base query, with the policy's
/// predicate appended when present.
pub(crate) fn full_query<P: CachePolicy>() -> Query {
    let base = P::query();
    match P::WHERE_CLAUSE {
        Some(predicate) => Query::new(
            format!("{} where {}", base.statement(), predicate),
            base.name(),
        ),
        None => base,
    }
}

/// The statement for an incremental update: the full statement with the
/// updated-field bound appended as a conjunction. Falls back to the full
/// statement when the policy has no updated field.
pub(crate) fn delta_query<P: CachePolicy>() -> Query {
    if !P::wants_incremental_updates() {
        return full_query::<P>();
    }
    let base = P::query();
    match P::WHERE_CLAUSE {
        Some(predicate) => Query::new(
            format!(
                "{} where ({}) and {} >= $1",
                base.statement(),
                predicate,
                P::UPDATED_FIELD
            ),
            base.name(),
        ),
        None => Query::new(
            format!("{} where {} >= $1", base.statement(), P::UPDATED_FIELD),
            base.name(),
        ),
    }
}

//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// Logical timestamp - caller-supplied integer, NOT a wall clock.
///
/// # Constraints:
/// - Supplied by the caller on every operation
/// - NOT required to be monotone across calls; the ledger keeps its own
///   high-water mark (see `Ledger`)
/// - Equal values are permitted and are ordered by arrival
pub type Timestamp = i64;

/// Monetary amount in minor currency units (e.g. cents).
///
/// Balances and outgoing totals are always non-negative, so the unsigned
/// type encodes the invariant directly. All arithmetic on amounts is
/// checked (see [`crate::account::Account`]).
pub type Amount = u64;

/// Signed balance delta recorded in the temporal index.
///
/// Deposits and merge credits are positive, debits negative, creation
/// sentinels zero.
pub type Delta = i64;

/// Scheduled-payment ordinal - process-wide, strictly increasing.
///
/// Allocated at schedule time irrespective of account, so two payments
/// sharing a due time drain in schedule order.
pub type PaymentOrdinal = u64;

/// Account ID - caller-supplied string identity.
///
/// Identity may be recycled: a merged-away id can be re-created later and
/// then refers to a fresh account (see [`crate::history::TemporalIndex`]).
pub type AccountId = String;

/// Payment ID - `"payment<ordinal>"`, e.g. `payment1`.
pub type PaymentId = String;

/// Prefix for generated payment ids.
pub const PAYMENT_ID_PREFIX: &str = "payment";

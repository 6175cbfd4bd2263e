//! Temporal index - per-account event history, lifetimes, and merge edges
//!
//! Answers "what was the balance of `id` at instant `t`?" for accounts that
//! may have been merged away or re-created since. Three structures back this:
//!
//! 1. **Events** - append-only `(ts, delta)` per id. Creation appends a
//!    `(ts, 0)` sentinel. Event timestamps are NOT assumed sorted: callers
//!    may submit non-monotone timestamps, and drained payments record their
//!    due time rather than the draining operation's time.
//! 2. **Lifetimes** - ordered `[created_ts, closed_ts)` intervals per id.
//!    Each lifetime remembers the index of its first event, so a lifetime
//!    re-opened at the exact instant the previous one closed still owns a
//!    disjoint slice of the event log.
//! 3. **Merge edges** - `child -> (parent, merge_ts)`, cleared when the
//!    child id is re-created.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::core_types::{AccountId, Delta, Timestamp};

/// One recorded balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEvent {
    pub ts: Timestamp,
    pub delta: Delta,
}

/// One interval during which an id referred to a live account.
///
/// `closed_ts == None` means the lifetime is still open. `first_event`
/// indexes into the id's event log; the lifetime owns events from there up
/// to the next lifetime's `first_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lifetime {
    created_ts: Timestamp,
    closed_ts: Option<Timestamp>,
    first_event: usize,
}

/// Record that a child id's funds were absorbed by a parent at `merge_ts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeEdge {
    pub parent: AccountId,
    pub merge_ts: Timestamp,
}

/// Append-only history of every account id the ledger has ever seen.
#[derive(Debug, Default)]
pub struct TemporalIndex {
    events: FxHashMap<AccountId, Vec<BalanceEvent>>,
    lifetimes: FxHashMap<AccountId, Vec<Lifetime>>,
    merged_into: FxHashMap<AccountId, MergeEdge>,
}

impl TemporalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new lifetime for `id` at `ts`.
    ///
    /// Appends the creation sentinel `(ts, 0)` and clears any merge edge
    /// left over from a previous lifetime of the same id.
    pub fn open_lifetime(&mut self, id: &str, ts: Timestamp) {
        let events = self.events.entry(id.to_string()).or_default();
        let first_event = events.len();
        events.push(BalanceEvent { ts, delta: 0 });
        self.lifetimes
            .entry(id.to_string())
            .or_default()
            .push(Lifetime {
                created_ts: ts,
                closed_ts: None,
                first_event,
            });
        self.merged_into.remove(id);
    }

    /// Append a balance change for `id`.
    ///
    /// The id must have an open lifetime; events are never recorded for
    /// extinct accounts.
    pub fn append(&mut self, id: &str, ts: Timestamp, delta: Delta) {
        self.events
            .entry(id.to_string())
            .or_default()
            .push(BalanceEvent { ts, delta });
    }

    /// Close `id`'s open lifetime at `merge_ts` and record the merge edge.
    pub fn close_lifetime(&mut self, id: &str, parent: &str, merge_ts: Timestamp) {
        if let Some(lifetimes) = self.lifetimes.get_mut(id) {
            if let Some(open) = lifetimes.last_mut() {
                if open.closed_ts.is_none() {
                    open.closed_ts = Some(merge_ts);
                }
            }
        }
        self.merged_into.insert(
            id.to_string(),
            MergeEdge {
                parent: parent.to_string(),
                merge_ts,
            },
        );
    }

    /// Active merge edge for `id`, if any.
    pub fn merge_edge(&self, id: &str) -> Option<&MergeEdge> {
        self.merged_into.get(id)
    }

    /// Balance of `id` at instant `t_at`, or None if no lifetime covers it.
    ///
    /// The covering lifetime is the one with maximal `created_ts <= t_at`.
    /// A lifetime closed at `c` still answers queries with `t_at == c`
    /// (the post-merge value, 0); strictly later instants see the id as
    /// non-existent until a re-creation.
    ///
    /// The sum is signed: callers with non-monotone clocks can backdate a
    /// deposit below a debit that was validated against it, and the
    /// reconstruction at instants in between then dips negative. Live
    /// balances never do.
    pub fn balance_at(&self, id: &str, t_at: Timestamp) -> Option<Delta> {
        let lifetimes = self.lifetimes.get(id)?;
        let pos = lifetimes
            .iter()
            .rposition(|lt| lt.created_ts <= t_at)?;
        let lifetime = &lifetimes[pos];
        if let Some(closed) = lifetime.closed_ts {
            if t_at > closed {
                return None;
            }
        }

        let events = self.events.get(id)?;
        let end = lifetimes
            .get(pos + 1)
            .map(|next| next.first_event)
            .unwrap_or(events.len());
        let sum = events[lifetime.first_event..end]
            .iter()
            .filter(|e| e.ts <= t_at)
            .map(|e| e.delta)
            .sum();
        Some(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_at_sums_prefix() {
        let mut idx = TemporalIndex::new();
        idx.open_lifetime("a", 1);
        idx.append("a", 2, 100);
        idx.append("a", 5, -30);

        assert_eq!(idx.balance_at("a", 0), None); // before creation
        assert_eq!(idx.balance_at("a", 1), Some(0)); // sentinel only
        assert_eq!(idx.balance_at("a", 2), Some(100));
        assert_eq!(idx.balance_at("a", 4), Some(100));
        assert_eq!(idx.balance_at("a", 5), Some(70));
        assert_eq!(idx.balance_at("a", 1000), Some(70));
    }

    #[test]
    fn test_unknown_id() {
        let idx = TemporalIndex::new();
        assert_eq!(idx.balance_at("ghost", 10), None);
    }

    #[test]
    fn test_closed_lifetime_boundary() {
        let mut idx = TemporalIndex::new();
        idx.open_lifetime("b", 1);
        idx.append("b", 2, 50);
        // merge at ts=7 drains the account to zero
        idx.append("b", 7, -50);
        idx.close_lifetime("b", "a", 7);

        assert_eq!(idx.balance_at("b", 6), Some(50)); // pre-merge history
        assert_eq!(idx.balance_at("b", 7), Some(0)); // at the merge instant
        assert_eq!(idx.balance_at("b", 8), None); // gone afterwards

        let edge = idx.merge_edge("b").expect("edge recorded");
        assert_eq!(edge.parent, "a");
        assert_eq!(edge.merge_ts, 7);
    }

    #[test]
    fn test_recreation_does_not_leak_events() {
        let mut idx = TemporalIndex::new();
        idx.open_lifetime("c", 1);
        idx.append("c", 3, 200);
        idx.append("c", 7, -200);
        idx.close_lifetime("c", "a", 7);

        // Re-created at the exact merge instant: same timestamp, new life.
        idx.open_lifetime("c", 7);
        idx.append("c", 9, 10);

        assert_eq!(idx.balance_at("c", 7), Some(0)); // new lifetime wins
        assert_eq!(idx.balance_at("c", 9), Some(10));
        assert_eq!(idx.balance_at("c", 6), Some(200)); // old lifetime intact
        assert!(idx.merge_edge("c").is_none()); // edge cleared on re-create
    }

    #[test]
    fn test_gap_between_lifetimes() {
        let mut idx = TemporalIndex::new();
        idx.open_lifetime("d", 1);
        idx.append("d", 2, 5);
        idx.append("d", 4, -5);
        idx.close_lifetime("d", "a", 4);
        idx.open_lifetime("d", 10);

        assert_eq!(idx.balance_at("d", 6), None); // inside the gap
        assert_eq!(idx.balance_at("d", 10), Some(0));
    }

    #[test]
    fn test_unsorted_event_timestamps() {
        // Non-monotone caller timestamps: a deposit recorded at ts=3 after
        // one at ts=10 must still count for queries at t_at >= 3.
        let mut idx = TemporalIndex::new();
        idx.open_lifetime("e", 0);
        idx.append("e", 10, 100);
        idx.append("e", 3, 40);

        assert_eq!(idx.balance_at("e", 5), Some(40));
        assert_eq!(idx.balance_at("e", 10), Some(140));
    }

    #[test]
    fn test_backdated_funding_exposes_signed_dip() {
        // A debit validated against funds whose event carries a LATER
        // timestamp: the reconstruction between the two instants is
        // negative by construction, and reported as such.
        let mut idx = TemporalIndex::new();
        idx.open_lifetime("f", 0);
        idx.append("f", 20, 100);
        idx.append("f", 5, -100); // spent at logical time 5, funded at 20

        assert_eq!(idx.balance_at("f", 10), Some(-100));
        assert_eq!(idx.balance_at("f", 20), Some(0));
    }
}

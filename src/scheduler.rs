//! Payment scheduler - logical-time queue of due-at payments
//!
//! Payments are keyed by `(due_ts, creation_ordinal)`: an ordered map from
//! due time to a FIFO of payment ids. Ordinals are allocated process-wide
//! and strictly increase, so FIFO order within a bucket IS ordinal order,
//! and buckets drain in due-time order. The drain itself lives in the
//! ledger (it debits accounts); this module owns queue structure and
//! payment records.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::core_types::{
    AccountId, Amount, PaymentId, PaymentOrdinal, Timestamp, PAYMENT_ID_PREFIX,
};

/// Lifecycle of a scheduled payment. Exactly one state holds at a time;
/// `Processed` and `Canceled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentState {
    Pending,
    Processed,
    Canceled,
}

/// A scheduled future debit against one account.
#[derive(Debug, Clone)]
pub struct ScheduledPayment {
    /// Current owner. Rewritten when the owning account is merged away,
    /// so this always names the account the debit will hit.
    pub account_id: AccountId,
    pub amount: Amount,
    pub due_ts: Timestamp,
    pub ordinal: PaymentOrdinal,
    pub state: PaymentState,
}

impl ScheduledPayment {
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state == PaymentState::Pending
    }
}

/// Queue of pending payments plus the full payment record map.
#[derive(Debug, Default)]
pub struct PaymentScheduler {
    /// due_ts -> payment ids in creation order (FIFO per bucket).
    due: BTreeMap<Timestamp, Vec<PaymentId>>,
    payments: FxHashMap<PaymentId, ScheduledPayment>,
    next_ordinal: PaymentOrdinal,
}

impl PaymentScheduler {
    pub fn new() -> Self {
        Self {
            due: BTreeMap::new(),
            payments: FxHashMap::default(),
            next_ordinal: 1,
        }
    }

    /// Enqueue a new payment due at `ts + delay`; returns its id.
    ///
    /// The payment is never executed here, even with `delay == 0`; it
    /// becomes due at the next drain whose watermark reaches its due time.
    pub fn schedule(
        &mut self,
        ts: Timestamp,
        account_id: &str,
        amount: Amount,
        delay: u64,
    ) -> PaymentId {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;

        let due_ts = ts.saturating_add(delay as Timestamp);
        let payment_id = format!("{PAYMENT_ID_PREFIX}{ordinal}");
        self.payments.insert(
            payment_id.clone(),
            ScheduledPayment {
                account_id: account_id.to_string(),
                amount,
                due_ts,
                ordinal,
                state: PaymentState::Pending,
            },
        );
        self.due.entry(due_ts).or_default().push(payment_id.clone());
        payment_id
    }

    pub fn payment(&self, payment_id: &str) -> Option<&ScheduledPayment> {
        self.payments.get(payment_id)
    }

    pub fn payment_mut(&mut self, payment_id: &str) -> Option<&mut ScheduledPayment> {
        self.payments.get_mut(payment_id)
    }

    /// True when some queued bucket is due at or before `now`.
    pub fn has_due(&self, now: Timestamp) -> bool {
        self.due.keys().next().map(|&ts| ts <= now).unwrap_or(false)
    }

    /// Remove and return the earliest bucket due at or before `now`.
    ///
    /// Canceled payments still occupy their slot here; the drain skips
    /// them when it walks the bucket.
    pub fn pop_due_bucket(&mut self, now: Timestamp) -> Option<Vec<PaymentId>> {
        let &due_ts = self.due.keys().next()?;
        if due_ts > now {
            return None;
        }
        self.due.remove(&due_ts)
    }

    /// Reassign every still-pending payment of `from` to `to` (merge).
    pub fn rehome(&mut self, from: &str, to: &str) {
        for payment in self.payments.values_mut() {
            if payment.is_pending() && payment.account_id == from {
                payment.account_id = to.to_string();
            }
        }
    }

    /// Number of payments still pending (diagnostics and tests).
    pub fn pending_count(&self) -> usize {
        self.payments.values().filter(|p| p.is_pending()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_and_ordinals() {
        let mut sched = PaymentScheduler::new();
        assert_eq!(sched.schedule(5, "a", 30, 10), "payment1");
        assert_eq!(sched.schedule(5, "b", 10, 0), "payment2");
        assert_eq!(sched.payment("payment1").unwrap().due_ts, 15);
        assert_eq!(sched.payment("payment2").unwrap().due_ts, 5);
    }

    #[test]
    fn test_buckets_pop_in_due_order() {
        let mut sched = PaymentScheduler::new();
        sched.schedule(0, "a", 1, 20); // payment1, due 20
        sched.schedule(0, "a", 2, 10); // payment2, due 10
        sched.schedule(0, "a", 3, 20); // payment3, due 20

        assert!(!sched.has_due(9));
        assert!(sched.has_due(10));

        assert_eq!(sched.pop_due_bucket(25).unwrap(), vec!["payment2"]);
        // Same bucket keeps creation order
        assert_eq!(
            sched.pop_due_bucket(25).unwrap(),
            vec!["payment1", "payment3"]
        );
        assert!(sched.pop_due_bucket(25).is_none());
    }

    #[test]
    fn test_rehome_only_pending() {
        let mut sched = PaymentScheduler::new();
        sched.schedule(0, "b", 1, 5);
        sched.schedule(0, "b", 2, 6);
        sched.payment_mut("payment1").unwrap().state = PaymentState::Processed;

        sched.rehome("b", "a");
        assert_eq!(sched.payment("payment1").unwrap().account_id, "b");
        assert_eq!(sched.payment("payment2").unwrap().account_id, "a");
    }

    #[test]
    fn test_delay_zero_not_due_until_queried() {
        let mut sched = PaymentScheduler::new();
        sched.schedule(7, "a", 1, 0);
        // Due at 7; a drain at 7 picks it up, but scheduling alone did not
        // execute anything.
        assert_eq!(sched.pending_count(), 1);
        assert!(sched.has_due(7));
    }
}

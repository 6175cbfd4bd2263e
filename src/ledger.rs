//! Ledger - the single-threaded banking core
//!
//! The authoritative state machine behind every operation. Designed for
//! SINGLE-THREADED execution (the [`crate::bank::Bank`] envelope provides
//! locking), which gives:
//! - Natural atomicity inside one operation
//! - Deterministic drain order
//! - No partial state on failure paths
//!
//! # Operation shape
//!
//! Every operation runs the same preamble: advance the timestamp watermark
//! and drain all scheduled payments whose due time it covers. Only then are
//! the operation's own preconditions checked and its mutation applied. The
//! drain compares against the HIGHEST timestamp ever observed, not the raw
//! argument, so callers with non-monotone clocks cannot strand a payment
//! past-due.
//!
//! # Data flow
//!
//! ```text
//! op(ts, ...) → drain_until(max(last_seen, ts)) → precondition checks
//!                     ↓                                ↓
//!              due payments debited          balances + temporal index
//!                     ↓                                ↓
//!              journal (post-commit)          journal (post-commit)
//! ```

use rustc_hash::FxHashMap;

use crate::account::Account;
use crate::core_types::{AccountId, Amount, Delta, PaymentId, Timestamp};
use crate::history::TemporalIndex;
use crate::journal::{JournalRecord, JournalWriter};
use crate::scheduler::{PaymentScheduler, PaymentState};

const TARGET_LEDGER: &str = "CHRONO::LEDGER";

/// In-memory banking ledger with scheduled payments, merges, and
/// point-in-time balance queries.
pub struct Ledger {
    /// Active accounts only; a merged-away id is absent until re-created.
    accounts: FxHashMap<AccountId, Account>,
    index: TemporalIndex,
    scheduler: PaymentScheduler,
    /// Highest timestamp ever observed across all operations.
    last_seen_ts: Timestamp,
    journal: Option<JournalWriter>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            accounts: FxHashMap::default(),
            index: TemporalIndex::new(),
            scheduler: PaymentScheduler::new(),
            last_seen_ts: Timestamp::MIN,
            journal: None,
        }
    }

    /// Ledger that streams every committed transition into `journal`.
    pub fn with_journal(journal: JournalWriter) -> Self {
        let mut ledger = Self::new();
        ledger.journal = Some(journal);
        ledger
    }

    // ============================================================
    // DRAIN PREAMBLE
    // ============================================================

    /// Advance the watermark to cover `ts` and process every scheduled
    /// payment due at or before it, in `(due_ts, ordinal)` order.
    ///
    /// Idempotent for a fixed watermark: a second call with the same
    /// timestamp processes nothing.
    fn drain_until(&mut self, ts: Timestamp) {
        if ts > self.last_seen_ts {
            self.last_seen_ts = ts;
        }
        let now = self.last_seen_ts;
        while let Some(bucket) = self.scheduler.pop_due_bucket(now) {
            for payment_id in bucket {
                self.run_due_payment(&payment_id);
            }
        }
    }

    /// Execute one due payment: debit the current owner if funds allow,
    /// consume the payment either way.
    fn run_due_payment(&mut self, payment_id: &str) {
        let Some(payment) = self.scheduler.payment_mut(payment_id) else {
            return;
        };
        // Canceled payments are terminal; their queue slot just drops.
        if !payment.is_pending() {
            return;
        }
        payment.state = PaymentState::Processed;
        let owner = payment.account_id.clone();
        let amount = payment.amount;
        let due_ts = payment.due_ts;

        let debited = match self.accounts.get_mut(&owner) {
            Some(account) => match account.debit_outgoing(amount) {
                Ok(balance_after) => {
                    // The event carries the DUE time, not the draining
                    // operation's time: history must show the debit when
                    // it fell due.
                    self.index.append(&owner, due_ts, -(amount as Delta));
                    if let Some(journal) = self.journal.as_mut() {
                        journal.append(&JournalRecord::BalanceChanged {
                            account: owner.clone(),
                            ts: due_ts,
                            delta: -(amount as Delta),
                            balance_after,
                        });
                    }
                    true
                }
                // Insufficient funds: the payment is consumed, not retried.
                Err(_) => false,
            },
            // Owner extinct (merged away with no re-home target left).
            None => false,
        };
        tracing::debug!(
            target: TARGET_LEDGER,
            payment = payment_id,
            account = %owner,
            debited,
            "scheduled payment drained"
        );
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&JournalRecord::PaymentProcessed {
                payment: payment_id.to_string(),
                account: owner,
                debited,
            });
        }
    }

    // ============================================================
    // OPERATIONS
    // ============================================================

    /// Open an account. False if an active account with this id exists.
    ///
    /// A previously merged-away id may be re-created; the new lifetime
    /// starts fresh at balance 0 and any stale merge edge is cleared.
    pub fn create_account(&mut self, ts: Timestamp, id: &str) -> bool {
        self.drain_until(ts);
        if self.accounts.contains_key(id) {
            return false;
        }
        self.accounts.insert(id.to_string(), Account::default());
        self.index.open_lifetime(id, ts);
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&JournalRecord::AccountOpened {
                account: id.to_string(),
                ts,
            });
        }
        true
    }

    /// Add funds. None for a zero amount or an unknown/inactive account.
    /// Deposits never count toward the outgoing total.
    pub fn deposit(&mut self, ts: Timestamp, id: &str, amount: Amount) -> Option<Amount> {
        self.drain_until(ts);
        if amount == 0 {
            return None;
        }
        let account = self.accounts.get_mut(id)?;
        let balance_after = account.credit(amount).ok()?;
        self.index.append(id, ts, amount as Delta);
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&JournalRecord::BalanceChanged {
                account: id.to_string(),
                ts,
                delta: amount as Delta,
                balance_after,
            });
        }
        Some(balance_after)
    }

    /// Move funds between two distinct active accounts. Returns the new
    /// source balance, or None with no state change on any failed check.
    pub fn transfer(
        &mut self,
        ts: Timestamp,
        src: &str,
        dst: &str,
        amount: Amount,
    ) -> Option<Amount> {
        self.drain_until(ts);
        if src == dst || amount == 0 {
            return None;
        }
        // Copy-out / write-back keeps the failure paths free of partial
        // mutation: nothing is stored until both sides validated.
        let mut src_account = *self.accounts.get(src)?;
        let mut dst_account = *self.accounts.get(dst)?;
        let src_after = src_account.debit_outgoing(amount).ok()?;
        let dst_after = dst_account.credit(amount).ok()?;
        self.accounts.insert(src.to_string(), src_account);
        self.accounts.insert(dst.to_string(), dst_account);

        self.index.append(src, ts, -(amount as Delta));
        self.index.append(dst, ts, amount as Delta);
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&JournalRecord::BalanceChanged {
                account: src.to_string(),
                ts,
                delta: -(amount as Delta),
                balance_after: src_after,
            });
            journal.append(&JournalRecord::BalanceChanged {
                account: dst.to_string(),
                ts,
                delta: amount as Delta,
                balance_after: dst_after,
            });
        }
        Some(src_after)
    }

    /// Enqueue a future debit of `amount` against `id`, due at
    /// `ts + delay`. Returns the generated payment id.
    ///
    /// Never executes at schedule time, even with `delay == 0`: the
    /// payment fires during the preamble of the next operation whose
    /// watermark reaches its due time.
    pub fn schedule_payment(
        &mut self,
        ts: Timestamp,
        id: &str,
        amount: Amount,
        delay: u64,
    ) -> Option<PaymentId> {
        self.drain_until(ts);
        if amount == 0 || !self.accounts.contains_key(id) {
            return None;
        }
        let payment_id = self.scheduler.schedule(ts, id, amount, delay);
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&JournalRecord::PaymentScheduled {
                payment: payment_id.clone(),
                account: id.to_string(),
                amount,
                due_ts: ts.saturating_add(delay as Timestamp),
            });
        }
        Some(payment_id)
    }

    /// Cancel a pending payment owned by `id`.
    ///
    /// The drain preamble runs FIRST, so a payment due at exactly `ts` is
    /// processed before cancellation is considered and the cancel returns
    /// false. Ownership is checked against the payment's current account,
    /// i.e. after any re-homing merges.
    pub fn cancel_payment(&mut self, ts: Timestamp, id: &str, payment_id: &str) -> bool {
        self.drain_until(ts);
        let Some(payment) = self.scheduler.payment_mut(payment_id) else {
            return false;
        };
        if !payment.is_pending() || payment.account_id != id {
            return false;
        }
        payment.state = PaymentState::Canceled;
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&JournalRecord::PaymentCanceled {
                payment: payment_id.to_string(),
            });
        }
        true
    }

    /// Merge `b` into `a`: `a` absorbs `b`'s balance, outgoing total, and
    /// pending payments; `b`'s lifetime closes at `ts`.
    pub fn merge_accounts(&mut self, ts: Timestamp, a: &str, b: &str) -> bool {
        self.drain_until(ts);
        if a == b {
            return false;
        }
        let (Some(&parent), Some(&child)) = (self.accounts.get(a), self.accounts.get(b)) else {
            return false;
        };
        let mut parent_after = parent;
        if parent_after.absorb(&child).is_err() {
            return false;
        }
        let moved = child.balance();

        self.accounts.insert(a.to_string(), parent_after);
        self.accounts.remove(b);
        self.index.append(a, ts, moved as Delta);
        self.index.append(b, ts, -(moved as Delta));
        self.scheduler.rehome(b, a);
        self.index.close_lifetime(b, a, ts);

        tracing::debug!(target: TARGET_LEDGER, parent = a, child = b, moved, "accounts merged");
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&JournalRecord::BalanceChanged {
                account: a.to_string(),
                ts,
                delta: moved as Delta,
                balance_after: parent_after.balance(),
            });
            journal.append(&JournalRecord::BalanceChanged {
                account: b.to_string(),
                ts,
                delta: -(moved as Delta),
                balance_after: 0,
            });
            journal.append(&JournalRecord::AccountsMerged {
                parent: a.to_string(),
                child: b.to_string(),
                ts,
            });
        }
        true
    }

    /// Balance of `id` at instant `t_at`, reconstructed from history.
    /// None when no lifetime of `id` covers `t_at`. Signed: see
    /// [`TemporalIndex::balance_at`].
    pub fn get_balance(&mut self, ts: Timestamp, id: &str, t_at: Timestamp) -> Option<Delta> {
        self.drain_until(ts);
        self.index.balance_at(id, t_at)
    }

    /// The `n` largest active accounts by outgoing total, formatted as
    /// `"<id>(<outgoing_total>)"`. Ties break by id ascending; `n <= 0`
    /// yields an empty list.
    pub fn top_spenders(&mut self, ts: Timestamp, n: i64) -> Vec<String> {
        self.drain_until(ts);
        self.top_spenders_snapshot(n)
    }

    // ============================================================
    // READ-ONLY VIEWS (no drain; used by the envelope's shared path)
    // ============================================================

    /// True when an operation at `ts` could mutate state in its preamble:
    /// either the watermark would advance or a payment is already due.
    pub fn needs_exclusive(&self, ts: Timestamp) -> bool {
        ts > self.last_seen_ts || self.scheduler.has_due(self.last_seen_ts)
    }

    /// Historical balance without the drain preamble. Only valid when
    /// `needs_exclusive(ts)` is false for the caller's timestamp.
    pub fn balance_at(&self, id: &str, t_at: Timestamp) -> Option<Delta> {
        self.index.balance_at(id, t_at)
    }

    /// Top-spenders without the drain preamble; same caveat as
    /// [`Ledger::balance_at`].
    pub fn top_spenders_snapshot(&self, n: i64) -> Vec<String> {
        if n <= 0 {
            return Vec::new();
        }
        let mut rows: Vec<(&str, Amount)> = self
            .accounts
            .iter()
            .map(|(id, account)| (id.as_str(), account.outgoing_total()))
            .collect();
        rows.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        rows.truncate(n as usize);
        rows.into_iter()
            .map(|(id, outgoing)| format!("{id}({outgoing})"))
            .collect()
    }

    /// Live balance of an active account (diagnostics and tests).
    pub fn balance(&self, id: &str) -> Option<Amount> {
        self.accounts.get(id).map(Account::balance)
    }

    /// Live outgoing total of an active account.
    pub fn outgoing_total(&self, id: &str) -> Option<Amount> {
        self.accounts.get(id).map(Account::outgoing_total)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.accounts.contains_key(id)
    }

    pub fn last_seen_ts(&self) -> Timestamp {
        self.last_seen_ts
    }

    pub fn pending_payment_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Flush the journal, if one is attached.
    pub fn flush_journal(&mut self) -> std::io::Result<()> {
        match self.journal.as_mut() {
            Some(journal) => journal.flush(),
            None => Ok(()),
        }
    }
}

// ============================================================
// TESTS
// ============================================================

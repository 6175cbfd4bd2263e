//! Independent QA scenarios against the thread-safe banking facade.
//!
//! These exercise the documented end-to-end behaviors: deposits and
//! historical queries, transfer accounting, scheduled-payment draining,
//! cancellation, merge semantics, and concurrent access.

use std::sync::Arc;
use std::thread;

use chronobank::bank::Bank;
use chronobank::core_types::{Amount, Timestamp};

/// Helper: create an account and give it an opening balance.
fn funded(bank: &Bank, id: &str, ts: Timestamp, amount: Amount) {
    assert!(bank.create_account(ts, id), "create {id} failed");
    if amount > 0 {
        assert_eq!(bank.deposit(ts, id, amount), Some(amount));
    }
}

#[test]
fn qa_deposit_then_query_before_creation() {
    let bank = Bank::new();
    funded(&bank, "a", 1, 100);

    assert_eq!(bank.get_balance(2, "a", 1), Some(100));
    // The account did not exist at time 0.
    assert_eq!(bank.get_balance(2, "a", 0), None);
}

#[test]
fn qa_transfer_updates_balances_and_outgoing() {
    let bank = Bank::new();
    funded(&bank, "a", 1, 100);
    funded(&bank, "b", 1, 0);

    assert_eq!(bank.transfer(10, "a", "b", 40), Some(60));
    assert_eq!(bank.get_balance(10, "a", 10), Some(60));
    assert_eq!(bank.get_balance(10, "b", 10), Some(40));

    // Only the source spent anything.
    assert_eq!(
        bank.top_spenders(11, 2),
        vec!["a(40)".to_string(), "b(0)".to_string()]
    );
}

#[test]
fn qa_scheduled_payment_debits_at_due_time() {
    let bank = Bank::new();
    funded(&bank, "a", 1, 100);

    assert_eq!(
        bank.schedule_payment(5, "a", 30, 10),
        Some("payment1".to_string())
    );

    // The zero-value deposit fails, but its drain preamble still runs the
    // payment that fell due at 15.
    assert_eq!(bank.deposit(20, "a", 0), None);
    assert_eq!(bank.get_balance(20, "a", 20), Some(70));
    assert_eq!(bank.get_balance(20, "a", 15), Some(70));
    assert_eq!(bank.get_balance(20, "a", 14), Some(100));
    assert_eq!(bank.top_spenders(21, 1), vec!["a(30)".to_string()]);
}

#[test]
fn qa_cancelled_payment_never_debits() {
    let bank = Bank::new();
    funded(&bank, "a", 1, 100);
    let pid = bank.schedule_payment(5, "a", 30, 10).unwrap();

    assert!(bank.cancel_payment(10, "a", &pid));
    bank.deposit(100, "a", 1);
    assert_eq!(bank.get_balance(101, "a", 100), Some(101));
}

#[test]
fn qa_merge_retains_child_history_and_rehomes_payments() {
    let bank = Bank::new();
    funded(&bank, "a", 1, 50);
    funded(&bank, "b", 1, 30);
    bank.schedule_payment(2, "b", 20, 18); // due at 20

    assert!(bank.merge_accounts(7, "a", "b"));
    assert_eq!(bank.get_balance(8, "a", 7), Some(80));
    assert_eq!(bank.get_balance(8, "b", 6), Some(30)); // pre-merge
    assert_eq!(bank.get_balance(8, "b", 7), Some(0)); // at merge instant
    assert_eq!(bank.get_balance(8, "b", 8), None); // gone afterwards

    // The pending payment now debits the parent.
    bank.deposit(25, "a", 1);
    assert_eq!(bank.get_balance(26, "a", 25), Some(61));
}

#[test]
fn qa_merged_id_can_be_recreated_fresh() {
    let bank = Bank::new();
    funded(&bank, "a", 1, 10);
    funded(&bank, "b", 1, 5);
    assert!(bank.merge_accounts(3, "a", "b"));

    assert!(bank.create_account(6, "b"));
    assert_eq!(bank.get_balance(7, "b", 6), Some(0)); // new life starts empty
    assert_eq!(bank.get_balance(7, "b", 4), None); // between lives
    assert_eq!(bank.get_balance(7, "b", 2), Some(5)); // first life preserved
}

#[test]
fn qa_top_spenders_edge_cases() {
    let bank = Bank::new();
    assert!(bank.top_spenders(1, 5).is_empty()); // no accounts
    funded(&bank, "a", 2, 10);
    assert!(bank.top_spenders(3, 0).is_empty()); // n == 0
    assert_eq!(bank.top_spenders(4, 99), vec!["a(0)".to_string()]); // n > count
}

#[test]
fn qa_concurrent_deposits_on_distinct_accounts() {
    let bank = Arc::new(Bank::new());
    let n: usize = 1000;
    for i in 0..n {
        assert!(bank.create_account(0, &format!("acct{i}")));
    }

    let handles: Vec<_> = (0..n)
        .map(|i| {
            let bank = bank.clone();
            thread::spawn(move || {
                assert_eq!(
                    bank.deposit(i as Timestamp, &format!("acct{i}"), 1),
                    Some(1),
                    "deposit {i} must succeed"
                );
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    let now = n as Timestamp;
    let total: i64 = (0..n)
        .map(|i| bank.get_balance(now, &format!("acct{i}"), now).unwrap())
        .sum();
    assert_eq!(total, n as i64);
}

#[test]
fn qa_concurrent_mixed_operations_preserve_conservation() {
    let bank = Arc::new(Bank::new());
    funded(&bank, "hub", 0, 100_000);
    for i in 0..8 {
        funded(&bank, &format!("spoke{i}"), 0, 0);
    }

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let bank = bank.clone();
            thread::spawn(move || {
                let spoke = format!("spoke{i}");
                for k in 0..100 {
                    bank.transfer((i * 100 + k + 1) as Timestamp, "hub", &spoke, 10);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    let now = 10_000;
    let mut total = bank.get_balance(now, "hub", now).unwrap();
    for i in 0..8 {
        total += bank.get_balance(now, &format!("spoke{i}"), now).unwrap();
    }
    assert_eq!(total, 100_000);
}

//! Event journal - committed-state stream for downstream collaborators
//!
//! Every committed mutation is appended as one CSV line. Replaying the
//! stream in order rebuilds the in-memory ledger, which is all a
//! persistence or replication collaborator needs. The journal is an
//! observer: a write failure never unwinds the operation that produced
//! the record, it flips the writer into a degraded state and is reported
//! once.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::core_types::{Amount, Delta, Timestamp};

/// One committed state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    AccountOpened {
        account: String,
        ts: Timestamp,
    },
    BalanceChanged {
        account: String,
        ts: Timestamp,
        delta: Delta,
        balance_after: Amount,
    },
    PaymentScheduled {
        payment: String,
        account: String,
        amount: Amount,
        due_ts: Timestamp,
    },
    /// `debited` is false when the payment was consumed without funds
    /// moving (insufficient balance or extinct owner).
    PaymentProcessed {
        payment: String,
        account: String,
        debited: bool,
    },
    PaymentCanceled {
        payment: String,
    },
    AccountsMerged {
        parent: String,
        child: String,
        ts: Timestamp,
    },
}

impl JournalRecord {
    /// Serialize to one CSV line: `kind,a,b,c,d`
    fn to_csv_line(&self) -> String {
        match self {
            JournalRecord::AccountOpened { account, ts } => {
                format!("open,{account},{ts},,\n")
            }
            JournalRecord::BalanceChanged {
                account,
                ts,
                delta,
                balance_after,
            } => format!("balance,{account},{ts},{delta},{balance_after}\n"),
            JournalRecord::PaymentScheduled {
                payment,
                account,
                amount,
                due_ts,
            } => format!("schedule,{payment},{account},{amount},{due_ts}\n"),
            JournalRecord::PaymentProcessed {
                payment,
                account,
                debited,
            } => format!("process,{payment},{account},{debited},\n"),
            JournalRecord::PaymentCanceled { payment } => {
                format!("cancel,{payment},,,\n")
            }
            JournalRecord::AccountsMerged { parent, child, ts } => {
                format!("merge,{parent},{child},{ts},\n")
            }
        }
    }
}

/// Appends journal records to a file through a buffered writer.
pub struct JournalWriter {
    writer: BufWriter<File>,
    entry_count: u64,
    degraded: bool,
}

impl JournalWriter {
    /// Create (or truncate) the journal at `path` and write the header.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(b"kind,a,b,c,d\n")?;
        Ok(Self {
            writer,
            entry_count: 0,
            degraded: false,
        })
    }

    /// Append one record. Failures degrade the journal instead of
    /// propagating into the committed operation.
    pub fn append(&mut self, record: &JournalRecord) {
        if self.degraded {
            return;
        }
        if let Err(e) = self.writer.write_all(record.to_csv_line().as_bytes()) {
            tracing::error!(error = %e, "journal write failed; journal is now degraded");
            self.degraded = true;
            return;
        }
        self.entry_count += 1;
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_path(tag: &str) -> String {
        format!("target/test_journal_{}_{}.csv", tag, std::process::id())
    }

    #[test]
    fn test_append_and_count() {
        let path = test_path("count");
        let mut journal = JournalWriter::create(&path).unwrap();

        journal.append(&JournalRecord::AccountOpened {
            account: "a".into(),
            ts: 1,
        });
        journal.append(&JournalRecord::BalanceChanged {
            account: "a".into(),
            ts: 2,
            delta: 100,
            balance_after: 100,
        });
        journal.flush().unwrap();

        assert_eq!(journal.entry_count(), 2);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("kind,a,b,c,d\n"));
        assert!(contents.contains("open,a,1,,\n"));
        assert!(contents.contains("balance,a,2,100,100\n"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_record_lines() {
        let rec = JournalRecord::PaymentProcessed {
            payment: "payment3".into(),
            account: "acc".into(),
            debited: false,
        };
        assert_eq!(rec.to_csv_line(), "process,payment3,acc,false,\n");
    }
}

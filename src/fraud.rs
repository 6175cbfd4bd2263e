//! Fraud detection - streaming risk analysis over submitted transactions
//!
//! A background worker consumes transaction summaries from a queue and
//! scores each against the submitting account's rolling history window:
//! amount anomaly (z-score against the window mean), sustained frequency,
//! and spending velocity inside the analysis window. Scores combine into a
//! weighted risk in [0, 1] mapped to ALLOW / MONITOR / REVIEW / BLOCK;
//! anything at REVIEW or above fires the registered alert callback.
//!
//! Timestamps here are the same logical clock the ledger uses, so "one
//! hour" means 3600 logical time units.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::core_types::{Amount, Timestamp};

const TARGET_FRAUD: &str = "CHRONO::FRAUD";

const ANALYSIS_QUEUE_SIZE: usize = 4096;
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Summary of one monetary operation, as seen by the analyzer.
#[derive(Debug, Clone)]
pub struct TransactionData {
    pub account_id: String,
    pub transaction_type: String,
    pub amount: Amount,
    pub timestamp: Timestamp,
}

impl TransactionData {
    pub fn new(account_id: &str, transaction_type: &str, amount: Amount, ts: Timestamp) -> Self {
        Self {
            account_id: account_id.to_string(),
            transaction_type: transaction_type.to_string(),
            amount,
            timestamp: ts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    Allow,
    Monitor,
    Review,
    Block,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Allow => "ALLOW",
            Recommendation::Monitor => "MONITOR",
            Recommendation::Review => "REVIEW",
            Recommendation::Block => "BLOCK",
        }
    }
}

/// Outcome of analyzing one transaction.
#[derive(Debug, Clone)]
pub struct FraudResult {
    pub risk_score: f64,
    pub risk_factors: Vec<String>,
    pub recommendation: Recommendation,
    pub confidence_level: u8,
}

impl FraudResult {
    pub fn is_fraudulent(&self) -> bool {
        self.risk_score > 0.8
    }

    pub fn needs_review(&self) -> bool {
        self.risk_score > 0.6
    }
}

#[derive(Debug, Clone, Default)]
pub struct FraudStats {
    pub transactions_analyzed: u64,
    pub fraud_alerts_generated: u64,
    pub analysis_queue_size: usize,
    pub average_risk_score: f64,
}

pub type AlertCallback = Box<dyn Fn(&TransactionData, &FraudResult) + Send + Sync>;

/// Scoring thresholds, jittered by [`FraudDetectionAgent::refresh_models`].
#[derive(Debug, Clone, Copy)]
struct Thresholds {
    amount_z: f64,
    frequency_per_hour: f64,
    velocity: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            amount_z: 3.0,
            frequency_per_hour: 5.0,
            velocity: 10_000.0,
        }
    }
}

/// Rolling per-account history inside the analysis window.
#[derive(Debug, Default)]
struct AccountWindow {
    recent: VecDeque<TransactionData>,
    average_amount: f64,
    frequency_per_hour: f64,
}

impl AccountWindow {
    fn record(&mut self, tx: TransactionData, window_seconds: i64, max_history: usize) {
        let cutoff = tx.timestamp - window_seconds;
        while self
            .recent
            .front()
            .map(|t| t.timestamp < cutoff)
            .unwrap_or(false)
        {
            self.recent.pop_front();
        }
        self.recent.push_back(tx);
        while self.recent.len() > max_history {
            self.recent.pop_front();
        }

        let total: f64 = self.recent.iter().map(|t| t.amount as f64).sum();
        self.average_amount = total / self.recent.len() as f64;
        if let (Some(first), Some(last)) = (self.recent.front(), self.recent.back()) {
            let span = last.timestamp - first.timestamp;
            if span > 0 {
                self.frequency_per_hour = self.recent.len() as f64 * 3600.0 / span as f64;
            }
        }
    }

    fn velocity_in_window(&self, now: Timestamp, window_seconds: i64) -> f64 {
        let cutoff = now - window_seconds;
        self.recent
            .iter()
            .filter(|t| t.timestamp >= cutoff)
            .map(|t| t.amount as f64)
            .sum()
    }
}

struct AgentInner {
    window_seconds: i64,
    max_history: usize,
    queue: ArrayQueue<TransactionData>,
    running: AtomicBool,
    histories: Mutex<FxHashMap<String, AccountWindow>>,
    thresholds: Mutex<Thresholds>,
    callback: Mutex<Option<AlertCallback>>,
    analyzed: AtomicU64,
    alerts: AtomicU64,
    total_risk: Mutex<f64>,
}

/// Background fraud analyzer with a synchronous scoring entry point.
pub struct FraudDetectionAgent {
    inner: Arc<AgentInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FraudDetectionAgent {
    pub fn new(window_seconds: i64, max_history: usize) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                window_seconds,
                max_history,
                queue: ArrayQueue::new(ANALYSIS_QUEUE_SIZE),
                running: AtomicBool::new(false),
                histories: Mutex::new(FxHashMap::default()),
                thresholds: Mutex::new(Thresholds::default()),
                callback: Mutex::new(None),
                analyzed: AtomicU64::new(0),
                alerts: AtomicU64::new(0),
                total_risk: Mutex::new(0.0),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn set_alert_callback(&self, callback: AlertCallback) {
        *self.inner.callback.lock().expect("callback lock poisoned") = Some(callback);
    }

    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        let handle = thread::spawn(move || {
            while inner.running.load(Ordering::SeqCst) {
                let Some(tx) = inner.queue.pop() else {
                    thread::sleep(IDLE_SLEEP);
                    continue;
                };
                let result = inner.analyze(&tx);
                inner.analyzed.fetch_add(1, Ordering::Relaxed);
                *inner.total_risk.lock().expect("risk lock poisoned") += result.risk_score;

                if result.needs_review() || result.is_fraudulent() {
                    if result.is_fraudulent() {
                        inner.alerts.fetch_add(1, Ordering::Relaxed);
                    }
                    let callback = inner.callback.lock().expect("callback lock poisoned");
                    if let Some(callback) = callback.as_ref() {
                        callback(&tx, &result);
                    }
                }
            }
        });
        *self.worker.lock().expect("worker lock poisoned") = Some(handle);
        tracing::info!(target: TARGET_FRAUD, "fraud detection agent started");
    }

    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.worker.lock().expect("worker lock poisoned").take() {
            let _ = handle.join();
        }
        tracing::info!(target: TARGET_FRAUD, "fraud detection agent stopped");
    }

    /// Queue a transaction for background analysis. A full queue drops the
    /// sample; risk scoring is advisory and must never block the ledger.
    pub fn submit(&self, tx: TransactionData) {
        if self.inner.queue.push(tx).is_err() {
            tracing::debug!(target: TARGET_FRAUD, "analysis queue full, sample dropped");
        }
    }

    /// Score a transaction synchronously (also feeds the history window).
    pub fn analyze(&self, tx: &TransactionData) -> FraudResult {
        self.inner.analyze(tx)
    }

    /// Re-jitter model thresholds within their calibrated bounds.
    pub fn refresh_models(&self) {
        let mut rng = rand::thread_rng();
        let mut thresholds = self.inner.thresholds.lock().expect("thresholds poisoned");
        thresholds.amount_z =
            (thresholds.amount_z + rng.gen_range(-0.1..0.1)).clamp(1.5, 5.0);
        thresholds.frequency_per_hour =
            (thresholds.frequency_per_hour + rng.gen_range(-0.1..0.1)).clamp(2.0, 10.0);
        thresholds.velocity =
            (thresholds.velocity + rng.gen_range(-100.0..100.0)).clamp(5_000.0, 50_000.0);
        tracing::info!(target: TARGET_FRAUD, "fraud detection models refreshed");
    }

    pub fn stats(&self) -> FraudStats {
        let analyzed = self.inner.analyzed.load(Ordering::Relaxed);
        FraudStats {
            transactions_analyzed: analyzed,
            fraud_alerts_generated: self.inner.alerts.load(Ordering::Relaxed),
            analysis_queue_size: self.inner.queue.len(),
            average_risk_score: if analyzed > 0 {
                *self.inner.total_risk.lock().expect("risk lock poisoned") / analyzed as f64
            } else {
                0.0
            },
        }
    }
}

impl Drop for FraudDetectionAgent {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AgentInner {
    fn analyze(&self, tx: &TransactionData) -> FraudResult {
        let thresholds = *self.thresholds.lock().expect("thresholds poisoned");
        let mut histories = self.histories.lock().expect("histories poisoned");
        let window = histories.entry(tx.account_id.clone()).or_default();

        let amount_score = amount_anomaly_score(window, tx, thresholds.amount_z);
        let frequency_score = frequency_anomaly_score(window, thresholds.frequency_per_hour);
        let velocity_score =
            velocity_anomaly_score(window, tx, self.window_seconds, thresholds.velocity);

        let risk_score =
            (amount_score * 0.5 + frequency_score * 0.3 + velocity_score * 0.2).clamp(0.0, 1.0);

        let (recommendation, confidence_level) = if risk_score > 0.8 {
            (Recommendation::Block, 95)
        } else if risk_score > 0.6 {
            (Recommendation::Review, 85)
        } else if risk_score > 0.3 {
            (Recommendation::Monitor, 70)
        } else {
            (Recommendation::Allow, 90)
        };

        let mut risk_factors = Vec::new();
        if amount_score > 0.5 {
            risk_factors.push("Unusual transaction amount".to_string());
        }
        if frequency_score > 0.5 {
            risk_factors.push("High transaction frequency".to_string());
        }
        if velocity_score > 0.5 {
            risk_factors.push("High velocity spending".to_string());
        }

        window.record(tx.clone(), self.window_seconds, self.max_history);

        FraudResult {
            risk_score,
            risk_factors,
            recommendation,
            confidence_level,
        }
    }
}

fn amount_anomaly_score(window: &AccountWindow, tx: &TransactionData, threshold: f64) -> f64 {
    if window.recent.is_empty() || window.average_amount == 0.0 {
        return 0.0;
    }
    let mean = window.average_amount;
    // Rough spread estimate; enough to flag order-of-magnitude outliers.
    let std_dev = mean * 0.5;
    let z_score = ((tx.amount as f64) - mean).abs() / std_dev;
    (z_score / threshold).min(1.0)
}

fn frequency_anomaly_score(window: &AccountWindow, threshold: f64) -> f64 {
    let freq = window.frequency_per_hour;
    if freq > threshold {
        (freq / (threshold * 2.0)).min(1.0)
    } else {
        0.0
    }
}

fn velocity_anomaly_score(
    window: &AccountWindow,
    tx: &TransactionData,
    window_seconds: i64,
    threshold: f64,
) -> f64 {
    let total = window.velocity_in_window(tx.timestamp, window_seconds) + tx.amount as f64;
    if total > threshold {
        (total / (threshold * 2.0)).min(1.0)
    } else {
        0.0
    }
}

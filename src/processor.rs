//! Transaction processor - bounded worker pool over the banking envelope
//!
//! Connection readers hand raw request JSON plus a reply channel to a
//! bounded queue; worker threads decode, dispatch against the [`Bank`],
//! and send the encoded response back. Workers use a spin-then-sleep idle
//! loop and drain the queue fully before honoring shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;

use crate::bank::Bank;
use crate::core_types::Amount;
use crate::errors::ServiceError;
use crate::metrics::{MetricsRegistry, Timer};
use crate::protocol::{
    deserialize_request, serialize_response, MessageType, Request, Response, Status,
};

const TARGET_PROC: &str = "CHRONO::PROC";

const IDLE_SPIN_LIMIT: u32 = 1000;
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// One queued unit of work: the raw request and where to send the
/// serialized response.
pub struct Job {
    pub request_json: String,
    pub reply: mpsc::Sender<String>,
}

/// Point-in-time processor statistics.
#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    pub transactions_processed: u64,
    pub transactions_queued: usize,
    pub avg_processing_time_ms: f64,
}

/// Worker pool executing banking requests.
pub struct TransactionProcessor {
    bank: Arc<Bank>,
    metrics: Arc<MetricsRegistry>,
    queue: Arc<ArrayQueue<Job>>,
    running: Arc<AtomicBool>,
    num_workers: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    processed: Arc<AtomicU64>,
    total_processing_ns: Arc<AtomicU64>,
}

impl TransactionProcessor {
    pub fn new(
        bank: Arc<Bank>,
        metrics: Arc<MetricsRegistry>,
        num_workers: usize,
        queue_size: usize,
    ) -> Self {
        Self {
            bank,
            metrics,
            queue: Arc::new(ArrayQueue::new(queue_size.max(1))),
            running: Arc::new(AtomicBool::new(false)),
            num_workers: num_workers.max(1),
            workers: Mutex::new(Vec::new()),
            processed: Arc::new(AtomicU64::new(0)),
            total_processing_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().expect("worker list poisoned");
        for worker_id in 0..self.num_workers {
            let bank = self.bank.clone();
            let metrics = self.metrics.clone();
            let queue = self.queue.clone();
            let running = self.running.clone();
            let processed = self.processed.clone();
            let total_ns = self.total_processing_ns.clone();
            workers.push(thread::spawn(move || {
                let mut spin_count = 0u32;
                loop {
                    let mut did_work = false;
                    if let Some(job) = queue.pop() {
                        did_work = true;
                        let start = Instant::now();
                        let response = process_request(&bank, &metrics, &job.request_json);
                        // A closed reply channel just means the client went
                        // away before its answer did.
                        let _ = job.reply.send(response);
                        processed.fetch_add(1, Ordering::Relaxed);
                        total_ns.fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
                    }

                    if !running.load(Ordering::SeqCst) && queue.is_empty() {
                        break;
                    }
                    if !did_work {
                        spin_count += 1;
                        if spin_count > IDLE_SPIN_LIMIT {
                            thread::sleep(IDLE_SLEEP);
                            spin_count = 0;
                        } else {
                            std::hint::spin_loop();
                        }
                    } else {
                        spin_count = 0;
                    }
                }
                tracing::debug!(target: TARGET_PROC, worker_id, "worker exited");
            }));
        }
        tracing::info!(target: TARGET_PROC, workers = self.num_workers, "transaction processor started");
    }

    /// Push a job, spinning on backpressure. Returns false once the
    /// processor is shutting down.
    pub fn submit(&self, mut job: Job) -> bool {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }
            match self.queue.push(job) {
                Ok(()) => return true,
                Err(returned) => {
                    job = returned;
                    std::hint::spin_loop();
                }
            }
        }
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let workers: Vec<_> = {
            let mut guard = self.workers.lock().expect("worker list poisoned");
            guard.drain(..).collect()
        };
        for worker in workers {
            let _ = worker.join();
        }
        tracing::info!(target: TARGET_PROC, "transaction processor stopped");
    }

    pub fn stats(&self) -> ProcessorStats {
        let processed = self.processed.load(Ordering::Relaxed);
        let total_ns = self.total_processing_ns.load(Ordering::Relaxed);
        ProcessorStats {
            transactions_processed: processed,
            transactions_queued: self.queue.len(),
            avg_processing_time_ms: if processed > 0 {
                total_ns as f64 / processed as f64 / 1_000_000.0
            } else {
                0.0
            },
        }
    }
}

impl Drop for TransactionProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================
// REQUEST DISPATCH
// ============================================================

/// Decode, dispatch, encode. Never panics on malformed input.
pub fn process_request(bank: &Bank, metrics: &MetricsRegistry, request_json: &str) -> String {
    let _timer = Timer::new(metrics, "chronobank_request_seconds");
    metrics.increment_counter("chronobank_requests_total", 1.0);

    let response = match deserialize_request(request_json) {
        Ok(request) => dispatch(bank, &request),
        Err(e) => {
            tracing::warn!(target: TARGET_PROC, error = %e, "malformed request");
            Response::error(Status::InvalidRequest, "Invalid request format", 0)
        }
    };
    if response.status != Status::Success {
        metrics.increment_counter("chronobank_requests_failed_total", 1.0);
    }
    serialize_response(&response).unwrap_or_else(|e| {
        // Responses are built from plain values; serialization cannot
        // realistically fail, but a broken response must not kill the worker.
        tracing::error!(target: TARGET_PROC, error = %e, "response serialization failed");
        "{\"status\":1,\"message\":\"Internal error\",\"timestamp\":0,\"payload\":{}}".to_string()
    })
}

/// Route one decoded request to the matching ledger operation.
pub fn dispatch(bank: &Bank, request: &Request) -> Response {
    let ts = request.timestamp;
    match run_operation(bank, request) {
        Ok(response) => response,
        Err(e) => Response::error(e.status(), &e.to_string(), ts),
    }
}

fn run_operation(bank: &Bank, request: &Request) -> Result<Response, ServiceError> {
    let ts = request.timestamp;
    match request.kind {
        MessageType::CreateAccount => {
            let account_id = payload_str(request, "account_id")?;
            if bank.create_account(ts, account_id) {
                Ok(Response::account_created(account_id, ts))
            } else {
                Err(ServiceError::DuplicateAccount)
            }
        }
        MessageType::Deposit => {
            let account_id = payload_str(request, "account_id")?;
            let amount = payload_amount(request, "amount")?;
            match bank.deposit(ts, account_id, amount) {
                Some(balance) => Ok(Response::deposit_result(balance, ts)),
                None => Err(ServiceError::NotFound),
            }
        }
        MessageType::Transfer => {
            let source = payload_str(request, "source_account")?;
            let target = payload_str(request, "target_account")?;
            let amount = payload_amount(request, "amount")?;
            match bank.transfer(ts, source, target, amount) {
                Some(balance) => Ok(Response::transfer_result(balance, ts)),
                None => Err(ServiceError::InsufficientFunds),
            }
        }
        MessageType::GetBalance => {
            let account_id = payload_str(request, "account_id")?;
            let time_at = payload_i64(request, "time_at")?;
            match bank.get_balance(ts, account_id, time_at) {
                Some(balance) => Ok(Response::balance_result(balance, ts)),
                None => Err(ServiceError::NotFound),
            }
        }
        MessageType::TopSpenders => {
            let n = payload_i64(request, "n")?;
            let spenders = bank.top_spenders(ts, n);
            Ok(Response::top_spenders_result(&spenders, ts))
        }
        MessageType::SchedulePayment => {
            let account_id = payload_str(request, "account_id")?;
            let amount = payload_amount(request, "amount")?;
            let delay = payload_i64(request, "delay")?;
            if delay < 0 {
                return Err(ServiceError::InvalidArgument("delay must be non-negative"));
            }
            match bank.schedule_payment(ts, account_id, amount, delay as u64) {
                Some(payment_id) => Ok(Response::payment_scheduled(&payment_id, ts)),
                None => Err(ServiceError::NotFound),
            }
        }
        MessageType::CancelPayment => {
            let account_id = payload_str(request, "account_id")?;
            let payment_id = payload_str(request, "payment_id")?;
            if bank.cancel_payment(ts, account_id, payment_id) {
                Ok(Response::payment_cancelled(ts))
            } else {
                Ok(Response::error(
                    Status::Error,
                    "Payment cancellation failed",
                    ts,
                ))
            }
        }
        MessageType::MergeAccounts => {
            let a = payload_str(request, "account_id_1")?;
            let b = payload_str(request, "account_id_2")?;
            if bank.merge_accounts(ts, a, b) {
                Ok(Response::accounts_merged(ts))
            } else {
                Ok(Response::error(Status::Error, "Account merge failed", ts))
            }
        }
        // Session traffic is terminated by the server before dispatch.
        MessageType::Authenticate | MessageType::Heartbeat => Ok(Response::error(
            Status::InvalidRequest,
            "Unsupported operation",
            ts,
        )),
    }
}

fn payload_str<'a>(request: &'a Request, key: &str) -> Result<&'a str, ServiceError> {
    request.payload.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        ServiceError::InvalidRequest(format!("missing or non-string field '{key}'"))
    })
}

fn payload_i64(request: &Request, key: &str) -> Result<i64, ServiceError> {
    request.payload.get(key).and_then(|v| v.as_i64()).ok_or_else(|| {
        ServiceError::InvalidRequest(format!("missing or non-integer field '{key}'"))
    })
}

/// Monetary amounts must be strictly positive on the wire.
fn payload_amount(request: &Request, key: &str) -> Result<Amount, ServiceError> {
    let raw = payload_i64(request, key)?;
    if raw <= 0 {
        return Err(ServiceError::InvalidArgument("amount must be positive"));
    }
    Ok(raw as Amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::serialize_request;

    fn bank_with_account() -> Bank {
        let bank = Bank::new();
        assert!(bank.create_account(1, "acc1"));
        bank
    }

    #[test]
    fn test_dispatch_deposit() {
        let bank = bank_with_account();
        let req = Request::deposit(2, "c", "t", "acc1", 500);
        let resp = dispatch(&bank, &req);
        assert_eq!(resp.status, Status::Success);
        assert_eq!(resp.payload["balance"], 500);
    }

    #[test]
    fn test_dispatch_deposit_unknown_account() {
        let bank = Bank::new();
        let req = Request::deposit(2, "c", "t", "ghost", 500);
        let resp = dispatch(&bank, &req);
        assert_eq!(resp.status, Status::AccountNotFound);
    }

    #[test]
    fn test_dispatch_rejects_nonpositive_amount() {
        let bank = bank_with_account();
        let mut req = Request::deposit(2, "c", "t", "acc1", 1);
        req.payload["amount"] = serde_json::json!(-5);
        let resp = dispatch(&bank, &req);
        assert_eq!(resp.status, Status::InvalidRequest);
    }

    #[test]
    fn test_dispatch_rejects_negative_delay() {
        let bank = bank_with_account();
        bank.deposit(1, "acc1", 100);
        let req = Request::schedule_payment(2, "c", "t", "acc1", 10, -1);
        let resp = dispatch(&bank, &req);
        assert_eq!(resp.status, Status::InvalidRequest);
    }

    #[test]
    fn test_process_request_malformed_json() {
        let bank = Bank::new();
        let metrics = MetricsRegistry::new();
        let out = process_request(&bank, &metrics, "not json at all");
        assert!(out.contains("\"status\":5"));
        assert_eq!(metrics.counter("chronobank_requests_failed_total"), 1.0);
    }

    #[test]
    fn test_worker_pool_round_trip() {
        let bank = Arc::new(bank_with_account());
        let metrics = Arc::new(MetricsRegistry::new());
        let processor = TransactionProcessor::new(bank, metrics, 2, 64);
        processor.start();

        let (tx, rx) = mpsc::channel();
        let req = Request::deposit(5, "c", "t", "acc1", 250);
        let job = Job {
            request_json: serialize_request(&req).unwrap(),
            reply: tx,
        };
        assert!(processor.submit(job));

        let response_json = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(response_json.contains("\"balance\":250"));

        processor.stop();
        assert_eq!(processor.stats().transactions_processed, 1);
    }
}

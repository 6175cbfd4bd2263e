//! Banking server - TCP transport, sessions, and component wiring
//!
//! One accept-loop thread hands each connection to its own reader thread.
//! Readers feed stream bytes through the incremental framer, terminate
//! session traffic (authenticate / heartbeat) locally, mirror monetary
//! requests into the fraud analyzer, and push everything else onto the
//! worker pool, writing the framed response back on the same socket.

use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::bank::Bank;
use crate::config::ServerConfig;
use crate::fraud::{FraudDetectionAgent, FraudResult, FraudStats, TransactionData};
use crate::metrics::MetricsRegistry;
use crate::processor::{Job, ProcessorStats, TransactionProcessor};
use crate::protocol::{
    deserialize_request, serialize_response, write_framed, MessageFramer, MessageType, Request,
    Response, Status,
};

const TARGET_SRV: &str = "CHRONO::SRV";

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const READ_POLL: Duration = Duration::from_millis(200);
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================
// SESSIONS
// ============================================================

/// Token bookkeeping for authenticated clients.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue (and remember) a fresh token for `client_id`.
    pub fn issue(&self, client_id: &str, ts: i64) -> String {
        let token = format!("session_{client_id}_{ts}");
        self.sessions
            .write()
            .expect("session store poisoned")
            .insert(client_id.to_string(), token.clone());
        token
    }

    pub fn validate(&self, client_id: &str, token: &str) -> bool {
        self.sessions
            .read()
            .expect("session store poisoned")
            .get(client_id)
            .map(|t| t == token)
            .unwrap_or(false)
    }
}

// ============================================================
// SERVER
// ============================================================

/// Aggregate view over all server components.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub is_running: bool,
    pub active_connections: usize,
    pub transaction_stats: ProcessorStats,
    pub fraud_stats: FraudStats,
}

/// Everything a connection thread needs to answer one request.
struct RequestContext {
    processor: Arc<TransactionProcessor>,
    fraud: Arc<FraudDetectionAgent>,
    sessions: Arc<SessionStore>,
}

pub struct BankServer {
    config: ServerConfig,
    bank: Arc<Bank>,
    processor: Arc<TransactionProcessor>,
    fraud: Arc<FraudDetectionAgent>,
    sessions: Arc<SessionStore>,
    metrics: Arc<MetricsRegistry>,
    running: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
    accept_handle: Option<JoinHandle<()>>,
    conn_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    local_addr: Option<SocketAddr>,
}

impl BankServer {
    pub fn new(
        config: ServerConfig,
        bank: Arc<Bank>,
        fraud: Arc<FraudDetectionAgent>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let processor = Arc::new(TransactionProcessor::new(
            bank.clone(),
            metrics.clone(),
            config.worker_threads,
            config.queue_size,
        ));
        // Fraud alerts surface through the log; production deployments
        // attach their own callback before start().
        fraud.set_alert_callback(Box::new(fraud_alert_logger));
        Self {
            config,
            bank,
            processor,
            fraud,
            sessions: Arc::new(SessionStore::new()),
            metrics,
            running: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(AtomicUsize::new(0)),
            accept_handle: None,
            conn_handles: Arc::new(Mutex::new(Vec::new())),
            local_addr: None,
        }
    }

    /// Bind the listener and bring every component up, in order.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))?;
        listener.set_nonblocking(true)?;
        self.local_addr = Some(listener.local_addr()?);

        self.fraud.start();
        self.processor.start();

        let running = self.running.clone();
        let connections = self.connections.clone();
        let conn_handles = self.conn_handles.clone();
        let context = Arc::new(RequestContext {
            processor: self.processor.clone(),
            fraud: self.fraud.clone(),
            sessions: self.sessions.clone(),
        });
        let metrics = self.metrics.clone();

        self.accept_handle = Some(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        tracing::info!(target: TARGET_SRV, %peer, "accepted connection");
                        metrics.increment_counter("chronobank_connections_total", 1.0);
                        let running = running.clone();
                        let connections = connections.clone();
                        let context = context.clone();
                        let handle = thread::spawn(move || {
                            handle_connection(stream, peer, context, running, connections);
                        });
                        conn_handles
                            .lock()
                            .expect("connection list poisoned")
                            .push(handle);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_POLL);
                    }
                    Err(e) => {
                        if running.load(Ordering::SeqCst) {
                            tracing::error!(target: TARGET_SRV, error = %e, "accept failed");
                        }
                    }
                }
            }
        }));

        tracing::info!(
            target: TARGET_SRV,
            addr = %self.local_addr.map(|a| a.to_string()).unwrap_or_default(),
            workers = self.config.worker_threads,
            "banking server started"
        );
        Ok(())
    }

    /// Stop components in reverse start order.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        let handles: Vec<_> = {
            let mut guard = self.conn_handles.lock().expect("connection list poisoned");
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
        self.processor.stop();
        self.fraud.stop();
        if let Err(e) = self.bank.flush_journal() {
            tracing::warn!(target: TARGET_SRV, error = %e, "journal flush on shutdown failed");
        }
        tracing::info!(target: TARGET_SRV, "banking server stopped");
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            is_running: self.running.load(Ordering::SeqCst),
            active_connections: self.connections.load(Ordering::SeqCst),
            transaction_stats: self.processor.stats(),
            fraud_stats: self.fraud.stats(),
        }
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn metrics_text(&self) -> String {
        self.metrics.export()
    }

    /// Actual bound address (useful when configured with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for BankServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn fraud_alert_logger(tx: &TransactionData, result: &FraudResult) {
    tracing::warn!(
        target: TARGET_SRV,
        account = %tx.account_id,
        risk = result.risk_score,
        recommendation = result.recommendation.as_str(),
        factors = ?result.risk_factors,
        "FRAUD ALERT"
    );
}

// ============================================================
// CONNECTION HANDLING
// ============================================================

fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    context: Arc<RequestContext>,
    running: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
) {
    connections.fetch_add(1, Ordering::SeqCst);
    // Short read timeouts keep the reader responsive to shutdown.
    let _ = stream.set_read_timeout(Some(READ_POLL));

    let mut framer = MessageFramer::new();
    let mut buf = [0u8; 4096];
    'conn: while running.load(Ordering::SeqCst) {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                framer.push(&buf[..n]);
                loop {
                    match framer.next_message() {
                        Ok(Some(request_json)) => {
                            let response = handle_request(&context, &request_json);
                            if write_framed(&mut stream, &response).is_err() {
                                tracing::warn!(target: TARGET_SRV, %peer, "write failed");
                                break 'conn;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(target: TARGET_SRV, %peer, error = %e, "bad frame");
                            let error = encode(&Response::error(
                                Status::InvalidRequest,
                                "Invalid message framing",
                                0,
                            ));
                            let _ = write_framed(&mut stream, &error);
                            break 'conn;
                        }
                    }
                }
            }
            Err(e)
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                tracing::warn!(target: TARGET_SRV, %peer, error = %e, "read failed");
                break;
            }
        }
    }

    connections.fetch_sub(1, Ordering::SeqCst);
    tracing::info!(target: TARGET_SRV, %peer, "connection closed");
}

/// Session check, session traffic, fraud mirroring, then worker dispatch.
fn handle_request(context: &RequestContext, request_json: &str) -> String {
    let request = match deserialize_request(request_json) {
        Ok(request) => request,
        Err(_) => {
            return encode(&Response::error(
                Status::InvalidRequest,
                "Invalid request format",
                0,
            ));
        }
    };

    if request.kind != MessageType::Authenticate && request.kind != MessageType::Heartbeat {
        let valid = context
            .sessions
            .validate(&request.client_id, &request.session_token);
        if !valid {
            return encode(&Response::error(
                Status::Unauthorized,
                "Invalid session",
                request.timestamp,
            ));
        }
    }

    match request.kind {
        MessageType::Authenticate => {
            let token = context.sessions.issue(&request.client_id, request.timestamp);
            encode(&Response::authenticated(&token, request.timestamp))
        }
        MessageType::Heartbeat => encode(&Response::success(
            "Heartbeat acknowledged",
            request.timestamp,
            serde_json::Value::Object(Default::default()),
        )),
        _ => {
            if let Some(tx) = extract_transaction(&request) {
                context.fraud.submit(tx);
            }

            let (reply_tx, reply_rx) = mpsc::channel();
            let submitted = context.processor.submit(Job {
                request_json: request_json.to_string(),
                reply: reply_tx,
            });
            if !submitted {
                return encode(&Response::error(
                    Status::Error,
                    "Server shutting down",
                    request.timestamp,
                ));
            }
            match reply_rx.recv_timeout(REPLY_TIMEOUT) {
                Ok(response_json) => response_json,
                Err(_) => encode(&Response::error(
                    Status::Error,
                    "Request processing timed out",
                    request.timestamp,
                )),
            }
        }
    }
}

/// Monetary requests get mirrored into the fraud analyzer.
fn extract_transaction(request: &Request) -> Option<TransactionData> {
    let kind = match request.kind {
        MessageType::Deposit => "DEPOSIT",
        MessageType::Transfer => "TRANSFER",
        MessageType::SchedulePayment => "PAYMENT",
        _ => return None,
    };
    let account_key = if request.kind == MessageType::Transfer {
        "source_account"
    } else {
        "account_id"
    };
    let account = request.payload.get(account_key)?.as_str()?;
    let amount = request.payload.get("amount")?.as_i64()?;
    if amount < 0 {
        return None;
    }
    Some(TransactionData::new(
        account,
        kind,
        amount as u64,
        request.timestamp,
    ))
}

fn encode(response: &Response) -> String {
    serialize_response(response).unwrap_or_else(|_| {
        "{\"status\":1,\"message\":\"Internal error\",\"timestamp\":0,\"payload\":{}}".to_string()
    })
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{deserialize_response, frame_message, serialize_request};
    use std::io::Write;

    fn test_server() -> BankServer {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // ephemeral
            worker_threads: 2,
            queue_size: 64,
        };
        let bank = Arc::new(Bank::new());
        let fraud = Arc::new(FraudDetectionAgent::new(3600, 1000));
        let metrics = Arc::new(MetricsRegistry::new());
        BankServer::new(config, bank, fraud, metrics)
    }

    fn send_request(stream: &mut TcpStream, request: &Request) -> Response {
        let json = serialize_request(request).unwrap();
        stream
            .write_all(frame_message(&json).as_bytes())
            .expect("send failed");

        let mut framer = MessageFramer::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).expect("read failed");
            assert!(n > 0, "server closed connection");
            framer.push(&buf[..n]);
            if let Some(msg) = framer.next_message().expect("bad frame") {
                return deserialize_response(&msg).expect("bad response json");
            }
        }
    }

    #[test]
    fn test_session_store() {
        let sessions = SessionStore::new();
        let token = sessions.issue("client1", 42);
        assert_eq!(token, "session_client1_42");
        assert!(sessions.validate("client1", &token));
        assert!(!sessions.validate("client1", "session_client1_41"));
        assert!(!sessions.validate("client2", &token));
    }

    #[test]
    fn test_end_to_end_banking_session() {
        let mut server = test_server();
        server.start().expect("server start failed");
        let addr = server.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).expect("connect failed");

        // Unauthenticated traffic is rejected
        let resp = send_request(&mut stream, &Request::create_account(1, "c1", "bad", "acc1"));
        assert_eq!(resp.status, Status::Unauthorized);

        // Authenticate, then run a banking flow
        let resp = send_request(&mut stream, &Request::authenticate(2, "c1", "secret"));
        assert_eq!(resp.status, Status::Success);
        let token = resp.payload["session_token"].as_str().unwrap().to_string();

        let resp = send_request(&mut stream, &Request::create_account(3, "c1", &token, "acc1"));
        assert_eq!(resp.status, Status::Success);

        let resp = send_request(&mut stream, &Request::deposit(4, "c1", &token, "acc1", 500));
        assert_eq!(resp.status, Status::Success);
        assert_eq!(resp.payload["balance"], 500);

        let resp = send_request(
            &mut stream,
            &Request::get_balance(5, "c1", &token, "acc1", 4),
        );
        assert_eq!(resp.payload["balance"], 500);

        let resp = send_request(&mut stream, &Request::heartbeat(6, "c1"));
        assert_eq!(resp.status, Status::Success);

        assert!(server.stats().transaction_stats.transactions_processed >= 3);
        server.stop();
    }

    #[test]
    fn test_two_messages_in_one_write() {
        let mut server = test_server();
        server.start().expect("server start failed");
        let addr = server.local_addr().unwrap();
        let mut stream = TcpStream::connect(addr).expect("connect failed");

        // Authenticate first
        let resp = send_request(&mut stream, &Request::authenticate(1, "c2", "pw"));
        let token = resp.payload["session_token"].as_str().unwrap().to_string();

        // Two framed requests in a single socket write
        let first = serialize_request(&Request::create_account(2, "c2", &token, "x")).unwrap();
        let second = serialize_request(&Request::deposit(3, "c2", &token, "x", 7)).unwrap();
        let combined = format!("{}{}", frame_message(&first), frame_message(&second));
        stream.write_all(combined.as_bytes()).unwrap();

        let mut framer = MessageFramer::new();
        let mut buf = [0u8; 4096];
        let mut responses = Vec::new();
        while responses.len() < 2 {
            let n = stream.read(&mut buf).expect("read failed");
            assert!(n > 0);
            framer.push(&buf[..n]);
            while let Some(msg) = framer.next_message().expect("bad frame") {
                responses.push(deserialize_response(&msg).unwrap());
            }
        }
        assert_eq!(responses[0].status, Status::Success);
        assert_eq!(responses[1].payload["balance"], 7);
        server.stop();
    }
}

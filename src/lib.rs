//! Chronobank - temporally-aware banking ledger
//!
//! An in-memory banking core that executes monetary operations under
//! concurrency with deterministic scheduled-payment draining, retroactive
//! merge semantics, and point-in-time balance queries, plus the server
//! plumbing around it.
//!
//! # Modules
//!
//! - [`core_types`] - Core type definitions (Timestamp, Amount, etc.)
//! - [`account`] - Enforced account balance type
//! - [`history`] - Temporal index: events, lifetimes, merge edges
//! - [`scheduler`] - Due-time queue of scheduled payments
//! - [`ledger`] - The single-threaded banking core
//! - [`bank`] - Thread-safe envelope over the ledger
//! - [`journal`] - Committed-event stream writer
//! - [`protocol`] - Wire protocol: JSON envelopes + length framing
//! - [`processor`] - Worker-pool request dispatcher
//! - [`server`] - TCP transport and session bookkeeping
//! - [`fraud`] - Streaming fraud risk analysis
//! - [`metrics`] - Counters/gauges/histograms with Prometheus export
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing subscriber setup

pub mod core_types;

pub mod account;
pub mod bank;
pub mod config;
pub mod errors;
pub mod fraud;
pub mod history;
pub mod journal;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod protocol;
pub mod scheduler;
pub mod server;

// Convenient re-exports at crate root
pub use account::Account;
pub use bank::Bank;
pub use config::AppConfig;
pub use core_types::{AccountId, Amount, Delta, PaymentId, PaymentOrdinal, Timestamp};
pub use fraud::FraudDetectionAgent;
pub use ledger::Ledger;
pub use metrics::MetricsRegistry;
pub use server::BankServer;

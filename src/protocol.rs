//! Wire protocol - JSON request/response envelopes and message framing
//!
//! Requests and responses travel as JSON objects with numeric type and
//! status codes, framed on the stream by an 8-hex-digit length prefix.
//! The framer is incremental: connection readers push raw bytes in and
//! pull complete messages out, regardless of how the stream was chunked.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::core_types::{Amount, Timestamp};

/// Bytes of the hex length prefix in front of every message.
pub const FRAME_HEADER_LEN: usize = 8;

// ============================================================
// MESSAGE CATALOG
// ============================================================

/// Operation selector carried in the request envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageType {
    CreateAccount = 1,
    Deposit = 2,
    Transfer = 3,
    GetBalance = 4,
    TopSpenders = 5,
    SchedulePayment = 6,
    CancelPayment = 7,
    MergeAccounts = 8,
    Authenticate = 9,
    Heartbeat = 10,
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(MessageType::CreateAccount),
            2 => Ok(MessageType::Deposit),
            3 => Ok(MessageType::Transfer),
            4 => Ok(MessageType::GetBalance),
            5 => Ok(MessageType::TopSpenders),
            6 => Ok(MessageType::SchedulePayment),
            7 => Ok(MessageType::CancelPayment),
            8 => Ok(MessageType::MergeAccounts),
            9 => Ok(MessageType::Authenticate),
            10 => Ok(MessageType::Heartbeat),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

/// Response status carried in the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Status {
    Success = 0,
    Error = 1,
    Unauthorized = 2,
    AccountNotFound = 3,
    InsufficientFunds = 4,
    InvalidRequest = 5,
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for Status {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, String> {
        match code {
            0 => Ok(Status::Success),
            1 => Ok(Status::Error),
            2 => Ok(Status::Unauthorized),
            3 => Ok(Status::AccountNotFound),
            4 => Ok(Status::InsufficientFunds),
            5 => Ok(Status::InvalidRequest),
            other => Err(format!("unknown status {other}")),
        }
    }
}

// ============================================================
// ENVELOPES
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub timestamp: Timestamp,
    pub client_id: String,
    pub session_token: String,
    #[serde(default)]
    pub payload: Value,
}

impl Request {
    fn new(kind: MessageType, timestamp: Timestamp, client_id: &str, token: &str) -> Self {
        Self {
            kind,
            timestamp,
            client_id: client_id.to_string(),
            session_token: token.to_string(),
            payload: Value::Object(Default::default()),
        }
    }

    pub fn create_account(ts: Timestamp, client_id: &str, token: &str, account_id: &str) -> Self {
        let mut req = Self::new(MessageType::CreateAccount, ts, client_id, token);
        req.payload = json!({ "account_id": account_id });
        req
    }

    pub fn deposit(
        ts: Timestamp,
        client_id: &str,
        token: &str,
        account_id: &str,
        amount: Amount,
    ) -> Self {
        let mut req = Self::new(MessageType::Deposit, ts, client_id, token);
        req.payload = json!({ "account_id": account_id, "amount": amount });
        req
    }

    pub fn transfer(
        ts: Timestamp,
        client_id: &str,
        token: &str,
        source_account: &str,
        target_account: &str,
        amount: Amount,
    ) -> Self {
        let mut req = Self::new(MessageType::Transfer, ts, client_id, token);
        req.payload = json!({
            "source_account": source_account,
            "target_account": target_account,
            "amount": amount,
        });
        req
    }

    pub fn get_balance(
        ts: Timestamp,
        client_id: &str,
        token: &str,
        account_id: &str,
        time_at: Timestamp,
    ) -> Self {
        let mut req = Self::new(MessageType::GetBalance, ts, client_id, token);
        req.payload = json!({ "account_id": account_id, "time_at": time_at });
        req
    }

    pub fn top_spenders(ts: Timestamp, client_id: &str, token: &str, n: i64) -> Self {
        let mut req = Self::new(MessageType::TopSpenders, ts, client_id, token);
        req.payload = json!({ "n": n });
        req
    }

    pub fn schedule_payment(
        ts: Timestamp,
        client_id: &str,
        token: &str,
        account_id: &str,
        amount: Amount,
        delay: i64,
    ) -> Self {
        let mut req = Self::new(MessageType::SchedulePayment, ts, client_id, token);
        req.payload = json!({ "account_id": account_id, "amount": amount, "delay": delay });
        req
    }

    pub fn cancel_payment(
        ts: Timestamp,
        client_id: &str,
        token: &str,
        account_id: &str,
        payment_id: &str,
    ) -> Self {
        let mut req = Self::new(MessageType::CancelPayment, ts, client_id, token);
        req.payload = json!({ "account_id": account_id, "payment_id": payment_id });
        req
    }

    pub fn merge_accounts(
        ts: Timestamp,
        client_id: &str,
        token: &str,
        account_id_1: &str,
        account_id_2: &str,
    ) -> Self {
        let mut req = Self::new(MessageType::MergeAccounts, ts, client_id, token);
        req.payload = json!({ "account_id_1": account_id_1, "account_id_2": account_id_2 });
        req
    }

    pub fn authenticate(ts: Timestamp, username: &str, password: &str) -> Self {
        let mut req = Self::new(MessageType::Authenticate, ts, username, "");
        req.payload = json!({ "username": username, "password": password });
        req
    }

    pub fn heartbeat(ts: Timestamp, client_id: &str) -> Self {
        Self::new(MessageType::Heartbeat, ts, client_id, "")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub message: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub payload: Value,
}

impl Response {
    pub fn success(message: &str, timestamp: Timestamp, payload: Value) -> Self {
        Self {
            status: Status::Success,
            message: message.to_string(),
            timestamp,
            payload,
        }
    }

    pub fn error(status: Status, message: &str, timestamp: Timestamp) -> Self {
        Self {
            status,
            message: message.to_string(),
            timestamp,
            payload: Value::Object(Default::default()),
        }
    }

    pub fn account_created(account_id: &str, timestamp: Timestamp) -> Self {
        Self::success(
            "Account created successfully",
            timestamp,
            json!({ "account_id": account_id }),
        )
    }

    pub fn deposit_result(new_balance: Amount, timestamp: Timestamp) -> Self {
        Self::success("Deposit successful", timestamp, json!({ "balance": new_balance }))
    }

    pub fn transfer_result(new_source_balance: Amount, timestamp: Timestamp) -> Self {
        Self::success(
            "Transfer successful",
            timestamp,
            json!({ "source_balance": new_source_balance }),
        )
    }

    pub fn balance_result(balance: i64, timestamp: Timestamp) -> Self {
        Self::success("Balance retrieved", timestamp, json!({ "balance": balance }))
    }

    pub fn top_spenders_result(spenders: &[String], timestamp: Timestamp) -> Self {
        Self::success(
            "Top spenders retrieved",
            timestamp,
            json!({ "spenders": spenders }),
        )
    }

    pub fn payment_scheduled(payment_id: &str, timestamp: Timestamp) -> Self {
        Self::success(
            "Payment scheduled",
            timestamp,
            json!({ "payment_id": payment_id }),
        )
    }

    pub fn payment_cancelled(timestamp: Timestamp) -> Self {
        Self::success("Payment cancelled", timestamp, Value::Object(Default::default()))
    }

    pub fn accounts_merged(timestamp: Timestamp) -> Self {
        Self::success("Accounts merged", timestamp, Value::Object(Default::default()))
    }

    pub fn authenticated(session_token: &str, timestamp: Timestamp) -> Self {
        Self::success(
            "Authentication successful",
            timestamp,
            json!({ "session_token": session_token }),
        )
    }
}

pub fn serialize_request(request: &Request) -> Result<String, serde_json::Error> {
    serde_json::to_string(request)
}

pub fn deserialize_request(json_str: &str) -> Result<Request, serde_json::Error> {
    serde_json::from_str(json_str)
}

pub fn serialize_response(response: &Response) -> Result<String, serde_json::Error> {
    serde_json::to_string(response)
}

pub fn deserialize_response(json_str: &str) -> Result<Response, serde_json::Error> {
    serde_json::from_str(json_str)
}

// ============================================================
// FRAMING
// ============================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid frame header: {0:?}")]
    InvalidHeader(String),
    #[error("frame payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Prefix `message` with its byte length as 8 lowercase hex digits.
pub fn frame_message(message: &str) -> String {
    format!("{:08x}{}", message.len(), message)
}

/// Frame `message` and write it to `writer` in one call.
pub fn write_framed(writer: &mut impl Write, message: &str) -> io::Result<()> {
    writer.write_all(frame_message(message).as_bytes())?;
    writer.flush()
}

/// Incremental decoder for framed messages arriving in arbitrary chunks.
#[derive(Debug, Default)]
pub struct MessageFramer {
    buffer: Vec<u8>,
}

impl MessageFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw stream bytes into the framer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Extract the next complete message, if the buffer holds one.
    pub fn next_message(&mut self) -> Result<Option<String>, FrameError> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let header = std::str::from_utf8(&self.buffer[..FRAME_HEADER_LEN])
            .map_err(|_| FrameError::InvalidHeader("non-ascii header".to_string()))?;
        let size = usize::from_str_radix(header, 16)
            .map_err(|_| FrameError::InvalidHeader(header.to_string()))?;
        if self.buffer.len() < FRAME_HEADER_LEN + size {
            return Ok(None);
        }
        let payload: Vec<u8> = self
            .buffer
            .drain(..FRAME_HEADER_LEN + size)
            .skip(FRAME_HEADER_LEN)
            .collect();
        let message = String::from_utf8(payload).map_err(|_| FrameError::InvalidUtf8)?;
        Ok(Some(message))
    }
}

//! Delegated persistence interfaces (§6 "Persisted interfaces").
//!
//! Durable trade storage is treated as an out-of-scope collaborator
//! with a narrow, idempotent contract (save/update trade, save
//! execution report, update balance on close) rather than a single
//! combined snapshot, so the engine stays correct with `NullTradeSink`
//! wired in for unit tests: the core must remain correct when sinks
//! are null.

use async_trait::async_trait;
use serde::Serialize;

use crate::types::{ExecReason, ExecutionReport, Position};

/// Narrow, append-mostly trade/execution log the tick loop writes
/// through without ever blocking on it. Implementations must not make
/// the caller wait on a slow downstream store for more than a bounded
/// time (§6): `JsonFileTradeSink` offloads its file write to a blocking
/// pool task rather than doing the write inline.
#[async_trait]
pub trait TradeSink: Send + Sync {
    /// A position was opened (lifecycle ENTERING/Entering → OPEN).
    async fn record_open(&self, position: &Position);

    /// A position was closed, whatever the reason (SL/TP/trailing/
    /// taker-fallback/reconciliation ghost-close).
    async fn record_close(&self, symbol: &str, realized_pnl: f64, reason: ExecReason, ts: u64);

    /// Every order attempt's terminal report, regardless of status.
    async fn record_execution(&self, report: &ExecutionReport);

    /// Balance after a close, so a downstream ledger can be kept in
    /// sync without re-deriving it from the trade log.
    async fn update_balance(&self, balance: f64);
}

/// Default sink: every call is a no-op. Used whenever no durable store
/// is configured (unit tests, `dry_run` smoke runs).
pub struct NullTradeSink;

#[async_trait]
impl TradeSink for NullTradeSink {
    async fn record_open(&self, _position: &Position) {}
    async fn record_close(&self, _symbol: &str, _realized_pnl: f64, _reason: ExecReason, _ts: u64) {}
    async fn record_execution(&self, _report: &ExecutionReport) {}
    async fn update_balance(&self, _balance: f64) {}
}

#[derive(Serialize)]
#[serde(tag = "kind")]
enum LogEntry<'a> {
    Open { position: &'a Position },
    Close { symbol: &'a str, realized_pnl: f64, reason: String, ts: u64 },
    Execution { report: &'a ExecutionReport },
    Balance { balance: f64 },
}

/// Batteries-included local trade log: appends one JSON line per event
/// to `path`. Each write is offloaded to `spawn_blocking` so a slow
/// disk never stalls a per-symbol tick handler.
pub struct JsonFileTradeSink {
    path: std::path::PathBuf,
}

impl JsonFileTradeSink {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append(&self, line: String) {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let result = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut f| writeln!(f, "{}", line));
            if let Err(e) = result {
                log::warn!("[persistence] failed to append to {:?}: {}", path, e);
            }
        });
    }
}

#[async_trait]
impl TradeSink for JsonFileTradeSink {
    async fn record_open(&self, position: &Position) {
        if let Ok(line) = serde_json::to_string(&LogEntry::Open { position }) {
            self.append(line);
        }
    }

    async fn record_close(&self, symbol: &str, realized_pnl: f64, reason: ExecReason, ts: u64) {
        let entry = LogEntry::Close { symbol, realized_pnl, reason: reason.to_string(), ts };
        if let Ok(line) = serde_json::to_string(&entry) {
            self.append(line);
        }
    }

    async fn record_execution(&self, report: &ExecutionReport) {
        if let Ok(line) = serde_json::to_string(&LogEntry::Execution { report }) {
            self.append(line);
        }
    }

    async fn update_balance(&self, balance: f64) {
        if let Ok(line) = serde_json::to_string(&LogEntry::Balance { balance }) {
            self.append(line);
        }
    }
}

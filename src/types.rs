//! Core data model shared across every component (§3).
//!
//! Every variant-bearing type here is a closed enum rather than a string
//! tag — see DESIGN.md's notes on the core data model for why.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A perpetual market symbol, e.g. `BTC-USDC`.
///
/// Wrapping rather than aliasing `String` keeps the canonical
/// (internal) and exchange-normalized forms from being confused at the
/// type level; normalization is a pure function owned by `exchange::meta`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol(s.to_string())
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol(s)
    }
}

/// BUY or SELL, shared by order side and position side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Best-Bid/Offer snapshot.
///
/// Invariant: `best_bid < best_ask`; `mid = (best_bid + best_ask) / 2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbo {
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid: f64,
    /// Epoch milliseconds of the update.
    pub timestamp: u64,
}

impl Bbo {
    pub fn new(best_bid: f64, best_ask: f64, timestamp: u64) -> Self {
        Self {
            best_bid,
            best_ask,
            mid: (best_bid + best_ask) / 2.0,
            timestamp,
        }
    }

    pub fn spread(&self) -> f64 {
        self.best_ask - self.best_bid
    }

    /// Spread in basis points: (ask - bid) / mid * 10000.
    pub fn spread_bps(&self) -> f64 {
        if self.mid <= 0.0 {
            return f64::INFINITY;
        }
        (self.spread() / self.mid) * 10_000.0
    }

    /// True if `now - timestamp > max_age_ms`.
    pub fn is_stale(&self, now_ms: u64, max_age_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp) > max_age_ms
    }
}

/// A single resting price level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// An order-book depth snapshot: bids descending, asks ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: u64,
}

impl BookSnapshot {
    pub fn aggregate_bid_liquidity(&self) -> f64 {
        self.bids.iter().map(|l| l.size).sum()
    }

    pub fn aggregate_ask_liquidity(&self) -> f64 {
        self.asks.iter().map(|l| l.size).sum()
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }
}

/// A fixed-width (1-minute) candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub t: u64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

/// Direction a regime signal leans, or no clear lean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    None,
}

/// Numeric evidence backing a `RegimeSignal`, carried alongside the
/// tagged fields rather than folded into them (Design Notes: "dynamic
/// regime ... construction" strategy).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeMetrics {
    pub vol5m: f64,
    pub vol30m: f64,
    pub volume1m: f64,
    pub avg_vol15m: f64,
    pub range_high: f64,
    pub range_low: f64,
    pub price: f64,
    pub funding: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakout {
    pub up: bool,
    pub down: bool,
    pub level: f64,
}

/// Per-symbol classifier output, cached with a TTL by C4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSignal {
    pub symbol: Symbol,
    pub ts: u64,
    pub direction: Direction,
    pub compression: bool,
    pub volume_spike: bool,
    pub breakout: Breakout,
    pub metrics: RegimeMetrics,
}

/// An open position tracked by C8.
///
/// Invariants: `quantity > 0`; `stop_loss_price` sits on the losing side
/// of `entry_price`; `take_profit_price` sits on the winning side; at
/// most one `Position` per symbol exists in the tracker at any instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: f64,
    pub opened_at: u64,
    pub take_profit_price: f64,
    pub stop_loss_price: f64,
    pub unrealized_pnl: f64,
    pub max_pnl_percent: f64,
    pub trailing_activated: bool,
}

impl Position {
    /// Percent return adjusted for side: positive means in-profit.
    pub fn pnl_percent(&self, current_price: f64) -> f64 {
        let raw = match self.side {
            Side::Buy => (current_price - self.entry_price) / self.entry_price,
            Side::Sell => (self.entry_price - current_price) / self.entry_price,
        };
        raw * 100.0 * self.leverage
    }

    pub fn is_stop_loss_hit(&self, current_price: f64) -> bool {
        match self.side {
            Side::Buy => current_price <= self.stop_loss_price,
            Side::Sell => current_price >= self.stop_loss_price,
        }
    }

    pub fn is_take_profit_hit(&self, current_price: f64) -> bool {
        match self.side {
            Side::Buy => current_price >= self.take_profit_price,
            Side::Sell => current_price <= self.take_profit_price,
        }
    }
}

/// Entry or exit — the purpose of an in-flight order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderIntent {
    Entry,
    Exit,
}

/// The single order a symbol may have in flight.
///
/// Invariants: at most one `ActiveOrder` per symbol; `EXIT` orders are
/// reduce-only; `requote_count` is monotone non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveOrder {
    pub id: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub placed_at: u64,
    pub intent: OrderIntent,
    pub requote_count: u32,
    pub reduce_only: bool,
}

/// Per-symbol lifecycle, §3/§4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Idle,
    Entering,
    Open,
    Exiting,
    Cooldown,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Idle => "IDLE",
            LifecycleState::Entering => "ENTERING",
            LifecycleState::Open => "OPEN",
            LifecycleState::Exiting => "EXITING",
            LifecycleState::Cooldown => "COOLDOWN",
        };
        write!(f, "{}", s)
    }
}

/// The closed veto taxonomy of §4.6, in strict precedence order.
/// Ordinal order of variants matters for `DecisionReason::precedence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionReason {
    DataStale,
    KillSwitch,
    DailyLimit,
    Cooldown,
    FailCompression,
    FailVolume,
    FailBreakout,
    SpreadTooWide,
    FailEdge,
    Pass,
}

impl DecisionReason {
    /// Position in the strict precedence order mandated by P4.
    pub fn precedence(self) -> u8 {
        self as u8
    }
}

/// Numeric evidence accompanying every Decision Record (§3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvidence {
    pub expected_move_bps: f64,
    pub cost_bps: f64,
    pub net_edge_bps: f64,
    pub spread_bps: f64,
}

impl Default for DecisionEvidence {
    fn default() -> Self {
        Self {
            expected_move_bps: 0.0,
            cost_bps: 0.0,
            net_edge_bps: 0.0,
            spread_bps: 0.0,
        }
    }
}

/// Emitted on every gate evaluation, whether it passes or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub ts: u64,
    pub symbol: Symbol,
    pub reason: DecisionReason,
    pub evidence: DecisionEvidence,
    /// Sized quantity, only meaningful once sizing has run (i.e. the
    /// gate reached rule 9/FAIL_EDGE or PASS).
    pub sized_quantity: Option<f64>,
}

/// Maker or taker fill classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MakerOrTaker {
    Maker,
    Taker,
}

/// Terminal status of an order placement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Filled,
    Resting,
    Unfilled,
    Rejected,
    Skipped,
}

/// Closed reason codes surfaced alongside non-PASS execution outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecReason {
    PostOnlyReject,
    SkipExecSlippage,
    EntryNotFilled,
    NoFill,
    EntrySkipped,
    QueueTimeout,
    RateLimit,
    StopLoss,
    TakeProfit,
    Trailing,
    ReconciliationClosed,
}

impl fmt::Display for ExecReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecReason::PostOnlyReject => "POST_ONLY_REJECT",
            ExecReason::SkipExecSlippage => "SKIP_EXEC_SLIPPAGE",
            ExecReason::EntryNotFilled => "ENTRY_NOT_FILLED",
            ExecReason::NoFill => "NO_FILL",
            ExecReason::EntrySkipped => "ENTRY_SKIPPED",
            ExecReason::QueueTimeout => "QUEUE_TIMEOUT",
            ExecReason::RateLimit => "RATE_LIMIT",
            ExecReason::StopLoss => "SL",
            ExecReason::TakeProfit => "TP",
            ExecReason::Trailing => "TRAILING",
            ExecReason::ReconciliationClosed => "RECONCILIATION_CLOSED",
        };
        write!(f, "{}", s)
    }
}

/// Emitted by C1 for every order attempt (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub ts: u64,
    pub symbol: Symbol,
    pub intent: OrderIntent,
    pub side: Side,
    pub requested_px: f64,
    pub fill_px_avg: Option<f64>,
    pub filled_size: f64,
    pub maker_or_taker: Option<MakerOrTaker>,
    pub fee_paid: f64,
    pub slippage_bps: Option<f64>,
    pub status: ExecutionStatus,
    pub reason: Option<ExecReason>,
    /// The exchange's order id, when the status is `resting` (needed to
    /// later query `get_order_status`/`cancel_order`). `None` for IOC
    /// reports, which never rest.
    pub order_id: Option<String>,
}

/// Account snapshot: balance plus open positions, as returned by C1's
/// `get_account`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    pub balance: f64,
    pub positions: Vec<Position>,
}

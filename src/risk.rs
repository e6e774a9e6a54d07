//! Kill-switch, daily-limit and cooldown bookkeeping (§4.6 rules 2-4).
//!
//! Tracks day-rollover and latch semantics for three named veto outcomes
//! (DAILY_LIMIT / KILL_SWITCH / COOLDOWN) the gate needs to report, with
//! cooldown tracked per symbol rather than as one global halt window.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::types::{DecisionReason, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLedger {
    max_trades_per_day: u32,
    cooldown_seconds: i64,
    max_daily_drawdown_pct: f64,
    max_consecutive_losses: u32,

    start_of_day_balance: f64,
    last_day_reset: DateTime<Utc>,
    today_trade_count: u32,
    today_pnl: f64,
    consecutive_losses: u32,
    kill_switch_active: bool,
    last_trade_close: HashMap<Symbol, DateTime<Utc>>,
}

impl RiskLedger {
    pub fn new(cfg: &EngineConfig, starting_balance: f64, now: DateTime<Utc>) -> Self {
        Self {
            max_trades_per_day: cfg.max_trades_per_day,
            cooldown_seconds: cfg.cooldown_seconds as i64,
            max_daily_drawdown_pct: cfg.max_daily_drawdown_pct,
            max_consecutive_losses: cfg.max_consecutive_losses,
            start_of_day_balance: starting_balance,
            last_day_reset: now,
            today_trade_count: 0,
            today_pnl: 0.0,
            consecutive_losses: 0,
            kill_switch_active: false,
            last_trade_close: HashMap::new(),
        }
    }

    fn roll_day_if_needed(&mut self, now: DateTime<Utc>, current_balance: f64) {
        if now.date_naive() > self.last_day_reset.date_naive() {
            self.start_of_day_balance = current_balance;
            self.last_day_reset = now;
            self.today_trade_count = 0;
            self.today_pnl = 0.0;
        }
    }

    /// Evaluates rules 2-4 of §4.6 for `symbol` at `now`. Returns the
    /// first veto that fires, or `None` if this tier passes (the gate
    /// continues on to regime/spread/edge checks).
    pub fn check(&mut self, symbol: &Symbol, now: DateTime<Utc>, current_balance: f64) -> Option<DecisionReason> {
        if self.kill_switch_active {
            return Some(DecisionReason::KillSwitch);
        }

        self.roll_day_if_needed(now, current_balance);

        if self.today_trade_count >= self.max_trades_per_day {
            return Some(DecisionReason::DailyLimit);
        }

        let drawdown_floor = -(self.max_daily_drawdown_pct / 100.0) * self.start_of_day_balance;
        if self.today_pnl <= drawdown_floor {
            self.kill_switch_active = true;
            log::error!(
                "RISK: daily drawdown {:.2} breached floor {:.2}; kill switch latched",
                self.today_pnl,
                drawdown_floor
            );
            return Some(DecisionReason::KillSwitch);
        }

        if self.consecutive_losses >= self.max_consecutive_losses {
            self.kill_switch_active = true;
            log::error!(
                "RISK: {} consecutive losses reached; kill switch latched",
                self.consecutive_losses
            );
            return Some(DecisionReason::KillSwitch);
        }

        if let Some(last_close) = self.last_trade_close.get(symbol) {
            if now - *last_close < chrono::Duration::seconds(self.cooldown_seconds) {
                return Some(DecisionReason::Cooldown);
            }
        }

        None
    }

    /// Records a closed trade's realized pnl, updating the day's trade
    /// count, running pnl, consecutive-loss streak, and this symbol's
    /// cooldown clock.
    pub fn record_trade_close(&mut self, symbol: &Symbol, pnl: f64, now: DateTime<Utc>) {
        self.today_trade_count += 1;
        self.today_pnl += pnl;
        if pnl < 0.0 {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }
        self.last_trade_close.insert(symbol.clone(), now);
    }

    /// Explicit operator reset. Clears the latch but not the day's
    /// trade count or pnl — those only roll over at UTC midnight.
    pub fn operator_reset_kill_switch(&mut self) {
        self.kill_switch_active = false;
        self.consecutive_losses = 0;
        log::warn!("RISK: kill switch cleared by operator reset");
    }

    pub fn force_kill_switch(&mut self) {
        self.kill_switch_active = true;
        log::warn!("RISK: kill switch forced active");
    }

    pub fn is_kill_switch_active(&self) -> bool {
        self.kill_switch_active
    }

    pub fn today_pnl(&self) -> f64 {
        self.today_pnl
    }

    pub fn today_trade_count(&self) -> u32 {
        self.today_trade_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn cfg() -> EngineConfig {
        EngineConfig {
            max_trades_per_day: 2,
            cooldown_seconds: 60,
            max_daily_drawdown_pct: 2.5,
            max_consecutive_losses: 2,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn daily_limit_fires_before_latching_anything() {
        let cfg = cfg();
        let mut ledger = RiskLedger::new(&cfg, 1000.0, now());
        let sym = Symbol::new("BTC-USDC");
        ledger.record_trade_close(&sym, 1.0, now());
        ledger.record_trade_close(&Symbol::new("ETH-USDC"), 1.0, now());
        let veto = ledger.check(&sym, now() + chrono::Duration::seconds(120), 1000.0);
        assert_eq!(veto, Some(DecisionReason::DailyLimit));
        assert!(!ledger.is_kill_switch_active());
    }

    #[test]
    fn drawdown_latches_kill_switch_and_persists() {
        let cfg = cfg();
        let mut ledger = RiskLedger::new(&cfg, 1000.0, now());
        let sym = Symbol::new("BTC-USDC");
        ledger.record_trade_close(&sym, -26.0, now());
        let veto = ledger.check(&sym, now() + chrono::Duration::seconds(5), 974.0);
        assert_eq!(veto, Some(DecisionReason::KillSwitch));
        // Still latched on a later, otherwise-clean check.
        let veto2 = ledger.check(&sym, now() + chrono::Duration::seconds(300), 974.0);
        assert_eq!(veto2, Some(DecisionReason::KillSwitch));
    }

    #[test]
    fn consecutive_losses_latch_kill_switch() {
        let cfg = cfg();
        let mut ledger = RiskLedger::new(&cfg, 1000.0, now());
        let sym = Symbol::new("BTC-USDC");
        ledger.record_trade_close(&sym, -1.0, now());
        ledger.record_trade_close(&sym, -1.0, now());
        let veto = ledger.check(&sym, now() + chrono::Duration::seconds(5), 998.0);
        assert_eq!(veto, Some(DecisionReason::KillSwitch));
    }

    #[test]
    fn cooldown_blocks_reentry_on_same_symbol_only() {
        let cfg = cfg();
        let mut ledger = RiskLedger::new(&cfg, 1000.0, now());
        let sym = Symbol::new("BTC-USDC");
        ledger.record_trade_close(&sym, 1.0, now());
        let veto = ledger.check(&sym, now() + chrono::Duration::seconds(10), 1000.0);
        assert_eq!(veto, Some(DecisionReason::Cooldown));
        let other = ledger.check(&Symbol::new("ETH-USDC"), now() + chrono::Duration::seconds(10), 1000.0);
        assert_eq!(other, None);
    }

    #[test]
    fn cooldown_clears_after_window() {
        let cfg = cfg();
        let mut ledger = RiskLedger::new(&cfg, 1000.0, now());
        let sym = Symbol::new("BTC-USDC");
        ledger.record_trade_close(&sym, 1.0, now());
        let veto = ledger.check(&sym, now() + chrono::Duration::seconds(61), 1000.0);
        assert_eq!(veto, None);
    }

    #[test]
    fn operator_reset_clears_latch() {
        let cfg = cfg();
        let mut ledger = RiskLedger::new(&cfg, 1000.0, now());
        ledger.force_kill_switch();
        assert!(ledger.is_kill_switch_active());
        ledger.operator_reset_kill_switch();
        assert!(!ledger.is_kill_switch_active());
    }
}

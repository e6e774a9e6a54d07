//! Rolling performance feedback (supplemental to the trading contract).
//!
//! A fixed-size trailing window of realized trade P&L feeding a
//! profit-factor threshold that suggests reducing size or halting.
//! Exposed as a `TradeSink` decorator (`MonitoringTradeSink`) that taps
//! every real trade close the engine already persists, so it stays in
//! sync with `Position`/`ExecReason` rather than a second hand-fed pnl
//! stream.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::persistence::TradeSink;
use crate::types::{ExecReason, ExecutionReport, Position};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub window_size: usize,        // e.g. 100 trades
    pub min_trades_for_action: usize, // e.g. 20
    pub pf_threshold_warning: f64, // e.g. 1.0 -> reduce size
    pub pf_threshold_critical: f64, // e.g. 0.8 -> stop trading
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            min_trades_for_action: 20,
            pf_threshold_warning: 1.0,
            pf_threshold_critical: 0.8,
        }
    }
}

pub struct PerformanceMonitor {
    config: MonitorConfig,
    history: VecDeque<TradeResult>,
}

#[derive(Debug, Clone)]
struct TradeResult {
    pub pnl: f64,
    pub is_win: bool,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
        }
    }

    pub fn record_trade(&mut self, pnl: f64) {
        if self.history.len() >= self.config.window_size {
            self.history.pop_front();
        }
        self.history.push_back(TradeResult {
            pnl,
            is_win: pnl > 0.0,
        });
    }

    pub fn get_metrics(&self) -> PerformanceMetrics {
        if self.history.is_empty() {
            return PerformanceMetrics::default();
        }

        let total_trades = self.history.len();
        let wins = self.history.iter().filter(|t| t.is_win).count();
        let win_rate = wins as f64 / total_trades as f64 * 100.0;
        
        let gross_profit: f64 = self.history.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
        let gross_loss: f64 = self.history.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl.abs()).sum();
        
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            100.0 
        } else {
            0.0
        };

        PerformanceMetrics {
            win_rate,
            profit_factor,
            trade_count: total_trades,
            suggested_action: self.evaluate_action(profit_factor, total_trades),
        }
    }

    fn evaluate_action(&self, pf: f64, count: usize) -> FeedbackAction {
        if count < self.config.min_trades_for_action {
            return FeedbackAction::None;
        }

        if pf < self.config.pf_threshold_critical {
            FeedbackAction::HaltTrading
        } else if pf < self.config.pf_threshold_warning {
            FeedbackAction::ReduceSize(0.5) // Cut size in half
        } else {
            FeedbackAction::None
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.history.is_empty() {
            0.0
        } else {
            let total_trades = self.history.len();
            let wins = self.history.iter().filter(|t| t.is_win).count();
            wins as f64 / total_trades as f64 * 100.0
        }
    }
}

#[derive(Debug, Default)]
pub struct PerformanceMetrics {
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trade_count: usize,
    pub suggested_action: FeedbackAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackAction {
    None,
    ReduceSize(f64), // Multiplier, e.g. 0.5
    HaltTrading,
}

impl Default for FeedbackAction {
    fn default() -> Self {
        Self::None
    }
}

/// `TradeSink` decorator that feeds every real trade close into a
/// `PerformanceMonitor` and logs the suggested action, without
/// threading a monitor reference through `TickContext`. Wraps another
/// sink (`NullTradeSink` or `JsonFileTradeSink`) and delegates every
/// call to it unchanged.
pub struct MonitoringTradeSink<S> {
    inner: S,
    monitor: Mutex<PerformanceMonitor>,
}

impl<S: TradeSink> MonitoringTradeSink<S> {
    pub fn new(inner: S, config: MonitorConfig) -> Self {
        Self { inner, monitor: Mutex::new(PerformanceMonitor::new(config)) }
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.monitor.lock().unwrap().get_metrics()
    }
}

#[async_trait]
impl<S: TradeSink + Send + Sync> TradeSink for MonitoringTradeSink<S> {
    async fn record_open(&self, position: &Position) {
        self.inner.record_open(position).await;
    }

    async fn record_close(&self, symbol: &str, realized_pnl: f64, reason: ExecReason, ts: u64) {
        self.inner.record_close(symbol, realized_pnl, reason, ts).await;

        let metrics = {
            let mut monitor = self.monitor.lock().unwrap();
            monitor.record_trade(realized_pnl);
            monitor.get_metrics()
        };
        match metrics.suggested_action {
            FeedbackAction::HaltTrading => {
                log::error!(
                    "[MONITOR] {} trades, profit factor {:.2} below critical threshold; suggest halting {}",
                    metrics.trade_count, metrics.profit_factor, symbol
                );
            }
            FeedbackAction::ReduceSize(mult) => {
                log::warn!(
                    "[MONITOR] {} trades, profit factor {:.2} below warning threshold; suggest size x{}",
                    metrics.trade_count, metrics.profit_factor, mult
                );
            }
            FeedbackAction::None => {}
        }
    }

    async fn record_execution(&self, report: &ExecutionReport) {
        self.inner.record_execution(report).await;
    }

    async fn update_balance(&self, balance: f64) {
        self.inner.update_balance(balance).await;
    }
}

//! Entry Decision Gate (C6, §4.6).
//!
//! One ordered veto pipeline with a single entry point: every regime
//! threshold, risk check, and spread/edge bound runs in strict
//! precedence order and the result is a Decision Record on every call,
//! never a bare boolean.

use crate::config::EngineConfig;
use crate::edge::{self, ExecutionMode};
use crate::risk::RiskLedger;
use crate::types::{Bbo, DecisionEvidence, DecisionReason, DecisionRecord, Direction, RegimeSignal};

/// Everything the gate needs that isn't already owned by `RiskLedger`.
pub struct GateInputs<'a> {
    pub bbo: Option<&'a Bbo>,
    pub regime: Option<&'a RegimeSignal>,
    pub now_ms: u64,
    pub now_utc: chrono::DateTime<chrono::Utc>,
    pub current_balance: f64,
}

/// Result of one gate evaluation: the record to publish, plus the
/// sized entry (direction/quantity) when the outcome is PASS.
pub struct GateOutcome {
    pub record: DecisionRecord,
    pub sized_entry: Option<SizedEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizedEntry {
    pub direction: Direction,
    pub quantity: f64,
}

/// Evaluates the strict veto precedence of §4.6 for one symbol. Always
/// returns a record; `sized_entry` is `Some` only on PASS.
pub fn evaluate(
    cfg: &EngineConfig,
    risk: &mut RiskLedger,
    symbol: &crate::types::Symbol,
    inputs: GateInputs,
    min_order_size: f64,
) -> GateOutcome {
    let mut evidence = DecisionEvidence::default();

    // Rule 1: DATA_STALE.
    let bbo = match inputs.bbo {
        Some(b) if !b.is_stale(inputs.now_ms, cfg.data_stale_ms) => b,
        _ => return deny(inputs.now_ms, symbol, DecisionReason::DataStale, evidence),
    };
    let regime = match inputs.regime {
        Some(r) if inputs.now_ms.saturating_sub(r.ts) <= cfg.data_stale_ms => r,
        _ => return deny(inputs.now_ms, symbol, DecisionReason::DataStale, evidence),
    };

    evidence.spread_bps = bbo.spread_bps();

    // Rules 2-4: kill-switch / daily limit / cooldown, delegated to the
    // risk ledger which already enforces this precedence internally.
    if let Some(reason) = risk.check(symbol, inputs.now_utc, inputs.current_balance) {
        return deny(inputs.now_ms, symbol, reason, evidence);
    }

    // Rule 5: FAIL_COMPRESSION.
    if !regime.compression {
        return deny(inputs.now_ms, symbol, DecisionReason::FailCompression, evidence);
    }

    // Rule 6: FAIL_VOLUME.
    if !regime.volume_spike {
        return deny(inputs.now_ms, symbol, DecisionReason::FailVolume, evidence);
    }

    // Rule 7: FAIL_BREAKOUT.
    let direction = regime.direction;
    if direction == Direction::None {
        return deny(inputs.now_ms, symbol, DecisionReason::FailBreakout, evidence);
    }

    // Rule 8: SPREAD_TOO_WIDE.
    if evidence.spread_bps > cfg.spread_bps_est_max {
        return deny(inputs.now_ms, symbol, DecisionReason::SpreadTooWide, evidence);
    }

    // Position sizing, ahead of the edge check per §4.6.
    let stop_distance_px = cfg.stop_atr_mult * regime.metrics.vol5m * bbo.mid;
    if stop_distance_px <= 0.0 {
        return deny(inputs.now_ms, symbol, DecisionReason::FailEdge, evidence);
    }
    let risk_amount = inputs.current_balance * cfg.risk_per_trade_pct / 100.0;
    let max_qty_by_notional = if bbo.mid > 0.0 { cfg.max_position_size / bbo.mid } else { 0.0 };
    let quantity = (risk_amount / stop_distance_px).min(max_qty_by_notional).max(min_order_size);

    // Rule 9: FAIL_EDGE.
    let mode = if cfg.maker_first { ExecutionMode::Maker } else { ExecutionMode::Taker };
    let expected_cost_bps = edge::expected_cost_bps(cfg, mode, evidence.spread_bps);
    let expected_move_bps = edge::expected_move_bps(cfg, regime.metrics.vol30m);
    let net_edge_bps = edge::net_edge_bps(expected_move_bps, expected_cost_bps);

    evidence.expected_move_bps = expected_move_bps;
    evidence.cost_bps = expected_cost_bps;
    evidence.net_edge_bps = net_edge_bps;

    if net_edge_bps < cfg.min_net_edge_bps {
        return deny(inputs.now_ms, symbol, DecisionReason::FailEdge, evidence);
    }

    // Rule 10: PASS.
    GateOutcome {
        record: DecisionRecord {
            ts: inputs.now_ms,
            symbol: symbol.clone(),
            reason: DecisionReason::Pass,
            evidence,
            sized_quantity: Some(quantity),
        },
        sized_entry: Some(SizedEntry { direction, quantity }),
    }
}

fn deny(now_ms: u64, symbol: &crate::types::Symbol, reason: DecisionReason, evidence: DecisionEvidence) -> GateOutcome {
    GateOutcome {
        record: DecisionRecord {
            ts: now_ms,
            symbol: symbol.clone(),
            reason,
            evidence,
            sized_quantity: None,
        },
        sized_entry: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Breakout, RegimeMetrics, Symbol};
    use chrono::Utc;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    fn symbol() -> Symbol {
        Symbol::new("BTC-USDC")
    }

    fn passing_regime(now_ms: u64) -> RegimeSignal {
        RegimeSignal {
            symbol: symbol(),
            ts: now_ms,
            direction: Direction::Long,
            compression: true,
            volume_spike: true,
            breakout: Breakout { up: true, down: false, level: 100.0 },
            metrics: RegimeMetrics {
                vol5m: 0.0005,
                vol30m: 0.0002,
                volume1m: 100.0,
                avg_vol15m: 10.0,
                range_high: 100.0,
                range_low: 90.0,
                price: 101.0,
                funding: None,
            },
        }
    }

    #[test]
    fn missing_bbo_is_data_stale() {
        let cfg = cfg();
        let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
        let outcome = evaluate(
            &cfg,
            &mut risk,
            &symbol(),
            GateInputs { bbo: None, regime: None, now_ms: 1_000, now_utc: Utc::now(), current_balance: cfg.starting_balance },
            0.001,
        );
        assert_eq!(outcome.record.reason, DecisionReason::DataStale);
        assert!(outcome.sized_entry.is_none());
    }

    #[test]
    fn stale_bbo_still_data_stale_even_with_fresh_regime() {
        let cfg = cfg();
        let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
        let bbo = Bbo::new(100.0, 100.1, 0);
        let regime = passing_regime(50_000);
        let outcome = evaluate(
            &cfg,
            &mut risk,
            &symbol(),
            GateInputs {
                bbo: Some(&bbo),
                regime: Some(&regime),
                now_ms: 50_000,
                now_utc: Utc::now(),
                current_balance: cfg.starting_balance,
            },
            0.001,
        );
        assert_eq!(outcome.record.reason, DecisionReason::DataStale);
    }

    #[test]
    fn compression_failure_precedes_volume_and_breakout_checks() {
        let cfg = cfg();
        let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
        let bbo = Bbo::new(100.0, 100.01, 1_000);
        let mut regime = passing_regime(1_000);
        regime.compression = false;
        regime.volume_spike = false; // would also fail, but compression must win
        let outcome = evaluate(
            &cfg,
            &mut risk,
            &symbol(),
            GateInputs { bbo: Some(&bbo), regime: Some(&regime), now_ms: 1_000, now_utc: Utc::now(), current_balance: cfg.starting_balance },
            0.001,
        );
        assert_eq!(outcome.record.reason, DecisionReason::FailCompression);
    }

    #[test]
    fn passing_everything_sizes_a_quantity() {
        let mut cfg = cfg();
        cfg.min_net_edge_bps = -1_000.0; // keep the edge check out of the way
        cfg.spread_bps_est_max = 1_000.0;
        let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
        let bbo = Bbo::new(100.0, 100.01, 1_000);
        let regime = passing_regime(1_000);
        let outcome = evaluate(
            &cfg,
            &mut risk,
            &symbol(),
            GateInputs { bbo: Some(&bbo), regime: Some(&regime), now_ms: 1_000, now_utc: Utc::now(), current_balance: cfg.starting_balance },
            0.001,
        );
        assert_eq!(outcome.record.reason, DecisionReason::Pass);
        assert!(outcome.sized_entry.unwrap().quantity > 0.0);
    }

    #[test]
    fn zero_volatility_fails_edge_via_zero_stop_distance() {
        let mut cfg = cfg();
        cfg.spread_bps_est_max = 1_000.0;
        let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
        let bbo = Bbo::new(100.0, 100.01, 1_000);
        let mut regime = passing_regime(1_000);
        regime.metrics.vol5m = 0.0;
        let outcome = evaluate(
            &cfg,
            &mut risk,
            &symbol(),
            GateInputs { bbo: Some(&bbo), regime: Some(&regime), now_ms: 1_000, now_utc: Utc::now(), current_balance: cfg.starting_balance },
            0.001,
        );
        assert_eq!(outcome.record.reason, DecisionReason::FailEdge);
    }
}

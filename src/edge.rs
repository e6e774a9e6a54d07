//! Fee & Edge Model (C5, §4.5).
//!
//! Pure arithmetic — no network, no mutable state. Maker/taker fee
//! fractions feed round-trip cost and net-edge formulas.

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Maker,
    Taker,
}

/// `2 * maker_fee_bps` if maker, else `2 * taker_fee_bps`.
pub fn fee_bps_round_trip(cfg: &EngineConfig, mode: ExecutionMode) -> f64 {
    match mode {
        ExecutionMode::Maker => 2.0 * cfg.maker_fee_bps,
        ExecutionMode::Taker => 2.0 * cfg.taker_fee_bps,
    }
}

/// `fee_bps_round_trip + spread_bps + (maker ? 0.2 : 1.0) * slippage_bps_est`.
pub fn expected_cost_bps(cfg: &EngineConfig, mode: ExecutionMode, spread_bps: f64) -> f64 {
    let slippage_component = match mode {
        ExecutionMode::Maker => 0.2 * cfg.slippage_bps_est,
        ExecutionMode::Taker => cfg.slippage_bps_est,
    };
    fee_bps_round_trip(cfg, mode) + spread_bps + slippage_component
}

/// `vol30m * sqrt(max(1, max_hold_seconds/60)) * 10000`.
pub fn expected_move_bps(cfg: &EngineConfig, vol30m: f64) -> f64 {
    let hold_minutes = (cfg.max_hold_seconds as f64 / 60.0).max(1.0);
    vol30m * hold_minutes.sqrt() * 10_000.0
}

/// `expected_move_bps - expected_cost_bps` (P7: must hold exactly up to
/// float precision — this function IS that invariant, nothing hidden).
pub fn net_edge_bps(expected_move_bps: f64, expected_cost_bps: f64) -> f64 {
    expected_move_bps - expected_cost_bps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        let mut c = EngineConfig::default();
        c.maker_fee_bps = -1.0;
        c.taker_fee_bps = 3.5;
        c.slippage_bps_est = 2.0;
        c.max_hold_seconds = 900;
        c
    }

    #[test]
    fn maker_round_trip_rebate() {
        let c = cfg();
        assert_eq!(fee_bps_round_trip(&c, ExecutionMode::Maker), -2.0);
        assert_eq!(fee_bps_round_trip(&c, ExecutionMode::Taker), 7.0);
    }

    #[test]
    fn expected_cost_matches_spec_example() {
        // Scenario 1 from spec §8: spread_bps=2, cost_bps=10 (maker).
        let c = cfg();
        let cost = expected_cost_bps(&c, ExecutionMode::Maker, 2.0);
        // -2 (fee) + 2 (spread) + 0.2*2 (slippage) = 0.4 -> not exactly 10,
        // since the scenario's cost_bps is an external fixture value, not
        // derived from these defaults. We only assert internal consistency.
        assert!((cost - (-2.0 + 2.0 + 0.4)).abs() < 1e-9);
    }

    #[test]
    fn net_edge_is_pure_subtraction() {
        assert_eq!(net_edge_bps(30.0, 10.0), 20.0);
        assert_eq!(net_edge_bps(-5.0, 3.0), -8.0);
    }

    #[test]
    fn expected_move_uses_sqrt_time_scaling() {
        let mut c = cfg();
        c.max_hold_seconds = 3600; // 60 minutes -> sqrt(60)
        let mv = expected_move_bps(&c, 0.01);
        assert!((mv - 0.01 * 60f64.sqrt() * 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn expected_move_floors_hold_at_one_minute() {
        let mut c = cfg();
        c.max_hold_seconds = 10; // < 60s still floors to 1 minute
        let mv = expected_move_bps(&c, 0.02);
        assert!((mv - 0.02 * 1f64.sqrt() * 10_000.0).abs() < 1e-6);
    }
}

//! End-to-end literal scenarios from the engine's behavioral spec,
//! driven against a fake `ExchangeClient` (`DryRunExchange`) rather
//! than any mocking framework.

use chrono::Utc;

use perp_engine_rs::config::EngineConfig;
use perp_engine_rs::events::LoggingEventBus;
use perp_engine_rs::exchange::dry_run::DryRunExchange;
use perp_engine_rs::exchange::meta::AssetMeta;
use perp_engine_rs::exchange::ExchangeClient;
use perp_engine_rs::execution::{Lifecycle, TickContext};
use perp_engine_rs::gate::{self, GateInputs};
use perp_engine_rs::persistence::NullTradeSink;
use perp_engine_rs::position::PositionTracker;
use perp_engine_rs::regime::RegimeCache;
use perp_engine_rs::risk::RiskLedger;
use perp_engine_rs::types::{
    Bbo, Breakout, DecisionReason, Direction, ExecutionStatus, LifecycleState, RegimeMetrics,
    RegimeSignal, Side, Symbol,
};

fn symbol() -> Symbol {
    Symbol::new("BTC-USDC")
}

fn permissive_cfg() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.maker_first = true;
    cfg.quote_tick_offset = 1;
    cfg.max_queue_wait_ms = 350;
    cfg.regime_eval_interval_ms = 0;
    cfg.min_net_edge_bps = -1_000.0;
    cfg.spread_bps_est_max = 1_000.0;
    cfg
}

fn passing_regime(symbol: &Symbol, ts: u64) -> RegimeSignal {
    RegimeSignal {
        symbol: symbol.clone(),
        ts,
        direction: Direction::Long,
        compression: true,
        volume_spike: true,
        breakout: Breakout { up: true, down: false, level: 50_000.0 },
        metrics: RegimeMetrics {
            vol5m: 0.0006,
            vol30m: 0.0006,
            volume1m: 500.0,
            avg_vol15m: 300.0,
            range_high: 50_100.0,
            range_low: 49_900.0,
            price: 50_000.5,
            funding: None,
        },
    }
}

/// Scenario 1: happy maker fill. `MAKER_FIRST=true`, `QUOTE_TICK_OFFSET=1`,
/// `MAX_QUEUE_WAIT_MS=350`, BBO bid=50000/ask=50001, tick=0.5, regime
/// passing. A PASS decision places a resting maker order at 50000.5
/// (not reduce-only), which the dry-run exchange fills on its first
/// status poll; the lifecycle should land in OPEN with that fill price.
#[tokio::test]
async fn scenario_1_happy_maker_fill() {
    let cfg = permissive_cfg();
    let mut gw = DryRunExchange::new(1_000_000.0, -1.0, 3.5, 0);
    gw.seed_meta(&symbol(), AssetMeta { tick_size: 0.5, size_decimals: 3, max_leverage: 20 });
    gw.seed_bbo(&symbol(), 50_000.0, 50_001.0);

    let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
    let mut positions = PositionTracker::new(cfg.starting_balance);
    let bus = LoggingEventBus;
    let mut regime_cache = RegimeCache::new(5_000);
    regime_cache.put(passing_regime(&symbol(), 1_000));

    let mut lc = Lifecycle::new(symbol());
    {
        let mut ctx = TickContext {
            exchange: &mut gw,
            risk: &mut risk,
            positions: &mut positions,
            events: &bus,
            trade_sink: &NullTradeSink,
            bbo: Some(Bbo::new(50_000.0, 50_001.0, 1_000)),
            now_ms: 1_000,
            now_utc: Utc::now(),
        };
        lc.tick(&cfg, &mut ctx, &mut regime_cache).await;
    }
    assert_eq!(lc.state(), LifecycleState::Entering);

    {
        let mut ctx = TickContext {
            exchange: &mut gw,
            risk: &mut risk,
            positions: &mut positions,
            events: &bus,
            trade_sink: &NullTradeSink,
            bbo: Some(Bbo::new(50_000.0, 50_001.0, 1_050)),
            now_ms: 1_050,
            now_utc: Utc::now(),
        };
        lc.tick(&cfg, &mut ctx, &mut regime_cache).await;
    }
    assert_eq!(lc.state(), LifecycleState::Open);
    let position = positions.get(&symbol()).unwrap();
    assert_eq!(position.side, Side::Buy);
    assert_eq!(position.entry_price, 50_000.5);
}

/// Scenario 2: queue timeout + requote. The resting order from scenario
/// 1's setup sits unfilled past `max_queue_wait_ms`; the lifecycle must
/// cancel and requote rather than abandon the entry, as long as the
/// requote rate limit and cap allow it.
#[tokio::test]
async fn scenario_2_queue_timeout_triggers_a_requote() {
    let mut cfg = permissive_cfg();
    cfg.max_requote_per_sec = 2;
    let mut gw = DryRunExchange::new(1_000_000.0, -1.0, 3.5, 10_000); // never fills in-test
    gw.seed_meta(&symbol(), AssetMeta { tick_size: 0.5, size_decimals: 3, max_leverage: 20 });
    gw.seed_bbo(&symbol(), 50_000.0, 50_001.0);

    let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
    let mut positions = PositionTracker::new(cfg.starting_balance);
    let bus = LoggingEventBus;
    let mut regime_cache = RegimeCache::new(5_000);
    regime_cache.put(passing_regime(&symbol(), 1_000));

    let mut lc = Lifecycle::new(symbol());
    {
        let mut ctx = TickContext {
            exchange: &mut gw,
            risk: &mut risk,
            positions: &mut positions,
            events: &bus,
            trade_sink: &NullTradeSink,
            bbo: Some(Bbo::new(50_000.0, 50_001.0, 1_000)),
            now_ms: 1_000,
            now_utc: Utc::now(),
        };
        lc.tick(&cfg, &mut ctx, &mut regime_cache).await;
    }
    assert_eq!(lc.state(), LifecycleState::Entering);

    // 550 ms later: past the 350 ms queue wait and past the 500 ms
    // minimum requote gap (1000 ms / max_requote_per_sec=2).
    {
        let mut ctx = TickContext {
            exchange: &mut gw,
            risk: &mut risk,
            positions: &mut positions,
            events: &bus,
            trade_sink: &NullTradeSink,
            bbo: Some(Bbo::new(50_000.0, 50_001.0, 1_550)),
            now_ms: 1_550,
            now_utc: Utc::now(),
        };
        lc.tick(&cfg, &mut ctx, &mut regime_cache).await;
    }
    // A requote keeps the lifecycle in ENTERING with a fresh order,
    // rather than falling back to IDLE.
    assert_eq!(lc.state(), LifecycleState::Entering);
}

/// Scenario 3: slippage abort on a taker-fallback exit. The bounded-
/// slippage IOC helper backing `exit_position` must return
/// status=skipped / reason=SKIP_EXEC_SLIPPAGE rather than place an
/// order once the computed slippage exceeds `max_execution_slippage_bps`.
#[tokio::test]
async fn scenario_3_taker_fallback_exit_skips_on_excess_slippage() {
    let mut gw = DryRunExchange::new(1_000.0, -1.0, 3.5, 0);
    gw.seed_meta(&symbol(), AssetMeta { tick_size: 0.5, size_decimals: 3, max_leverage: 20 });

    // mid=100, best_bid/best_ask chosen so the reduce-only sell's far
    // touch sits ~12 bps from mid, past an 8 bps bound.
    let report = gw
        .exit_position(&symbol(), Side::Sell, 1.0, 100.0, 99.88, 100.0, 1, 8.0)
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Skipped);
    assert_eq!(report.reason, Some(perp_engine_rs::types::ExecReason::SkipExecSlippage));
    // No fill means no position-closing side effect took place.
    let acct = gw.get_account().await.unwrap();
    assert!(acct.positions.is_empty());
}

/// Scenario 4: drawdown kill-switch. `STARTING_BALANCE=1000`,
/// `MAX_DAILY_DRAWDOWN_PCT=2.5`, today_pnl=-26 breaches the 25.0 floor;
/// the kill switch must latch and continue vetoing even once pnl would
/// otherwise look clean again.
#[tokio::test]
async fn scenario_4_drawdown_breach_latches_kill_switch() {
    let mut cfg = EngineConfig::default();
    cfg.starting_balance = 1_000.0;
    cfg.max_daily_drawdown_pct = 2.5;

    let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
    risk.record_trade_close(&symbol(), -26.0, Utc::now());

    let outcome = gate::evaluate(
        &cfg,
        &mut risk,
        &symbol(),
        GateInputs {
            bbo: Some(&Bbo::new(100.0, 100.1, 0)),
            regime: Some(&passing_regime(&symbol(), 0)),
            now_ms: 0,
            now_utc: Utc::now(),
            current_balance: 974.0,
        },
        0.001,
    );
    assert_eq!(outcome.record.reason, DecisionReason::KillSwitch);
    assert!(risk.is_kill_switch_active());

    // Still latched on a later, otherwise-passing evaluation.
    let outcome2 = gate::evaluate(
        &cfg,
        &mut risk,
        &symbol(),
        GateInputs {
            bbo: Some(&Bbo::new(100.0, 100.1, 60_000)),
            regime: Some(&passing_regime(&symbol(), 60_000)),
            now_ms: 60_000,
            now_utc: Utc::now(),
            current_balance: 974.0,
        },
        0.001,
    );
    assert_eq!(outcome2.record.reason, DecisionReason::KillSwitch);
}

/// Scenario 5: stale BBO gate. With no BBO update for 6 s and
/// `DATA_STALE_MS=5000`, every decision must emit DATA_STALE regardless
/// of how favorable the regime looks.
#[tokio::test]
async fn scenario_5_stale_bbo_always_denies_with_data_stale() {
    let cfg = EngineConfig::default(); // data_stale_ms = 5_000
    let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());

    let stale_bbo = Bbo::new(100.0, 100.1, 0); // timestamped at t=0
    let now_ms = 6_000; // 6s later, past the 5s staleness bound

    let outcome = gate::evaluate(
        &cfg,
        &mut risk,
        &symbol(),
        GateInputs {
            bbo: Some(&stale_bbo),
            regime: Some(&passing_regime(&symbol(), now_ms)),
            now_ms,
            now_utc: Utc::now(),
            current_balance: cfg.starting_balance,
        },
        0.001,
    );
    assert_eq!(outcome.record.reason, DecisionReason::DataStale);
    assert!(outcome.sized_entry.is_none());
}

/// Scenario 6: reconciliation closes a ghost position. The in-memory
/// map believes BTC-USDC is open; the exchange reports no such
/// position. Reconciliation must drop it locally at zero realized pnl
/// and report it as a closed ghost.
#[tokio::test]
async fn scenario_6_reconciliation_closes_a_ghost_position() {
    let mut positions = PositionTracker::new(1_000.0);
    positions.insert(perp_engine_rs::types::Position {
        id: "ghost-1".into(),
        symbol: symbol(),
        side: Side::Buy,
        entry_price: 50_000.0,
        quantity: 0.01,
        leverage: 1.0,
        opened_at: 0,
        take_profit_price: 51_000.0,
        stop_loss_price: 49_500.0,
        unrealized_pnl: 0.0,
        max_pnl_percent: 0.0,
        trailing_activated: false,
    });

    let mut gw = DryRunExchange::new(1_000.0, -1.0, 3.5, 0);
    gw.seed_meta(&symbol(), AssetMeta { tick_size: 0.5, size_decimals: 3, max_leverage: 20 });
    // The exchange has no position for BTC-USDC: the account is empty.

    let report = positions.reconcile(&mut gw, |_| Some(50_000.0)).await.unwrap();

    assert_eq!(report.closed_ghosts, vec![symbol()]);
    assert!(positions.get(&symbol()).is_none());
}

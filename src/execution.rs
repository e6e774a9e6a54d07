//! Execution State Machine (C7, §4.7).
//!
//! A per-symbol tick loop driving order placement, reconciliation and
//! protective halts: the maker-first, taker-fallback
//! IDLE/ENTERING/OPEN/EXITING/COOLDOWN lifecycle of §4.7, with drawdown
//! and other account-level halts delegated to C6's gate and
//! `risk::RiskLedger` rather than handled inline, and exactly one
//! in-flight order per symbol at any time.
//!
//! One `Lifecycle` exists per traded symbol. §5 assigns each symbol its
//! own task, so a `Lifecycle`'s `tick` is never called concurrently with
//! itself; the engine-wide singletons it touches (`ExchangeClient`,
//! `RiskLedger`, `PositionTracker`) are borrowed fresh through a
//! `TickContext` each call rather than held across an await point.

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::edge::{self, ExecutionMode};
use crate::events::{Event, EventBus, LifecycleUpdate, TradeClosed};
use crate::exchange::ExchangeClient;
use crate::gate::{self, GateInputs};
use crate::persistence::TradeSink;
use crate::position::PositionTracker;
use crate::regime::{self, RegimeCache};
use crate::risk::RiskLedger;
use crate::types::{
    ActiveOrder, Bbo, Direction, ExecReason, ExecutionStatus, LifecycleState, OrderIntent, Position,
    Side, Symbol,
};

/// Everything a tick needs, borrowed fresh each call (§5: no lock spans
/// a suspension point). `bbo` is a snapshot, not a live handle, since a
/// single tick must see one consistent quote throughout.
pub struct TickContext<'a> {
    pub exchange: &'a mut dyn ExchangeClient,
    pub risk: &'a mut RiskLedger,
    pub positions: &'a mut PositionTracker,
    pub events: &'a dyn EventBus,
    pub trade_sink: &'a dyn TradeSink,
    pub bbo: Option<Bbo>,
    pub now_ms: u64,
    pub now_utc: DateTime<Utc>,
}

/// `entry_px = bid + offset` on a buy, `ask - offset` on a sell — used
/// for both the entry and the reduce-only exit order, since the exit
/// order's side determines which touch it chases (§4.7).
fn quote_price(side: Side, bbo: &Bbo, tick_offset: u32, tick: f64) -> f64 {
    let offset = tick_offset as f64 * tick;
    match side {
        Side::Buy => bbo.best_bid + offset,
        Side::Sell => bbo.best_ask - offset,
    }
}

/// Per-symbol execution state machine (§3/§4.7).
pub struct Lifecycle {
    symbol: Symbol,
    state: LifecycleState,
    active_order: Option<ActiveOrder>,
    pending_exit_reason: Option<ExecReason>,
    /// `vol5m` at the moment an entry was sized, carried forward so the
    /// stop/take-profit distance on fill matches what the gate sized
    /// the position against rather than a value from a later tick.
    entry_vol5m: f64,
    last_regime_eval_ms: u64,
    last_quote_action_ms: Option<u64>,
    cooldown_until_ms: u64,
}

impl Lifecycle {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            state: LifecycleState::Idle,
            active_order: None,
            pending_exit_reason: None,
            entry_vol5m: 0.0,
            last_regime_eval_ms: 0,
            last_quote_action_ms: None,
            cooldown_until_ms: 0,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    async fn set_state(&mut self, to: LifecycleState, ctx: &mut TickContext<'_>) {
        if self.state != to {
            let update = LifecycleUpdate { ts: ctx.now_ms, symbol: self.symbol.clone(), from: self.state, to };
            ctx.events.publish(Event::LifecycleUpdate(&update)).await;
            self.state = to;
        }
    }

    /// Advances this symbol's lifecycle by exactly one step, dispatching
    /// on the current state (§4.7).
    pub async fn tick(&mut self, cfg: &EngineConfig, ctx: &mut TickContext<'_>, regime_cache: &mut RegimeCache) {
        match self.state {
            LifecycleState::Idle => self.handle_idle(cfg, ctx, regime_cache).await,
            LifecycleState::Entering => self.handle_entering(cfg, ctx, regime_cache).await,
            LifecycleState::Open => self.handle_open(cfg, ctx, regime_cache).await,
            LifecycleState::Exiting => self.handle_exiting(cfg, ctx, regime_cache).await,
            LifecycleState::Cooldown => self.handle_cooldown(ctx).await,
        }
    }

    /// Called once per reconciliation pass (§4.8, every 5 minutes by
    /// default). If the exchange no longer shows a position this symbol
    /// believed it held, the trade is closed at zero pnl and the
    /// lifecycle moves straight to COOLDOWN regardless of what it was
    /// doing (§9 "reconciliation ... ghost position").
    pub async fn observe_reconciliation(&mut self, cfg: &EngineConfig, ctx: &mut TickContext<'_>, closed_ghosts: &[Symbol]) {
        if !closed_ghosts.contains(&self.symbol) {
            return;
        }
        if matches!(self.state, LifecycleState::Entering | LifecycleState::Open | LifecycleState::Exiting) {
            ctx.risk.record_trade_close(&self.symbol, 0.0, ctx.now_utc);
            let closed = TradeClosed {
                ts: ctx.now_ms,
                symbol: self.symbol.clone(),
                realized_pnl: 0.0,
                reason: ExecReason::ReconciliationClosed,
            };
            ctx.events.publish(Event::TradeClosed(&closed)).await;
            ctx.trade_sink.record_close(self.symbol.as_str(), 0.0, ExecReason::ReconciliationClosed, ctx.now_ms).await;
            ctx.trade_sink.update_balance(ctx.positions.balance()).await;
            self.active_order = None;
            self.pending_exit_reason = None;
            self.cooldown_until_ms = ctx.now_ms + cfg.cooldown_seconds * 1_000;
            self.set_state(LifecycleState::Cooldown, ctx).await;
        }
    }

    // ── IDLE ──────────────────────────────────────────────────────────

    async fn handle_idle(&mut self, cfg: &EngineConfig, ctx: &mut TickContext<'_>, regime_cache: &mut RegimeCache) {
        let due = ctx.now_ms.saturating_sub(self.last_regime_eval_ms) >= cfg.regime_eval_interval_ms;
        if due {
            self.last_regime_eval_ms = ctx.now_ms;
            if let Ok(candles) = ctx
                .exchange
                .get_candles(&self.symbol, 1, regime::required_candle_count(cfg))
                .await
            {
                if let Some(signal) = regime::classify(cfg, &self.symbol, ctx.now_ms, &candles, None) {
                    ctx.events.publish(Event::Signal(&signal)).await;
                    regime_cache.put(signal);
                }
            }
        }

        let regime = regime_cache.get(&self.symbol).cloned();
        let min_order_size = ctx.exchange.min_order_size(&self.symbol).unwrap_or(0.0);
        let outcome = gate::evaluate(
            cfg,
            ctx.risk,
            &self.symbol,
            GateInputs {
                bbo: ctx.bbo.as_ref(),
                regime: regime.as_ref(),
                now_ms: ctx.now_ms,
                now_utc: ctx.now_utc,
                current_balance: ctx.positions.balance(),
            },
            min_order_size,
        );
        ctx.events.publish(Event::GateEvaluation(&outcome.record)).await;

        if let Some(sized) = outcome.sized_entry {
            self.entry_vol5m = regime.map(|r| r.metrics.vol5m).unwrap_or(0.0);
            if ctx.exchange.set_leverage(&self.symbol, cfg.leverage).await.is_ok() {
                self.place_entry(cfg, ctx, sized.direction, sized.quantity, 0).await;
            }
        }
    }

    /// Maker-first entry placement (§4.7 `place_entry`). Falls back to a
    /// bounded-slippage IOC immediately when `maker_first` is off.
    async fn place_entry(&mut self, cfg: &EngineConfig, ctx: &mut TickContext<'_>, direction: Direction, quantity: f64, requote_count: u32) {
        let side = match direction {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
            Direction::None => return,
        };
        let bbo = match ctx.bbo {
            Some(b) => b,
            None => return,
        };

        if !cfg.maker_first {
            self.last_quote_action_ms = Some(ctx.now_ms);
            let result = ctx
                .exchange
                .enter_position(&self.symbol, side, quantity, bbo.mid, bbo.best_bid, bbo.best_ask, cfg.quote_tick_offset, cfg.max_execution_slippage_bps)
                .await;
            match result {
                Ok(report) if report.status == ExecutionStatus::Filled => {
                    let px = report.fill_px_avg.unwrap_or(report.requested_px);
                    ctx.events.publish(Event::ExecutionReport(&report)).await;
                    self.open_position_from_fill(cfg, ctx, side, quantity, px).await;
                }
                Ok(report) => {
                    ctx.events.publish(Event::ExecutionReport(&report)).await;
                }
                Err(e) => log::warn!("[{}] taker entry failed: {}", self.symbol, e),
            }
            return;
        }

        let tick = match ctx.exchange.tick_size(&self.symbol) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("[{}] tick_size lookup failed: {}", self.symbol, e);
                return;
            }
        };
        let raw_px = quote_price(side, &bbo, cfg.quote_tick_offset, tick);
        let limit_px = match ctx.exchange.round_price_to_tick(&self.symbol, raw_px) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("[{}] round_price_to_tick failed: {}", self.symbol, e);
                return;
            }
        };

        self.last_quote_action_ms = Some(ctx.now_ms);
        match ctx.exchange.place_post_only_limit(&self.symbol, side, quantity, limit_px, false).await {
            Ok(report) => match report.status {
                ExecutionStatus::Resting => {
                    self.active_order = Some(ActiveOrder {
                        id: report.order_id.clone().unwrap_or_default(),
                        side,
                        price: limit_px,
                        size: quantity,
                        placed_at: ctx.now_ms,
                        intent: OrderIntent::Entry,
                        requote_count,
                        reduce_only: false,
                    });
                    ctx.events.publish(Event::ExecutionReport(&report)).await;
                    self.set_state(LifecycleState::Entering, ctx).await;
                }
                ExecutionStatus::Filled => {
                    let px = report.fill_px_avg.unwrap_or(limit_px);
                    ctx.events.publish(Event::ExecutionReport(&report)).await;
                    self.open_position_from_fill(cfg, ctx, side, quantity, px).await;
                }
                ExecutionStatus::Rejected => {
                    log::info!("[{}] post-only entry rejected ({})", self.symbol, ExecReason::PostOnlyReject);
                    ctx.events.publish(Event::ExecutionReport(&report)).await;
                }
                _ => {}
            },
            Err(e) => log::warn!("[{}] place_entry failed: {}", self.symbol, e),
        }
    }

    fn compute_stop_and_take_profit(&self, cfg: &EngineConfig, side: Side, entry_price: f64) -> (f64, f64) {
        let stop_distance = (cfg.stop_atr_mult * self.entry_vol5m * entry_price).max(0.0);
        let tp_distance = stop_distance * cfg.tp_r_mult;
        match side {
            Side::Buy => (entry_price - stop_distance, entry_price + tp_distance),
            Side::Sell => (entry_price + stop_distance, entry_price - tp_distance),
        }
    }

    async fn open_position_from_fill(&mut self, cfg: &EngineConfig, ctx: &mut TickContext<'_>, side: Side, quantity: f64, entry_price: f64) {
        let (stop_loss_price, take_profit_price) = self.compute_stop_and_take_profit(cfg, side, entry_price);
        ctx.positions.insert(Position {
            id: format!("{}-{}", self.symbol.as_str(), ctx.now_ms),
            symbol: self.symbol.clone(),
            side,
            entry_price,
            quantity,
            leverage: cfg.leverage,
            opened_at: ctx.now_ms,
            take_profit_price,
            stop_loss_price,
            unrealized_pnl: 0.0,
            max_pnl_percent: 0.0,
            trailing_activated: false,
        });
        if let Some(position) = ctx.positions.get(&self.symbol) {
            ctx.trade_sink.record_open(position).await;
        }
        self.active_order = None;
        self.set_state(LifecycleState::Open, ctx).await;
    }

    // ── ENTERING ──────────────────────────────────────────────────────

    async fn handle_entering(&mut self, cfg: &EngineConfig, ctx: &mut TickContext<'_>, regime_cache: &mut RegimeCache) {
        let order = match self.active_order.clone() {
            Some(o) => o,
            None => {
                self.set_state(LifecycleState::Idle, ctx).await;
                return;
            }
        };

        match ctx.exchange.get_order_status(&self.symbol, &order.id).await {
            Ok(ExecutionStatus::Filled) => {
                self.open_position_from_fill(cfg, ctx, order.side, order.size, order.price).await;
            }
            Ok(ExecutionStatus::Rejected) => {
                self.active_order = None;
                self.set_state(LifecycleState::Idle, ctx).await;
            }
            Ok(_) => {
                let age_ms = ctx.now_ms.saturating_sub(order.placed_at);
                if age_ms <= cfg.max_queue_wait_ms {
                    return;
                }

                let _ = ctx.exchange.cancel_order(&self.symbol, &order.id).await;
                self.active_order = None;

                let rate_ok = self
                    .last_quote_action_ms
                    .map(|t| ctx.now_ms.saturating_sub(t) >= 1_000 / cfg.max_requote_per_sec.max(1) as u64)
                    .unwrap_or(true);
                let under_cap = order.requote_count < 5;

                if rate_ok && under_cap {
                    let regime = regime_cache.get(&self.symbol).cloned();
                    let outcome = gate::evaluate(
                        cfg,
                        ctx.risk,
                        &self.symbol,
                        GateInputs {
                            bbo: ctx.bbo.as_ref(),
                            regime: regime.as_ref(),
                            now_ms: ctx.now_ms,
                            now_utc: ctx.now_utc,
                            current_balance: ctx.positions.balance(),
                        },
                        ctx.exchange.min_order_size(&self.symbol).unwrap_or(0.0),
                    );
                    if let Some(sized) = outcome.sized_entry {
                        self.entry_vol5m = regime.map(|r| r.metrics.vol5m).unwrap_or(self.entry_vol5m);
                        self.place_entry(cfg, ctx, sized.direction, sized.quantity, order.requote_count + 1).await;
                        return;
                    }
                }

                let reason = if !under_cap { ExecReason::QueueTimeout } else { ExecReason::RateLimit };
                log::info!("[{}] entry abandoned: {}", self.symbol, reason);
                self.set_state(LifecycleState::Idle, ctx).await;
            }
            Err(e) => log::warn!("[{}] get_order_status (entering) failed: {}", self.symbol, e),
        }
    }

    // ── OPEN ──────────────────────────────────────────────────────────

    async fn handle_open(&mut self, cfg: &EngineConfig, ctx: &mut TickContext<'_>, regime_cache: &mut RegimeCache) {
        let bbo = match ctx.bbo {
            Some(b) => b,
            None => return,
        };
        let trigger = ctx.positions.evaluate(&self.symbol, bbo.mid, cfg.trailing_distance_percent);
        if let Some(trigger) = trigger {
            self.place_exit(cfg, ctx, regime_cache, trigger.reason, 0).await;
        }
    }

    /// Maker-first reduce-only exit placement (§4.7 `place_exit`).
    async fn place_exit(&mut self, cfg: &EngineConfig, ctx: &mut TickContext<'_>, regime_cache: &mut RegimeCache, reason: ExecReason, requote_count: u32) {
        let position = match ctx.positions.get(&self.symbol) {
            Some(p) => p.clone(),
            None => {
                self.set_state(LifecycleState::Cooldown, ctx).await;
                return;
            }
        };
        self.pending_exit_reason = Some(reason);
        let side = position.side.opposite();
        let quantity = position.quantity;
        let bbo = match ctx.bbo {
            Some(b) => b,
            None => return,
        };

        if requote_count >= 2 && cfg.allow_taker_fallback {
            let net_edge_ok = regime_cache
                .get(&self.symbol)
                .map(|r| {
                    let cost = edge::expected_cost_bps(cfg, ExecutionMode::Taker, bbo.spread_bps());
                    let mv = edge::expected_move_bps(cfg, r.metrics.vol30m);
                    edge::net_edge_bps(mv, cost) >= cfg.taker_only_if_net_edge_bps
                })
                .unwrap_or(false);

            if net_edge_ok {
                self.last_quote_action_ms = Some(ctx.now_ms);
                match ctx
                    .exchange
                    .exit_position(&self.symbol, side, quantity, bbo.mid, bbo.best_bid, bbo.best_ask, cfg.quote_tick_offset, cfg.max_execution_slippage_bps)
                    .await
                {
                    Ok(report) if report.status == ExecutionStatus::Filled => {
                        let exit_price = report.fill_px_avg.unwrap_or(bbo.mid);
                        ctx.events.publish(Event::ExecutionReport(&report)).await;
                        self.close_position(cfg, ctx, exit_price, reason).await;
                    }
                    Ok(report) => {
                        ctx.events.publish(Event::ExecutionReport(&report)).await;
                    }
                    Err(e) => log::warn!("[{}] taker-fallback exit failed: {}", self.symbol, e),
                }
                return;
            }
        }

        let tick = match ctx.exchange.tick_size(&self.symbol) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("[{}] tick_size lookup failed: {}", self.symbol, e);
                return;
            }
        };
        let raw_px = quote_price(side, &bbo, cfg.quote_tick_offset, tick);
        let limit_px = match ctx.exchange.round_price_to_tick(&self.symbol, raw_px) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("[{}] round_price_to_tick failed: {}", self.symbol, e);
                return;
            }
        };

        self.last_quote_action_ms = Some(ctx.now_ms);
        match ctx.exchange.place_post_only_limit(&self.symbol, side, quantity, limit_px, true).await {
            Ok(report) => match report.status {
                ExecutionStatus::Resting => {
                    self.active_order = Some(ActiveOrder {
                        id: report.order_id.clone().unwrap_or_default(),
                        side,
                        price: limit_px,
                        size: quantity,
                        placed_at: ctx.now_ms,
                        intent: OrderIntent::Exit,
                        requote_count,
                        reduce_only: true,
                    });
                    ctx.events.publish(Event::ExecutionReport(&report)).await;
                    self.set_state(LifecycleState::Exiting, ctx).await;
                }
                ExecutionStatus::Filled => {
                    let exit_price = report.fill_px_avg.unwrap_or(limit_px);
                    ctx.events.publish(Event::ExecutionReport(&report)).await;
                    self.close_position(cfg, ctx, exit_price, reason).await;
                }
                ExecutionStatus::Rejected => {
                    // Position is still open and unprotected by a resting
                    // order; fall back to OPEN so the next tick's trigger
                    // re-evaluation retries the exit.
                    ctx.events.publish(Event::ExecutionReport(&report)).await;
                    self.active_order = None;
                    self.set_state(LifecycleState::Open, ctx).await;
                }
                _ => {}
            },
            Err(e) => log::warn!("[{}] place_exit failed: {}", self.symbol, e),
        }
    }

    async fn close_position(&mut self, cfg: &EngineConfig, ctx: &mut TickContext<'_>, exit_price: f64, reason: ExecReason) {
        if let Some(position) = ctx.positions.remove(&self.symbol) {
            let pnl = match position.side {
                Side::Buy => (exit_price - position.entry_price) * position.quantity,
                Side::Sell => (position.entry_price - exit_price) * position.quantity,
            };
            ctx.risk.record_trade_close(&self.symbol, pnl, ctx.now_utc);
            let closed = TradeClosed { ts: ctx.now_ms, symbol: self.symbol.clone(), realized_pnl: pnl, reason };
            ctx.events.publish(Event::TradeClosed(&closed)).await;
            ctx.trade_sink.record_close(self.symbol.as_str(), pnl, reason, ctx.now_ms).await;
            ctx.trade_sink.update_balance(ctx.positions.balance()).await;
        }
        self.active_order = None;
        self.pending_exit_reason = None;
        self.cooldown_until_ms = ctx.now_ms + cfg.cooldown_seconds * 1_000;
        self.set_state(LifecycleState::Cooldown, ctx).await;
    }

    // ── EXITING ───────────────────────────────────────────────────────

    async fn handle_exiting(&mut self, cfg: &EngineConfig, ctx: &mut TickContext<'_>, regime_cache: &mut RegimeCache) {
        let order = match self.active_order.clone() {
            Some(o) => o,
            None => return,
        };
        let reason = self.pending_exit_reason.unwrap_or(ExecReason::NoFill);

        match ctx.exchange.get_order_status(&self.symbol, &order.id).await {
            Ok(ExecutionStatus::Filled) => {
                self.active_order = None;
                self.close_position(cfg, ctx, order.price, reason).await;
            }
            Ok(ExecutionStatus::Rejected) => {
                self.active_order = None;
                self.set_state(LifecycleState::Open, ctx).await;
            }
            Ok(_) => {
                let age_ms = ctx.now_ms.saturating_sub(order.placed_at);
                if age_ms <= cfg.max_queue_wait_ms {
                    return;
                }
                let _ = ctx.exchange.cancel_order(&self.symbol, &order.id).await;
                self.active_order = None;

                let rate_ok = self
                    .last_quote_action_ms
                    .map(|t| ctx.now_ms.saturating_sub(t) >= 1_000 / cfg.max_requote_per_sec.max(1) as u64)
                    .unwrap_or(true);

                if rate_ok {
                    self.place_exit(cfg, ctx, regime_cache, reason, order.requote_count + 1).await;
                } else {
                    self.set_state(LifecycleState::Open, ctx).await;
                }
            }
            Err(e) => log::warn!("[{}] get_order_status (exiting) failed: {}", self.symbol, e),
        }
    }

    // ── COOLDOWN ──────────────────────────────────────────────────────

    async fn handle_cooldown(&mut self, ctx: &mut TickContext<'_>) {
        if ctx.now_ms >= self.cooldown_until_ms {
            self.set_state(LifecycleState::Idle, ctx).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LoggingEventBus;
    use crate::persistence::NullTradeSink;
    use crate::exchange::dry_run::DryRunExchange;
    use crate::exchange::meta::AssetMeta;
    use crate::types::{Breakout, RegimeMetrics, RegimeSignal};
    use chrono::Utc;

    fn symbol() -> Symbol {
        Symbol::new("BTC-USDC")
    }

    fn cfg() -> EngineConfig {
        let mut c = EngineConfig::default();
        c.min_net_edge_bps = -1_000.0;
        c.spread_bps_est_max = 1_000.0;
        c.regime_eval_interval_ms = 0;
        c
    }

    fn passing_regime(now_ms: u64, symbol: &Symbol) -> RegimeSignal {
        RegimeSignal {
            symbol: symbol.clone(),
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

    fn gateway() -> DryRunExchange {
        let mut gw = DryRunExchange::new(1_000.0, -1.0, 3.5, 0);
        gw.seed_meta(&symbol(), AssetMeta { tick_size: 0.1, size_decimals: 3, max_leverage: 20 });
        gw.seed_bbo(&symbol(), 99.9, 100.1);
        gw
    }

    #[tokio::test]
    async fn idle_pass_places_a_resting_entry_and_moves_to_entering() {
        let cfg = cfg();
        let mut gw = gateway();
        let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
        let mut positions = PositionTracker::new(cfg.starting_balance);
        let bus = LoggingEventBus;
        let mut regime_cache = RegimeCache::new(5_000);
        regime_cache.put(passing_regime(1_000, &symbol()));

        let mut lc = Lifecycle::new(symbol());
        let mut ctx = TickContext {
            exchange: &mut gw,
            risk: &mut risk,
            positions: &mut positions,
            events: &bus,
            trade_sink: &NullTradeSink,
            bbo: Some(Bbo::new(99.9, 100.1, 1_000)),
            now_ms: 1_000,
            now_utc: Utc::now(),
        };
        lc.tick(&cfg, &mut ctx, &mut regime_cache).await;

        assert_eq!(lc.state(), LifecycleState::Entering);
    }

    #[tokio::test]
    async fn entering_fill_transitions_to_open_with_a_position() {
        let cfg = cfg();
        let mut gw = gateway();
        // fill_latency_ms=0 means the dry-run fills on the very next status poll.
        let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
        let mut positions = PositionTracker::new(cfg.starting_balance);
        let bus = LoggingEventBus;
        let mut regime_cache = RegimeCache::new(5_000);
        regime_cache.put(passing_regime(1_000, &symbol()));

        let mut lc = Lifecycle::new(symbol());
        {
            let mut ctx = TickContext {
                exchange: &mut gw,
                risk: &mut risk,
                positions: &mut positions,
                events: &bus,
            trade_sink: &NullTradeSink,
                bbo: Some(Bbo::new(99.9, 100.1, 1_000)),
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
                bbo: Some(Bbo::new(99.9, 100.1, 1_100)),
                now_ms: 1_100,
                now_utc: Utc::now(),
            };
            lc.tick(&cfg, &mut ctx, &mut regime_cache).await;
        }
        assert_eq!(lc.state(), LifecycleState::Open);
        assert!(positions.get(&symbol()).is_some());
    }

    #[tokio::test]
    async fn entering_timeout_with_gate_now_failing_returns_to_idle() {
        let mut cfg = cfg();
        cfg.max_queue_wait_ms = 0;
        cfg.max_requote_per_sec = 0; // 1000/0 division guarded by max(1)
        let mut gw = DryRunExchange::new(1_000.0, -1.0, 3.5, 10_000); // never fills within the test
        gw.seed_meta(&symbol(), AssetMeta { tick_size: 0.1, size_decimals: 3, max_leverage: 20 });
        gw.seed_bbo(&symbol(), 99.9, 100.1);

        let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
        let mut positions = PositionTracker::new(cfg.starting_balance);
        let bus = LoggingEventBus;
        let mut regime_cache = RegimeCache::new(5_000);
        // Regime intentionally fails volume_spike on the second evaluation
        // so the requote attempt after timeout cannot pass the gate again.
        let mut regime = passing_regime(1_000, &symbol());
        regime.volume_spike = false;
        regime_cache.put(regime);

        let mut lc = Lifecycle::new(symbol());
        lc.entry_vol5m = 0.0005;
        lc.active_order = Some(ActiveOrder {
            id: "sim-1".to_string(),
            side: Side::Buy,
            price: 100.0,
            size: 1.0,
            placed_at: 0,
            intent: OrderIntent::Entry,
            requote_count: 0,
            reduce_only: false,
        });
        lc.state = LifecycleState::Entering;

        let mut ctx = TickContext {
            exchange: &mut gw,
            risk: &mut risk,
            positions: &mut positions,
            events: &bus,
            trade_sink: &NullTradeSink,
            bbo: Some(Bbo::new(99.9, 100.1, 5_000)),
            now_ms: 5_000,
            now_utc: Utc::now(),
        };
        lc.tick(&cfg, &mut ctx, &mut regime_cache).await;

        assert_eq!(lc.state(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn open_hard_stop_loss_triggers_a_reduce_only_exit() {
        let cfg = cfg();
        let mut gw = gateway();
        let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
        let mut positions = PositionTracker::new(cfg.starting_balance);
        positions.insert(Position {
            id: "p1".into(),
            symbol: symbol(),
            side: Side::Buy,
            entry_price: 100.0,
            quantity: 1.0,
            leverage: 1.0,
            opened_at: 0,
            take_profit_price: 110.0,
            stop_loss_price: 95.0,
            unrealized_pnl: 0.0,
            max_pnl_percent: 0.0,
            trailing_activated: false,
        });
        let bus = LoggingEventBus;
        let mut regime_cache = RegimeCache::new(5_000);

        let mut lc = Lifecycle::new(symbol());
        lc.state = LifecycleState::Open;

        gw.seed_bbo(&symbol(), 94.0, 94.2);
        let mut ctx = TickContext {
            exchange: &mut gw,
            risk: &mut risk,
            positions: &mut positions,
            events: &bus,
            trade_sink: &NullTradeSink,
            bbo: Some(Bbo::new(94.0, 94.2, 1_000)),
            now_ms: 1_000,
            now_utc: Utc::now(),
        };
        lc.tick(&cfg, &mut ctx, &mut regime_cache).await;

        assert_eq!(lc.state(), LifecycleState::Exiting);
    }

    #[tokio::test]
    async fn observe_reconciliation_closes_ghost_and_enters_cooldown() {
        let cfg = cfg();
        let mut gw = gateway();
        let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
        let mut positions = PositionTracker::new(cfg.starting_balance);
        let bus = LoggingEventBus;

        let mut lc = Lifecycle::new(symbol());
        lc.state = LifecycleState::Open;

        let mut ctx = TickContext {
            exchange: &mut gw,
            risk: &mut risk,
            positions: &mut positions,
            events: &bus,
            trade_sink: &NullTradeSink,
            bbo: None,
            now_ms: 1_000,
            now_utc: Utc::now(),
        };
        lc.observe_reconciliation(&cfg, &mut ctx, &[symbol()]).await;

        assert_eq!(lc.state(), LifecycleState::Cooldown);
    }

    #[tokio::test]
    async fn cooldown_returns_to_idle_once_elapsed() {
        let cfg = cfg();
        let mut gw = gateway();
        let mut risk = RiskLedger::new(&cfg, cfg.starting_balance, Utc::now());
        let mut positions = PositionTracker::new(cfg.starting_balance);
        let bus = LoggingEventBus;
        let mut regime_cache = RegimeCache::new(5_000);

        let mut lc = Lifecycle::new(symbol());
        lc.state = LifecycleState::Cooldown;
        lc.cooldown_until_ms = 1_000;

        let mut ctx = TickContext {
            exchange: &mut gw,
            risk: &mut risk,
            positions: &mut positions,
            events: &bus,
            trade_sink: &NullTradeSink,
            bbo: None,
            now_ms: 1_500,
            now_utc: Utc::now(),
        };
        lc.tick(&cfg, &mut ctx, &mut regime_cache).await;

        assert_eq!(lc.state(), LifecycleState::Idle);
    }
}

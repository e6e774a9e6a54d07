//! Deterministic dry-run simulator (§4.1 "Dry-run mode").
//!
//! An in-memory balance/position ledger that fills orders immediately
//! against the requested price and charges maker/taker fees, with no
//! network I/O. Implements the typed `ExchangeClient` trait with a
//! configurable fill latency for resting (post-only) orders, and
//! seedable BBO/candle data so C2/C3/C4 can be exercised end-to-end
//! without a live feed.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;

use super::meta::{min_order_size, round_price_to_tick, AssetMeta, MetaCache};
use super::ExchangeClient;
use crate::error::GatewayError;
use crate::types::{
    Account, Bbo, BookLevel, BookSnapshot, Candle, ExecReason, ExecutionReport, ExecutionStatus,
    MakerOrTaker, OrderIntent, Position, Side, Symbol,
};

struct RestingOrder {
    symbol: Symbol,
    side: Side,
    price: f64,
    size: f64,
    reduce_only: bool,
    placed_at: Instant,
}

/// Simulated exchange used when `dry_run = true`. Every method is
/// synchronous in effect (no `.await` ever suspends on I/O) but keeps
/// the `async fn` signatures the trait demands.
pub struct DryRunExchange {
    pub balance: f64,
    maker_fee_bps: f64,
    taker_fee_bps: f64,
    fill_latency_ms: u64,

    meta: MetaCache,
    positions: HashMap<Symbol, Position>,
    leverage: HashMap<Symbol, f64>,
    resting: HashMap<String, RestingOrder>,
    bbo: HashMap<Symbol, (f64, f64)>,
    candles: HashMap<Symbol, Vec<Candle>>,
    next_order_id: u64,
}

impl DryRunExchange {
    pub fn new(starting_balance: f64, maker_fee_bps: f64, taker_fee_bps: f64, fill_latency_ms: u64) -> Self {
        Self {
            balance: starting_balance,
            maker_fee_bps,
            taker_fee_bps,
            fill_latency_ms,
            meta: MetaCache::new(),
            positions: HashMap::new(),
            leverage: HashMap::new(),
            resting: HashMap::new(),
            bbo: HashMap::new(),
            candles: HashMap::new(),
            next_order_id: 1,
        }
    }

    pub fn seed_meta(&mut self, symbol: &Symbol, meta: AssetMeta) {
        self.meta.insert(symbol.clone(), meta);
    }

    pub fn seed_bbo(&mut self, symbol: &Symbol, best_bid: f64, best_ask: f64) {
        self.bbo.insert(symbol.clone(), (best_bid, best_ask));
    }

    pub fn seed_candles(&mut self, symbol: &Symbol, candles: Vec<Candle>) {
        self.candles.insert(symbol.clone(), candles);
    }

    fn fee_bps(&self, maker: bool) -> f64 {
        if maker {
            self.maker_fee_bps
        } else {
            self.taker_fee_bps
        }
    }

    fn next_id(&mut self) -> String {
        let id = self.next_order_id;
        self.next_order_id += 1;
        format!("sim-{}", id)
    }

    fn apply_fill(&mut self, symbol: &Symbol, side: Side, size: f64, price: f64, reduce_only: bool, maker: bool) -> f64 {
        let notional = size * price;
        let fee = notional * (self.fee_bps(maker) / 10_000.0);
        self.balance -= fee;

        if reduce_only {
            if let Some(existing) = self.positions.get(symbol).cloned() {
                let qty_closed = size.min(existing.quantity);
                let pnl = match existing.side {
                    Side::Buy => (price - existing.entry_price) * qty_closed,
                    Side::Sell => (existing.entry_price - price) * qty_closed,
                };
                self.balance += pnl;
                if qty_closed >= existing.quantity {
                    self.positions.remove(symbol);
                } else {
                    let mut reduced = existing;
                    reduced.quantity -= qty_closed;
                    self.positions.insert(symbol.clone(), reduced);
                }
            }
        } else {
            let leverage = *self.leverage.get(symbol).unwrap_or(&1.0);
            self.positions.insert(
                symbol.clone(),
                Position {
                    id: format!("pos-{}", symbol.as_str()),
                    symbol: symbol.clone(),
                    side,
                    entry_price: price,
                    quantity: size,
                    leverage,
                    opened_at: 0,
                    take_profit_price: 0.0,
                    stop_loss_price: 0.0,
                    unrealized_pnl: 0.0,
                    max_pnl_percent: 0.0,
                    trailing_activated: false,
                },
            );
        }
        fee
    }
}

#[async_trait]
impl ExchangeClient for DryRunExchange {
    async fn set_leverage(&mut self, symbol: &Symbol, leverage: f64) -> Result<(), GatewayError> {
        self.leverage.insert(symbol.clone(), leverage);
        Ok(())
    }

    async fn get_account(&mut self) -> Result<Account, GatewayError> {
        Ok(Account {
            balance: self.balance,
            positions: self.positions.values().cloned().collect(),
        })
    }

    async fn get_best_bid_ask(&mut self, symbol: &Symbol) -> Result<Bbo, GatewayError> {
        let (bid, ask) = self
            .bbo
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::UnknownAsset(symbol.as_str().to_string()))?;
        Ok(Bbo::new(bid, ask, 0))
    }

    async fn get_order_book(&mut self, symbol: &Symbol, _depth: u32) -> Result<BookSnapshot, GatewayError> {
        let (bid, ask) = self
            .bbo
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::UnknownAsset(symbol.as_str().to_string()))?;
        Ok(BookSnapshot {
            bids: vec![BookLevel { price: bid, size: 1.0 }],
            asks: vec![BookLevel { price: ask, size: 1.0 }],
            timestamp: 0,
        })
    }

    async fn get_candles(&mut self, symbol: &Symbol, _interval_minutes: u32, limit: u32) -> Result<Vec<Candle>, GatewayError> {
        let all = self
            .candles
            .get(symbol)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownAsset(symbol.as_str().to_string()))?;
        let n = (limit as usize).min(all.len());
        Ok(all[all.len() - n..].to_vec())
    }

    async fn get_order_status(&mut self, _symbol: &Symbol, order_id: &str) -> Result<ExecutionStatus, GatewayError> {
        match self.resting.get(order_id) {
            None => Ok(ExecutionStatus::Unfilled),
            Some(order) => {
                if order.placed_at.elapsed().as_millis() as u64 >= self.fill_latency_ms {
                    let (symbol, side, price, size, reduce_only) =
                        (order.symbol.clone(), order.side, order.price, order.size, order.reduce_only);
                    self.resting.remove(order_id);
                    self.apply_fill(&symbol, side, size, price, reduce_only, true);
                    Ok(ExecutionStatus::Filled)
                } else {
                    Ok(ExecutionStatus::Resting)
                }
            }
        }
    }

    async fn cancel_order(&mut self, _symbol: &Symbol, order_id: &str) -> Result<(), GatewayError> {
        self.resting.remove(order_id);
        Ok(())
    }

    async fn place_ioc_limit(
        &mut self,
        symbol: &Symbol,
        side: Side,
        size: f64,
        limit_px: f64,
        reduce_only: bool,
    ) -> Result<ExecutionReport, GatewayError> {
        let fee = self.apply_fill(symbol, side, size, limit_px, reduce_only, false);
        Ok(ExecutionReport {
            ts: 0,
            symbol: symbol.clone(),
            intent: if reduce_only { OrderIntent::Exit } else { OrderIntent::Entry },
            side,
            requested_px: limit_px,
            fill_px_avg: Some(limit_px),
            filled_size: size,
            maker_or_taker: Some(MakerOrTaker::Taker),
            fee_paid: fee,
            slippage_bps: Some(0.0),
            status: ExecutionStatus::Filled,
            reason: None,
            order_id: None,
        })
    }

    async fn place_post_only_limit(
        &mut self,
        symbol: &Symbol,
        side: Side,
        size: f64,
        limit_px: f64,
        reduce_only: bool,
    ) -> Result<ExecutionReport, GatewayError> {
        let id = self.next_id();
        self.resting.insert(
            id.clone(),
            RestingOrder {
                symbol: symbol.clone(),
                side,
                price: limit_px,
                size,
                reduce_only,
                placed_at: Instant::now(),
            },
        );
        Ok(ExecutionReport {
            ts: 0,
            symbol: symbol.clone(),
            intent: if reduce_only { OrderIntent::Exit } else { OrderIntent::Entry },
            side,
            requested_px: limit_px,
            fill_px_avg: None,
            filled_size: 0.0,
            maker_or_taker: Some(MakerOrTaker::Maker),
            fee_paid: 0.0,
            slippage_bps: None,
            status: ExecutionStatus::Resting,
            reason: None,
            order_id: Some(id),
        })
    }

    fn round_price_to_tick(&self, symbol: &Symbol, px: f64) -> Result<f64, GatewayError> {
        let meta = self.meta.get(symbol)?;
        Ok(round_price_to_tick(px, meta.tick_size))
    }

    fn tick_size(&self, symbol: &Symbol) -> Result<f64, GatewayError> {
        Ok(self.meta.get(symbol)?.tick_size)
    }

    fn min_order_size(&self, symbol: &Symbol) -> Result<f64, GatewayError> {
        Ok(min_order_size(self.meta.get(symbol)?.size_decimals))
    }
}

//! Exchange Gateway (C1, §4.1).
//!
//! A typed wrapper over order placement, cancellation, status, account
//! and book/candle fetch, plus tick/size rounding: an async trait with
//! a dry-run/live split behind `Box<dyn ExchangeClient>`, widened to
//! the symbol-typed operations C6/C7/C8 need, plus a shared
//! bounded-slippage IOC wrapper so every taker-fallback call site
//! enforces the same slippage bound instead of approximating it ad hoc.

pub mod dry_run;
pub mod live;
pub mod meta;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::types::{
    Account, BookSnapshot, Candle, ExecReason, ExecutionReport, ExecutionStatus, MakerOrTaker,
    OrderIntent, Side, Symbol,
};

pub use dry_run::DryRunExchange;
pub use live::LiveExchange;
pub use meta::AssetMeta;

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn set_leverage(&mut self, symbol: &Symbol, leverage: f64) -> Result<(), GatewayError>;

    async fn get_account(&mut self) -> Result<Account, GatewayError>;

    async fn get_best_bid_ask(&mut self, symbol: &Symbol) -> Result<crate::types::Bbo, GatewayError>;

    async fn get_order_book(&mut self, symbol: &Symbol, depth: u32) -> Result<BookSnapshot, GatewayError>;

    async fn get_candles(
        &mut self,
        symbol: &Symbol,
        interval_minutes: u32,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError>;

    async fn get_order_status(
        &mut self,
        symbol: &Symbol,
        order_id: &str,
    ) -> Result<ExecutionStatus, GatewayError>;

    async fn cancel_order(&mut self, symbol: &Symbol, order_id: &str) -> Result<(), GatewayError>;

    /// Places an immediate-or-cancel limit order. Never retried on
    /// semantic rejection (§7).
    async fn place_ioc_limit(
        &mut self,
        symbol: &Symbol,
        side: Side,
        size: f64,
        limit_px: f64,
        reduce_only: bool,
    ) -> Result<ExecutionReport, GatewayError>;

    /// Places a post-only (ALO) good-til-cancel limit order.
    async fn place_post_only_limit(
        &mut self,
        symbol: &Symbol,
        side: Side,
        size: f64,
        limit_px: f64,
        reduce_only: bool,
    ) -> Result<ExecutionReport, GatewayError>;

    /// Nearest valid multiple of the asset's tick size.
    fn round_price_to_tick(&self, symbol: &Symbol, px: f64) -> Result<f64, GatewayError>;

    fn tick_size(&self, symbol: &Symbol) -> Result<f64, GatewayError>;

    /// `10^(-size_decimals)` for the asset.
    fn min_order_size(&self, symbol: &Symbol) -> Result<f64, GatewayError>;

    /// Bounded-slippage IOC entry (§4.1). `k` ticks through the far
    /// touch; skips the placement entirely (no order, no network call)
    /// if the resulting slippage exceeds `max_slippage_bps`.
    async fn enter_position(
        &mut self,
        symbol: &Symbol,
        side: Side,
        size: f64,
        mid: f64,
        best_bid: f64,
        best_ask: f64,
        tick_offset: u32,
        max_slippage_bps: f64,
    ) -> Result<ExecutionReport, GatewayError> {
        bounded_slippage_ioc(self, symbol, side, size, mid, best_bid, best_ask, tick_offset, max_slippage_bps, false).await
    }

    /// Identical to `enter_position` but reduce-only; the exchange is
    /// relied upon to prevent a position flip.
    async fn exit_position(
        &mut self,
        symbol: &Symbol,
        side: Side,
        size: f64,
        mid: f64,
        best_bid: f64,
        best_ask: f64,
        tick_offset: u32,
        max_slippage_bps: f64,
    ) -> Result<ExecutionReport, GatewayError> {
        bounded_slippage_ioc(self, symbol, side, size, mid, best_bid, best_ask, tick_offset, max_slippage_bps, true).await
    }
}

async fn bounded_slippage_ioc<C: ExchangeClient + ?Sized>(
    gateway: &mut C,
    symbol: &Symbol,
    side: Side,
    size: f64,
    mid: f64,
    best_bid: f64,
    best_ask: f64,
    tick_offset: u32,
    max_slippage_bps: f64,
    reduce_only: bool,
) -> Result<ExecutionReport, GatewayError> {
    let tick = gateway.tick_size(symbol)?;
    let offset = tick_offset as f64 * tick;
    let raw_px = match side {
        Side::Buy => best_ask + offset,
        Side::Sell => best_bid - offset,
    };
    let limit_px = gateway.round_price_to_tick(symbol, raw_px)?;

    let slippage_bps = if mid > 0.0 {
        (limit_px - mid).abs() / mid * 10_000.0
    } else {
        f64::INFINITY
    };

    if slippage_bps > max_slippage_bps {
        return Ok(ExecutionReport {
            ts: 0,
            symbol: symbol.clone(),
            intent: if reduce_only { OrderIntent::Exit } else { OrderIntent::Entry },
            side,
            requested_px: limit_px,
            fill_px_avg: None,
            filled_size: 0.0,
            maker_or_taker: Some(MakerOrTaker::Taker),
            fee_paid: 0.0,
            slippage_bps: Some(slippage_bps),
            status: ExecutionStatus::Skipped,
            reason: Some(ExecReason::SkipExecSlippage),
            order_id: None,
        });
    }

    gateway
        .place_ioc_limit(symbol, side, size, limit_px, reduce_only)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::dry_run::DryRunExchange;

    fn symbol() -> Symbol {
        Symbol::new("BTC-USDC")
    }

    #[tokio::test]
    async fn enter_position_skips_when_slippage_exceeds_bound() {
        let mut gw = DryRunExchange::new(1_000.0, -1.0, 3.5, 0);
        gw.seed_meta(&symbol(), AssetMeta { tick_size: 0.1, size_decimals: 3, max_leverage: 20 });
        // best_ask far from mid guarantees the bound is blown.
        let report = gw
            .enter_position(&symbol(), Side::Buy, 1.0, 100.0, 99.0, 200.0, 1, 5.0)
            .await
            .unwrap();
        assert_eq!(report.status, ExecutionStatus::Skipped);
        assert_eq!(report.reason, Some(ExecReason::SkipExecSlippage));
    }

    #[tokio::test]
    async fn enter_position_places_ioc_within_bound() {
        let mut gw = DryRunExchange::new(1_000.0, -1.0, 3.5, 0);
        gw.seed_meta(&symbol(), AssetMeta { tick_size: 0.1, size_decimals: 3, max_leverage: 20 });
        let report = gw
            .enter_position(&symbol(), Side::Buy, 1.0, 100.0, 99.9, 100.1, 1, 50.0)
            .await
            .unwrap();
        assert_eq!(report.status, ExecutionStatus::Filled);
    }
}

//! Live Hyperliquid-backed gateway (§4.1, §6 "External SDK expectations").
//!
//! HTTP/signing plumbing against `/info` and `/exchange`: POSTs with
//! 2-second response caches, `coin_to_asset`/`asset_info` from the
//! `meta` universe call, all behind the typed `ExchangeClient` trait
//! and `GatewayError` taxonomy, with the retry policy from
//! `config::RetryPolicy` applied to transient failures per §4.1/§7.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::meta::{min_order_size, round_price_to_tick, AssetMeta, MetaCache};
use super::ExchangeClient;
use crate::config::RetryPolicy;
use crate::error::GatewayError;
use crate::signing::{sign_cancel_action, sign_l1_action, ActionWire, LimitOrderWire, OrderRequest, OrderTypeWire};
use crate::types::{
    Account, Bbo, BookLevel, BookSnapshot, Candle, ExecutionReport, ExecutionStatus, MakerOrTaker,
    OrderIntent, Position, Side, Symbol,
};

const CACHE_DURATION: Duration = Duration::from_secs(2);

pub struct LiveExchange {
    base_url: String,
    account_address: String,
    private_key: String,
    client: reqwest::Client,
    retry_policy: RetryPolicy,

    coin_to_asset: HashMap<String, u32>,
    meta: MetaCache,

    cached_balance: Option<(f64, Instant)>,
    cached_positions: Option<(Vec<Position>, Instant)>,
}

impl LiveExchange {
    pub fn new(account_address: String, private_key: String, retry_policy: RetryPolicy) -> Self {
        Self {
            base_url: "https://api.hyperliquid.xyz".to_string(),
            account_address,
            private_key,
            client: reqwest::Client::new(),
            retry_policy,
            coin_to_asset: HashMap::new(),
            meta: MetaCache::new(),
            cached_balance: None,
            cached_positions: None,
        }
    }

    /// Fetches the asset universe and refreshes `meta`/`coin_to_asset`.
    /// Called at startup and whenever `meta.needs_refresh()` (hourly).
    pub async fn refresh_meta(&mut self) -> Result<(), GatewayError> {
        log::info!("Fetching exchange metadata (universe)...");
        let payload = serde_json::json!({ "type": "meta" });
        let data = self.post_info_retried(payload).await?;

        let mut entries = HashMap::new();
        self.coin_to_asset.clear();
        if let Some(universe) = data["universe"].as_array() {
            for (i, asset) in universe.iter().enumerate() {
                if let Some(name) = asset["name"].as_str() {
                    let asset_idx = i as u32;
                    self.coin_to_asset.insert(name.to_string(), asset_idx);

                    let sz_decimals = asset["szDecimals"].as_u64().unwrap_or(4) as u32;
                    let max_leverage = asset["maxLeverage"].as_u64().unwrap_or(20) as u32;
                    let tick_size = 10f64.powi(-(sz_decimals as i32 + 1));
                    entries.insert(
                        Symbol::new(name),
                        AssetMeta { tick_size, size_decimals: sz_decimals, max_leverage },
                    );
                }
            }
        }
        log::info!("Loaded {} assets from universe.", entries.len());
        self.meta.replace_all(entries);
        Ok(())
    }

    async fn ensure_meta_fresh(&mut self) -> Result<(), GatewayError> {
        if self.meta.needs_refresh() {
            self.refresh_meta().await?;
        }
        Ok(())
    }

    fn asset_idx(&self, symbol: &Symbol) -> Result<u32, GatewayError> {
        self.coin_to_asset
            .get(symbol.as_str())
            .copied()
            .ok_or_else(|| GatewayError::UnknownAsset(symbol.as_str().to_string()))
    }

    async fn post_info(&self, payload: serde_json::Value) -> Result<serde_json::Value, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/info", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(GatewayError::RateLimited);
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        if let Some(err) = data["error"].as_str() {
            if err.contains("rate limited") {
                return Err(GatewayError::RateLimited);
            }
        }

        Ok(data)
    }

    /// Retries transient/rate-limited `/info` calls with the configured
    /// exponential backoff; semantic errors never reach this path since
    /// `/info` has no concept of order rejection.
    async fn post_info_retried(&self, payload: serde_json::Value) -> Result<serde_json::Value, GatewayError> {
        let mut delay = self.retry_policy.base_delay;
        let mut attempt = 0;
        loop {
            match self.post_info(payload.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < self.retry_policy.max_attempts => {
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    delay = (delay.mul_f64(self.retry_policy.multiplier)).min(self.retry_policy.max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_exchange(
        &self,
        action: serde_json::Value,
        nonce: u64,
        signature: crate::signing::Signature,
    ) -> Result<serde_json::Value, GatewayError> {
        let payload = serde_json::json!({
            "action": action,
            "nonce": nonce,
            "signature": signature,
            "vaultAddress": serde_json::Value::Null,
        });

        let resp = self
            .client
            .post(format!("{}/exchange", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(GatewayError::RateLimited);
        }

        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        let data: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| GatewayError::Transient(e.to_string()))?;

        if let Some(status) = data["status"].as_str() {
            if status == "err" {
                let err_msg = data["response"]
                    .as_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| data["response"]["data"]["error"].as_str().unwrap_or_default().to_string());

                if err_msg.contains("rate limited") || err_msg.contains("cumulative requests") {
                    return Err(GatewayError::RateLimited);
                }
                return Err(GatewayError::Semantic(err_msg));
            }
        }

        Ok(data)
    }

    /// Order placement is non-idempotent: retried only for connection
    /// level failures (transient/rate-limited), never semantic
    /// rejections (§4.1/§7).
    async fn place_order(
        &mut self,
        symbol: &Symbol,
        side: Side,
        size: f64,
        limit_px: f64,
        reduce_only: bool,
        tif: &str,
    ) -> Result<ExecutionReport, GatewayError> {
        self.ensure_meta_fresh().await?;
        let asset_idx = self.asset_idx(symbol)?;
        let is_buy = matches!(side, Side::Buy);
        let nonce = chrono::Utc::now().timestamp_millis() as u64;

        let orders = vec![OrderRequest {
            asset: asset_idx,
            is_buy,
            limit_px: float_to_wire(limit_px),
            sz: float_to_wire(size),
            reduce_only,
            order_type: OrderTypeWire::Limit(LimitOrderWire { tif: tif.to_string() }),
        }];

        let action = ActionWire { r#type: "order".to_string(), orders, grouping: "na".to_string() };

        let mut delay = self.retry_policy.base_delay;
        let mut attempt = 0;
        loop {
            let (sig, action_json) = sign_l1_action(&self.private_key, action.clone(), nonce).await?;
            match self.post_exchange(action_json, nonce, sig).await {
                Ok(result) => {
                    let status = parse_order_status(&result);
                    let order_id = parse_order_id(&result);
                    return Ok(ExecutionReport {
                        ts: nonce,
                        symbol: symbol.clone(),
                        intent: if reduce_only { OrderIntent::Exit } else { OrderIntent::Entry },
                        side,
                        requested_px: limit_px,
                        fill_px_avg: if status == ExecutionStatus::Filled { Some(limit_px) } else { None },
                        filled_size: if status == ExecutionStatus::Filled { size } else { 0.0 },
                        maker_or_taker: Some(if tif == "Alo" { MakerOrTaker::Maker } else { MakerOrTaker::Taker }),
                        fee_paid: 0.0,
                        slippage_bps: None,
                        status,
                        reason: None,
                        order_id,
                    });
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.retry_policy.max_attempts => {
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    delay = (delay.mul_f64(self.retry_policy.multiplier)).min(self.retry_policy.max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn parse_order_status(result: &serde_json::Value) -> ExecutionStatus {
    if let Some(statuses) = result["response"]["data"]["statuses"].as_array() {
        if let Some(s) = statuses.first() {
            if s.get("filled").is_some() {
                return ExecutionStatus::Filled;
            }
            if s.get("resting").is_some() {
                return ExecutionStatus::Resting;
            }
            if s.get("error").is_some() {
                return ExecutionStatus::Rejected;
            }
        }
    }
    ExecutionStatus::Unfilled
}

/// Extracts Hyperliquid's `oid` from a resting or filled order status,
/// so the caller can later poll `get_order_status`/`cancel_order` on it.
/// IOC reports that never rest still carry one if filled immediately;
/// callers treat either as an opaque id.
fn parse_order_id(result: &serde_json::Value) -> Option<String> {
    let statuses = result["response"]["data"]["statuses"].as_array()?;
    let s = statuses.first()?;
    let oid = s["resting"]["oid"].as_u64().or_else(|| s["filled"]["oid"].as_u64())?;
    Some(oid.to_string())
}

/// Matches the Python SDK's `float_to_wire`: round to 8 decimals, strip
/// trailing zeros.
fn float_to_wire(x: f64) -> String {
    let rounded = format!("{:.8}", x);
    if rounded.contains('.') {
        rounded.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        rounded
    }
}

#[async_trait]
impl ExchangeClient for LiveExchange {
    async fn set_leverage(&mut self, symbol: &Symbol, _leverage: f64) -> Result<(), GatewayError> {
        self.ensure_meta_fresh().await?;
        self.asset_idx(symbol)?;
        // Hyperliquid applies leverage via a separate `updateLeverage`
        // L1 action; the cross-margin account default is assumed here
        // and risk is managed through position sizing instead (as in
        // the source this gateway is adapted from).
        Ok(())
    }

    async fn get_account(&mut self) -> Result<Account, GatewayError> {
        if let Some((balance, ts)) = &self.cached_balance {
            if let Some((positions, pts)) = &self.cached_positions {
                if ts.elapsed() < CACHE_DURATION && pts.elapsed() < CACHE_DURATION {
                    return Ok(Account { balance: *balance, positions: positions.clone() });
                }
            }
        }

        let payload = serde_json::json!({ "type": "clearinghouseState", "user": self.account_address });
        let data = self.post_info_retried(payload).await?;

        let withdrawable = data["withdrawable"]
            .as_f64()
            .or_else(|| data["withdrawable"].as_str().and_then(|s| s.parse::<f64>().ok()))
            .unwrap_or(0.0);

        let mut positions = Vec::new();
        if let Some(pos_list) = data["assetPositions"].as_array() {
            for p in pos_list {
                let pos_data = &p["position"];
                let coin = pos_data["coin"].as_str().unwrap_or("").to_string();
                let sz = pos_data["szi"].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
                if sz.abs() < 1e-8 {
                    continue;
                }
                let entry_price = pos_data["entryPx"].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
                let side = if sz > 0.0 { Side::Buy } else { Side::Sell };

                positions.push(Position {
                    id: format!("{}-live", coin),
                    symbol: Symbol::new(coin),
                    side,
                    entry_price,
                    quantity: sz.abs(),
                    leverage: 1.0,
                    opened_at: 0,
                    take_profit_price: 0.0,
                    stop_loss_price: 0.0,
                    unrealized_pnl: pos_data["unrealizedPnl"].as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0),
                    max_pnl_percent: 0.0,
                    trailing_activated: false,
                });
            }
        }

        self.cached_balance = Some((withdrawable, Instant::now()));
        self.cached_positions = Some((positions.clone(), Instant::now()));
        Ok(Account { balance: withdrawable, positions })
    }

    async fn get_best_bid_ask(&mut self, symbol: &Symbol) -> Result<Bbo, GatewayError> {
        let book = self.get_order_book(symbol, 1).await?;
        let bid = book.best_bid().ok_or_else(|| GatewayError::Semantic("empty bid book".to_string()))?;
        let ask = book.best_ask().ok_or_else(|| GatewayError::Semantic("empty ask book".to_string()))?;
        Ok(Bbo::new(bid, ask, chrono::Utc::now().timestamp_millis() as u64))
    }

    async fn get_order_book(&mut self, symbol: &Symbol, depth: u32) -> Result<BookSnapshot, GatewayError> {
        let payload = serde_json::json!({ "type": "l2Book", "coin": symbol.as_str() });
        let data = self.post_info_retried(payload).await?;

        let parse_side = |levels: &serde_json::Value| -> Vec<BookLevel> {
            levels
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .take(depth as usize)
                        .filter_map(|lvl| {
                            let px = lvl["px"].as_str().and_then(|s| s.parse::<f64>().ok())?;
                            let sz = lvl["sz"].as_str().and_then(|s| s.parse::<f64>().ok())?;
                            Some(BookLevel { price: px, size: sz })
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        let levels = &data["levels"];
        Ok(BookSnapshot {
            bids: parse_side(&levels[0]),
            asks: parse_side(&levels[1]),
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
        })
    }

    async fn get_candles(&mut self, symbol: &Symbol, interval_minutes: u32, limit: u32) -> Result<Vec<Candle>, GatewayError> {
        let end_ms = chrono::Utc::now().timestamp_millis() as u64;
        let start_ms = end_ms.saturating_sub(interval_minutes as u64 * 60_000 * limit as u64);
        let payload = serde_json::json!({
            "type": "candleSnapshot",
            "req": {
                "coin": symbol.as_str(),
                "interval": format!("{}m", interval_minutes),
                "startTime": start_ms,
                "endTime": end_ms,
            }
        });
        let data = self.post_info_retried(payload).await?;

        let candles = data
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|c| {
                        Some(Candle {
                            t: c["t"].as_u64()?,
                            o: c["o"].as_str()?.parse().ok()?,
                            h: c["h"].as_str()?.parse().ok()?,
                            l: c["l"].as_str()?.parse().ok()?,
                            c: c["c"].as_str()?.parse().ok()?,
                            v: c["v"].as_str()?.parse().ok()?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(candles)
    }

    async fn get_order_status(&mut self, _symbol: &Symbol, order_id: &str) -> Result<ExecutionStatus, GatewayError> {
        let oid: u64 = order_id.parse().map_err(|_| GatewayError::Semantic(format!("bad order id: {}", order_id)))?;
        let payload = serde_json::json!({ "type": "orderStatus", "user": self.account_address, "oid": oid });
        let data = self.post_info_retried(payload).await?;
        match data["status"].as_str() {
            Some("order") => match data["order"]["status"].as_str() {
                Some("filled") => Ok(ExecutionStatus::Filled),
                Some("open") => Ok(ExecutionStatus::Resting),
                Some("canceled") | Some("rejected") => Ok(ExecutionStatus::Rejected),
                _ => Ok(ExecutionStatus::Unfilled),
            },
            _ => Ok(ExecutionStatus::Unfilled),
        }
    }

    async fn cancel_order(&mut self, symbol: &Symbol, order_id: &str) -> Result<(), GatewayError> {
        let asset_idx = self.asset_idx(symbol)?;
        let oid: u64 = order_id.parse().map_err(|_| GatewayError::Semantic(format!("bad order id: {}", order_id)))?;
        let nonce = chrono::Utc::now().timestamp_millis() as u64;
        let (sig, action_json) = sign_cancel_action(&self.private_key, asset_idx, oid, nonce).await?;
        let result = self.post_exchange(action_json, nonce, sig).await?;
        if result["status"].as_str() == Some("err") {
            return Err(GatewayError::Semantic(result["response"].to_string()));
        }
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
        self.place_order(symbol, side, size, limit_px, reduce_only, "Ioc").await
    }

    async fn place_post_only_limit(
        &mut self,
        symbol: &Symbol,
        side: Side,
        size: f64,
        limit_px: f64,
        reduce_only: bool,
    ) -> Result<ExecutionReport, GatewayError> {
        self.place_order(symbol, side, size, limit_px, reduce_only, "Alo").await
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

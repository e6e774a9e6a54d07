//! Asset metadata cache.
//!
//! Fetches Hyperliquid's `meta` universe (tick size, size decimals, max
//! leverage per asset) and caches it, refreshed at most once an hour,
//! queried by symbol rather than by asset index, per §4.1's "Meta
//! cache" contract.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::GatewayError;
use crate::types::Symbol;

#[derive(Debug, Clone, Copy)]
pub struct AssetMeta {
    pub tick_size: f64,
    pub size_decimals: u32,
    pub max_leverage: u32,
}

const REFRESH_INTERVAL: Duration = Duration::from_secs(3_600);

/// Caches `AssetMeta` per symbol, refreshed at most once an hour.
/// `refresh_fn` is supplied by the gateway implementation (HTTP meta
/// fetch for `LiveExchange`, a fixed table for `DryRunExchange`).
pub struct MetaCache {
    entries: HashMap<Symbol, AssetMeta>,
    last_refresh: Option<Instant>,
}

impl MetaCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            last_refresh: None,
        }
    }

    pub fn needs_refresh(&self) -> bool {
        match self.last_refresh {
            None => true,
            Some(t) => t.elapsed() >= REFRESH_INTERVAL,
        }
    }

    pub fn replace_all(&mut self, entries: HashMap<Symbol, AssetMeta>) {
        self.entries = entries;
        self.last_refresh = Some(Instant::now());
    }

    pub fn insert(&mut self, symbol: Symbol, meta: AssetMeta) {
        self.entries.insert(symbol, meta);
    }

    pub fn get(&self, symbol: &Symbol) -> Result<AssetMeta, GatewayError> {
        self.entries
            .get(symbol)
            .copied()
            .ok_or_else(|| GatewayError::UnknownAsset(symbol.as_str().to_string()))
    }
}

impl Default for MetaCache {
    fn default() -> Self {
        Self::new()
    }
}

pub fn round_price_to_tick(px: f64, tick_size: f64) -> f64 {
    if tick_size <= 0.0 {
        return px;
    }
    (px / tick_size).round() * tick_size
}

pub fn min_order_size(size_decimals: u32) -> f64 {
    10f64.powi(-(size_decimals as i32))
}

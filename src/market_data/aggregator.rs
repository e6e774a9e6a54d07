//! Market-Data Aggregator (C3, §4.3).
//!
//! A rolling window of recent snapshots per symbol feeding a derived
//! signal: the last 5 liquidity-delta snapshots produce a wave
//! direction/strength reading, and an HTTP book fallback gives a
//! steady-state, rate-limited path for when the BBO stream goes stale.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::exchange::ExchangeClient;
use crate::types::{BookSnapshot, Symbol};

const WAVE_WINDOW: usize = 5;
const FALLBACK_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveDirection {
    Up,
    Down,
    Neutral,
}

/// The execution loop's heartbeat record, per §4.3.
#[derive(Debug, Clone)]
pub struct SymbolSnapshot {
    pub symbol: Symbol,
    pub current_price: f64,
    pub ts: u64,
    pub aggregate_bid_liq: f64,
    pub aggregate_ask_liq: f64,
    pub wave_direction: WaveDirection,
    pub wave_strength: f64,
}

struct SymbolState {
    window: VecDeque<(f64, f64)>, // (bid_liq, ask_liq) for the last WAVE_WINDOW snapshots
    last_snapshot: Option<SymbolSnapshot>,
    last_fallback_call: Option<Instant>,
    fallback_cache: Option<(BookSnapshot, Instant)>,
}

impl SymbolState {
    fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WAVE_WINDOW),
            last_snapshot: None,
            last_fallback_call: None,
            fallback_cache: None,
        }
    }

    fn push(&mut self, bid_liq: f64, ask_liq: f64) {
        if self.window.len() == WAVE_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back((bid_liq, ask_liq));
    }

    fn wave(&self) -> (WaveDirection, f64) {
        if self.window.is_empty() {
            return (WaveDirection::Neutral, 0.0);
        }
        let mean: f64 = self.window.iter().map(|(b, a)| b - a).sum::<f64>() / self.window.len() as f64;
        let strength = (mean.abs() * 10.0).min(100.0);
        let direction = if mean > 0.0 {
            WaveDirection::Up
        } else if mean < 0.0 {
            WaveDirection::Down
        } else {
            WaveDirection::Neutral
        };
        (direction, strength)
    }
}

/// Fuses the streaming BBO cache with a rate-limited HTTP book fallback
/// into `SymbolSnapshot`s. Single-process, single-instance: callers
/// share it behind an `Arc`.
pub struct MarketDataAggregator {
    http_fallback_min_interval_ms: u64,
    states: Mutex<HashMap<Symbol, SymbolState>>,
}

impl MarketDataAggregator {
    pub fn new(http_fallback_min_interval_ms: u64) -> Self {
        Self {
            http_fallback_min_interval_ms,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// On every BBO update from C2: construct a snapshot with
    /// `current_price = mid`, forward-copying last-known aggregate
    /// liquidity (§4.3 point 1) since a BBO update carries no depth.
    pub fn on_bbo_update(&self, symbol: &Symbol, mid: f64, ts: u64) -> SymbolSnapshot {
        let mut states = self.states.lock().unwrap();
        let state = states.entry(symbol.clone()).or_insert_with(SymbolState::new);

        let (bid_liq, ask_liq) = state
            .last_snapshot
            .as_ref()
            .map(|s| (s.aggregate_bid_liq, s.aggregate_ask_liq))
            .unwrap_or((0.0, 0.0));

        state.push(bid_liq, ask_liq);
        let (direction, strength) = state.wave();

        let snapshot = SymbolSnapshot {
            symbol: symbol.clone(),
            current_price: mid,
            ts,
            aggregate_bid_liq: bid_liq,
            aggregate_ask_liq: ask_liq,
            wave_direction: direction,
            wave_strength: strength,
        };
        state.last_snapshot = Some(snapshot.clone());
        snapshot
    }

    pub fn latest(&self, symbol: &Symbol) -> Option<SymbolSnapshot> {
        self.states.lock().unwrap().get(symbol).and_then(|s| s.last_snapshot.clone())
    }

    /// Invoked every `fallback_check_interval_ms` for symbols whose BBO
    /// is stale (§4.3 point 2). Enforces `http_fallback_min_interval_ms`
    /// per symbol and serves a 60-second-TTL cached book when rate
    /// limited, refreshing the snapshot's liquidity fields in place.
    pub async fn refresh_via_http_fallback(
        &self,
        exchange: &mut dyn ExchangeClient,
        symbol: &Symbol,
        depth: u32,
        now_ms: u64,
    ) -> Option<SymbolSnapshot> {
        let min_interval = Duration::from_millis(self.http_fallback_min_interval_ms);

        let cached = {
            let states = self.states.lock().unwrap();
            states.get(symbol).and_then(|s| {
                let rate_limited = s.last_fallback_call.map(|t| t.elapsed() < min_interval).unwrap_or(false);
                if rate_limited {
                    s.fallback_cache
                        .as_ref()
                        .filter(|(_, at)| at.elapsed() < FALLBACK_CACHE_TTL)
                        .map(|(book, _)| book.clone())
                } else {
                    None
                }
            })
        };

        let book = if let Some(book) = cached {
            book
        } else {
            match exchange.get_order_book(symbol, depth).await {
                Ok(book) => {
                    let mut states = self.states.lock().unwrap();
                    let state = states.entry(symbol.clone()).or_insert_with(SymbolState::new);
                    state.last_fallback_call = Some(Instant::now());
                    state.fallback_cache = Some((book.clone(), Instant::now()));
                    book
                }
                Err(_) => return self.latest(symbol),
            }
        };

        let mut states = self.states.lock().unwrap();
        let state = states.entry(symbol.clone()).or_insert_with(SymbolState::new);

        let bid_liq = book.aggregate_bid_liquidity();
        let ask_liq = book.aggregate_ask_liquidity();
        let price = state
            .last_snapshot
            .as_ref()
            .map(|s| s.current_price)
            .unwrap_or_else(|| book.best_bid().zip(book.best_ask()).map(|(b, a)| (b + a) / 2.0).unwrap_or(0.0));

        state.push(bid_liq, ask_liq);
        let (direction, strength) = state.wave();

        let snapshot = SymbolSnapshot {
            symbol: symbol.clone(),
            current_price: price,
            ts: now_ms,
            aggregate_bid_liq: bid_liq,
            aggregate_ask_liq: ask_liq,
            wave_direction: direction,
            wave_strength: strength,
        };
        state.last_snapshot = Some(snapshot.clone());
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::dry_run::DryRunExchange;
    use crate::exchange::meta::AssetMeta;

    fn symbol() -> Symbol {
        Symbol::new("BTC-USDC")
    }

    #[test]
    fn bbo_update_produces_a_snapshot_with_forward_copied_liquidity() {
        let agg = MarketDataAggregator::new(1_000);
        let snap = agg.on_bbo_update(&symbol(), 100.0, 1);
        assert_eq!(snap.current_price, 100.0);
        assert_eq!(snap.aggregate_bid_liq, 0.0);
    }

    #[test]
    fn wave_direction_tracks_bid_heavy_liquidity() {
        let agg = MarketDataAggregator::new(1_000);
        // Seed liquidity asymmetry directly through the fallback path
        // is awkward in a sync test; drive the window via repeated BBO
        // updates after injecting liquidity through a snapshot.
        {
            let mut states = agg.states.lock().unwrap();
            let state = states.entry(symbol()).or_insert_with(SymbolState::new);
            for _ in 0..WAVE_WINDOW {
                state.push(10.0, 2.0);
            }
        }
        let (direction, strength) = {
            let states = agg.states.lock().unwrap();
            states.get(&symbol()).unwrap().wave()
        };
        assert_eq!(direction, WaveDirection::Up);
        assert!(strength > 0.0);
    }

    #[tokio::test]
    async fn http_fallback_refreshes_liquidity_when_not_rate_limited() {
        let agg = MarketDataAggregator::new(0);
        let mut gw = DryRunExchange::new(1_000.0, -1.0, 3.5, 0);
        gw.seed_meta(&symbol(), AssetMeta { tick_size: 0.1, size_decimals: 3, max_leverage: 20 });
        gw.seed_bbo(&symbol(), 99.5, 100.5);

        let snap = agg.refresh_via_http_fallback(&mut gw, &symbol(), 10, 123).await.unwrap();
        assert_eq!(snap.aggregate_bid_liq, 1.0);
        assert_eq!(snap.aggregate_ask_liq, 1.0);
    }

    #[tokio::test]
    async fn http_fallback_serves_cache_when_rate_limited() {
        let agg = MarketDataAggregator::new(60_000);
        let mut gw = DryRunExchange::new(1_000.0, -1.0, 3.5, 0);
        gw.seed_meta(&symbol(), AssetMeta { tick_size: 0.1, size_decimals: 3, max_leverage: 20 });
        gw.seed_bbo(&symbol(), 99.5, 100.5);

        let first = agg.refresh_via_http_fallback(&mut gw, &symbol(), 10, 1).await.unwrap();
        // Change the book; the second call within the min-interval must
        // still observe the cached value rather than the new book.
        gw.seed_bbo(&symbol(), 50.0, 200.0);
        let second = agg.refresh_via_http_fallback(&mut gw, &symbol(), 10, 2).await.unwrap();
        assert_eq!(first.aggregate_bid_liq, second.aggregate_bid_liq);
    }
}

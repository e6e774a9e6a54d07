//! Regime Signal Engine (C4, §4.4).
//!
//! A pure function from recent 1-minute candles to a `RegimeSignal`,
//! fronted by a per-symbol TTL cache. The volatility estimate is the
//! stddev of log returns over a rolling window of candle closes,
//! scaled into the direction/compression/volume classifier below.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::types::{Breakout, Candle, Direction, RegimeMetrics, RegimeSignal, Symbol};

/// Computes log returns `r_i = ln(close_i / close_{i-1})` over the
/// candles, ascending by time.
fn log_returns(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|w| (w[1].c / w[0].c).ln())
        .collect()
}

fn stddev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let mean = xs.iter().sum::<f64>() / xs.len() as f64;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
    var.sqrt()
}

/// Last `n` elements of `xs` (or all of `xs` if shorter).
fn tail<T>(n: usize, xs: &[T]) -> &[T] {
    let n = n.min(xs.len());
    &xs[xs.len() - n..]
}

/// How many trailing candles to request: `max(vol_long, range_window, 30) + 5`.
pub fn required_candle_count(cfg: &EngineConfig) -> u32 {
    cfg.vol_long_minutes
        .max(cfg.range_window_minutes)
        .max(30)
        + 5
}

/// Classifies a single symbol from its ascending-by-time 1-minute
/// candles (§4.4 steps 1-9). `funding` is optional live funding context.
pub fn classify(
    cfg: &EngineConfig,
    symbol: &Symbol,
    now_ms: u64,
    candles: &[Candle],
    funding: Option<f64>,
) -> Option<RegimeSignal> {
    if candles.len() < 2 {
        return None;
    }

    let returns = log_returns(candles);
    let vol_short = cfg.vol_short_minutes as usize;
    let vol_long = cfg.vol_long_minutes as usize;
    let range_window = cfg.range_window_minutes as usize;

    // stddev(r) is per-minute; annualize-to-per-hour via sqrt(60) as the
    // spec's step 3 specifies (not a true annualization, just the
    // per-minute -> per-hour scale the source uses).
    let vol5m = stddev(tail(vol_short, &returns)) * 60f64.sqrt();
    let vol30m = stddev(tail(vol_long, &returns)) * 60f64.sqrt();

    let compression = vol5m < cfg.compression_ratio * vol30m;

    let last = candles.last().unwrap();
    let volume1m = last.v;
    // Range/volume baseline is the preceding window, excluding the
    // current candle: a window containing the last bar's own high/low
    // would make a same-bar breakout structurally unreachable.
    let preceding = &candles[..candles.len() - 1];
    let window_candles = tail(range_window, preceding);
    let avg_vol15m = if window_candles.is_empty() {
        0.0
    } else {
        window_candles.iter().map(|c| c.v).sum::<f64>() / window_candles.len() as f64
    };
    let volume_spike = volume1m > cfg.volume_spike_mult * avg_vol15m;

    let range_high = window_candles
        .iter()
        .map(|c| c.h)
        .fold(f64::MIN, f64::max);
    let range_low = window_candles
        .iter()
        .map(|c| c.l)
        .fold(f64::MAX, f64::min);

    let close_last = last.c;
    let mut direction = if close_last > range_high {
        Direction::Long
    } else if close_last < range_low {
        Direction::Short
    } else {
        Direction::None
    };

    // Step 8: funding bias can only veto toward NONE, never invert.
    if let Some(f) = funding {
        if f > cfg.funding_filter && direction == Direction::Long {
            direction = Direction::None;
        }
        if f < -cfg.funding_filter && direction == Direction::Short {
            direction = Direction::None;
        }
    }

    let breakout = Breakout {
        up: close_last > range_high,
        down: close_last < range_low,
        level: if close_last > range_high {
            range_high
        } else {
            range_low
        },
    };

    Some(RegimeSignal {
        symbol: symbol.clone(),
        ts: now_ms,
        direction,
        compression,
        volume_spike,
        breakout,
        metrics: RegimeMetrics {
            vol5m,
            vol30m,
            volume1m,
            avg_vol15m,
            range_high,
            range_low,
            price: close_last,
            funding,
        },
    })
}

struct CacheEntry {
    signal: RegimeSignal,
    cached_at: Instant,
}

/// Per-symbol TTL cache fronting `classify`. Single-writer (this engine
/// component), shared-read by C7, matching §5's resource model.
pub struct RegimeCache {
    ttl: Duration,
    entries: HashMap<Symbol, CacheEntry>,
}

impl RegimeCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl: Duration::from_millis(ttl_ms),
            entries: HashMap::new(),
        }
    }

    /// Returns a cached signal if still within TTL.
    pub fn get(&self, symbol: &Symbol) -> Option<&RegimeSignal> {
        self.entries.get(symbol).and_then(|e| {
            if e.cached_at.elapsed() < self.ttl {
                Some(&e.signal)
            } else {
                None
            }
        })
    }

    pub fn put(&mut self, signal: RegimeSignal) {
        self.entries.insert(
            signal.symbol.clone(),
            CacheEntry {
                signal,
                cached_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(t: u64, o: f64, h: f64, l: f64, c: f64, v: f64) -> Candle {
        Candle { t, o, h, l, c, v }
    }

    fn flat_candles(n: usize, price: f64, vol: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| candle(i as u64 * 60_000, price, price, price, price, vol))
            .collect()
    }

    #[test]
    fn breakout_up_sets_long_direction() {
        let cfg = EngineConfig {
            range_window_minutes: 5,
            vol_short_minutes: 5,
            vol_long_minutes: 5,
            ..EngineConfig::default()
        };
        let mut candles = flat_candles(10, 100.0, 10.0);
        candles.last_mut().unwrap().c = 200.0;
        candles.last_mut().unwrap().h = 200.0;
        let sig = classify(&cfg, &Symbol::new("BTC-USDC"), 0, &candles, None).unwrap();
        assert_eq!(sig.direction, Direction::Long);
        assert!(sig.breakout.up);
    }

    #[test]
    fn breakout_down_sets_short_direction() {
        let cfg = EngineConfig {
            range_window_minutes: 5,
            vol_short_minutes: 5,
            vol_long_minutes: 5,
            ..EngineConfig::default()
        };
        let mut candles = flat_candles(10, 100.0, 10.0);
        candles.last_mut().unwrap().c = 1.0;
        candles.last_mut().unwrap().l = 1.0;
        let sig = classify(&cfg, &Symbol::new("BTC-USDC"), 0, &candles, None).unwrap();
        assert_eq!(sig.direction, Direction::Short);
        assert!(sig.breakout.down);
    }

    #[test]
    fn funding_vetoes_but_never_inverts() {
        let cfg = EngineConfig {
            range_window_minutes: 5,
            vol_short_minutes: 5,
            vol_long_minutes: 5,
            funding_filter: 0.01,
            ..EngineConfig::default()
        };
        let mut candles = flat_candles(10, 100.0, 10.0);
        candles.last_mut().unwrap().c = 200.0;
        candles.last_mut().unwrap().h = 200.0;
        // Positive funding above threshold vetoes a LONG breakout to NONE.
        let sig = classify(&cfg, &Symbol::new("BTC-USDC"), 0, &candles, Some(0.02)).unwrap();
        assert_eq!(sig.direction, Direction::None);
    }

    #[test]
    fn volume_spike_detection() {
        let cfg = EngineConfig {
            range_window_minutes: 5,
            vol_short_minutes: 5,
            vol_long_minutes: 5,
            volume_spike_mult: 1.5,
            ..EngineConfig::default()
        };
        let mut candles = flat_candles(10, 100.0, 10.0);
        candles.last_mut().unwrap().v = 1000.0;
        let sig = classify(&cfg, &Symbol::new("BTC-USDC"), 0, &candles, None).unwrap();
        assert!(sig.volume_spike);
    }

    #[test]
    fn cache_respects_ttl() {
        let mut cache = RegimeCache::new(1); // 1ms TTL
        let sig = RegimeSignal {
            symbol: Symbol::new("BTC-USDC"),
            ts: 0,
            direction: Direction::None,
            compression: false,
            volume_spike: false,
            breakout: Breakout { up: false, down: false, level: 0.0 },
            metrics: RegimeMetrics {
                vol5m: 0.0, vol30m: 0.0, volume1m: 0.0, avg_vol15m: 0.0,
                range_high: 0.0, range_low: 0.0, price: 0.0, funding: None,
            },
        };
        cache.put(sig);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&Symbol::new("BTC-USDC")).is_none());
    }
}

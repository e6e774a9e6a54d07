//! Typed, environment-driven configuration (§6).
//!
//! Consolidates every recognized key from the configuration table into
//! one struct parsed once at startup, backed by `dotenvy::dotenv()` for
//! local `.env` loading.

use std::env;
use std::time::Duration;

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v.split(',').map(|s| s.trim().to_string()).collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Exponential-backoff retry policy shared by every outbound gateway call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

/// The engine's full, parsed configuration. See spec §6 for the
/// recognized-key table this mirrors field-for-field.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // ── Universe & ledger ──────────────────────────────────────────
    pub trading_symbols: Vec<String>,
    pub starting_balance: f64,
    pub leverage: f64,

    // ── Execution / slippage ───────────────────────────────────────
    pub max_execution_slippage_bps: f64,
    pub execution_ticks: u32,

    // ── Freshness ───────────────────────────────────────────────────
    pub data_stale_ms: u64,

    // ── Regime parameters ───────────────────────────────────────────
    pub compression_ratio: f64,
    pub volume_spike_mult: f64,
    pub range_window_minutes: u32,
    pub vol_short_minutes: u32,
    pub vol_long_minutes: u32,

    // ── Edge / cost parameters ──────────────────────────────────────
    pub min_net_edge_bps: f64,
    pub spread_bps_est_max: f64,
    pub slippage_bps_est: f64,
    pub maker_fee_bps: f64,
    pub taker_fee_bps: f64,

    // ── Sizing and exit geometry ─────────────────────────────────────
    pub risk_per_trade_pct: f64,
    pub stop_atr_mult: f64,
    pub tp_r_mult: f64,
    pub max_hold_seconds: u64,
    pub max_position_size: f64,
    pub trailing_distance_percent: f64,

    // ── Throttles and kill-switch ────────────────────────────────────
    pub max_trades_per_day: u32,
    pub cooldown_seconds: u64,
    pub max_daily_drawdown_pct: f64,
    pub max_consecutive_losses: u32,

    // ── Funding bias ──────────────────────────────────────────────────
    pub funding_filter: f64,

    // ── Execution policy ──────────────────────────────────────────────
    pub maker_first: bool,
    pub quote_tick_offset: u32,
    pub max_queue_wait_ms: u64,
    pub max_requote_per_sec: u32,
    pub allow_taker_fallback: bool,
    pub taker_only_if_net_edge_bps: f64,
    pub regime_eval_interval_ms: u64,
    pub regime_signal_cache_ttl_ms: u64,

    // ── Market-data policy ─────────────────────────────────────────────
    pub use_ws_market_data: bool,
    pub ws_stale_ms: u64,
    pub ws_reconnect_max_delay_ms: u64,
    pub http_fallback_min_interval_ms: u64,
    pub fallback_check_interval_ms: u64,
    pub order_book_depth: u32,

    // ── Side-effect mode ────────────────────────────────────────────────
    pub dry_run: bool,
    pub enable_live_trading: bool,

    pub retry_policy: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trading_symbols: vec!["BTC-USDC".to_string(), "ETH-USDC".to_string()],
            starting_balance: 1_000.0,
            leverage: 3.0,

            max_execution_slippage_bps: 8.0,
            execution_ticks: 2,

            data_stale_ms: 5_000,

            compression_ratio: 0.7,
            volume_spike_mult: 1.5,
            range_window_minutes: 15,
            vol_short_minutes: 5,
            vol_long_minutes: 30,

            min_net_edge_bps: 5.0,
            spread_bps_est_max: 6.0,
            slippage_bps_est: 2.0,
            maker_fee_bps: -1.0,
            taker_fee_bps: 3.5,

            risk_per_trade_pct: 0.5,
            stop_atr_mult: 1.5,
            tp_r_mult: 2.0,
            max_hold_seconds: 900,
            max_position_size: 5_000.0,
            trailing_distance_percent: 0.5,

            max_trades_per_day: 20,
            cooldown_seconds: 300,
            max_daily_drawdown_pct: 2.5,
            max_consecutive_losses: 4,

            funding_filter: 0.01,

            maker_first: true,
            quote_tick_offset: 1,
            max_queue_wait_ms: 350,
            max_requote_per_sec: 2,
            allow_taker_fallback: true,
            taker_only_if_net_edge_bps: 20.0,
            regime_eval_interval_ms: 2_000,
            regime_signal_cache_ttl_ms: 5_000,

            use_ws_market_data: true,
            ws_stale_ms: 5_000,
            ws_reconnect_max_delay_ms: 30_000,
            http_fallback_min_interval_ms: 2_000,
            fallback_check_interval_ms: 30_000,
            order_book_depth: 20,

            dry_run: true,
            enable_live_trading: false,

            retry_policy: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Parses the full configuration from process environment variables,
    /// falling back to the defaults above for anything unset or
    /// unparsable. Call `dotenvy::dotenv().ok()` before this in `main`
    /// so a local `.env` file is honored.
    pub fn from_env() -> Self {
        let d = EngineConfig::default();
        Self {
            trading_symbols: env_list(
                "TRADING_SYMBOLS",
                &d.trading_symbols.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            ),
            starting_balance: env_f64("STARTING_BALANCE", d.starting_balance),
            leverage: env_f64("LEVERAGE", d.leverage),

            max_execution_slippage_bps: env_f64(
                "MAX_EXECUTION_SLIPPAGE_BPS",
                d.max_execution_slippage_bps,
            ),
            execution_ticks: env_u32("EXECUTION_TICKS", d.execution_ticks),

            data_stale_ms: env_u64("DATA_STALE_MS", d.data_stale_ms),

            compression_ratio: env_f64("COMPRESSION_RATIO", d.compression_ratio),
            volume_spike_mult: env_f64("VOLUME_SPIKE_MULT", d.volume_spike_mult),
            range_window_minutes: env_u32("RANGE_WINDOW_MINUTES", d.range_window_minutes),
            vol_short_minutes: env_u32("VOL_SHORT_MINUTES", d.vol_short_minutes),
            vol_long_minutes: env_u32("VOL_LONG_MINUTES", d.vol_long_minutes),

            min_net_edge_bps: env_f64("MIN_NET_EDGE_BPS", d.min_net_edge_bps),
            spread_bps_est_max: env_f64("SPREAD_BPS_EST_MAX", d.spread_bps_est_max),
            slippage_bps_est: env_f64("SLIPPAGE_BPS_EST", d.slippage_bps_est),
            maker_fee_bps: env_f64("MAKER_FEE_BPS", d.maker_fee_bps),
            taker_fee_bps: env_f64("TAKER_FEE_BPS", d.taker_fee_bps),

            risk_per_trade_pct: env_f64("RISK_PER_TRADE_PCT", d.risk_per_trade_pct),
            stop_atr_mult: env_f64("STOP_ATR_MULT", d.stop_atr_mult),
            tp_r_mult: env_f64("TP_R_MULT", d.tp_r_mult),
            max_hold_seconds: env_u64("MAX_HOLD_SECONDS", d.max_hold_seconds),
            max_position_size: env_f64("MAX_POSITION_SIZE", d.max_position_size),
            trailing_distance_percent: env_f64(
                "TRAILING_DISTANCE_PERCENT",
                d.trailing_distance_percent,
            ),

            max_trades_per_day: env_u32("MAX_TRADES_PER_DAY", d.max_trades_per_day),
            cooldown_seconds: env_u64("COOLDOWN_SECONDS", d.cooldown_seconds),
            max_daily_drawdown_pct: env_f64("MAX_DAILY_DRAWDOWN_PCT", d.max_daily_drawdown_pct),
            max_consecutive_losses: env_u32("MAX_CONSECUTIVE_LOSSES", d.max_consecutive_losses),

            funding_filter: env_f64("FUNDING_FILTER", d.funding_filter),

            maker_first: env_bool("MAKER_FIRST", d.maker_first),
            quote_tick_offset: env_u32("QUOTE_TICK_OFFSET", d.quote_tick_offset),
            max_queue_wait_ms: env_u64("MAX_QUEUE_WAIT_MS", d.max_queue_wait_ms),
            max_requote_per_sec: env_u32("MAX_REQUOTE_PER_SEC", d.max_requote_per_sec),
            allow_taker_fallback: env_bool("ALLOW_TAKER_FALLBACK", d.allow_taker_fallback),
            taker_only_if_net_edge_bps: env_f64(
                "TAKER_ONLY_IF_NET_EDGE_BPS",
                d.taker_only_if_net_edge_bps,
            ),
            regime_eval_interval_ms: env_u64("REGIME_EVAL_INTERVAL_MS", d.regime_eval_interval_ms),
            regime_signal_cache_ttl_ms: env_u64(
                "REGIME_SIGNAL_CACHE_TTL_MS",
                d.regime_signal_cache_ttl_ms,
            ),

            use_ws_market_data: env_bool("USE_WS_MARKET_DATA", d.use_ws_market_data),
            ws_stale_ms: env_u64("WS_STALE_MS", d.ws_stale_ms),
            ws_reconnect_max_delay_ms: env_u64(
                "WS_RECONNECT_MAX_DELAY_MS",
                d.ws_reconnect_max_delay_ms,
            ),
            http_fallback_min_interval_ms: env_u64(
                "HTTP_FALLBACK_MIN_INTERVAL_MS",
                d.http_fallback_min_interval_ms,
            ),
            fallback_check_interval_ms: env_u64(
                "FALLBACK_CHECK_INTERVAL_MS",
                d.fallback_check_interval_ms,
            ),
            order_book_depth: env_u32("ORDER_BOOK_DEPTH", d.order_book_depth),

            dry_run: env_bool("DRY_RUN", d.dry_run),
            enable_live_trading: env_bool("ENABLE_LIVE_TRADING", d.enable_live_trading),

            retry_policy: d.retry_policy,
        }
    }
}

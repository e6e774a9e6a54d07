//! perp-engine-rs: composition root (§9 "Composition root").
//!
//! Wires the Exchange Gateway (C1), BBO stream + HTTP fallback (C2/C3),
//! Regime Signal Engine (C4), Fee & Edge Model (C5), Entry Decision Gate
//! (C6), the Execution State Machine (C7) and the Position Tracker (C8)
//! into one process: one `tokio::spawn`ed task per traded symbol (§5:
//! per-symbol exclusion, no overlapping tick handlers), plus three
//! process-wide background tasks — the BBO stream, the HTTP fallback
//! poller, and the periodic reconciliation sweep.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use tokio::sync::{watch, Mutex};

use perp_engine_rs::config::EngineConfig;
use perp_engine_rs::events::{self, Event, EventBus, LoggingEventBus, RedisEventBus};
use perp_engine_rs::exchange::{self, DryRunExchange, ExchangeClient, LiveExchange};
use perp_engine_rs::execution::{Lifecycle, TickContext};
use perp_engine_rs::market_data::{BboStreamClient, MarketDataAggregator};
use perp_engine_rs::monitor::{MonitorConfig, MonitoringTradeSink};
use perp_engine_rs::persistence::{JsonFileTradeSink, NullTradeSink, TradeSink};
use perp_engine_rs::position::PositionTracker;
use perp_engine_rs::regime::RegimeCache;
use perp_engine_rs::risk::RiskLedger;
use perp_engine_rs::types::{Bbo, Symbol};

const TICK_INTERVAL_MS: u64 = 100;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cfg = EngineConfig::from_env();
    log::info!("perp-engine-rs starting (dry_run={}, symbols={:?})", cfg.dry_run, cfg.trading_symbols);

    if !cfg.dry_run && !cfg.enable_live_trading {
        log::error!("DRY_RUN=false requires ENABLE_LIVE_TRADING=true as an explicit opt-in; exiting.");
        return;
    }

    let exchange: Arc<Mutex<Box<dyn ExchangeClient>>> = if cfg.dry_run {
        let mut gw = DryRunExchange::new(cfg.starting_balance, cfg.maker_fee_bps, cfg.taker_fee_bps, 0);
        for symbol in &cfg.trading_symbols {
            gw.seed_meta(
                &Symbol::new(symbol.clone()),
                exchange::AssetMeta { tick_size: 0.01, size_decimals: 4, max_leverage: 20 },
            );
        }
        Arc::new(Mutex::new(Box::new(gw)))
    } else {
        let account_address = std::env::var("HL_ADDRESS").expect("HL_ADDRESS must be set in live mode");
        let private_key = std::env::var("HL_PRIVATE_KEY").expect("HL_PRIVATE_KEY must be set in live mode");
        let mut live = LiveExchange::new(account_address, private_key, cfg.retry_policy);
        live.refresh_meta().await.expect("initial meta fetch failed");
        Arc::new(Mutex::new(Box::new(live) as Box<dyn ExchangeClient>))
    };

    let events: Arc<dyn EventBus> = match std::env::var("REDIS_URL") {
        Ok(url) => match RedisEventBus::new(&url, "mm:") {
            Ok(redis_bus) => {
                log::info!("publishing events to redis at {}", url);
                Arc::new(events::BroadcastEventBus::new(vec![Box::new(LoggingEventBus), Box::new(redis_bus)]))
            }
            Err(e) => {
                log::warn!("redis event bus unavailable ({}); logging only", e);
                Arc::new(LoggingEventBus)
            }
        },
        Err(_) => Arc::new(LoggingEventBus),
    };

    let trade_sink: Arc<dyn TradeSink> = match std::env::var("TRADE_LOG_PATH") {
        Ok(path) => Arc::new(MonitoringTradeSink::new(JsonFileTradeSink::new(path), MonitorConfig::default())),
        Err(_) => Arc::new(MonitoringTradeSink::new(NullTradeSink, MonitorConfig::default())),
    };

    let risk = Arc::new(Mutex::new(RiskLedger::new(&cfg, cfg.starting_balance, Utc::now())));
    let positions = Arc::new(Mutex::new(PositionTracker::new(cfg.starting_balance)));
    let regime_cache = Arc::new(Mutex::new(RegimeCache::new(cfg.regime_signal_cache_ttl_ms)));
    let aggregator = Arc::new(MarketDataAggregator::new(cfg.http_fallback_min_interval_ms));

    let bbo_stream = Arc::new(BboStreamClient::new(cfg.ws_reconnect_max_delay_ms));
    let symbols: Vec<Symbol> = cfg.trading_symbols.iter().map(|s| Symbol::new(s.clone())).collect();
    for symbol in &symbols {
        bbo_stream.subscribe(symbol.clone());
    }

    if cfg.use_ws_market_data {
        let stream = bbo_stream.clone();
        tokio::spawn(async move { stream.run().await });
    }

    // Periodic reconciliation (§4.8, §5): globally mutually exclusive
    // with itself (one timer, never overlapping), broadcasting closed
    // ghost symbols so each per-symbol task can fold them in.
    let (ghosts_tx, _) = watch::channel(Vec::<Symbol>::new());
    {
        let exchange = exchange.clone();
        let positions = positions.clone();
        let ghosts_tx = ghosts_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(300)).await;
                let mut exch = exchange.lock().await;
                let mut pos = positions.lock().await;
                match pos.reconcile(exch.as_mut().as_mut(), |_symbol| None).await {
                    Ok(report) => {
                        if !report.closed_ghosts.is_empty() {
                            log::warn!("reconciliation closed {} ghost position(s)", report.closed_ghosts.len());
                        }
                        let _ = ghosts_tx.send(report.closed_ghosts);
                    }
                    Err(e) => log::warn!("reconciliation failed: {}", e),
                }
            }
        });
    }

    // HTTP fallback for symbols whose BBO stream has gone stale (§4.2/§4.3).
    {
        let exchange = exchange.clone();
        let bbo_cache = bbo_stream.cache();
        let aggregator = aggregator.clone();
        let cfg = cfg.clone();
        let symbols = symbols.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(cfg.fallback_check_interval_ms)).await;
                for symbol in &symbols {
                    if !bbo_cache.is_stale(symbol, cfg.ws_stale_ms) {
                        continue;
                    }
                    let mut exch = exchange.lock().await;
                    if let Some(snapshot) = aggregator
                        .refresh_via_http_fallback(exch.as_mut().as_mut(), symbol, cfg.order_book_depth, now_ms())
                        .await
                    {
                        let half_spread = snapshot.current_price * 0.0005;
                        let bbo = Bbo::new(snapshot.current_price - half_spread, snapshot.current_price + half_spread, snapshot.ts);
                        bbo_cache.put_fallback(symbol.clone(), bbo);
                    }
                }
            }
        });
    }

    // Periodic positions snapshot (§3 "Positions" event).
    {
        let positions = positions.clone();
        let events = events.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                let snapshot = positions.lock().await.snapshot();
                events.publish(Event::Positions(&snapshot)).await;
            }
        });
    }

    log::info!("engine ready; entering per-symbol tick loops");

    let mut handles = Vec::new();
    for symbol in symbols {
        let cfg = cfg.clone();
        let exchange = exchange.clone();
        let risk = risk.clone();
        let positions = positions.clone();
        let regime_cache = regime_cache.clone();
        let events = events.clone();
        let trade_sink = trade_sink.clone();
        let bbo_cache = bbo_stream.cache();
        let mut ghosts_rx = ghosts_tx.subscribe();

        handles.push(tokio::spawn(async move {
            let mut lifecycle = Lifecycle::new(symbol.clone());
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(TICK_INTERVAL_MS)).await;

                let bbo = bbo_cache.get(&symbol);
                let now = now_ms();
                let now_utc = Utc::now();

                let mut exch = exchange.lock().await;
                let mut risk_guard = risk.lock().await;
                let mut pos_guard = positions.lock().await;
                let mut regime_guard = regime_cache.lock().await;

                if ghosts_rx.has_changed().unwrap_or(false) {
                    let ghosts = ghosts_rx.borrow_and_update().clone();
                    let mut ctx = TickContext {
                        exchange: exch.as_mut().as_mut(),
                        risk: &mut risk_guard,
                        positions: &mut pos_guard,
                        events: events.as_ref(),
                        trade_sink: trade_sink.as_ref(),
                        bbo,
                        now_ms: now,
                        now_utc,
                    };
                    lifecycle.observe_reconciliation(&cfg, &mut ctx, &ghosts).await;
                }

                {
                    let mut ctx = TickContext {
                        exchange: exch.as_mut().as_mut(),
                        risk: &mut risk_guard,
                        positions: &mut pos_guard,
                        events: events.as_ref(),
                        trade_sink: trade_sink.as_ref(),
                        bbo,
                        now_ms: now,
                        now_utc,
                    };
                    lifecycle.tick(&cfg, &mut ctx, &mut regime_guard).await;
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

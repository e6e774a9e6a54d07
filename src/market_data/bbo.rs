//! BBO Stream Client (C2, §4.2).
//!
//! A reconnect-with-exponential-backoff loop over per-coin subscribe
//! batching, touching a last-message timestamp on every frame so
//! staleness can be derived without a separate heartbeat thread.
//! Top-of-book only (no L2 depth), exposing a per-symbol staleness
//! oracle the gate and aggregator can query directly (§4.2 "Expose
//! `get_bbo`/`is_stale`").

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::types::{Bbo, Symbol};

const WS_URL: &str = "wss://api.hyperliquid.xyz/ws";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Lock-free-enough (single `Mutex<HashMap>`) cache written by the stream
/// client, read by C3/C6/C7. Per §5 "reads may be lock-free"; a plain
/// mutex-guarded map is sufficient here and preferred over an atomic
/// pointer swap, which would complicate the per-symbol staleness check
/// for no measurable benefit at this lock-hold duration.
#[derive(Clone)]
pub struct BboCache {
    inner: Arc<Mutex<HashMap<Symbol, Bbo>>>,
}

impl BboCache {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<Bbo> {
        self.inner.lock().unwrap().get(symbol).copied()
    }

    /// True if there's no cached BBO, or the cached one is older than
    /// `max_age_ms`. Consumers gate all usage on this rather than trusting
    /// a possibly-stale cache value (§4.2 failure semantics).
    pub fn is_stale(&self, symbol: &Symbol, max_age_ms: u64) -> bool {
        match self.get(symbol) {
            None => true,
            Some(bbo) => bbo.is_stale(now_ms(), max_age_ms),
        }
    }

    fn put(&self, symbol: Symbol, bbo: Bbo) {
        self.inner.lock().unwrap().insert(symbol, bbo);
    }

    /// Entry point for C3's HTTP book fallback (§4.3 point 2): merges a
    /// book-derived top-of-book into the same cache the stream writes,
    /// so C6/C7 see one BBO regardless of which path produced it.
    pub fn put_fallback(&self, symbol: Symbol, bbo: Bbo) {
        self.put(symbol, bbo);
    }
}

impl Default for BboCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide connectivity/backoff status, exposed read-only for
/// dashboards/health checks (§4.2 "a status view").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
}

struct StatusCell(std::sync::Mutex<ConnectionStatus>);

/// Streaming top-of-book client. Owns the subscription registry (so a
/// reconnect re-subscribes every previously requested symbol) and the
/// shared `BboCache`.
pub struct BboStreamClient {
    cache: BboCache,
    subscribed: Arc<Mutex<HashSet<Symbol>>>,
    status: Arc<StatusCell>,
    reconnect_max_delay_ms: u64,
    last_message_ms: Arc<AtomicU64>,
}

impl BboStreamClient {
    pub fn new(reconnect_max_delay_ms: u64) -> Self {
        Self {
            cache: BboCache::new(),
            subscribed: Arc::new(Mutex::new(HashSet::new())),
            status: Arc::new(StatusCell(std::sync::Mutex::new(ConnectionStatus::Connecting))),
            reconnect_max_delay_ms,
            last_message_ms: Arc::new(AtomicU64::new(now_ms())),
        }
    }

    pub fn cache(&self) -> BboCache {
        self.cache.clone()
    }

    pub fn get_bbo(&self, symbol: &Symbol) -> Option<Bbo> {
        self.cache.get(symbol)
    }

    pub fn is_stale(&self, symbol: &Symbol, max_age_ms: u64) -> bool {
        self.cache.is_stale(symbol, max_age_ms)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.0.lock().unwrap()
    }

    /// Adds `symbol` to the subscription registry. If the client is
    /// already connected the next reconnect cycle picks it up; a running
    /// client only re-subscribes on (re)connect, matching §4.2's "on
    /// (re)connect, re-subscribe all previously requested symbols."
    pub fn subscribe(&self, symbol: Symbol) {
        self.subscribed.lock().unwrap().insert(symbol);
    }

    pub fn unsubscribe(&self, symbol: &Symbol) {
        self.subscribed.lock().unwrap().remove(symbol);
    }

    /// Runs the reconnect loop forever. Intended to be spawned as its own
    /// task; never returns under normal operation.
    pub async fn run(&self) {
        let mut retry_delay = Duration::from_secs(1);
        let max_delay = Duration::from_millis(self.reconnect_max_delay_ms);

        loop {
            *self.status.0.lock().unwrap() = ConnectionStatus::Connecting;
            log::info!("[BBO] connecting to {}", WS_URL);

            match connect_async(Url::parse(WS_URL).expect("static WS URL")).await {
                Ok((ws_stream, _)) => {
                    log::info!("[BBO] connected");
                    retry_delay = Duration::from_secs(1);
                    *self.status.0.lock().unwrap() = ConnectionStatus::Connected;

                    let (mut write, mut read) = ws_stream.split();

                    let symbols: Vec<Symbol> = self.subscribed.lock().unwrap().iter().cloned().collect();
                    for chunk in symbols.chunks(20) {
                        for symbol in chunk {
                            let sub = serde_json::json!({
                                "method": "subscribe",
                                "subscription": { "type": "bbo", "coin": symbol.as_str() }
                            });
                            if let Err(e) = write.send(Message::Text(sub.to_string())).await {
                                log::error!("[BBO] subscribe failed for {}: {}", symbol, e);
                            }
                        }
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }

                    let mut last_heartbeat = tokio::time::Instant::now();

                    while let Some(msg) = read.next().await {
                        if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                            let _ = write.send(Message::Ping(Vec::new())).await;
                            last_heartbeat = tokio::time::Instant::now();
                        }
                        self.last_message_ms.store(now_ms(), Ordering::Relaxed);
                        match msg {
                            Ok(Message::Text(text)) => self.handle_text(&text),
                            Ok(Message::Ping(data)) => {
                                let _ = write.send(Message::Pong(data)).await;
                            }
                            Ok(Message::Close(_)) => {
                                log::warn!("[BBO] server closed connection");
                                break;
                            }
                            Err(e) => {
                                log::error!("[BBO] ws error: {}", e);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
                Err(e) => {
                    log::error!("[BBO] connect failed: {}", e);
                }
            }

            *self.status.0.lock().unwrap() = ConnectionStatus::Reconnecting;
            tokio::time::sleep(retry_delay).await;
            retry_delay = (retry_delay * 2).min(max_delay);
        }
    }

    fn handle_text(&self, text: &str) {
        let parsed: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return,
        };
        if parsed["channel"].as_str() != Some("bbo") {
            return;
        }
        let data = &parsed["data"];
        let coin = match data["coin"].as_str() {
            Some(c) => c,
            None => return,
        };
        let bid = data["bbo"][0]["px"].as_str().and_then(|s| s.parse::<f64>().ok());
        let ask = data["bbo"][1]["px"].as_str().and_then(|s| s.parse::<f64>().ok());
        if let (Some(bid), Some(ask)) = (bid, ask) {
            if bid > 0.0 && ask > bid {
                self.cache.put(Symbol::new(coin), Bbo::new(bid, ask, now_ms()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_reports_stale_when_absent() {
        let cache = BboCache::new();
        assert!(cache.is_stale(&Symbol::new("BTC-USDC"), 5_000));
    }

    #[test]
    fn cache_round_trips_a_value() {
        let cache = BboCache::new();
        cache.put(Symbol::new("BTC-USDC"), Bbo::new(100.0, 100.5, now_ms()));
        let got = cache.get(&Symbol::new("BTC-USDC")).unwrap();
        assert_eq!(got.best_bid, 100.0);
        assert!(!cache.is_stale(&Symbol::new("BTC-USDC"), 5_000));
    }

    #[test]
    fn subscription_registry_tracks_symbols() {
        let client = BboStreamClient::new(30_000);
        client.subscribe(Symbol::new("BTC-USDC"));
        assert!(client.subscribed.lock().unwrap().contains(&Symbol::new("BTC-USDC")));
        client.unsubscribe(&Symbol::new("BTC-USDC"));
        assert!(!client.subscribed.lock().unwrap().contains(&Symbol::new("BTC-USDC")));
    }
}

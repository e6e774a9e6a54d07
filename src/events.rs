//! Typed event stream + publish fan-out (§3 "Decision Record /
//! Execution Report / Lifecycle Update / Snapshot", §6 "Event bus").
//!
//! One `EventBus` trait carrying the seven typed events this core
//! produces, built around a thin `client`/`prefix`-scoped
//! `publish_message(channel, json)` wrapper. A `LoggingEventBus`
//! default means a bare `dry_run` engine needs no Redis at all; a
//! `RedisEventBus` is available for operators who want the events
//! fanned out over an IPC bridge.

use async_trait::async_trait;
use serde::Serialize;

use crate::types::{DecisionRecord, ExecutionReport, LifecycleState, Position, Symbol};

/// A symbol's lifecycle transitioning from one state to another.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleUpdate {
    pub ts: u64,
    pub symbol: Symbol,
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// A position closing, whether by SL/TP/trailing/taker-fallback/
/// reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct TradeClosed {
    pub ts: u64,
    pub symbol: Symbol,
    pub realized_pnl: f64,
    pub reason: crate::types::ExecReason,
}

/// The seven event kinds this core emits, per §6.
pub enum Event<'a> {
    DecisionUpdate(&'a DecisionRecord),
    GateEvaluation(&'a DecisionRecord),
    ExecutionReport(&'a ExecutionReport),
    LifecycleUpdate(&'a LifecycleUpdate),
    TradeClosed(&'a TradeClosed),
    Signal(&'a crate::types::RegimeSignal),
    Positions(&'a [Position]),
}

impl<'a> Event<'a> {
    fn channel(&self) -> &'static str {
        match self {
            Event::DecisionUpdate(_) => "decision:update",
            Event::GateEvaluation(_) => "gate:evaluation",
            Event::ExecutionReport(_) => "execution:report",
            Event::LifecycleUpdate(_) => "lifecycle:update",
            Event::TradeClosed(_) => "trade:closed",
            Event::Signal(_) => "signal",
            Event::Positions(_) => "positions",
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Event::DecisionUpdate(r) => serde_json::json!(r),
            Event::GateEvaluation(r) => serde_json::json!(r),
            Event::ExecutionReport(r) => serde_json::json!(r),
            Event::LifecycleUpdate(r) => serde_json::json!(r),
            Event::TradeClosed(r) => serde_json::json!(r),
            Event::Signal(r) => serde_json::json!(r),
            Event::Positions(r) => serde_json::json!(r),
        }
    }
}

/// Publish-only sink for the core's typed events. Implementations must
/// not block the caller on a slow downstream consumer; a bounded queue
/// or best-effort send is expected — the Redis bridge below is itself
/// fire-and-forget: a failed publish is logged, not retried.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event<'_>);
}

/// No-op observability: every event is logged at `debug` and dropped.
/// The default when no external bus is configured.
pub struct LoggingEventBus;

#[async_trait]
impl EventBus for LoggingEventBus {
    async fn publish(&self, event: Event<'_>) {
        log::debug!("[event:{}] {}", event.channel(), event.to_json());
    }
}

/// Publishes every event as JSON to a Redis channel prefixed with
/// `prefix`.
pub struct RedisEventBus {
    client: redis::Client,
    prefix: String,
}

impl RedisEventBus {
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> Result<Self, redis::RedisError> {
        Ok(Self { client: redis::Client::open(redis_url)?, prefix: prefix.into() })
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: Event<'_>) {
        let channel = format!("{}{}", self.prefix, event.channel());
        let payload = event.to_json().to_string();
        match self.client.get_async_connection().await {
            Ok(mut con) => {
                use redis::AsyncCommands;
                if let Err(e) = con.publish::<_, _, ()>(&channel, payload).await {
                    log::warn!("[events] publish to {} failed: {}", channel, e);
                }
            }
            Err(e) => log::warn!("[events] redis connection failed: {}", e),
        }
    }
}

/// Fans a single publish out to two buses — used to keep a
/// `LoggingEventBus` active locally alongside an optional
/// `RedisEventBus`, so operators always have a local audit trail.
pub struct BroadcastEventBus {
    buses: Vec<Box<dyn EventBus>>,
}

impl BroadcastEventBus {
    pub fn new(buses: Vec<Box<dyn EventBus>>) -> Self {
        Self { buses }
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: Event<'_>) {
        for bus in &self.buses {
            bus.publish(match &event {
                Event::DecisionUpdate(r) => Event::DecisionUpdate(r),
                Event::GateEvaluation(r) => Event::GateEvaluation(r),
                Event::ExecutionReport(r) => Event::ExecutionReport(r),
                Event::LifecycleUpdate(r) => Event::LifecycleUpdate(r),
                Event::TradeClosed(r) => Event::TradeClosed(r),
                Event::Signal(r) => Event::Signal(r),
                Event::Positions(r) => Event::Positions(r),
            })
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DecisionEvidence, DecisionReason};

    #[tokio::test]
    async fn logging_bus_accepts_every_event_kind_without_panicking() {
        let bus = LoggingEventBus;
        let record = DecisionRecord {
            ts: 1,
            symbol: Symbol::new("BTC-USDC"),
            reason: DecisionReason::Pass,
            evidence: DecisionEvidence::default(),
            sized_quantity: Some(1.0),
        };
        bus.publish(Event::DecisionUpdate(&record)).await;
        bus.publish(Event::GateEvaluation(&record)).await;
    }

    #[tokio::test]
    async fn broadcast_bus_fans_out_to_every_member() {
        let bus = BroadcastEventBus::new(vec![Box::new(LoggingEventBus), Box::new(LoggingEventBus)]);
        let record = DecisionRecord {
            ts: 1,
            symbol: Symbol::new("BTC-USDC"),
            reason: DecisionReason::Pass,
            evidence: DecisionEvidence::default(),
            sized_quantity: None,
        };
        bus.publish(Event::DecisionUpdate(&record)).await;
    }
}

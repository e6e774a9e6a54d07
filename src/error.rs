//! Crate error taxonomy (§7).
//!
//! Transient transport failures are retried inside the gateway; semantic
//! rejections and invariant violations are not — they are surfaced with a
//! reason code and turned into a Decision Record / assertion respectively.

use std::fmt;

#[derive(Debug, Clone)]
pub enum GatewayError {
    /// Network/timeout/5xx-equivalent. Retried with backoff inside C1;
    /// surfaced here only once the retry budget is exhausted.
    Transient(String),
    /// Post-only would cross, invalid price, insufficient margin, etc.
    /// Never retried.
    Semantic(String),
    /// 429-equivalent; treated as transient by the retry policy.
    RateLimited,
    /// Symbol not present in the meta cache.
    UnknownAsset(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Transient(s) => write!(f, "transient transport error: {}", s),
            GatewayError::Semantic(s) => write!(f, "semantic rejection: {}", s),
            GatewayError::RateLimited => write!(f, "rate limited (429)"),
            GatewayError::UnknownAsset(s) => write!(f, "unknown asset: {}", s),
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// Whether the retry policy should treat this as a connection-level
    /// failure worth retrying. Semantic rejections never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transient(_) | GatewayError::RateLimited)
    }
}

/// Programming errors: invariant violations that must be asserted, not
/// silently recovered (§7 propagation policy).
#[derive(Debug, Clone)]
pub enum EngineError {
    InvariantViolation(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvariantViolation(s) => write!(f, "invariant violation: {}", s),
        }
    }
}

impl std::error::Error for EngineError {}

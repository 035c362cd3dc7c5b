//! MoltGuard Gateway - local intercepting proxy for model-provider traffic.
//!
//! The gateway is a plain-HTTP service on loopback that the agent's model
//! client is pointed at instead of the real provider. It accepts requests in
//! two dialects, detected by path:
//!
//! - `POST /v1/messages` - the "messages" dialect
//! - `POST /v1/chat/completions` - the "completions" dialect
//!
//! Each request's prompt payload is run through the detection pipeline; the
//! request is then rejected, sanitized, or forwarded unmodified to the real
//! upstream for its dialect. Responses (including streaming bodies) are
//! relayed incrementally without buffering.
//!
//! ## Architecture
//!
//! ```text
//! Agent → Gateway → Extract Prompt → Detect (fail-open)
//!                                       │
//!                     ┌─────────────────┼──────────────────┐
//!                     │ block           │ sanitize         │ pass
//!                     ▼                 ▼                  ▼
//!               403 policy       Redact + Forward     Forward as-is
//!               violation              │                   │
//!                                      └───── Upstream ────┘
//! ```
//!
//! [`GatewayManager`] supervises the service as a long-running task with an
//! explicit lifecycle: bind, readiness probe, graceful drain on stop.

mod dialect;
mod error;
mod handler;
mod manager;

pub use dialect::{extract_prompt, policy_violation_body, redact_spans, Dialect};
pub use error::{GatewayError, Result};
pub use handler::{router, GatewayState};
pub use manager::{GatewayManager, GatewayStatus, RunState};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default gateway port.
pub const DEFAULT_GATEWAY_PORT: u16 = 8900;

/// Default upstream for the messages dialect.
pub const DEFAULT_MESSAGES_UPSTREAM: &str = "https://api.anthropic.com";

/// Default upstream for the completions dialect.
pub const DEFAULT_COMPLETIONS_UPSTREAM: &str = "https://api.openai.com";

/// Marker substituted for flagged spans when sanitizing.
pub const REDACTION_MARKER: &str = "[redacted by moltguard]";

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Port to bind on loopback.
    pub port: u16,
    /// Strip flagged spans before forwarding.
    pub sanitize: bool,
    /// Reject flagged requests outright instead of forwarding.
    pub block_on_risk: bool,
    /// Confidence at or above which a verdict counts as a detection.
    pub risk_threshold: f64,
    /// Prompts shorter than this (chars) are forwarded without analysis.
    pub min_analyze_len: usize,
    /// Upstream base URL for the messages dialect.
    pub messages_upstream: String,
    /// Upstream base URL for the completions dialect.
    pub completions_upstream: String,
    /// Grace period for draining in-flight requests on stop, milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_GATEWAY_PORT,
            sanitize: true,
            block_on_risk: false,
            risk_threshold: moltguard_core::RISK_CONFIDENCE_THRESHOLD,
            min_analyze_len: moltguard_core::MIN_TOOL_RESULT_LEN,
            messages_upstream: DEFAULT_MESSAGES_UPSTREAM.to_string(),
            completions_upstream: DEFAULT_COMPLETIONS_UPSTREAM.to_string(),
            shutdown_grace_ms: 5_000,
        }
    }
}

impl GatewayConfig {
    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enables or disables sanitization.
    pub fn with_sanitize(mut self, sanitize: bool) -> Self {
        self.sanitize = sanitize;
        self
    }

    /// Enables or disables blocking on risk.
    pub fn with_block_on_risk(mut self, block: bool) -> Self {
        self.block_on_risk = block;
        self
    }

    /// Sets both upstream base URLs (useful for tests).
    pub fn with_upstreams(
        mut self,
        messages: impl Into<String>,
        completions: impl Into<String>,
    ) -> Self {
        self.messages_upstream = messages.into();
        self.completions_upstream = completions.into();
        self
    }

    /// The shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_correct() {
        assert_eq!(DEFAULT_GATEWAY_PORT, 8900);
        assert_eq!(GatewayConfig::default().port, 8900);
    }

    #[test]
    fn config_builders() {
        let config = GatewayConfig::default()
            .with_port(9100)
            .with_sanitize(false)
            .with_block_on_risk(true)
            .with_upstreams("http://127.0.0.1:1", "http://127.0.0.1:2");
        assert_eq!(config.port, 9100);
        assert!(!config.sanitize);
        assert!(config.block_on_risk);
        assert_eq!(config.messages_upstream, "http://127.0.0.1:1");
    }
}

//! Guard pipeline configuration.

use serde::{Deserialize, Serialize};

/// Default detection service base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.moltguard.dev";

/// Default per-chunk request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default cap on concurrent outbound detection requests.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Configuration for the detection client and credential resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Base URL of the detection service.
    pub api_base_url: String,
    /// Explicitly configured API key. When set, the credentials file and
    /// auto-registration are never consulted.
    pub api_key: Option<String>,
    /// Whether to auto-register for an API key when none is available.
    pub auto_register: bool,
    /// Per-chunk request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum concurrent detection requests across the whole process.
    pub max_concurrency: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            auto_register: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl GuardConfig {
    /// Sets the detection service base URL.
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Sets an explicit API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Enables or disables auto-registration.
    pub fn with_auto_register(mut self, enabled: bool) -> Self {
        self.auto_register = enabled;
        self
    }

    /// Sets the per-chunk timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

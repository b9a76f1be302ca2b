//! Bridge client configuration.

/// Configuration for a bridge dispatcher.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Base URL of the bridge API (e.g. "http://localhost:41830").
    pub base_url: String,
    /// Opaque bearer credential attached to the stream subscription and to
    /// invoke/cancel calls. Lifecycle (refresh, storage) is external.
    pub token: Option<String>,
    /// Capacity of the in-memory event ring.
    pub ring_capacity: usize,
    /// Default invoke timeout when the caller does not set one (ms).
    pub default_timeout_ms: u64,
    /// Reconnection policy for the shared event stream.
    pub reconnect: ReconnectPolicy,
}

impl BridgeConfig {
    /// Create a config for the given base URL with defaults.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:41830".to_string(),
            token: None,
            ring_capacity: 800,
            default_timeout_ms: 60_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Bounded exponential backoff with jitter for stream reconnection.
///
/// Applied only after an unexpected stream failure, never after a
/// caller-initiated disconnect. Disabled by default; this is deployment
/// policy, not a protocol constant.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Whether to reconnect automatically at all.
    pub enabled: bool,
    /// Delay before the first retry (ms).
    pub initial_delay_ms: u64,
    /// Upper bound on the delay (ms).
    pub max_delay_ms: u64,
    /// Multiplier applied per consecutive failure.
    pub multiplier: f64,
    /// Jitter fraction in [0, 1]; the delay is scaled by a random factor
    /// in `[1 - jitter, 1 + jitter]` to avoid request storms.
    pub jitter: f64,
}

impl ReconnectPolicy {
    /// Delay for the given retry attempt (0-based), jittered and bounded.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let bounded = base.min(self.max_delay_ms as f64);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            use rand::Rng;
            rand::rng().random_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        std::time::Duration::from_millis((bounded * factor).round() as u64)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay_ms: 250,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

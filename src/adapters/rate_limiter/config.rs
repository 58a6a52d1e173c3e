//! Rate limit policy types.
//!
//! A policy is the `(max, window, block)` triple one limiter enforces.
//! `RateLimitPolicies` holds the presets the marketplace API uses; each can
//! be overridden through configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Block imposed after an exceedance when a policy does not name one.
pub const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(15 * 60);

/// Limits for one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum hits allowed within one window.
    pub max: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Block length in milliseconds once `max` is exceeded.
    #[serde(default = "default_block_ms")]
    pub block_duration_ms: u64,
}

impl RateLimitPolicy {
    /// Creates a policy with the default 15 minute block.
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window_ms: window.as_millis() as u64,
            block_duration_ms: DEFAULT_BLOCK_DURATION.as_millis() as u64,
        }
    }

    /// Sets the block imposed after an exceedance.
    pub fn with_block_duration(mut self, block: Duration) -> Self {
        self.block_duration_ms = block.as_millis() as u64;
        self
    }

    /// Window as a Duration.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Block as a Duration.
    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(self.block_duration_ms)
    }

    /// Rejects policies that could never allow a request.
    pub fn validate(&self) -> Result<(), String> {
        if self.max == 0 {
            return Err("max must be at least 1".to_string());
        }
        if self.window_ms == 0 {
            return Err("window must be longer than 0ms".to_string());
        }
        Ok(())
    }
}

fn default_block_ms() -> u64 {
    DEFAULT_BLOCK_DURATION.as_millis() as u64
}

/// The preset policies of the marketplace API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// General API traffic.
    Api,
    /// Login, signup and password reset attempts.
    Auth,
    /// Ad image uploads.
    Upload,
    /// Buyer/seller contact messages.
    Messaging,
    /// Listing search.
    Search,
}

impl PolicyKind {
    /// Every preset, in declaration order.
    pub const ALL: [PolicyKind; 5] = [
        PolicyKind::Api,
        PolicyKind::Auth,
        PolicyKind::Upload,
        PolicyKind::Messaging,
        PolicyKind::Search,
    ];

    /// Namespace the preset's counters live under.
    pub fn namespace(&self) -> &'static str {
        match self {
            PolicyKind::Api => "api",
            PolicyKind::Auth => "auth",
            PolicyKind::Upload => "upload",
            PolicyKind::Messaging => "messaging",
            PolicyKind::Search => "search",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.namespace())
    }
}

/// Preset policies, deserializable so deployments can tune them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicies {
    pub api: RateLimitPolicy,
    pub auth: RateLimitPolicy,
    pub upload: RateLimitPolicy,
    pub messaging: RateLimitPolicy,
    pub search: RateLimitPolicy,
}

impl Default for RateLimitPolicies {
    fn default() -> Self {
        const MINUTE: Duration = Duration::from_secs(60);

        Self {
            api: RateLimitPolicy::new(120, MINUTE),
            auth: RateLimitPolicy::new(5, 5 * MINUTE).with_block_duration(30 * MINUTE),
            upload: RateLimitPolicy::new(10, 5 * MINUTE),
            messaging: RateLimitPolicy::new(30, MINUTE),
            search: RateLimitPolicy::new(60, MINUTE),
        }
    }
}

impl RateLimitPolicies {
    /// Returns the policy for a preset.
    pub fn get(&self, kind: PolicyKind) -> RateLimitPolicy {
        match kind {
            PolicyKind::Api => self.api,
            PolicyKind::Auth => self.auth,
            PolicyKind::Upload => self.upload,
            PolicyKind::Messaging => self.messaging,
            PolicyKind::Search => self.search,
        }
    }

    /// Validates every preset, naming the first bad one.
    pub fn validate(&self) -> Result<(), String> {
        for kind in PolicyKind::ALL {
            self.get(kind)
                .validate()
                .map_err(|reason| format!("{} policy: {}", kind, reason))?;
        }
        Ok(())
    }
}

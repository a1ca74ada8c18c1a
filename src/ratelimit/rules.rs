//! Rate limit policies and the endpoint registry.
//!
//! Every guarded endpoint has a compiled-in policy. A deployment can overlay
//! per-endpoint overrides from YAML, but cannot register new endpoints: an
//! unknown endpoint name is a programming error and fails loudly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeepError, Result};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// An operation guarded by the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Endpoint {
    Login,
    Signup,
    CreatePayment,
    AdminVetting,
    CreateProject,
    UpdateProject,
}

impl Endpoint {
    /// All registered endpoints.
    pub const ALL: [Endpoint; 6] = [
        Endpoint::Login,
        Endpoint::Signup,
        Endpoint::CreatePayment,
        Endpoint::AdminVetting,
        Endpoint::CreateProject,
        Endpoint::UpdateProject,
    ];

    /// The endpoint name used in storage keys and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Login => "login",
            Endpoint::Signup => "signup",
            Endpoint::CreatePayment => "createPayment",
            Endpoint::AdminVetting => "adminVetting",
            Endpoint::CreateProject => "createProject",
            Endpoint::UpdateProject => "updateProject",
        }
    }

    /// Noun phrase used in user-facing messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Endpoint::Login => "login attempts",
            Endpoint::Signup => "signup attempts",
            Endpoint::CreatePayment => "payment attempts",
            Endpoint::AdminVetting => "review actions",
            Endpoint::CreateProject => "project creations",
            Endpoint::UpdateProject => "project updates",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Endpoint {
    type Err = GatekeepError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::ALL
            .into_iter()
            .find(|endpoint| endpoint.as_str() == s)
            .ok_or_else(|| GatekeepError::UnknownEndpoint(s.to_string()))
    }
}

/// Limiting policy for a single endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// The endpoint this policy applies to
    pub endpoint: Endpoint,
    /// Attempts allowed inside one window before blocking
    pub max_attempts: u32,
    /// Sliding window length
    pub window: Duration,
    /// Block duration for the first violation
    pub base_block: Duration,
    /// Upper bound on any block duration
    pub max_block: Duration,
    /// Double the block for every repeated violation
    pub use_exponential_backoff: bool,
}

impl RateLimitConfig {
    /// Block duration for the given (post-increment) violation count.
    ///
    /// With backoff enabled this is `base_block * 2^(violations - 1)`, capped at
    /// `max_block`. Without backoff it is always `base_block`.
    pub fn block_duration(&self, violation_count: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.base_block;
        }

        let exponent = violation_count.saturating_sub(1);
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_block
            .checked_mul(multiplier)
            .unwrap_or(self.max_block)
            .min(self.max_block)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(GatekeepError::Config(format!(
                "{}: max_attempts must be at least 1",
                self.endpoint
            )));
        }
        if self.window.is_zero() {
            return Err(GatekeepError::Config(format!(
                "{}: window must be non-zero",
                self.endpoint
            )));
        }
        if self.base_block.is_zero() {
            return Err(GatekeepError::Config(format!(
                "{}: base_block must be non-zero",
                self.endpoint
            )));
        }
        if self.base_block > self.max_block {
            return Err(GatekeepError::Config(format!(
                "{}: base_block exceeds max_block",
                self.endpoint
            )));
        }
        Ok(())
    }
}

fn policy(
    endpoint: Endpoint,
    max_attempts: u32,
    window: Duration,
    base_block: Duration,
    max_block: Duration,
    use_exponential_backoff: bool,
) -> (Endpoint, RateLimitConfig) {
    (
        endpoint,
        RateLimitConfig {
            endpoint,
            max_attempts,
            window,
            base_block,
            max_block,
            use_exponential_backoff,
        },
    )
}

/// The compiled-in policy table, keyed by endpoint.
pub static RATE_LIMIT_CONFIGS: LazyLock<HashMap<Endpoint, RateLimitConfig>> = LazyLock::new(|| {
    HashMap::from([
        policy(Endpoint::Login, 5, 15 * MINUTE, 15 * MINUTE, 24 * HOUR, true),
        policy(Endpoint::Signup, 3, HOUR, HOUR, 24 * HOUR, true),
        policy(Endpoint::CreatePayment, 3, 5 * MINUTE, 10 * MINUTE, 2 * HOUR, true),
        policy(Endpoint::AdminVetting, 30, MINUTE, MINUTE, 5 * MINUTE, false),
        policy(Endpoint::CreateProject, 10, HOUR, 30 * MINUTE, 30 * MINUTE, false),
        policy(Endpoint::UpdateProject, 20, HOUR, 15 * MINUTE, 15 * MINUTE, false),
    ])
});

/// A partial policy read from an overrides file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverride {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub window_secs: Option<u64>,
    #[serde(default)]
    pub base_block_secs: Option<u64>,
    #[serde(default)]
    pub max_block_secs: Option<u64>,
    #[serde(default)]
    pub use_exponential_backoff: Option<bool>,
}

/// Overrides document: a map from endpoint name to partial policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyOverrides {
    #[serde(default)]
    pub endpoints: HashMap<String, PolicyOverride>,
}

/// Immutable endpoint -> policy lookup.
#[derive(Debug, Clone)]
pub struct ConfigRegistry {
    policies: HashMap<Endpoint, RateLimitConfig>,
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigRegistry {
    /// Create a registry holding the built-in policies.
    pub fn new() -> Self {
        Self {
            policies: RATE_LIMIT_CONFIGS.clone(),
        }
    }

    /// Load overrides from a YAML file on top of the built-in policies.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policy overrides");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse overrides from a YAML string on top of the built-in policies.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let overrides: PolicyOverrides = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeepError::Config(format!("Failed to parse policy overrides: {}", e)))?;
        Self::new().with_overrides(overrides)
    }

    /// Apply overrides, validating every touched policy.
    pub fn with_overrides(mut self, overrides: PolicyOverrides) -> Result<Self> {
        for (name, patch) in overrides.endpoints {
            let endpoint: Endpoint = name.parse()?;
            let mut policy = self.policies[&endpoint].clone();

            if let Some(max_attempts) = patch.max_attempts {
                policy.max_attempts = max_attempts;
            }
            if let Some(secs) = patch.window_secs {
                policy.window = Duration::from_secs(secs);
            }
            if let Some(secs) = patch.base_block_secs {
                policy.base_block = Duration::from_secs(secs);
            }
            if let Some(secs) = patch.max_block_secs {
                policy.max_block = Duration::from_secs(secs);
            }
            if let Some(backoff) = patch.use_exponential_backoff {
                policy.use_exponential_backoff = backoff;
            }

            policy.validate()?;
            info!(endpoint = %endpoint, max_attempts = policy.max_attempts, "Applied policy override");
            self.policies.insert(endpoint, policy);
        }
        Ok(self)
    }

    /// Get the policy for an endpoint.
    pub fn get(&self, endpoint: Endpoint) -> &RateLimitConfig {
        // Every Endpoint variant is seeded from RATE_LIMIT_CONFIGS.
        &self.policies[&endpoint]
    }

    /// Get the policy for an endpoint by name.
    pub fn get_by_name(&self, name: &str) -> Result<&RateLimitConfig> {
        let endpoint: Endpoint = name.parse()?;
        Ok(self.get(endpoint))
    }

    /// All policies, ordered by endpoint.
    pub fn policies(&self) -> Vec<&RateLimitConfig> {
        let mut policies: Vec<_> = self.policies.values().collect();
        policies.sort_by_key(|p| p.endpoint);
        policies
    }
}

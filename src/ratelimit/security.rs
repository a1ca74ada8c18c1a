//! Security event reporting.

use tracing::warn;

use super::rules::Endpoint;

/// Receives security-relevant limiter events.
pub trait SecurityLogger: Send + Sync {
    /// A caller was refused by the limiter.
    fn rate_limit_hit(&self, endpoint: Endpoint, identifier: &str);
}

/// Reports security events through `tracing` under the `security` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSecurityLogger;

impl SecurityLogger for TracingSecurityLogger {
    fn rate_limit_hit(&self, endpoint: Endpoint, identifier: &str) {
        warn!(
            target: "security",
            event = "rate_limit_hit",
            endpoint = %endpoint,
            identifier = %identifier,
            "Rate limit hit"
        );
    }
}

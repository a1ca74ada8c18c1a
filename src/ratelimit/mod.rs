//! Rate limiting logic and state management.

pub mod clock;
pub mod key;
mod identifier;
mod limiter;
mod record;
mod rules;
mod security;
mod violations;

pub use clock::{Clock, ManualClock, SystemClock};
pub use identifier::{get_identifier, ANONYMOUS};
pub use key::AttemptKey;
pub use limiter::RateLimitEngine;
pub use record::{AttemptRecord, RateLimitResult, Violation};
pub use rules::{ConfigRegistry, Endpoint, PolicyOverride, PolicyOverrides, RateLimitConfig, RATE_LIMIT_CONFIGS};
pub use security::{SecurityLogger, TracingSecurityLogger};
pub use violations::ViolationReporter;

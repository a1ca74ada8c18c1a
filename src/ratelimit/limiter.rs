//! Core rate limiter implementation.
//!
//! The engine is a deterrent, not an authority: its state lives on the
//! caller's side and can be wiped by the caller. It complements server-side
//! limiting and never replaces it.
//!
//! Expiry is lazy. Stale timestamps are pruned and expired blocks ignored
//! whenever a record is read; nothing runs in the background.
//!
//! Every operation is a read-modify-write of one record without locking.
//! Two writers racing on the same key resolve as last-writer-wins, so a
//! concurrent failure may occasionally go uncounted.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::store::AttemptStore;

use super::clock::{duration_millis, Clock, SystemClock};
use super::key::AttemptKey;
use super::record::{AttemptRecord, RateLimitResult, Violation};
use super::rules::{ConfigRegistry, Endpoint, RateLimitConfig};
use super::security::{SecurityLogger, TracingSecurityLogger};
use super::violations::ViolationReporter;

/// The rate limit decision engine.
///
/// Callers check before performing a guarded operation and record its
/// outcome afterwards:
///
/// ```no_run
/// use std::sync::Arc;
/// use gatekeep::ratelimit::{get_identifier, Endpoint, RateLimitEngine};
/// use gatekeep::store::{AttemptStore, MemoryStore};
///
/// let engine = RateLimitEngine::new(AttemptStore::new(Arc::new(MemoryStore::new())));
/// let identifier = get_identifier(Some("someone@example.com"), None);
///
/// let result = engine.check_rate_limit(Endpoint::Login, &identifier);
/// if result.allowed {
///     let success = true; // outcome of the real login
///     engine.record_attempt(Endpoint::Login, &identifier, success);
/// }
/// ```
pub struct RateLimitEngine {
    registry: ConfigRegistry,
    store: AttemptStore,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn SecurityLogger>,
}

impl RateLimitEngine {
    /// Create an engine with the built-in policies, the system clock and
    /// `tracing`-based security logging.
    pub fn new(store: AttemptStore) -> Self {
        Self {
            registry: ConfigRegistry::new(),
            store,
            clock: Arc::new(SystemClock),
            logger: Arc::new(TracingSecurityLogger),
        }
    }

    /// Replace the policy registry.
    pub fn with_registry(mut self, registry: ConfigRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the security event sink.
    pub fn with_logger(mut self, logger: Arc<dyn SecurityLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// The policy registry in use.
    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    /// The attempt store in use.
    pub fn store(&self) -> &AttemptStore {
        &self.store
    }

    /// Decide whether a call to `endpoint` by `identifier` may proceed.
    ///
    /// Checking does not consume an attempt; only a failed [`record_attempt`]
    /// does. If the failures already in the window leave no room for this
    /// call, a new block is triggered and persisted.
    ///
    /// [`record_attempt`]: RateLimitEngine::record_attempt
    pub fn check_rate_limit(&self, endpoint: Endpoint, identifier: &str) -> RateLimitResult {
        let key = AttemptKey::new(endpoint, identifier);
        let config = self.registry.get(endpoint);
        let now = self.clock.now_millis();

        trace!(key = %key, "Checking rate limit");

        let Some(mut record) = self.store.load(&key) else {
            return RateLimitResult::allowed(config.max_attempts - 1);
        };
        record.prune(now, config.window);

        if let Some(until) = record.active_block(now) {
            return self.deny(endpoint, identifier, until, now);
        }

        let remaining = i64::from(config.max_attempts) - i64::from(record.failures_in_window()) - 1;
        if remaining < 0 {
            let until = self.escalate(&key, config, &mut record, now);
            self.persist(&key, &record);
            return self.deny(endpoint, identifier, until, now);
        }

        RateLimitResult::allowed(remaining as u32)
    }

    /// Record the outcome of a guarded operation.
    ///
    /// Only failures are counted against the window. A success ends any
    /// block and clears the failure streak along with the windowed failures,
    /// but keeps the violation history. A failure that brings the streak to
    /// the endpoint's limit triggers a new block, unless one is already in
    /// place.
    pub fn record_attempt(&self, endpoint: Endpoint, identifier: &str, success: bool) {
        let key = AttemptKey::new(endpoint, identifier);
        let config = self.registry.get(endpoint);
        let now = self.clock.now_millis();

        let mut record = self.store.load(&key).unwrap_or_default();
        record.prune(now, config.window);

        if success {
            if record.blocked_until.take().is_some() {
                debug!(key = %key, "Block cleared by successful attempt");
            }
            record.consecutive_failures = 0;
            record.timestamps.clear();
        } else {
            record.timestamps.push(now);
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            debug!(
                key = %key,
                failures = record.consecutive_failures,
                limit = config.max_attempts,
                "Recorded failed attempt"
            );

            if record.consecutive_failures >= config.max_attempts && !record.is_blocked(now) {
                self.escalate(&key, config, &mut record, now);
            }
        }

        self.persist(&key, &record);
    }

    /// Forget everything about `endpoint` for `identifier`, including past
    /// violations.
    pub fn reset_rate_limit(&self, endpoint: Endpoint, identifier: &str) {
        let key = AttemptKey::new(endpoint, identifier);

        match self.store.remove(&key) {
            Ok(()) => info!(key = %key, "Rate limit reset"),
            Err(e) => warn!(key = %key, error = %e, "Failed to reset rate limit"),
        }
    }

    /// Reset every record in the store's namespace. Returns how many were removed.
    pub fn reset_all(&self) -> Result<usize> {
        let keys = self.store.keys()?;
        for key in &keys {
            self.store.remove(key)?;
        }

        info!(count = keys.len(), namespace = %self.store.namespace(), "All rate limits reset");
        Ok(keys.len())
    }

    /// The persisted record for `endpoint` and `identifier`, if any.
    pub fn get_record(&self, endpoint: Endpoint, identifier: &str) -> Option<AttemptRecord> {
        self.store.load(&AttemptKey::new(endpoint, identifier))
    }

    /// All currently blocked keys.
    pub fn get_rate_limit_violations(&self) -> Vec<Violation> {
        ViolationReporter::new(self.store.clone(), self.clock.clone()).violations()
    }

    /// Start a new block on `record`, returning its end time.
    fn escalate(
        &self,
        key: &AttemptKey,
        config: &RateLimitConfig,
        record: &mut AttemptRecord,
        now: i64,
    ) -> i64 {
        record.violation_count = record.violation_count.saturating_add(1);
        let block = config.block_duration(record.violation_count);
        let until = now.saturating_add(duration_millis(block));
        record.blocked_until = Some(until);

        warn!(
            key = %key,
            violations = record.violation_count,
            block_secs = block.as_secs(),
            "Rate limit exceeded, blocking"
        );
        until
    }

    fn deny(&self, endpoint: Endpoint, identifier: &str, until: i64, now: i64) -> RateLimitResult {
        self.logger.rate_limit_hit(endpoint, identifier);
        let retry_after = Duration::from_millis(until.saturating_sub(now) as u64);
        RateLimitResult::blocked(endpoint, retry_after, until)
    }

    fn persist(&self, key: &AttemptKey, record: &AttemptRecord) {
        if let Err(e) = self.store.save(key, record) {
            warn!(key = %key, error = %e, "Failed to persist attempt record");
        }
    }
}

impl std::fmt::Debug for RateLimitEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitEngine")
            .field("registry", &self.registry)
            .field("store", &self.store)
            .finish()
    }
}

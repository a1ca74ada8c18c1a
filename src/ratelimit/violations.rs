//! Reporting of currently blocked keys.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::AttemptStore;

use super::clock::{millis_to_datetime, Clock};
use super::record::Violation;

/// Scans persisted attempt records for active blocks.
///
/// Intended for operator dashboards and alerting, not the decision path.
pub struct ViolationReporter {
    store: AttemptStore,
    clock: Arc<dyn Clock>,
}

impl ViolationReporter {
    /// Create a reporter over `store`.
    pub fn new(store: AttemptStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Every key whose block has not yet expired, soonest to lift first.
    ///
    /// An unreadable store reports no violations.
    pub fn violations(&self) -> Vec<Violation> {
        let now = self.clock.now_millis();

        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list attempt records");
                return Vec::new();
            }
        };

        let mut violations: Vec<Violation> = keys
            .into_iter()
            .filter_map(|key| {
                let record = self.store.load(&key)?;
                let until = record.active_block(now)?;
                Some(Violation {
                    endpoint: key.endpoint,
                    identifier: key.identifier,
                    blocked_until: millis_to_datetime(until),
                    violation_count: record.violation_count,
                })
            })
            .collect();

        violations.sort_by(|a, b| {
            a.blocked_until
                .cmp(&b.blocked_until)
                .then_with(|| a.endpoint.cmp(&b.endpoint))
                .then_with(|| a.identifier.cmp(&b.identifier))
        });

        debug!(count = violations.len(), "Collected rate limit violations");
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::{Endpoint, RateLimitEngine};
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn setup() -> (RateLimitEngine, ViolationReporter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::from_millis(1_000_000));
        let store = AttemptStore::new(Arc::new(MemoryStore::with_clock(clock.clone())));
        let engine = RateLimitEngine::new(store.clone()).with_clock(clock.clone());
        let reporter = ViolationReporter::new(store, clock.clone());
        (engine, reporter, clock)
    }

    #[test]
    fn test_no_violations_when_nothing_blocked() {
        let (engine, reporter, _) = setup();
        assert!(reporter.violations().is_empty());

        engine.record_attempt(Endpoint::Login, "u1", false);
        engine.record_attempt(Endpoint::Signup, "u2", true);
        assert!(reporter.violations().is_empty());
    }

    #[test]
    fn test_violation_reported_after_block() {
        let (engine, reporter, clock) = setup();

        for _ in 0..3 {
            engine.record_attempt(Endpoint::CreatePayment, "u1", false);
        }

        let violations = reporter.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].endpoint, Endpoint::CreatePayment);
        assert_eq!(violations[0].identifier, "u1");
        assert_eq!(violations[0].violation_count, 1);
        assert_eq!(
            violations[0].blocked_until,
            millis_to_datetime(clock.now_millis() + 10 * 60 * 1000)
        );
    }

    #[test]
    fn test_expired_blocks_are_not_reported() {
        let (engine, reporter, clock) = setup();

        for _ in 0..3 {
            engine.record_attempt(Endpoint::Signup, "u1", false);
        }
        assert_eq!(reporter.violations().len(), 1);

        clock.advance(Duration::from_secs(3600));
        assert!(reporter.violations().is_empty());
    }

    #[test]
    fn test_violations_sorted_by_expiry() {
        let (engine, reporter, _) = setup();

        for _ in 0..3 {
            engine.record_attempt(Endpoint::Signup, "late", false);
        }
        for _ in 0..3 {
            engine.record_attempt(Endpoint::CreatePayment, "early", false);
        }

        let identifiers: Vec<_> = reporter
            .violations()
            .into_iter()
            .map(|v| v.identifier)
            .collect();
        assert_eq!(identifiers, vec!["early".to_string(), "late".to_string()]);
    }
}

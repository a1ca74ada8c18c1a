//! Persisted attempt state and the values returned to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::clock::{duration_millis, millis_to_datetime};
use super::rules::Endpoint;

/// Attempt history for one `(endpoint, identifier)` pair.
///
/// Serialized as camelCase JSON. All timestamps are epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    /// Failure times since the last success inside the current window, oldest first
    #[serde(default)]
    pub timestamps: Vec<i64>,
    /// Failures since the last success
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Blocks triggered so far; only cleared by an explicit reset
    #[serde(default)]
    pub violation_count: u32,
    /// While in the future, every check is denied
    #[serde(default)]
    pub blocked_until: Option<i64>,
}

impl AttemptRecord {
    /// Drop timestamps that have slid out of the window ending at `now`.
    pub fn prune(&mut self, now: i64, window: Duration) {
        let cutoff = now.saturating_sub(duration_millis(window));
        self.timestamps.retain(|&ts| ts > cutoff);
    }

    /// Whether an unexpired block is in place at `now`.
    pub fn is_blocked(&self, now: i64) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    /// The block end time, if a block is in place at `now`.
    pub fn active_block(&self, now: i64) -> Option<i64> {
        self.blocked_until.filter(|&until| now < until)
    }

    /// Number of failures currently counted against the window.
    pub fn failures_in_window(&self) -> u32 {
        u32::try_from(self.timestamps.len()).unwrap_or(u32::MAX)
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    /// Whether the caller may proceed
    pub allowed: bool,
    /// Attempts left after this one
    pub remaining_attempts: u32,
    /// Explanation shown to the user when denied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Time until the block lifts
    #[serde(skip_serializing_if = "Option::is_none", with = "duration_millis_opt")]
    pub retry_after: Option<Duration>,
    /// Absolute time the block lifts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<DateTime<Utc>>,
}

impl RateLimitResult {
    /// An allowed result.
    pub fn allowed(remaining_attempts: u32) -> Self {
        Self {
            allowed: true,
            remaining_attempts,
            message: None,
            retry_after: None,
            reset_time: None,
        }
    }

    /// A denied result for a block lifting at `blocked_until`.
    pub fn blocked(endpoint: Endpoint, retry_after: Duration, blocked_until: i64) -> Self {
        Self {
            allowed: false,
            remaining_attempts: 0,
            message: Some(format!(
                "Too many {}. Please try again in {}.",
                endpoint.describe(),
                describe_wait(retry_after)
            )),
            retry_after: Some(retry_after),
            reset_time: Some(millis_to_datetime(blocked_until)),
        }
    }
}

/// A currently active block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub endpoint: Endpoint,
    pub identifier: String,
    pub blocked_until: DateTime<Utc>,
    pub violation_count: u32,
}

/// Render a wait as the largest whole unit, rounding up.
fn describe_wait(wait: Duration) -> String {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    let (amount, unit) = if secs < 60 {
        (secs.max(1), "second")
    } else if secs < 3600 {
        (secs.div_ceil(60), "minute")
    } else {
        (secs.div_ceil(3600), "hour")
    };

    if amount == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", amount, unit)
    }
}

mod duration_millis_opt {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => {
                serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_drops_stale_timestamps() {
        let mut record = AttemptRecord {
            timestamps: vec![1_000, 5_000, 9_000],
            ..Default::default()
        };

        // Window of 5s ending at 10s keeps (5s, 10s]
        record.prune(10_000, Duration::from_secs(5));
        assert_eq!(record.timestamps, vec![9_000]);
    }

    #[test]
    fn test_is_blocked() {
        let record = AttemptRecord {
            blocked_until: Some(2_000),
            ..Default::default()
        };

        assert!(record.is_blocked(1_999));
        assert!(!record.is_blocked(2_000));
        assert!(!AttemptRecord::default().is_blocked(0));
    }

    #[test]
    fn test_active_block() {
        let record = AttemptRecord {
            blocked_until: Some(61_000),
            ..Default::default()
        };

        assert_eq!(record.active_block(1_000), Some(61_000));
        assert_eq!(record.active_block(61_000), None);
    }

    #[test]
    fn test_record_json_format() {
        let record = AttemptRecord {
            timestamps: vec![1, 2],
            consecutive_failures: 2,
            violation_count: 1,
            blocked_until: Some(99),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "timestamps": [1, 2],
                "consecutiveFailures": 2,
                "violationCount": 1,
                "blockedUntil": 99
            })
        );
    }

    #[test]
    fn test_record_tolerates_missing_fields() {
        let record: AttemptRecord = serde_json::from_str(r#"{"timestamps":[5]}"#).unwrap();
        assert_eq!(record.timestamps, vec![5]);
        assert_eq!(record.violation_count, 0);
        assert_eq!(record.blocked_until, None);
    }

    #[test]
    fn test_blocked_result_message() {
        let result = RateLimitResult::blocked(Endpoint::Login, Duration::from_secs(15 * 60), 900_000);

        assert!(!result.allowed);
        assert_eq!(result.remaining_attempts, 0);
        assert_eq!(
            result.message.as_deref(),
            Some("Too many login attempts. Please try again in 15 minutes.")
        );
        assert_eq!(result.reset_time.unwrap().timestamp_millis(), 900_000);
    }

    #[test]
    fn test_describe_wait() {
        assert_eq!(describe_wait(Duration::from_millis(300)), "1 second");
        assert_eq!(describe_wait(Duration::from_secs(45)), "45 seconds");
        assert_eq!(describe_wait(Duration::from_secs(61)), "2 minutes");
        assert_eq!(describe_wait(Duration::from_secs(3600)), "1 hour");
        assert_eq!(describe_wait(Duration::from_secs(2 * 3600 + 1)), "3 hours");
    }
}

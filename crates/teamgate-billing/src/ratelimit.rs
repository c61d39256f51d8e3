//! Rate Limiting
//!
//! Token bucket per (operation, key). Buckets start full and refill
//! continuously at `rate / period` up to `capacity`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use teamgate_common::{Clock, GateError, GateResult};
use tracing::debug;

/// Throttled operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RateLimitedOperation {
    /// Keyed by team
    SendInvite,
    /// Keyed by team
    AiRequest,
    /// Keyed by email
    FailedLogin,
}

impl RateLimitedOperation {
    pub const ALL: [RateLimitedOperation; 3] =
        [Self::SendInvite, Self::AiRequest, Self::FailedLogin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendInvite => "sendInvite",
            Self::AiRequest => "aiRequest",
            Self::FailedLogin => "failedLogin",
        }
    }
}

impl fmt::Display for RateLimitedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRule {
    /// Tokens added per period
    pub rate: u32,
    pub period_secs: u64,
    /// Burst size
    pub capacity: u32,
}

impl BucketRule {
    /// Tokens earned over `elapsed_ms`
    fn refill_amount(&self, elapsed_ms: i64) -> f64 {
        elapsed_ms as f64 * f64::from(self.rate) / (self.period_secs.max(1) as f64 * 1000.0)
    }
}

/// Per-operation bucket rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RateLimitConfig {
    pub send_invite: BucketRule,
    pub ai_request: BucketRule,
    pub failed_login: BucketRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            send_invite: BucketRule { rate: 10, period_secs: 60, capacity: 5 },
            ai_request: BucketRule { rate: 20, period_secs: 60, capacity: 5 },
            failed_login: BucketRule { rate: 5, period_secs: 3600, capacity: 5 },
        }
    }
}

impl RateLimitConfig {
    pub fn rule(&self, operation: RateLimitedOperation) -> BucketRule {
        match operation {
            RateLimitedOperation::SendInvite => self.send_invite,
            RateLimitedOperation::AiRequest => self.ai_request,
            RateLimitedOperation::FailedLogin => self.failed_login,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    fn full(rule: &BucketRule, now: DateTime<Utc>) -> Self {
        Self {
            tokens: f64::from(rule.capacity),
            last_refill: now,
        }
    }

    fn refill(&mut self, rule: &BucketRule, now: DateTime<Utc>) {
        let elapsed_ms = (now - self.last_refill).num_milliseconds();
        if elapsed_ms > 0 {
            let added = rule.refill_amount(elapsed_ms);
            self.tokens = (self.tokens + added).min(f64::from(rule.capacity));
            self.last_refill = now;
        }
    }

    /// Time until one whole token is available
    fn retry_after(&self, rule: &BucketRule) -> Duration {
        if rule.rate == 0 {
            return Duration::MAX;
        }
        let missing = (1.0 - self.tokens).max(0.0);
        let ms = missing * rule.period_secs.max(1) as f64 * 1000.0 / f64::from(rule.rate);
        Duration::from_millis(ms.ceil() as u64)
    }
}

/// Token-bucket rate limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    buckets: DashMap<(RateLimitedOperation, String), TokenBucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            buckets: DashMap::new(),
        }
    }

    /// Consume one token or fail with `RateLimited`.
    ///
    /// The bucket entry is held exclusively for the refill-check-decrement
    /// sequence, so two callers can never spend the same token.
    pub fn limit(&self, operation: RateLimitedOperation, key: &str) -> GateResult<()> {
        let rule = self.config.rule(operation);
        let now = self.clock.now();
        let mut bucket = self
            .buckets
            .entry((operation, key.to_string()))
            .or_insert_with(|| TokenBucket::full(&rule, now));

        bucket.refill(&rule, now);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let retry_after = bucket.retry_after(&rule);
        debug!(%operation, key, retry_after_ms = retry_after.as_millis() as u64, "rate limited");
        Err(GateError::RateLimited {
            operation: operation.to_string(),
            retry_after,
        })
    }

    /// Whether `limit` would succeed right now, without consuming
    pub fn check(&self, operation: RateLimitedOperation, key: &str) -> GateResult<()> {
        let rule = self.config.rule(operation);
        let now = self.clock.now();
        let Some(mut bucket) = self.buckets.get(&(operation, key.to_string())).map(|b| *b) else {
            return Ok(());
        };

        bucket.refill(&rule, now);
        if bucket.tokens >= 1.0 {
            Ok(())
        } else {
            Err(GateError::RateLimited {
                operation: operation.to_string(),
                retry_after: bucket.retry_after(&rule),
            })
        }
    }

    /// Refill the bucket to capacity
    pub fn reset(&self, operation: RateLimitedOperation, key: &str) {
        self.buckets.remove(&(operation, key.to_string()));
    }

    /// Drop buckets that have refilled to capacity. A missing bucket
    /// starts full, so this never changes an outcome. Returns how many
    /// were dropped.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut pruned = 0;
        self.buckets.retain(|(operation, _), bucket| {
            let rule = self.config.rule(*operation);
            let mut projected = *bucket;
            projected.refill(&rule, now);
            let keep = projected.tokens < f64::from(rule.capacity);
            if !keep {
                pruned += 1;
            }
            keep
        });
        if pruned > 0 {
            debug!(pruned, remaining = self.buckets.len(), "idle rate-limit buckets pruned");
        }
        pruned
    }

    /// Buckets currently tracked
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use teamgate_common::ManualClock;

    fn limiter() -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        (clock.clone(), RateLimiter::new(RateLimitConfig::default(), clock))
    }

    #[test]
    fn test_burst_then_refill() {
        let (clock, limiter) = limiter();
        let op = RateLimitedOperation::AiRequest;

        for _ in 0..5 {
            limiter.limit(op, "team-1").unwrap();
        }
        match limiter.limit(op, "team-1") {
            Err(GateError::RateLimited { operation, retry_after }) => {
                assert_eq!(operation, "aiRequest");
                assert_eq!(retry_after, Duration::from_secs(3));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }

        clock.advance(chrono::Duration::seconds(3));
        limiter.limit(op, "team-1").unwrap();
        assert!(limiter.limit(op, "team-1").is_err());
    }

    #[test]
    fn test_keys_and_operations_are_independent() {
        let (_, limiter) = limiter();
        for _ in 0..5 {
            limiter.limit(RateLimitedOperation::SendInvite, "a").unwrap();
        }
        assert!(limiter.limit(RateLimitedOperation::SendInvite, "a").is_err());
        assert!(limiter.limit(RateLimitedOperation::SendInvite, "b").is_ok());
        assert!(limiter.limit(RateLimitedOperation::AiRequest, "a").is_ok());
    }

    #[test]
    fn test_check_does_not_consume_and_reset_refills() {
        let (_, limiter) = limiter();
        let op = RateLimitedOperation::FailedLogin;
        for _ in 0..5 {
            limiter.check(op, "a@x.io").unwrap();
            limiter.limit(op, "a@x.io").unwrap();
        }
        assert!(limiter.check(op, "a@x.io").is_err());

        limiter.reset(op, "a@x.io");
        assert!(limiter.check(op, "a@x.io").is_ok());
        assert!(limiter.limit(op, "a@x.io").is_ok());
    }

    #[test]
    fn test_prune_drops_only_refilled_buckets() {
        let (clock, limiter) = limiter();
        for i in 0..1000 {
            limiter.limit(RateLimitedOperation::FailedLogin, &format!("u{i}@x.io")).unwrap();
        }
        for _ in 0..5 {
            limiter.limit(RateLimitedOperation::AiRequest, "team-1").unwrap();
        }
        assert_eq!(limiter.tracked(), 1001);
        assert_eq!(limiter.prune(), 0);

        // failedLogin refills one token in 12 minutes, aiRequest needs 15s
        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(limiter.prune(), 0);
        clock.advance(chrono::Duration::minutes(12));
        assert_eq!(limiter.prune(), 1001);
        assert_eq!(limiter.tracked(), 0);

        // a pruned key starts over with a full burst
        for _ in 0..5 {
            limiter.limit(RateLimitedOperation::AiRequest, "team-1").unwrap();
        }
        assert!(limiter.limit(RateLimitedOperation::AiRequest, "team-1").is_err());
    }

    #[test]
    fn test_retry_after_is_honest() {
        let (clock, limiter) = limiter();
        let op = RateLimitedOperation::SendInvite;
        for _ in 0..5 {
            limiter.limit(op, "t").unwrap();
        }
        let Err(GateError::RateLimited { retry_after, .. }) = limiter.limit(op, "t") else {
            panic!("expected RateLimited");
        };
        clock.advance(chrono::Duration::from_std(retry_after).unwrap());
        assert!(limiter.limit(op, "t").is_ok());
    }

    #[test]
    fn test_concurrent_callers_never_overspend() {
        let (_, limiter) = limiter();
        let limiter = Arc::new(limiter);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    limiter
                        .limit(RateLimitedOperation::AiRequest, "shared")
                        .is_ok()
                })
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 5);
    }

    proptest! {
        #[test]
        fn prop_grants_bounded_by_capacity_plus_refill(
            steps in proptest::collection::vec(0u32..4000, 1..60)
        ) {
            let (clock, limiter) = limiter();
            let rule = RateLimitConfig::default().ai_request;
            let mut granted = 0u64;
            let mut elapsed_ms = 0i64;
            for step in steps {
                clock.advance(chrono::Duration::milliseconds(i64::from(step)));
                elapsed_ms += i64::from(step);
                if limiter.limit(RateLimitedOperation::AiRequest, "k").is_ok() {
                    granted += 1;
                }
            }
            let ceiling = f64::from(rule.capacity) + rule.refill_amount(elapsed_ms);
            prop_assert!(granted as f64 <= ceiling + 1e-6);
        }
    }
}

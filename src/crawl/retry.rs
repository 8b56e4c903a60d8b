//! Retry decisions
//!
//! A pure function of the job, the failure kind and the attempt count. The
//! queue applies the decision as a state transition; nothing here sleeps.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::types::{FailureKind, Job};

/// What to do with a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the job to pending, eligible after the delay
    RetryAfter(Duration),
    /// Give up; `needs_review` marks a likely site-layout change
    Abandon { needs_review: bool },
}

/// Backoff and attempt-cap rules
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts (including the first) before giving up
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the uniform jitter added to each backoff
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Decide the fate of `job` after its `attempt`-th attempt failed with `kind`.
    pub fn decide(&self, job: &Job, kind: FailureKind, attempt: u32) -> RetryDecision {
        self.decide_with_hint(job, kind, attempt, None)
    }

    /// Like [`decide`](Self::decide), with a server-supplied minimum delay
    /// (e.g. `Retry-After`) for rate-limited responses.
    pub fn decide_with_hint(
        &self,
        job: &Job,
        kind: FailureKind,
        attempt: u32,
        hint: Option<Duration>,
    ) -> RetryDecision {
        match kind {
            FailureKind::Permanent => RetryDecision::Abandon {
                needs_review: false,
            },
            FailureKind::ParseFailure | FailureKind::NormalizationError => {
                if job.parse_failures == 0 {
                    RetryDecision::RetryAfter(Duration::ZERO)
                } else {
                    RetryDecision::Abandon { needs_review: true }
                }
            }
            FailureKind::TransientNetwork | FailureKind::RateLimited | FailureKind::SinkError => {
                if attempt >= self.max_attempts {
                    return RetryDecision::Abandon {
                        needs_review: false,
                    };
                }
                let mut delay = self.backoff(attempt);
                if let Some(hint) = hint {
                    delay = delay.max(hint.min(self.max_delay));
                }
                RetryDecision::RetryAfter(delay)
            }
        }
    }

    /// Delay before retrying a sink write, or None once attempts are exhausted
    pub fn sink_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            None
        } else {
            Some(self.backoff(attempt))
        }
    }

    /// `base * 2^(attempt-1)`, capped, without jitter
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Capped exponential backoff plus jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        if self.jitter.is_zero() {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobKind;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            jitter: Duration::ZERO,
        }
    }

    fn job() -> Job {
        Job::new("example.test", "https://example.test/hotel/1", JobKind::Detail)
    }

    #[test]
    fn test_permanent_abandons_immediately() {
        let decision = policy().decide(&job(), FailureKind::Permanent, 1);
        assert_eq!(decision, RetryDecision::Abandon { needs_review: false });
    }

    #[test]
    fn test_transient_backoff_then_abandon() {
        let p = policy();
        let j = job();
        assert_eq!(
            p.decide(&j, FailureKind::TransientNetwork, 1),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            p.decide(&j, FailureKind::RateLimited, 2),
            RetryDecision::RetryAfter(Duration::from_millis(200))
        );
        assert_eq!(
            p.decide(&j, FailureKind::TransientNetwork, 3),
            RetryDecision::Abandon { needs_review: false }
        );
    }

    #[test]
    fn test_backoff_capped() {
        let p = RetryPolicy {
            max_attempts: 50,
            ..policy()
        };
        assert_eq!(p.base_backoff(5), Duration::from_millis(1000));
        assert_eq!(p.base_backoff(40), Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_after_hint_raises_delay() {
        let p = policy();
        let decision =
            p.decide_with_hint(&job(), FailureKind::RateLimited, 1, Some(Duration::from_millis(700)));
        assert_eq!(decision, RetryDecision::RetryAfter(Duration::from_millis(700)));

        // Hint is clamped to the cap
        let decision =
            p.decide_with_hint(&job(), FailureKind::RateLimited, 1, Some(Duration::from_secs(3600)));
        assert_eq!(decision, RetryDecision::RetryAfter(Duration::from_millis(1000)));
    }

    #[test]
    fn test_parse_failure_retries_once_then_flags_review() {
        let p = policy();
        let mut j = job();
        assert_eq!(
            p.decide(&j, FailureKind::ParseFailure, 1),
            RetryDecision::RetryAfter(Duration::ZERO)
        );

        j.parse_failures = 1;
        assert_eq!(
            p.decide(&j, FailureKind::ParseFailure, 2),
            RetryDecision::Abandon { needs_review: true }
        );
        assert_eq!(
            p.decide(&j, FailureKind::NormalizationError, 2),
            RetryDecision::Abandon { needs_review: true }
        );
    }

    #[test]
    fn test_jitter_within_bounds() {
        let p = RetryPolicy {
            jitter: Duration::from_millis(50),
            ..policy()
        };
        for _ in 0..100 {
            let d = p.backoff(1);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_sink_delay_exhausts() {
        let p = policy();
        assert_eq!(p.sink_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(p.sink_delay(3), None);
    }
}

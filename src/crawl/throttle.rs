//! Per-domain admission control
//!
//! Each domain has a concurrency ceiling and a minimum spacing between
//! request starts. Repeated network-class failures double the spacing up to a
//! cap; each success halves it back toward the configured baseline. Waiting
//! for admission only blocks the caller, never workers on other domains.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::ThrottleConfig;
use crate::types::FailureKind;

/// Smallest cooled-down interval for domains whose baseline spacing is zero
const MIN_COOLDOWN_STEP: Duration = Duration::from_millis(250);

/// Admission limits for one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainPolicy {
    pub max_concurrent: usize,
    pub min_interval: Duration,
}

/// Runtime throttle settings
#[derive(Debug, Clone)]
pub struct ThrottleSettings {
    pub default_policy: DomainPolicy,
    pub overrides: HashMap<String, DomainPolicy>,
    /// Consecutive failures before cooldown kicks in
    pub failure_threshold: u32,
    pub cooldown_cap: Duration,
}

impl ThrottleSettings {
    /// Build runtime settings from the TOML throttle table
    pub fn from_config(config: &ThrottleConfig) -> Self {
        let default_policy = DomainPolicy {
            max_concurrent: config.max_concurrent_per_domain.max(1),
            min_interval: Duration::from_millis(config.min_interval_ms),
        };

        let overrides = config
            .domains
            .iter()
            .map(|(domain, over)| {
                let policy = DomainPolicy {
                    max_concurrent: over
                        .max_concurrent
                        .unwrap_or(default_policy.max_concurrent)
                        .max(1),
                    min_interval: over
                        .min_interval_ms
                        .map(Duration::from_millis)
                        .unwrap_or(default_policy.min_interval),
                };
                (domain.to_lowercase(), policy)
            })
            .collect();

        Self {
            default_policy,
            overrides,
            failure_threshold: config.failure_threshold.max(1),
            cooldown_cap: Duration::from_millis(config.cooldown_cap_ms),
        }
    }

    /// Effective policy for a domain
    pub fn policy_for(&self, domain: &str) -> DomainPolicy {
        self.overrides
            .get(domain)
            .copied()
            .unwrap_or(self.default_policy)
    }
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self::from_config(&ThrottleConfig::default())
    }
}

/// How a request admitted by the throttle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Success,
    Failure(FailureKind),
    /// Request never completed (worker cancelled); only frees the slot
    Aborted,
}

/// Live state for one domain
#[derive(Debug, Clone)]
pub struct DomainState {
    pub policy: DomainPolicy,
    /// Current spacing, baseline or cooled-down
    pub effective_interval: Duration,
    /// Start of the most recently admitted request
    pub last_request: Option<Instant>,
    pub in_flight: usize,
    /// Highest in-flight count observed
    pub peak_in_flight: usize,
    pub consecutive_failures: u32,
    pub admitted: u64,
}

enum Admission {
    Granted,
    WaitFor(Duration),
    AtCeiling,
}

impl DomainState {
    fn new(policy: DomainPolicy) -> Self {
        Self {
            policy,
            effective_interval: policy.min_interval,
            last_request: None,
            in_flight: 0,
            peak_in_flight: 0,
            consecutive_failures: 0,
            admitted: 0,
        }
    }

    fn try_admit(&mut self, now: Instant) -> Admission {
        if self.in_flight >= self.policy.max_concurrent {
            return Admission::AtCeiling;
        }

        if let Some(last) = self.last_request {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.effective_interval {
                return Admission::WaitFor(self.effective_interval - elapsed);
            }
        }

        self.in_flight += 1;
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);
        self.last_request = Some(now);
        self.admitted += 1;
        Admission::Granted
    }

    fn on_release(&mut self, outcome: ReleaseOutcome, settings: &ThrottleSettings) {
        self.in_flight = self.in_flight.saturating_sub(1);

        match outcome {
            ReleaseOutcome::Success => {
                self.consecutive_failures = 0;
                if self.effective_interval > self.policy.min_interval {
                    self.effective_interval = (self.effective_interval / 2).max(self.policy.min_interval);
                }
            }
            ReleaseOutcome::Failure(kind) if kind.counts_against_domain() => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= settings.failure_threshold {
                    let doubled = if self.effective_interval.is_zero() {
                        MIN_COOLDOWN_STEP
                    } else {
                        self.effective_interval * 2
                    };
                    let cap = settings.cooldown_cap.max(self.policy.min_interval);
                    self.effective_interval = doubled.min(cap);
                }
            }
            ReleaseOutcome::Failure(_) | ReleaseOutcome::Aborted => {}
        }
    }
}

struct Shared {
    settings: ThrottleSettings,
    domains: Mutex<HashMap<String, DomainState>>,
    released: Notify,
}

impl Shared {
    fn release(&self, domain: &str, outcome: ReleaseOutcome) {
        {
            let mut domains = self.domains.lock();
            if let Some(state) = domains.get_mut(domain) {
                state.on_release(outcome, &self.settings);
                if state.consecutive_failures == self.settings.failure_threshold
                    && matches!(outcome, ReleaseOutcome::Failure(_))
                {
                    tracing::warn!(
                        domain,
                        interval_ms = state.effective_interval.as_millis() as u64,
                        "Domain entered cooldown"
                    );
                }
            }
        }
        self.released.notify_waiters();
    }
}

/// Per-domain admission gate, cheap to clone
#[derive(Clone)]
pub struct DomainThrottle {
    shared: Arc<Shared>,
}

impl DomainThrottle {
    pub fn new(settings: ThrottleSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                domains: Mutex::new(HashMap::new()),
                released: Notify::new(),
            }),
        }
    }

    /// Wait until `domain` has a free slot and its spacing interval has passed.
    pub async fn acquire(&self, domain: &str) -> AdmissionPermit {
        loop {
            // Registered before the check so a release between check and await is not missed
            let released = self.shared.released.notified();

            let admission = {
                let mut domains = self.shared.domains.lock();
                let state = domains
                    .entry(domain.to_string())
                    .or_insert_with(|| DomainState::new(self.shared.settings.policy_for(domain)));
                state.try_admit(Instant::now())
            };

            match admission {
                Admission::Granted => {
                    tracing::trace!(domain, "Admission granted");
                    return AdmissionPermit {
                        domain: domain.to_string(),
                        shared: Arc::clone(&self.shared),
                        released: false,
                    };
                }
                Admission::WaitFor(delay) => tokio::time::sleep(delay).await,
                Admission::AtCeiling => released.await,
            }
        }
    }

    /// Return a permit, recording how the request went.
    pub fn release(&self, permit: AdmissionPermit, outcome: ReleaseOutcome) {
        permit.release(outcome);
    }

    /// Copy of a domain's current state
    pub fn domain_state(&self, domain: &str) -> Option<DomainState> {
        self.shared.domains.lock().get(domain).cloned()
    }

    /// Current spacing for a domain (baseline if never seen)
    pub fn effective_interval(&self, domain: &str) -> Duration {
        self.domain_state(domain)
            .map(|s| s.effective_interval)
            .unwrap_or_else(|| self.shared.settings.policy_for(domain).min_interval)
    }

    pub fn settings(&self) -> &ThrottleSettings {
        &self.shared.settings
    }

    /// Get statistics
    pub fn stats(&self) -> ThrottleStats {
        let domains = self.shared.domains.lock();
        ThrottleStats {
            domains_tracked: domains.len(),
            in_flight: domains.values().map(|s| s.in_flight).sum(),
            cooling_down: domains
                .values()
                .filter(|s| s.effective_interval > s.policy.min_interval)
                .count(),
            total_admitted: domains.values().map(|s| s.admitted).sum(),
        }
    }
}

/// Admission token for one request; releasing it frees the domain slot
#[must_use = "a permit holds a domain slot until released"]
pub struct AdmissionPermit {
    domain: String,
    shared: Arc<Shared>,
    released: bool,
}

impl AdmissionPermit {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn release(mut self, outcome: ReleaseOutcome) {
        self.released = true;
        self.shared.release(&self.domain, outcome);
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if !self.released {
            self.shared.release(&self.domain, ReleaseOutcome::Aborted);
        }
    }
}

/// Statistics from the throttle
#[derive(Debug, Clone)]
pub struct ThrottleStats {
    pub domains_tracked: usize,
    pub in_flight: usize,
    pub cooling_down: usize,
    pub total_admitted: u64,
}

//! Per-scope rate limiter.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::counter::WindowCounterStore;
use super::rules::RateLimitPolicy;

/// Unexpected internal failure while evaluating limits.
///
/// Callers must treat this as a rejection, never as an admission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimiterFault {
    /// The clock could not produce a usable epoch time
    #[error("clock unavailable: {0}")]
    Clock(String),

    /// Evaluation panicked
    #[error("limiter evaluation panicked: {0}")]
    Panicked(String),
}

/// Aggregate decision for one request against one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether every rule admitted the request.
    pub admitted: bool,
    /// Longest delay reported by a denying rule; zero when admitted.
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    pub fn admit() -> Self {
        Self {
            admitted: true,
            retry_after_secs: 0,
        }
    }
}

/// Evaluates a scope's full rule set for a client.
///
/// Each rule is charged independently: a rule that admits increments its own
/// bucket even when another rule in the same scope denies the request.
pub struct ScopeRateLimiter {
    policy: RateLimitPolicy,
    store: WindowCounterStore,
    clock: Arc<dyn Clock>,
}

impl ScopeRateLimiter {
    /// Create a limiter over `policy` using the system clock.
    pub fn new(policy: RateLimitPolicy, store: WindowCounterStore) -> Self {
        Self::with_clock(policy, store, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit time source.
    pub fn with_clock(
        policy: RateLimitPolicy,
        store: WindowCounterStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            store,
            clock,
        }
    }

    /// Check and charge a request from `client_key` against `scope`.
    ///
    /// Scopes absent from the policy are not limited.
    pub fn check(&self, scope: &str, client_key: &str) -> Result<RateLimitDecision, LimiterFault> {
        let Some(rules) = self.policy.rules(scope) else {
            trace!(scope = %scope, "Scope has no rate limit policy");
            return Ok(RateLimitDecision::admit());
        };

        let now = self.clock.now_secs()?;
        let mut decision = RateLimitDecision::admit();

        for rule in rules {
            let outcome = self.store.hit(client_key, scope, rule, now);
            if !outcome.admitted {
                decision.admitted = false;
                decision.retry_after_secs = decision.retry_after_secs.max(outcome.retry_after_secs);
                debug!(
                    scope = %scope,
                    client = %client_key,
                    rule = %rule,
                    retry_after = outcome.retry_after_secs,
                    "Rate limit rule denied request"
                );
            }
        }

        Ok(decision)
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// The underlying counter store.
    pub fn store(&self) -> &WindowCounterStore {
        &self.store
    }
}

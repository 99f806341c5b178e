//! Rate limiting logic and state management.

mod clock;
mod counter;
mod limiter;
mod rules;
mod scope;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{CounterKey, HitOutcome, TimeWindow, WindowCounterStore, DEFAULT_EVICTION_THRESHOLD};
pub use limiter::{LimiterFault, RateLimitDecision, ScopeRateLimiter};
pub use rules::{parse_rules, RateLimitPolicy, RateLimitRule};
pub use scope::{ScopeResolver, FEEDBACK_EDIT, FEEDBACK_THUMB, GENERATE_RESPONSE};

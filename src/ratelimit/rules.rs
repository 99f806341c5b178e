//! Rate limit rules and the per-scope policy table.
//!
//! Rules are written as `"<count>/<unit>"` tokens, comma separated, for
//! example `"5/minute,30/hour"`. Every rule attached to a scope must admit a
//! request for the request to be admitted.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::info;

use super::counter::TimeWindow;
use crate::error::{MirrorviewError, Result};

/// A single "N requests per window" constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimitRule {
    limit: u64,
    window_seconds: u64,
}

impl RateLimitRule {
    /// Create a rule, rejecting a zero limit or a zero-length window.
    pub fn new(limit: u64, window_seconds: u64) -> Result<Self> {
        if limit == 0 {
            return Err(MirrorviewError::Config(
                "rate limit must be greater than zero".to_string(),
            ));
        }
        if window_seconds == 0 {
            return Err(MirrorviewError::Config(
                "rate limit window must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            limit,
            window_seconds,
        })
    }

    /// Create a rule over one of the named time windows.
    pub fn per(limit: u64, window: TimeWindow) -> Result<Self> {
        Self::new(limit, window.duration().as_secs())
    }

    /// Maximum admissions allowed per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window length in seconds.
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Start of the fixed window containing `now` (epoch seconds).
    pub fn window_start(&self, now: u64) -> u64 {
        (now / self.window_seconds) * self.window_seconds
    }
}

impl fmt::Display for RateLimitRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.limit, self.window_seconds)
    }
}

/// Parse a comma separated list of rate limit tokens.
///
/// Units are `second`, `minute` and `hour`; a trailing `s` and any
/// surrounding whitespace are tolerated. An empty list is an error.
pub fn parse_rules(raw: &str) -> Result<Vec<RateLimitRule>> {
    let mut rules = Vec::new();

    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        rules.push(parse_token(token)?);
    }

    if rules.is_empty() {
        return Err(MirrorviewError::Config(
            "at least one rate limit rule is required".to_string(),
        ));
    }

    Ok(rules)
}

fn parse_token(token: &str) -> Result<RateLimitRule> {
    let invalid = |reason: &str| MirrorviewError::InvalidRateLimit {
        token: token.to_string(),
        reason: reason.to_string(),
    };

    let (count, unit) = token
        .split_once('/')
        .ok_or_else(|| invalid("expected format like '10/minute'"))?;

    let limit: u64 = count
        .trim()
        .parse()
        .map_err(|_| invalid("count is not a non-negative integer"))?;

    let unit = unit.trim().to_ascii_lowercase();
    let window = match unit.strip_suffix('s').unwrap_or(&unit) {
        "second" => TimeWindow::Second,
        "minute" => TimeWindow::Minute,
        "hour" => TimeWindow::Hour,
        _ => return Err(invalid("unit must be second, minute or hour")),
    };

    if limit == 0 {
        return Err(invalid("limit must be greater than zero"));
    }

    RateLimitRule::per(limit, window)
}

/// Immutable mapping from scope name to its rules.
#[derive(Debug, Clone, Default)]
pub struct RateLimitPolicy {
    scopes: HashMap<String, Vec<RateLimitRule>>,
}

impl RateLimitPolicy {
    /// Create an empty policy. Every scope is unlimited.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from `scope -> "<count>/<unit>,..."` strings.
    ///
    /// Any malformed token fails the whole policy.
    pub fn from_config<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut policy = Self::new();
        for (scope, raw) in entries {
            let rules = parse_rules(raw).map_err(|e| match e {
                MirrorviewError::Config(msg) => {
                    MirrorviewError::Config(format!("scope '{}': {}", scope, msg))
                }
                other => other,
            })?;
            info!(scope = %scope, rules = %raw, "Loaded rate limit policy");
            policy.scopes.insert(scope.clone(), rules);
        }
        Ok(policy)
    }

    /// Attach rules to a scope, replacing any existing ones.
    pub fn with_scope(mut self, scope: impl Into<String>, rules: Vec<RateLimitRule>) -> Result<Self> {
        let scope = scope.into();
        if rules.is_empty() {
            return Err(MirrorviewError::Config(format!(
                "scope '{}' must have at least one rule",
                scope
            )));
        }
        self.scopes.insert(scope, rules);
        Ok(self)
    }

    /// Rules for a scope, if the scope is limited.
    pub fn rules(&self, scope: &str) -> Option<&[RateLimitRule]> {
        self.scopes.get(scope).map(Vec::as_slice)
    }

    /// Number of limited scopes.
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Sorted view of the policy, for logging.
    pub fn summary(&self) -> BTreeMap<&str, String> {
        self.scopes
            .iter()
            .map(|(scope, rules)| {
                let joined: Vec<String> = rules.iter().map(ToString::to_string).collect();
                (scope.as_str(), joined.join(","))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_rule() {
        let rules = parse_rules("10/minute").unwrap();
        assert_eq!(rules, vec![RateLimitRule::new(10, 60).unwrap()]);
    }

    #[test]
    fn test_parse_multiple_rules_preserves_order() {
        let rules = parse_rules("5/minute,30/hour").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].limit(), 5);
        assert_eq!(rules[0].window_seconds(), 60);
        assert_eq!(rules[1].limit(), 30);
        assert_eq!(rules[1].window_seconds(), 3600);
    }

    #[test]
    fn test_parse_tolerates_plural_case_and_whitespace() {
        let rules = parse_rules(" 2 / Seconds , 3/HOURS ,").unwrap();
        assert_eq!(rules[0], RateLimitRule::new(2, 1).unwrap());
        assert_eq!(rules[1], RateLimitRule::new(3, 3600).unwrap());
    }

    #[test]
    fn test_parse_rejects_malformed_tokens() {
        for raw in ["10", "ten/minute", "10/fortnight", "-1/minute", "10/"] {
            let err = parse_rules(raw).unwrap_err();
            assert!(
                matches!(err, MirrorviewError::InvalidRateLimit { .. }),
                "{} should be rejected, got {:?}",
                raw,
                err
            );
        }
    }

    #[test]
    fn test_parse_rejects_zero_limit() {
        let err = parse_rules("0/minute").unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn test_parse_rejects_empty_list() {
        assert!(parse_rules("").is_err());
        assert!(parse_rules(" , ,").is_err());
    }

    #[test]
    fn test_rule_rejects_zero_window() {
        assert!(RateLimitRule::new(1, 0).is_err());
        assert!(RateLimitRule::new(0, 1).is_err());
    }

    #[test]
    fn test_window_start_is_aligned() {
        let rule = RateLimitRule::new(1, 60).unwrap();
        assert_eq!(rule.window_start(0), 0);
        assert_eq!(rule.window_start(59), 0);
        assert_eq!(rule.window_start(60), 60);
        assert_eq!(rule.window_start(1_700_000_123), 1_700_000_100);
    }

    #[test]
    fn test_policy_from_config() {
        let mut raw = HashMap::new();
        raw.insert("generate_response".to_string(), "5/minute,30/hour".to_string());
        raw.insert("feedback_thumb".to_string(), "30/minute".to_string());

        let policy = RateLimitPolicy::from_config(&raw).unwrap();
        assert_eq!(policy.len(), 2);
        assert_eq!(policy.rules("generate_response").unwrap().len(), 2);
        assert_eq!(policy.rules("feedback_thumb").unwrap()[0].limit(), 30);
        assert!(policy.rules("unknown").is_none());
    }

    #[test]
    fn test_policy_from_config_fails_on_any_bad_scope() {
        let mut raw = HashMap::new();
        raw.insert("good".to_string(), "5/minute".to_string());
        raw.insert("bad".to_string(), "5/lightyear".to_string());

        assert!(RateLimitPolicy::from_config(&raw).is_err());
    }

    #[test]
    fn test_policy_with_scope_requires_rules() {
        assert!(RateLimitPolicy::new().with_scope("empty", Vec::new()).is_err());

        let policy = RateLimitPolicy::new()
            .with_scope("s", vec![RateLimitRule::new(1, 60).unwrap()])
            .unwrap();
        assert_eq!(policy.summary().get("s").map(String::as_str), Some("1/60s"));
    }
}

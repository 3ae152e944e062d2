//! Connection state, retry budget and retry policy

use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Holding or pursuing an upstream connection
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Reconnecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Delay between reconnect attempts
///
/// `Fixed` is the default contract. `Exponential` doubles from `initial`
/// per consecutive failure up to `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryPolicy {
    Fixed { delay: Duration },
    Exponential { initial: Duration, cap: Duration },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed {
            delay: Duration::from_millis(5_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failure number `attempts` (1-based)
    pub fn delay_for(&self, attempts: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed { delay } => delay,
            RetryPolicy::Exponential { initial, cap } => {
                let shift = attempts.saturating_sub(1).min(31);
                initial.saturating_mul(1u32 << shift).min(cap)
            }
        }
    }
}

/// Consecutive-failure counter bounded by `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryBudget {
    attempts: u32,
    max: u32,
    policy: RetryPolicy,
}

impl RetryBudget {
    pub fn new(max: u32, policy: RetryPolicy) -> Self {
        debug_assert!(max > 0, "retry budget must allow at least one attempt");
        RetryBudget {
            attempts: 0,
            max,
            policy,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn record_failure(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// No further automatic retries once `attempts >= max`
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max
    }

    pub fn next_delay(&self) -> Duration {
        self.policy.delay_for(self.attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_exhaustion() {
        let mut budget = RetryBudget::new(2, RetryPolicy::default());
        assert!(!budget.exhausted());
        budget.record_failure();
        assert!(!budget.exhausted());
        budget.record_failure();
        assert!(budget.exhausted());
        budget.reset();
        assert_eq!(budget.attempts(), 0);
        assert!(!budget.exhausted());
    }

    #[test]
    fn test_fixed_delay_is_constant() {
        let policy = RetryPolicy::Fixed {
            delay: Duration::from_millis(250),
        };
        for attempts in 1..20 {
            assert_eq!(policy.delay_for(attempts), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_exponential_doubles_and_caps() {
        let policy = RetryPolicy::Exponential {
            initial: Duration::from_millis(100),
            cap: Duration::from_millis(1_000),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Open.is_connected());
        assert!(!ConnectionState::Reconnecting.is_connected());
        assert!(ConnectionState::Reconnecting.is_active());
        assert!(!ConnectionState::Failed.is_active());
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
    }
}

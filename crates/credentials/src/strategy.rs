use std::time::Duration;

use tokio::time::Instant;

/// Consecutive failures after which an entry is disabled for good.
pub(crate) const MAX_RETRIES: u32 = 3;

/// Cooldown grows linearly with the failure count: `30 * n` seconds.
pub(crate) const COOLDOWN_STEP: Duration = Duration::from_secs(30);

/// Health of one pool entry. Transitions are driven by the pool under its
/// write lock; entries are never removed, only disabled.
#[derive(Debug, Clone)]
pub(crate) enum Health {
    Active { last_success: Option<Instant> },
    Failed { count: u32, last_fail: Instant },
    Disabled { reason: &'static str },
}

impl Health {
    pub(crate) fn new() -> Self {
        Health::Active { last_success: None }
    }

    /// Whether this entry may be handed out right now.
    pub(crate) fn acquirable(&self, now: Instant) -> bool {
        match self {
            Health::Active { .. } => true,
            Health::Failed { count, last_fail } => now.duration_since(*last_fail) >= COOLDOWN_STEP * *count,
            Health::Disabled { .. } => false,
        }
    }

    fn failure_count(&self) -> u32 {
        match self {
            Health::Active { .. } => 0,
            Health::Failed { count, .. } => *count,
            Health::Disabled { .. } => u32::MAX,
        }
    }

    fn last_success(&self) -> Option<Instant> {
        match self {
            Health::Active { last_success } => *last_success,
            _ => None,
        }
    }
}

/// Configuration-order round robin over acquirable entries, starting after
/// the previous selection.
pub(crate) fn select_sequential(health: &[Health], tried: &[bool], cursor: usize, now: Instant) -> Option<usize> {
    let n = health.len();

    (0..n)
        .map(|k| (cursor + k) % n)
        .find(|&idx| !tried[idx] && health[idx].acquirable(now))
}

/// Healthiest entry first: fewest consecutive failures, then most recent
/// success, then stable id order. Quota accounting is out of scope, so
/// health stands in for remaining quota.
pub(crate) fn select_optimal(health: &[Health], tried: &[bool], now: Instant) -> Option<usize> {
    health
        .iter()
        .enumerate()
        .filter(|(idx, entry)| !tried[*idx] && entry.acquirable(now))
        .min_by_key(|(idx, entry)| (entry.failure_count(), std::cmp::Reverse(entry.last_success()), *idx))
        .map(|(idx, _)| idx)
}

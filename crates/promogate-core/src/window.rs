// window.rs - time-driven status for wait/alternate constraints

use crate::model::CheckStatus;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// How a time window resolves once its wait is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub wait_time: Duration,
    pub fail_at_end: bool,
    pub alternate: bool,
    /// Falls back to `wait_time` when unset.
    pub alternate_interval: Option<Duration>,
}

impl WindowPolicy {
    pub fn interval(&self) -> Duration {
        self.alternate_interval.unwrap_or(self.wait_time)
    }

    fn settled(&self) -> CheckStatus {
        if self.fail_at_end {
            CheckStatus::Fail
        } else {
            CheckStatus::Pass
        }
    }
}

/// Status of a window that opened at `created_at`, observed at `now`.
///
/// Pure: identical inputs always give the same answer, which is what lets an
/// always-reevaluated constraint call this on every tick.
///
/// - `elapsed < wait_time` is PENDING (a clock that reads earlier than
///   `created_at` counts as no time elapsed).
/// - Without alternation the window settles on FAIL when `fail_at_end`,
///   PASS otherwise.
/// - With alternation, interval `n = floor((elapsed - wait) / interval)`
///   keeps the settled outcome for even `n` and inverts it for odd `n`.
///   A zero interval disables alternation.
pub fn window_status(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: &WindowPolicy,
) -> CheckStatus {
    let elapsed = (now - created_at).to_std().unwrap_or(Duration::ZERO);
    if elapsed < policy.wait_time {
        return CheckStatus::Pending;
    }

    let settled = policy.settled();
    if !policy.alternate {
        return settled;
    }

    let interval = policy.interval().as_nanos();
    if interval == 0 {
        return settled;
    }

    let since_wait = (elapsed - policy.wait_time).as_nanos();
    let n = since_wait / interval;
    if n % 2 == 0 {
        settled
    } else {
        invert(settled)
    }
}

fn invert(status: CheckStatus) -> CheckStatus {
    match status {
        CheckStatus::Pass => CheckStatus::Fail,
        CheckStatus::Fail => CheckStatus::Pass,
        CheckStatus::Pending => CheckStatus::Pending,
    }
}

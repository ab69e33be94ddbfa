//! Timeouts, deadlines and the arithmetic between them.
//!
//! A timeout bounds a single blocking call and is reported as an error
//! when exceeded. A deadline is an absolute monotonic point in time after
//! which a process is considered overdue, reported as an event. Keeping
//! the two apart lets callers distinguish "my wait was too short" from
//! "the child has run too long".

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Bound on a single blocking operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeout {
    /// Block until the operation completes.
    #[default]
    Infinite,
    /// Substitute the time remaining until the process deadline. Only
    /// meaningful for `wait` and stop actions.
    Deadline,
    /// Block for at most the given duration.
    Finite(Duration),
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::Finite(duration)
    }
}

/// Time left until `deadline`, clamped to zero once it has passed.
/// `None` means no deadline is set.
pub(crate) fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
}

/// Converts a wait horizon to `poll(2)` milliseconds. `None` maps to the
/// platform's infinite wait. Sub-millisecond remainders round up so a
/// nearly-expired horizon does not degenerate into a busy loop.
pub(crate) fn poll_millis(horizon: Option<Duration>) -> i32 {
    match horizon {
        None => -1,
        Some(duration) => {
            let millis = duration.as_millis();
            let rounded = if duration > Duration::from_millis(millis as u64) {
                millis + 1
            } else {
                millis
            };
            rounded.min(i32::MAX as u128) as i32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_millis_rounds_up() {
        assert_eq!(poll_millis(None), -1);
        assert_eq!(poll_millis(Some(Duration::ZERO)), 0);
        assert_eq!(poll_millis(Some(Duration::from_millis(5))), 5);
        assert_eq!(poll_millis(Some(Duration::from_micros(1200))), 2);
        assert_eq!(poll_millis(Some(Duration::from_nanos(1))), 1);
    }

    #[test]
    fn test_remaining_clamps_past_deadlines() {
        let past = Instant::now() - Duration::from_secs(1);
        assert_eq!(remaining(Some(past)), Some(Duration::ZERO));
        assert_eq!(remaining(None), None);

        let future = Instant::now() + Duration::from_secs(60);
        let left = remaining(Some(future)).unwrap();
        assert!(left > Duration::from_secs(59));
    }
}

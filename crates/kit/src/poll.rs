//! Bounded polling with backoff
//!
//! Used for every "wait until the hypervisor agrees" loop: power state
//! convergence, SSH reachability and the guest address.

use std::time::{Duration, Instant};

use color_eyre::Result;
use tracing::trace;

use crate::error::VBoxError;

/// How often and for how long to poll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    /// Delay after the first unsuccessful check
    pub interval: Duration,
    /// Upper bound for the delay
    pub max_interval: Duration,
    /// Growth factor applied to the delay after every check
    pub multiplier: f64,
    /// Give up once this much time has passed
    pub timeout: Duration,
}

impl PollPolicy {
    /// Constant spacing with a deadline.
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            multiplier: 1.0,
            timeout,
        }
    }

    /// Doubling backoff from `interval`, capped at `max_interval`.
    pub fn backoff(interval: Duration, max_interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            max_interval,
            multiplier: 2.0,
            timeout,
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }
}

/// Call `check` until it yields a value, an error, or the policy times out.
///
/// `check` always runs at least once, even with a zero timeout.
pub fn poll_until<T>(
    what: &str,
    policy: &PollPolicy,
    mut check: impl FnMut() -> Result<Option<T>>,
) -> Result<T> {
    let start = Instant::now();
    let mut delay = policy.interval;
    loop {
        if let Some(v) = check()? {
            return Ok(v);
        }
        let elapsed = start.elapsed();
        if elapsed >= policy.timeout {
            return Err(VBoxError::Timeout {
                what: what.to_string(),
                waited: elapsed,
            }
            .into());
        }
        let remaining = policy.timeout - elapsed;
        trace!("Still waiting for {what}, retrying in {delay:?}");
        std::thread::sleep(delay.min(remaining));
        delay = policy.next_delay(delay);
    }
}

#[cfg(test)]
use mockall::automock;
use rand::{rng, Rng};
use std::time::Duration;

use crate::error::{Error, Result};

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Stateful sequence of delays between reconnection attempts to one host.
pub trait ReconnectionSchedule {
    /// Delay before the next attempt; `None` stops reconnecting.
    fn next_delay(&mut self) -> Option<Duration>;
}

/// Source of reconnection schedules. Each host going down gets a fresh one.
#[cfg_attr(test, automock)]
pub trait ReconnectionPolicy {
    /// Schedule starting from the initial delay.
    fn new_host_schedule(&self) -> Box<dyn ReconnectionSchedule + Send + Sync>;
}

fn validate_delay(name: &str, delay: Duration) -> Result<()> {
    if delay < Duration::from_millis(1) {
        return Err(Error::BadParameters(format!(
            "Reconnection {name} delay must be at least 1ms, got {delay:?}"
        )));
    }

    Ok(())
}

/// Waits the same delay before every attempt.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct ConstantReconnectionPolicy {
    base_delay: Duration,
}

impl ConstantReconnectionPolicy {
    pub fn new(base_delay: Duration) -> Result<Self> {
        validate_delay("base", base_delay)?;
        Ok(ConstantReconnectionPolicy { base_delay })
    }

    #[inline]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }
}

impl Default for ConstantReconnectionPolicy {
    fn default() -> Self {
        ConstantReconnectionPolicy {
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl ReconnectionPolicy for ConstantReconnectionPolicy {
    fn new_host_schedule(&self) -> Box<dyn ReconnectionSchedule + Send + Sync> {
        Box::new(ConstantReconnectionSchedule {
            base_delay: self.base_delay,
        })
    }
}

struct ConstantReconnectionSchedule {
    base_delay: Duration,
}

impl ReconnectionSchedule for ConstantReconnectionSchedule {
    fn next_delay(&mut self) -> Option<Duration> {
        Some(self.base_delay)
    }
}

/// Gives up on a host as soon as it goes down.
#[derive(Default, Copy, Clone, Debug, PartialEq, Ord, PartialOrd, Eq, Hash)]
pub struct NeverReconnectionPolicy;

impl ReconnectionPolicy for NeverReconnectionPolicy {
    fn new_host_schedule(&self) -> Box<dyn ReconnectionSchedule + Send + Sync> {
        Box::new(NeverReconnectionSchedule)
    }
}

struct NeverReconnectionSchedule;

impl ReconnectionSchedule for NeverReconnectionSchedule {
    fn next_delay(&mut self) -> Option<Duration> {
        None
    }
}

/// Starts at the base delay, then doubles it after every failed attempt up to the maximum.
/// Delays after the first one carry +/-15% jitter.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct ExponentialReconnectionPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: usize,
}

impl ExponentialReconnectionPolicy {
    /// Creates a policy with given delays. Both must be at least 1ms and the base delay cannot
    /// exceed the maximum.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Result<Self> {
        validate_delay("base", base_delay)?;
        validate_delay("max", max_delay)?;

        if base_delay > max_delay {
            return Err(Error::BadParameters(format!(
                "Reconnection base delay {base_delay:?} exceeds max delay {max_delay:?}"
            )));
        }

        Ok(Self::new_unchecked(base_delay, max_delay))
    }

    fn new_unchecked(base_delay: Duration, max_delay: Duration) -> Self {
        let base_millis = (base_delay.as_millis() as i64).max(1);
        let ceil = u32::from((base_millis & (base_millis - 1)) != 0);

        ExponentialReconnectionPolicy {
            base_delay,
            max_delay,
            max_attempts: (64 - (i64::MAX / base_millis).leading_zeros() - ceil) as usize,
        }
    }

    #[inline]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[inline]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl ReconnectionPolicy for ExponentialReconnectionPolicy {
    fn new_host_schedule(&self) -> Box<dyn ReconnectionSchedule + Send + Sync> {
        Box::new(ExponentialReconnectionSchedule::new(
            self.base_delay,
            self.max_delay,
            self.max_attempts,
        ))
    }
}

impl Default for ExponentialReconnectionPolicy {
    fn default() -> Self {
        Self::new_unchecked(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

struct ExponentialReconnectionSchedule {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: usize,
    attempt: usize,
}

impl ReconnectionSchedule for ExponentialReconnectionSchedule {
    fn next_delay(&mut self) -> Option<Duration> {
        // the first attempt always waits exactly the base delay
        if self.attempt == 0 {
            self.attempt = 1;
            return Some(self.base_delay);
        }

        if self.attempt >= self.max_attempts {
            return Some(self.max_delay);
        }

        let delay = self
            .base_delay
            .saturating_mul(1u32.checked_shl(self.attempt as u32).unwrap_or(u32::MAX))
            .min(self.max_delay);

        self.attempt += 1;

        let jitter = rng().random_range(85..116);

        Some(
            (delay / 100)
                .saturating_mul(jitter)
                .clamp(self.base_delay, self.max_delay),
        )
    }
}

impl ExponentialReconnectionSchedule {
    fn new(base_delay: Duration, max_delay: Duration, max_attempts: usize) -> Self {
        ExponentialReconnectionSchedule {
            base_delay,
            max_delay,
            max_attempts,
            attempt: 0,
        }
    }
}

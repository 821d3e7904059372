//! Pre-emptively query another host if the current one takes too long to respond.
//!
//! Sometimes a host might be experiencing difficulties (ex: long GC pause) and take longer than
//! usual to reply. Requests sent to that host will experience bad latency.
//!
//! One thing we can do to improve that is pre-emptively start a second execution of the request
//! against the next host of the query plan, before the first host has replied or errored out. If
//! that second host replies faster, its response is returned to the caller and the first
//! execution is abandoned.
//!
//! Only idempotent statements are executed speculatively. Each parallel execution triggers
//! retries independently.
use derive_more::Constructor;
use std::time::Duration;

/// Current speculative execution context.
#[derive(Constructor, Debug)]
pub struct Context {
    /// Speculative executions started so far, not counting the initial one.
    pub running_executions: usize,
}

/// The policy that decides if the driver will send speculative requests to the next hosts when
/// the current host takes too long to respond.
pub trait SpeculativeExecutionPolicy: Send + Sync {
    /// Returns the time until a speculative request is sent to the next host. `None` means there
    /// should not be another execution.
    fn execution_interval(&self, context: &Context) -> Option<Duration>;
}

/// A policy that schedules a configurable number of speculative executions, separated by a fixed
/// delay.
#[derive(Debug, Clone, Copy, Constructor)]
pub struct ConstantSpeculativeExecutionPolicy {
    max_executions: usize,
    delay: Duration,
}

impl SpeculativeExecutionPolicy for ConstantSpeculativeExecutionPolicy {
    fn execution_interval(&self, context: &Context) -> Option<Duration> {
        if context.running_executions < self.max_executions {
            Some(self.delay)
        } else {
            None
        }
    }
}

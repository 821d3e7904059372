//! Retry and reconnection policies.
mod reconnection_policy;
mod retry_policy;

pub use crate::retry::reconnection_policy::{
    ConstantReconnectionPolicy, ExponentialReconnectionPolicy, NeverReconnectionPolicy,
    ReconnectionPolicy, ReconnectionSchedule,
};
pub use crate::retry::retry_policy::{
    DefaultRetryPolicy, DowngradingConsistencyRetryPolicy, FallthroughRetryPolicy,
    LoggingRetryPolicy, RetryDecision, RetryPolicy, RetryPolicyType,
};

#[cfg(test)]
pub use crate::retry::reconnection_policy::MockReconnectionPolicy;
#[cfg(test)]
pub use crate::retry::retry_policy::MockRetryPolicy;

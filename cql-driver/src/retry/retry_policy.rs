use cql_protocol::consistency::Consistency;
use cql_protocol::frame::message_error::{ErrorBody, WriteType};
use cql_protocol::types::CInt;
use derive_more::Display;
use std::sync::Arc;
use tracing::*;

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, Result};

/// Outcome of consulting a retry policy about a failed attempt.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Display)]
pub enum RetryDecision {
    /// Give up and surface the error.
    ReturnError,
    /// Send the request again at given consistency, on the same host or the next one in the
    /// query plan.
    #[display("Retry({consistency}, same_host: {same_host})")]
    Retry {
        consistency: Consistency,
        same_host: bool,
    },
    /// Treat the failure as success with an empty result.
    Ignore,
}

impl RetryDecision {
    #[inline]
    pub fn retry_same_host(consistency: Consistency) -> Self {
        RetryDecision::Retry {
            consistency,
            same_host: true,
        }
    }

    #[inline]
    pub fn retry_next_host(consistency: Consistency) -> Self {
        RetryDecision::Retry {
            consistency,
            same_host: false,
        }
    }
}

/// Kind of a retry policy.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Display)]
pub enum RetryPolicyType {
    #[display("default")]
    Default,
    #[display("downgrading_consistency")]
    DowngradingConsistency,
    #[display("fallthrough")]
    Fallthrough,
    #[display("logging")]
    Logging,
    #[display("custom")]
    Custom,
}

/// Decides what to do about server reported failures. Every method is called once per failure
/// of an attempt, with the number of retries already made for the request.
#[cfg_attr(test, automock)]
pub trait RetryPolicy: Send + Sync {
    fn policy_type(&self) -> RetryPolicyType {
        RetryPolicyType::Custom
    }

    /// Coordinator timed out waiting for replicas during a read.
    fn on_read_timeout(
        &self,
        consistency: Consistency,
        received: CInt,
        required: CInt,
        data_present: bool,
        retry_count: usize,
    ) -> RetryDecision;

    /// Coordinator timed out waiting for replicas during a write. Only consulted for idempotent
    /// requests.
    fn on_write_timeout(
        &self,
        consistency: Consistency,
        received: CInt,
        required: CInt,
        write_type: WriteType,
        retry_count: usize,
    ) -> RetryDecision;

    /// Not enough replicas were alive to even try the request.
    fn on_unavailable(
        &self,
        consistency: Consistency,
        required: CInt,
        alive: CInt,
        retry_count: usize,
    ) -> RetryDecision;

    /// Overloaded coordinator or internal server error. Only consulted for idempotent requests.
    fn on_request_error(
        &self,
        consistency: Consistency,
        error: &ErrorBody,
        retry_count: usize,
    ) -> RetryDecision;
}

fn max_likely_to_work(received: CInt, same_host: bool) -> RetryDecision {
    let consistency = match received {
        received if received >= 3 => Consistency::Three,
        2 => Consistency::Two,
        1 => Consistency::One,
        _ => return RetryDecision::ReturnError,
    };

    RetryDecision::Retry {
        consistency,
        same_host,
    }
}

/// Retries only when there is a high chance that a retry might help:
///
/// * on read timeout, once, if enough replicas responded but the data was not retrieved,
/// * on write timeout, once, if the batch log write failed,
/// * on unavailable, once, on the next host,
/// * on overloaded or server errors, on the next host.
#[derive(Debug, Default, Copy, Clone)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn policy_type(&self) -> RetryPolicyType {
        RetryPolicyType::Default
    }

    fn on_read_timeout(
        &self,
        consistency: Consistency,
        received: CInt,
        required: CInt,
        data_present: bool,
        retry_count: usize,
    ) -> RetryDecision {
        if retry_count != 0 {
            return RetryDecision::ReturnError;
        }

        if received >= required && !data_present {
            RetryDecision::retry_same_host(consistency)
        } else {
            RetryDecision::ReturnError
        }
    }

    fn on_write_timeout(
        &self,
        consistency: Consistency,
        _received: CInt,
        _required: CInt,
        write_type: WriteType,
        retry_count: usize,
    ) -> RetryDecision {
        if retry_count == 0 && write_type == WriteType::BatchLog {
            RetryDecision::retry_same_host(consistency)
        } else {
            RetryDecision::ReturnError
        }
    }

    fn on_unavailable(
        &self,
        consistency: Consistency,
        _required: CInt,
        _alive: CInt,
        retry_count: usize,
    ) -> RetryDecision {
        if retry_count == 0 {
            RetryDecision::retry_next_host(consistency)
        } else {
            RetryDecision::ReturnError
        }
    }

    fn on_request_error(
        &self,
        consistency: Consistency,
        _error: &ErrorBody,
        _retry_count: usize,
    ) -> RetryDecision {
        RetryDecision::retry_next_host(consistency)
    }
}

/// Like [`DefaultRetryPolicy`], but retries at a lower consistency level when not enough
/// replicas are available, accepting weaker guarantees over failures. Use with care.
#[derive(Debug, Default, Copy, Clone)]
pub struct DowngradingConsistencyRetryPolicy;

impl RetryPolicy for DowngradingConsistencyRetryPolicy {
    fn policy_type(&self) -> RetryPolicyType {
        RetryPolicyType::DowngradingConsistency
    }

    fn on_read_timeout(
        &self,
        consistency: Consistency,
        received: CInt,
        required: CInt,
        data_present: bool,
        retry_count: usize,
    ) -> RetryDecision {
        if retry_count != 0 || consistency.is_serial() {
            return RetryDecision::ReturnError;
        }

        if received < required {
            return max_likely_to_work(received, true);
        }

        if !data_present {
            RetryDecision::retry_same_host(consistency)
        } else {
            RetryDecision::ReturnError
        }
    }

    fn on_write_timeout(
        &self,
        consistency: Consistency,
        received: CInt,
        _required: CInt,
        write_type: WriteType,
        retry_count: usize,
    ) -> RetryDecision {
        if retry_count != 0 {
            return RetryDecision::ReturnError;
        }

        match write_type {
            WriteType::Simple | WriteType::Batch if received > 0 => RetryDecision::Ignore,
            WriteType::UnloggedBatch => max_likely_to_work(received, true),
            WriteType::BatchLog => RetryDecision::retry_same_host(consistency),
            _ => RetryDecision::ReturnError,
        }
    }

    fn on_unavailable(
        &self,
        _consistency: Consistency,
        _required: CInt,
        alive: CInt,
        retry_count: usize,
    ) -> RetryDecision {
        if retry_count != 0 {
            return RetryDecision::ReturnError;
        }

        max_likely_to_work(alive, false)
    }

    fn on_request_error(
        &self,
        consistency: Consistency,
        _error: &ErrorBody,
        _retry_count: usize,
    ) -> RetryDecision {
        RetryDecision::retry_next_host(consistency)
    }
}

/// Forwards all errors directly to the user, never retries.
#[derive(Debug, Default, Copy, Clone)]
pub struct FallthroughRetryPolicy;

impl RetryPolicy for FallthroughRetryPolicy {
    fn policy_type(&self) -> RetryPolicyType {
        RetryPolicyType::Fallthrough
    }

    fn on_read_timeout(&self, _: Consistency, _: CInt, _: CInt, _: bool, _: usize) -> RetryDecision {
        RetryDecision::ReturnError
    }

    fn on_write_timeout(
        &self,
        _: Consistency,
        _: CInt,
        _: CInt,
        _: WriteType,
        _: usize,
    ) -> RetryDecision {
        RetryDecision::ReturnError
    }

    fn on_unavailable(&self, _: Consistency, _: CInt, _: CInt, _: usize) -> RetryDecision {
        RetryDecision::ReturnError
    }

    fn on_request_error(&self, _: Consistency, _: &ErrorBody, _: usize) -> RetryDecision {
        RetryDecision::ReturnError
    }
}

/// Logs decisions of the wrapped policy which result in a retry or an ignored error.
pub struct LoggingRetryPolicy {
    child: Arc<dyn RetryPolicy>,
}

impl LoggingRetryPolicy {
    /// Wraps given policy. Wrapping another logging policy is rejected.
    pub fn new(child: Arc<dyn RetryPolicy>) -> Result<Self> {
        if child.policy_type() == RetryPolicyType::Logging {
            return Err(Error::BadParameters(
                "Logging retry policy cannot wrap another logging retry policy".into(),
            ));
        }

        Ok(LoggingRetryPolicy { child })
    }
}

impl RetryPolicy for LoggingRetryPolicy {
    fn policy_type(&self) -> RetryPolicyType {
        RetryPolicyType::Logging
    }

    fn on_read_timeout(
        &self,
        consistency: Consistency,
        received: CInt,
        required: CInt,
        data_present: bool,
        retry_count: usize,
    ) -> RetryDecision {
        let decision = self.child.on_read_timeout(
            consistency,
            received,
            required,
            data_present,
            retry_count,
        );

        match decision {
            RetryDecision::Ignore => info!(
                %consistency,
                required,
                received,
                data_present,
                retry_count,
                "Ignoring read timeout."
            ),
            RetryDecision::Retry {
                consistency: retry_consistency,
                ..
            } => info!(
                %retry_consistency,
                %consistency,
                required,
                received,
                data_present,
                retry_count,
                "Retrying on read timeout."
            ),
            RetryDecision::ReturnError => {}
        }

        decision
    }

    fn on_write_timeout(
        &self,
        consistency: Consistency,
        received: CInt,
        required: CInt,
        write_type: WriteType,
        retry_count: usize,
    ) -> RetryDecision {
        let decision =
            self.child
                .on_write_timeout(consistency, received, required, write_type, retry_count);

        match decision {
            RetryDecision::Ignore => info!(
                %consistency,
                required,
                received,
                %write_type,
                retry_count,
                "Ignoring write timeout."
            ),
            RetryDecision::Retry {
                consistency: retry_consistency,
                ..
            } => info!(
                %retry_consistency,
                %consistency,
                required,
                received,
                %write_type,
                retry_count,
                "Retrying on write timeout."
            ),
            RetryDecision::ReturnError => {}
        }

        decision
    }

    fn on_unavailable(
        &self,
        consistency: Consistency,
        required: CInt,
        alive: CInt,
        retry_count: usize,
    ) -> RetryDecision {
        let decision = self
            .child
            .on_unavailable(consistency, required, alive, retry_count);

        match decision {
            RetryDecision::Ignore => info!(
                %consistency,
                required,
                alive,
                retry_count,
                "Ignoring unavailable error."
            ),
            RetryDecision::Retry {
                consistency: retry_consistency,
                same_host,
            } => info!(
                %retry_consistency,
                %consistency,
                required,
                alive,
                same_host,
                retry_count,
                "Retrying on unavailable error."
            ),
            RetryDecision::ReturnError => {}
        }

        decision
    }

    fn on_request_error(
        &self,
        consistency: Consistency,
        error: &ErrorBody,
        retry_count: usize,
    ) -> RetryDecision {
        let decision = self
            .child
            .on_request_error(consistency, error, retry_count);

        match decision {
            RetryDecision::Ignore => info!(
                %consistency,
                error = %error.message,
                retry_count,
                "Ignoring request error."
            ),
            RetryDecision::Retry {
                consistency: retry_consistency,
                ..
            } => info!(
                %retry_consistency,
                %consistency,
                error = %error.message,
                retry_count,
                "Retrying on request error."
            ),
            RetryDecision::ReturnError => {}
        }

        decision
    }
}

//! Asynchronous host name resolution with timeout and cancellation.
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use derive_more::Display;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::*;

use crate::error::{Error, Result};

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResolveStatus {
    Success,
    Failed,
    TimedOut,
    Canceled,
}

/// Outcome of a resolution, delivered exactly once to the callback.
#[derive(Debug, Clone)]
pub struct ResolveResult {
    pub hostname: String,
    pub port: u16,
    pub status: ResolveStatus,
    pub addresses: Vec<SocketAddr>,
    pub error: Option<Error>,
}

impl ResolveResult {
    fn new(resolver: &Resolver, status: ResolveStatus) -> Self {
        ResolveResult {
            hostname: resolver.hostname.clone(),
            port: resolver.port,
            status,
            addresses: vec![],
            error: None,
        }
    }

    /// Converts into addresses or the error describing the failure.
    pub fn into_result(self) -> Result<Vec<SocketAddr>> {
        match self.status {
            ResolveStatus::Success => Ok(self.addresses),
            ResolveStatus::Canceled => Err(Error::Canceled),
            ResolveStatus::TimedOut => Err(self
                .error
                .unwrap_or(Error::ResolveTimeout(self.hostname))),
            ResolveStatus::Failed => Err(self.error.unwrap_or(Error::Resolve {
                hostname: self.hostname,
                reason: "unknown failure".into(),
            })),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resolver {
    hostname: String,
    port: u16,
}

impl Resolver {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Resolver {
            hostname: hostname.into(),
            port,
        }
    }

    #[inline]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Starts resolution on the runtime behind `handle`. The callback is invoked exactly once,
    /// with a `Canceled` status if [`ResolveHandle::cancel`] wins the race with the lookup.
    pub fn resolve<F>(&self, handle: &Handle, timeout: Duration, callback: F) -> ResolveHandle
    where
        F: FnOnce(ResolveResult) + Send + 'static,
    {
        let (cancel_sender, mut cancel_receiver) = oneshot::channel::<()>();
        let resolver = self.clone();

        handle.spawn(async move {
            let lookup = tokio::time::timeout(
                timeout,
                tokio::net::lookup_host((resolver.hostname.as_str(), resolver.port)),
            );

            let result = tokio::select! {
                biased;

                Ok(()) = &mut cancel_receiver => ResolveResult::new(&resolver, ResolveStatus::Canceled),
                lookup_result = lookup => match lookup_result {
                    Ok(Ok(addresses)) => {
                        let mut result = ResolveResult::new(&resolver, ResolveStatus::Success);
                        result.addresses = addresses.collect();
                        result
                    }
                    Ok(Err(error)) => {
                        warn!(%error, hostname = %resolver.hostname, "Unable to resolve host.");

                        let mut result = ResolveResult::new(&resolver, ResolveStatus::Failed);
                        result.error = Some(Error::Resolve {
                            hostname: resolver.hostname.clone(),
                            reason: error.to_string(),
                        });
                        result
                    }
                    Err(_) => {
                        warn!(hostname = %resolver.hostname, ?timeout, "Host resolution timed out.");

                        let mut result = ResolveResult::new(&resolver, ResolveStatus::TimedOut);
                        result.error = Some(Error::ResolveTimeout(resolver.hostname.clone()));
                        result
                    }
                },
            };

            callback(result);
        });

        ResolveHandle {
            cancel: Arc::new(Mutex::new(Some(cancel_sender))),
        }
    }

    /// Resolves on the current runtime and returns the addresses.
    pub async fn resolve_async(&self, timeout: Duration) -> Result<Vec<SocketAddr>> {
        let (sender, receiver) = oneshot::channel();
        let _handle = self.resolve(&Handle::current(), timeout, move |result| {
            let _ = sender.send(result);
        });

        receiver
            .await
            .map_err(|_| Error::Canceled)
            .and_then(ResolveResult::into_result)
    }
}

/// Cancels a pending resolution. Dropping the handle does not cancel.
#[derive(Debug, Clone)]
pub struct ResolveHandle {
    cancel: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ResolveHandle {
    /// Requests cancellation. Has no effect when called again or after the lookup finished.
    pub fn cancel(&self) {
        let sender = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn should_resolve_ip_literal() {
        let addresses = Resolver::new("127.0.0.1", 9042)
            .resolve_async(Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(addresses, vec!["127.0.0.1:9042".parse().unwrap()]);
    }

    #[tokio::test]
    async fn should_call_back_once_when_canceled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let counter = calls.clone();
        let handle = Resolver::new("localhost", 9042).resolve(
            &Handle::current(),
            Duration::from_secs(2),
            move |result| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = sender.send(result);
            },
        );

        handle.cancel();
        handle.cancel();

        let result = receiver.recv().await.unwrap();
        assert_eq!(result.status, ResolveStatus::Canceled);
        assert!(result.addresses.is_empty());
        assert!(matches!(result.into_result(), Err(Error::Canceled)));

        assert!(receiver.recv().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_ignore_cancel_after_completion() {
        let (sender, receiver) = oneshot::channel();
        let handle = Resolver::new("127.0.0.1", 1).resolve(
            &Handle::current(),
            Duration::from_secs(2),
            move |result| {
                let _ = sender.send(result);
            },
        );

        let result = receiver.await.unwrap();
        handle.cancel();

        assert_eq!(result.status, ResolveStatus::Success);
        assert_eq!(result.port, 1);
    }
}

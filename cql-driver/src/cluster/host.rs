use arc_swap::ArcSwap;
use derive_more::Display;
use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::*;
use uuid::Uuid;

use crate::retry::{ReconnectionPolicy, ReconnectionSchedule};

/// Location and identity of a host, as reported by the cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostInfo {
    pub datacenter: Option<String>,
    pub rack: Option<String>,
    pub host_id: Option<Uuid>,
}

/// The state of a host, as viewed from the driver.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum HostState {
    Up,
    Down,
}

struct Reconnection {
    schedule: Box<dyn ReconnectionSchedule + Send + Sync>,
    // `None` while down means the schedule gave up on this host
    next_retry_eligible_at: Option<Instant>,
    last_delay: Option<Duration>,
}

/// A single cluster node. Hosts are shared between the registry, query plans and pools; a host
/// removed from the cluster stays alive until the last plan referencing it is dropped.
pub struct Host {
    address: SocketAddr,
    info: ArcSwap<HostInfo>,
    is_up: AtomicBool,
    reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    reconnection: Mutex<Reconnection>,
}

impl Debug for Host {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.address)
            .field("info", &self.info.load())
            .field("state", &self.state())
            .finish()
    }
}

impl Host {
    /// Creates a host which is initially considered up.
    pub fn new(
        address: SocketAddr,
        info: HostInfo,
        reconnection_policy: Arc<dyn ReconnectionPolicy + Send + Sync>,
    ) -> Self {
        let schedule = reconnection_policy.new_host_schedule();
        Host {
            address,
            info: ArcSwap::from_pointee(info),
            is_up: AtomicBool::new(true),
            reconnection_policy,
            reconnection: Mutex::new(Reconnection {
                schedule,
                next_retry_eligible_at: None,
                last_delay: None,
            }),
        }
    }

    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    #[inline]
    pub fn info(&self) -> Arc<HostInfo> {
        self.info.load_full()
    }

    #[inline]
    pub fn datacenter(&self) -> Option<String> {
        self.info.load().datacenter.clone()
    }

    pub(crate) fn update_info(&self, info: HostInfo) {
        if **self.info.load() != info {
            debug!(address = ?self.address, ?info, "Host info changed.");
            self.info.store(Arc::new(info));
        }
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.is_up.load(Ordering::Acquire)
    }

    #[inline]
    pub fn state(&self) -> HostState {
        if self.is_up() {
            HostState::Up
        } else {
            HostState::Down
        }
    }

    /// True when the host is up, or down but past its next reconnection time.
    pub fn is_considerably_up(&self) -> bool {
        self.is_up()
            || self
                .reconnection()
                .next_retry_eligible_at
                .map(|at| Instant::now() >= at)
                .unwrap_or(false)
    }

    /// Time at which a down host may be tried again.
    pub fn next_retry_eligible_at(&self) -> Option<Instant> {
        if self.is_up() {
            return None;
        }

        self.reconnection().next_retry_eligible_at
    }

    /// Delay computed by the last transition to down.
    pub fn last_retry_delay(&self) -> Option<Duration> {
        self.reconnection().last_delay
    }

    /// Marks the host down and computes the next reconnection delay. Returns `false` if the host
    /// was already down.
    pub fn set_down(&self) -> bool {
        let mut reconnection = self.reconnection();
        if !self.is_up.swap(false, Ordering::AcqRel) {
            return false;
        }

        let delay = reconnection.schedule.next_delay();
        reconnection.last_delay = delay;
        reconnection.next_retry_eligible_at = delay.map(|delay| Instant::now() + delay);

        warn!(address = ?self.address, ?delay, "Host down.");
        true
    }

    /// Marks the host up and restarts its reconnection schedule. Returns `false` if the host
    /// was already up.
    pub fn bring_up(&self) -> bool {
        let mut reconnection = self.reconnection();
        if self.is_up.swap(true, Ordering::AcqRel) {
            return false;
        }

        reconnection.schedule = self.reconnection_policy.new_host_schedule();
        reconnection.next_retry_eligible_at = None;
        reconnection.last_delay = None;

        info!(address = ?self.address, "Host up.");
        true
    }

    /// Advances the schedule of a host which is still down after a failed reconnection attempt.
    pub(crate) fn postpone_retry(&self) -> Option<Duration> {
        let mut reconnection = self.reconnection();
        if self.is_up() {
            return None;
        }

        let delay = reconnection.schedule.next_delay();
        reconnection.last_delay = delay;
        reconnection.next_retry_eligible_at = delay.map(|delay| Instant::now() + delay);
        delay
    }

    #[inline]
    fn reconnection(&self) -> MutexGuard<'_, Reconnection> {
        self.reconnection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

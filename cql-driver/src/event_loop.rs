//! Single threaded reactors driving connections, timers and request handlers.
//!
//! Each [`EventLoop`] owns a dedicated thread running a current-thread runtime. Work is handed
//! over from other threads through the runtime's task queue, so state owned by a task never
//! migrates between threads.
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle as TaskHandle;
use tracing::*;

use crate::error::{Error, Result};

pub struct EventLoop {
    name: String,
    handle: Handle,
    thread_id: ThreadId,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Starts a new loop thread with given name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (handle_sender, handle_receiver) = std_mpsc::channel();
        let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();

        let thread_name = name.clone();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(error) => {
                        let _ = handle_sender.send(Err(error));
                        return;
                    }
                };

                let _ = handle_sender.send(Ok(runtime.handle().clone()));

                runtime.block_on(async move {
                    let _ = shutdown_receiver.await;
                });

                debug!(event_loop = %thread_name, "Event loop stopped.");
            })?;

        let thread_id = thread.thread().id();
        let handle = handle_receiver
            .recv()
            .map_err(|_| io::Error::other("Event loop thread exited during startup"))??;

        Ok(EventLoop {
            name,
            handle,
            thread_id,
            shutdown: Mutex::new(Some(shutdown_sender)),
            thread: Some(thread),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Checks if the caller runs on this loop's thread.
    #[inline]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Schedules given future on this loop.
    pub fn spawn<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Stops the loop. Tasks still scheduled on it are dropped.
    pub fn shutdown(&self) {
        let shutdown = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();

        // joining from the loop itself would never return
        if !self.is_current() {
            if let Some(thread) = self.thread.take() {
                if thread.join().is_err() {
                    error!(event_loop = %self.name, "Event loop thread panicked!");
                }
            }
        }
    }
}

/// A fixed set of event loops, handed out in round-robin order so connections are spread
/// evenly between threads.
pub struct EventLoopGroup {
    loops: Vec<EventLoop>,
    next: AtomicUsize,
}

impl EventLoopGroup {
    pub fn new(count: usize, name_prefix: &str) -> Result<Self> {
        if count == 0 {
            return Err(Error::BadParameters(
                "At least one event loop is required".into(),
            ));
        }

        let loops = (0..count)
            .map(|index| EventLoop::new(format!("{name_prefix}-{index}")))
            .collect::<Result<Vec<_>>>()?;

        Ok(EventLoopGroup {
            loops,
            next: AtomicUsize::new(0),
        })
    }

    /// Stops every loop of the group.
    pub fn shutdown(&self) {
        for event_loop in &self.loops {
            event_loop.shutdown();
        }
    }

    /// Returns the next loop in rotation.
    #[inline]
    pub fn next_loop(&self) -> &EventLoop {
        self.next_indexed().1
    }

    /// Returns the next loop in rotation along with its index in the group.
    pub fn next_indexed(&self) -> (usize, &EventLoop) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        (index, &self.loops[index])
    }

    /// Handles of every loop, in index order.
    pub fn handles(&self) -> Vec<Handle> {
        self.loops
            .iter()
            .map(|event_loop| event_loop.handle().clone())
            .collect()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&EventLoop> {
        self.loops.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}

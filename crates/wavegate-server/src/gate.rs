//! Graceful shutdown gate.
//!
//! A [`TaskGate`] counts in-flight work (accept loops and connection
//! processing). Work enters the gate by acquiring a [`GateGuard`] and leaves
//! it when the guard is dropped. Closing the gate refuses new entries and
//! waits until every guard handed out before the close has been dropped.
//!
//! # Example
//!
//! ```rust
//! use wavegate_server::gate::TaskGate;
//!
//! # tokio_test_block_on(async {
//! let gate = TaskGate::new();
//!
//! let guard = gate.enter().expect("gate is open");
//! assert_eq!(gate.active_tasks(), 1);
//!
//! drop(guard);
//! gate.close().await;
//!
//! assert!(gate.enter().is_none());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct GateState {
    active: usize,
    closed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<GateState>,
    notify: Notify,
}

/// Tracks outstanding tasks for graceful shutdown.
///
/// Cloning a gate yields another handle to the same counter.
#[derive(Debug, Clone, Default)]
pub struct TaskGate {
    inner: Arc<Inner>,
}

impl TaskGate {
    /// Creates a new, open gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task with the gate.
    ///
    /// Returns `None` once the gate has started closing; the caller should
    /// then skip the work silently.
    #[must_use]
    pub fn enter(&self) -> Option<GateGuard> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return None;
        }
        state.active += 1;
        Some(GateGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Returns the number of registered tasks still running.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.inner.state.lock().active
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Closes the gate and waits for registered tasks to finish.
    ///
    /// Safe to call more than once and from several tasks at a time; every
    /// caller returns once the count reaches zero.
    pub async fn close(&self) {
        self.inner.state.lock().closed = true;

        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a concurrent last drop
            // cannot slip between the check and the await.
            notified.as_mut().enable();

            if self.active_tasks() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// A registration in a [`TaskGate`].
///
/// Dropping the guard marks the task finished.
#[derive(Debug)]
pub struct GateGuard {
    inner: Arc<Inner>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.active -= 1;
        if state.active == 0 {
            self.inner.notify.notify_waiters();
        }
    }
}

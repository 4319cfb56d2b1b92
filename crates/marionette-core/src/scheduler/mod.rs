//! Scheduler - releases deferred items once they are due.
//!
//! The scheduler owns a [`Futures`] heap and a single background loop:
//! 1. pop every future that is due and forward its item to the output channel
//! 2. sleep until the earliest pending future is due, or until an insertion
//!    produces a new earliest future
//! 3. with nothing pending, wait for an insertion
//!
//! Stopping the scheduler discards whatever is still pending.

mod future;

pub use self::future::{Future, Futures};

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::MarionetteError;

struct SchedulerState<T> {
    futures: Futures<T>,
    running: bool,
    stop: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

struct Shared<T> {
    state: Mutex<SchedulerState<T>>,
    wake: Notify,
    out: mpsc::Sender<T>,
    closed: CancellationToken,
}

/// Handle to a scheduler. Clones share the same heap and loop.
pub struct Scheduler<T> {
    shared: Arc<Shared<T>>,
}

/// Non-owning handle, for items that need to reschedule themselves without
/// keeping the scheduler alive.
pub struct WeakScheduler<T> {
    shared: Weak<Shared<T>>,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Clone for WeakScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T> WeakScheduler<T> {
    pub fn upgrade(&self) -> Option<Scheduler<T>> {
        self.shared.upgrade().map(|shared| Scheduler { shared })
    }
}

impl<T: Send + 'static> Scheduler<T> {
    /// Create a stopped scheduler forwarding due items to `out`.
    pub fn new(out: mpsc::Sender<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState {
                    futures: Futures::new(),
                    running: false,
                    stop: None,
                    handle: None,
                }),
                wake: Notify::new(),
                out,
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakScheduler<T> {
        WeakScheduler {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Start the background loop (no-op if already running).
    pub async fn start(&self) {
        let mut state = self.shared.state.lock().await;
        if state.running {
            return;
        }

        let stop = self.shared.closed.child_token();
        state.running = true;
        state.stop = Some(stop.clone());
        state.handle = Some(tokio::spawn(run(Arc::clone(&self.shared), stop)));
    }

    /// Stop the background loop and discard pending futures (no-op if stopped).
    /// Waits for the loop to exit.
    pub async fn stop(&self) {
        let handle = {
            let mut state = self.shared.state.lock().await;
            if !state.running {
                return;
            }

            state.running = false;
            if let Some(stop) = state.stop.take() {
                stop.cancel();
            }

            let discarded = state.futures.clear();
            state.futures.resize();
            if discarded > 0 {
                warn!(discarded, "scheduler stopped with pending futures");
            }

            state.handle.take()
        };

        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            error!(error = %err, "scheduler loop exited abnormally");
        }
    }

    /// Stop the background loop for good, without waiting for it.
    ///
    /// For owners that cannot await [`Scheduler::stop`], e.g. on drop. A closed
    /// scheduler never runs again; pending futures are dropped with it.
    pub fn close(&self) {
        self.shared.closed.cancel();
    }

    pub async fn is_running(&self) -> bool {
        self.shared.state.lock().await.running
    }

    /// Number of pending futures.
    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.futures.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Schedule `item` to be released `delay` from now. A zero delay is due on the
    /// next iteration of the loop.
    pub async fn delay(&self, delay: Duration, item: T) -> Result<(), MarionetteError> {
        let now = Utc::now();
        let at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.schedule(at, item).await
    }

    /// Schedule `item` to be released at `at`. Fails with
    /// [`MarionetteError::Unschedulable`] for the zero timestamp.
    pub async fn schedule(&self, at: DateTime<Utc>, item: T) -> Result<(), MarionetteError> {
        let future = Future::new(at, item);
        future.validate()?;

        let earliest = {
            let mut state = self.shared.state.lock().await;
            let earliest = state.futures.peek().is_none_or(|head| at < head.at());
            state.futures.insert(future);
            earliest
        };

        // The loop only needs waking when its current sleep would overshoot.
        if earliest {
            self.shared.wake.notify_one();
        }

        Ok(())
    }
}

async fn run<T: Send + 'static>(shared: Arc<Shared<T>>, stop: CancellationToken) {
    debug!("scheduler running");

    loop {
        let (due, next_wake) = {
            let mut state = shared.state.lock().await;
            let due = state.futures.pop_due(Utc::now());
            if !due.is_empty() {
                state.futures.resize();
            }
            (due, state.futures.peek().map(|future| future.at()))
        };

        for item in due {
            tokio::select! {
                _ = stop.cancelled() => return,
                sent = shared.out.send(item) => {
                    if sent.is_err() {
                        warn!("scheduler output channel closed");
                        shared.state.lock().await.running = false;
                        return;
                    }
                }
            }
        }

        match next_wake {
            Some(at) => {
                let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = shared.wake.notified() => {},
                    _ = tokio::time::sleep(wait) => {},
                }
            }
            None => {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = shared.wake.notified() => {},
                }
            }
        }
    }

    debug!("scheduler stopped");
}

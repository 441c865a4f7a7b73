//! # Auto-Send Module
//!
//! A cancellable periodic timer that re-submits the current outbound payload.
//! The tick body awaits the send before the next tick is taken, and the timer
//! skips missed ticks instead of queueing them, so at most one auto-send is
//! ever in flight.

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use log::info;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

/// Periodic re-send driver. Owned by the session; its lifecycle is bound to
/// the connection (a disconnect forcibly stops it).
pub struct AutoSendScheduler {
    task: Mutex<Option<JoinHandle<()>>>,
    enabled: AtomicBool,
}

impl AutoSendScheduler {
    #[must_use]
    pub fn new() -> Self {
        AutoSendScheduler {
            task: Mutex::new(None),
            enabled: AtomicBool::new(false),
        }
    }

    /// Whether a timer is currently running.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Begins periodic ticking. The first tick fires one full interval after
    /// the call. `tick` resolves to `false` when the scheduler should stop
    /// itself (the link went away).
    ///
    /// The session validates connection state before calling this; restarting
    /// replaces any running timer.
    pub(crate) fn start<F, Fut>(&self, interval: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
    {
        self.stop();
        self.enabled.store(true, Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first interval tick completes immediately; consume it so
            // the first send happens one interval from now.
            timer.tick().await;
            loop {
                timer.tick().await;
                if !tick().await {
                    break;
                }
            }
        });
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
    }

    /// Cancels the timer. Idempotent; returns whether a timer was running.
    pub fn stop(&self) -> bool {
        let was_enabled = self.enabled.swap(false, Ordering::Relaxed);
        if let Ok(mut task) = self.task.lock()
            && let Some(handle) = task.take()
        {
            handle.abort();
            info!("auto-send timer cancelled");
        }
        was_enabled
    }
}

impl Default for AutoSendScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AutoSendScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

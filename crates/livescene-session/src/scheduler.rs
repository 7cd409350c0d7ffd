//! Frame scheduler backed by tokio intervals.

use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use livescene_core::{FrameScheduler, LoopToken, render::FrameCallback};
use tokio::{runtime::Handle, task::JoinHandle, time::MissedTickBehavior};

/// Default frame interval, roughly 60 frames per second.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Runs each animation loop as its own tokio task.
///
/// Must be created inside a tokio runtime.
pub struct IntervalScheduler {
    handle: Handle,
    interval: Duration,
    next_token: AtomicU64,
    tasks: Mutex<HashMap<LoopToken, JoinHandle<()>>>,
}

impl IntervalScheduler {
    /// # Panics
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self::with_handle(Handle::current(), interval)
    }

    /// Create a scheduler that spawns loops on `handle`.
    #[must_use]
    pub fn with_handle(handle: Handle, interval: Duration) -> Self {
        Self {
            handle,
            interval,
            next_token: AtomicU64::new(1),
            tasks: Mutex::default(),
        }
    }

    /// Number of loops still running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }
}

impl FrameScheduler for IntervalScheduler {
    fn start(&self, mut frame: FrameCallback) -> LoopToken {
        let token = LoopToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let period = self.interval;

        let task = self.handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = frame() {
                    tracing::warn!(%token, "Frame callback failed, stopping loop: {e}");
                    break;
                }
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, task);
        token
    }

    fn cancel(&self, token: LoopToken) {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token);
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for IntervalScheduler {
    fn drop(&mut self) {
        for (_, task) in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
        {
            task.abort();
        }
    }
}

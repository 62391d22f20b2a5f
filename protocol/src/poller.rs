//! Single-owner periodic refresh.
//!
//! A [`RefreshPoller`] runs at most one ticking task. Starting it while a
//! task is alive is refused rather than stacked, and the task ends on
//! [`RefreshPoller::stop`] or when the poller is dropped.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Result of [`RefreshPoller::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A task is already running; nothing new was scheduled.
    AlreadyActive,
}

struct ActiveTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct RefreshPoller {
    active: Mutex<Option<ActiveTask>>,
}

impl RefreshPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `tick` now and then every `period` until stopped.
    ///
    /// Ticks never overlap: a slow tick delays the next one and missed
    /// ticks are skipped. Must be called inside a Tokio runtime.
    pub fn start<F, Fut>(&self, period: Duration, tick: F) -> StartOutcome
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut active = self.active.lock();
        if let Some(task) = active.as_ref() {
            if !task.handle.is_finished() {
                debug!("poller already active, not starting another");
                return StartOutcome::AlreadyActive;
            }
        }

        let period = period.max(Duration::from_millis(1));
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("poller task exiting");
        });

        *active = Some(ActiveTask { shutdown, handle });
        info!(period_ms = period.as_millis() as u64, "poller started");
        StartOutcome::Started
    }

    /// Ends the running task, if any. Returns whether one was running.
    pub fn stop(&self) -> bool {
        let Some(task) = self.active.lock().take() else {
            return false;
        };
        let _ = task.shutdown.send(true);
        task.handle.abort();
        info!("poller stopped");
        true
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for RefreshPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const PERIOD: Duration = Duration::from_secs(30);

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> futures::future::Ready<()> + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let tick = move || {
            c.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        };
        (count, tick)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_immediately_then_every_period() {
        let poller = RefreshPoller::new();
        let (count, tick) = counter();
        assert_eq!(poller.start(PERIOD, tick), StartOutcome::Started);

        tokio::time::sleep(PERIOD * 3 + Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_refused() {
        let poller = RefreshPoller::new();
        let (count, tick) = counter();
        let (other_count, other_tick) = counter();
        assert_eq!(poller.start(PERIOD, tick), StartOutcome::Started);
        assert_eq!(poller.start(PERIOD, other_tick), StartOutcome::AlreadyActive);

        tokio::time::sleep(PERIOD + Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(other_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_ticking_and_allows_restart() {
        let poller = RefreshPoller::new();
        let (count, tick) = counter();
        poller.start(PERIOD, tick);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(poller.stop());
        assert!(!poller.stop());
        assert!(!poller.is_active());

        let seen = count.load(Ordering::SeqCst);
        tokio::time::sleep(PERIOD * 5).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);

        let (_, tick) = counter();
        assert_eq!(poller.start(PERIOD, tick), StartOutcome::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_the_task() {
        let (count, tick) = counter();
        {
            let poller = RefreshPoller::new();
            poller.start(PERIOD, tick);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let seen = count.load(Ordering::SeqCst);
        tokio::time::sleep(PERIOD * 5).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }
}

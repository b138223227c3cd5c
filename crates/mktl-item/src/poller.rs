//! Periodic polling of a method on a weakly-held target.
//!
//! One [`Poller`] task runs per polled method. Scheduling follows the
//! historical catch-up discipline: after firing, the next deadline is
//! `last + period`, not `now + period`, so a slow tick doesn't permanently
//! drift the schedule -- except when the period itself changes, in which
//! case the schedule resets from the current time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub type PollTarget = dyn Fn() + Send + Sync;

/// Background poller for a single method. Stops on its own once the target
/// is dropped.
pub struct Poller {
    period_millis: Arc<AtomicU64>,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl Poller {
    pub fn start(target: Weak<PollTarget>, period: Duration) -> Self {
        let period_millis = Arc::new(AtomicU64::new(period.as_millis() as u64));
        let wake = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());

        let task = tokio::spawn(Self::run(target, period_millis.clone(), wake.clone(), shutdown.clone()));

        Self {
            period_millis,
            wake,
            shutdown,
            task,
        }
    }

    async fn run(target: Weak<PollTarget>, period_millis: Arc<AtomicU64>, wake: Arc<Notify>, shutdown: Arc<Notify>) {
        let mut next = tokio::time::Instant::now() + Duration::from_millis(period_millis.load(Ordering::SeqCst));

        loop {
            let delay = next.saturating_duration_since(tokio::time::Instant::now());

            tokio::select! {
                _ = shutdown.notified() => break,
                _ = wake.notified() => {
                    next = tokio::time::Instant::now() + Duration::from_millis(period_millis.load(Ordering::SeqCst));
                    continue;
                }
                _ = tokio::time::sleep(delay) => {
                    let Some(method) = target.upgrade() else { break };
                    method();
                    next += Duration::from_millis(period_millis.load(Ordering::SeqCst));
                }
            }
        }
    }

    /// Change the poll interval, waking the loop immediately so the new
    /// period takes effect without waiting out the old one.
    pub fn set_period(&self, period: Duration) {
        self.period_millis.store(period.as_millis() as u64, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn poller_invokes_target_repeatedly() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let target: Arc<PollTarget> = Arc::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let poller = Poller::start(Arc::downgrade(&target), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(55)).await;
        poller.stop();

        assert!(count.load(Ordering::SeqCst) >= 3);
        drop(target);
    }

    #[tokio::test]
    async fn poller_stops_when_target_dropped() {
        let target: Arc<PollTarget> = Arc::new(|| {});
        let weak = Arc::downgrade(&target);
        let poller = Poller::start(weak, Duration::from_millis(5));
        drop(target);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(poller.task.is_finished());
    }
}

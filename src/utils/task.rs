// src/utils/task.rs - Cancellable background tasks owned by their starter
use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// A spawned background task that is aborted when stopped or dropped, so a
/// component never keeps mutating state after it has been torn down.
pub struct ScheduledTask {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!("Starting background task {}", name);
        ScheduledTask {
            name,
            handle: Some(tokio::spawn(future)),
        }
    }

    /// Run `tick` every `period`, first after one full period. The loop ends
    /// when `tick` returns false.
    pub fn repeating<F>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        // interval_at panics on a zero period
        let period = period.max(Duration::from_millis(1));
        Self::spawn(name, async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !tick() {
                    break;
                }
            }
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Stopping background task {}", self.name);
            handle.abort();
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_repeating_task_ticks_each_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let _task = ScheduledTask::repeating("test", Duration::from_secs(3), move || {
            c.fetch_add(1, Ordering::SeqCst);
            true
        });

        time::sleep(Duration::from_millis(9_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_task_no_longer_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut task = ScheduledTask::repeating("test", Duration::from_secs(1), move || {
            c.fetch_add(1, Ordering::SeqCst);
            true
        });

        time::sleep(Duration::from_millis(2_500)).await;
        task.stop();
        assert!(!task.is_running());

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_returning_false_ends_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = ScheduledTask::repeating("test", Duration::from_secs(1), move || {
            c.fetch_add(1, Ordering::SeqCst) < 1
        });

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!task.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_still_runs() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = ScheduledTask::repeating("test", Duration::ZERO, move || c.fetch_add(1, Ordering::SeqCst) < 2);

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!task.is_running());
    }
}

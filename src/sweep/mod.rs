use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Periodic background task owned by the component that started it.
///
/// The task is aborted by [`SweepTask::stop`] or when the handle is dropped,
/// so a torn-down limiter or cache never leaves a timer behind.
#[derive(Debug)]
pub struct SweepTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl SweepTask {
    /// Spawn `tick` every `period`; the first run happens one period from now.
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                task = name,
                period_ms = period.as_millis() as u64,
                "Started sweep task"
            );

            loop {
                ticker.tick().await;
                tick().await;
            }
        });

        Self { name, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Abort the task
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for SweepTask {
    fn drop(&mut self) {
        self.handle.abort();
        debug!(task = self.name, "Stopped sweep task");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_runs_each_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let task = SweepTask::spawn("test", Duration::from_secs(60), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(task.is_running());
        task.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_stops_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let task = SweepTask::spawn("test", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(task);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

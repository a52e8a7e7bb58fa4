use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use rocket::tokio::{
    self,
    sync::Notify,
    task::{JoinError, JoinHandle},
    time::Duration,
};

/// A job that runs at a given time, unless it is triggered early or cancelled.
pub struct ScheduledTask<T> {
    handle: JoinHandle<T>,
    trigger: Arc<Notify>,
}

impl<T> ScheduledTask<T>
where
    T: Send + 'static,
{
    /// Run `job` at `run_at`, or straight away if that is in the past.
    pub fn new<Fut>(job: Fut, run_at: DateTime<Utc>) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let trigger = Arc::new(Notify::new());
        let early = trigger.clone();
        let delay = delay_until(run_at);
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = early.notified() => {}
            }
            job.await
        });

        Self { handle, trigger }
    }

    /// Cancel the job. Returns true iff it had already finished.
    pub async fn cancel(self) -> bool {
        self.handle.abort();
        self.handle.await.is_ok()
    }

    /// Run the job now instead of waiting.
    pub fn trigger_now(&self) {
        // Stores a permit if the task has not started waiting yet.
        self.trigger.notify_one();
    }
}

impl<T> Future for ScheduledTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

/// Time from now until `at`; zero if `at` has passed.
fn delay_until(at: DateTime<Utc>) -> Duration {
    (at - Utc::now()).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::Duration as ChronoDuration;

    use super::*;

    #[rocket::async_test]
    async fn past_jobs_run_immediately() {
        let task = ScheduledTask::new(async { 7 }, Utc::now() - ChronoDuration::hours(1));
        assert_eq!(task.await.unwrap(), 7);
    }

    #[rocket::async_test]
    async fn trigger_runs_a_future_job() {
        let task = ScheduledTask::new(async { "done" }, Utc::now() + ChronoDuration::days(1));
        task.trigger_now();
        assert_eq!(task.await.unwrap(), "done");
    }

    #[rocket::async_test]
    async fn cancelled_jobs_never_run() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let task = ScheduledTask::new(
            async move { flag.store(true, Ordering::SeqCst) },
            Utc::now() + ChronoDuration::days(1),
        );
        assert!(!task.cancel().await);
        assert!(!ran.load(Ordering::SeqCst));
    }
}

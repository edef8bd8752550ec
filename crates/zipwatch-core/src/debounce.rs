//! Debounce - Collapse bursts of calls into one trailing call
//!
//! Every call cancels the pending timer and schedules a fresh one with the
//! latest arguments. The wrapped function runs once the burst goes quiet.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error};

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type Job<A> = dyn Fn(A) -> BoxFuture + Send + Sync;

/// Trailing-edge debounce wrapper around an async function
///
/// Clones share the same pending slot.
pub struct Debouncer<A> {
    job: Arc<Job<A>>,
    wait: Duration,
    runtime: Handle,
    pending: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<A: Send + 'static> Debouncer<A> {
    /// Wrap `f` with a quiet window of `wait`.
    ///
    /// Must be called from inside a tokio runtime; the handle is captured so
    /// that `call` works from any thread afterwards.
    pub fn new<F, Fut>(f: F, wait: Duration) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::with_handle(f, wait, Handle::current())
    }

    /// Same as [`Debouncer::new`] with an explicit runtime handle.
    pub fn with_handle<F, Fut>(f: F, wait: Duration, runtime: Handle) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job: Arc<Job<A>> = Arc::new(move |args| Box::pin(f(args)) as BoxFuture);
        Self {
            job,
            wait,
            runtime,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Schedule the wrapped function with `args`, restarting the quiet window.
    pub fn call(&self, args: A) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(timer) = pending.take() {
            if !timer.is_finished() {
                debug!("Debounce: restarting timer");
            }
            timer.abort();
        }

        let job = Arc::clone(&self.job);
        let wait = self.wait;
        let runtime = self.runtime.clone();

        *pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep(wait).await;

            // Run detached: aborting the timer must never cut a run short
            runtime.spawn(async move {
                if let Err(e) = job(args).await {
                    error!("Debounced call failed: {:#}", e);
                }
            });
        }));
    }

    /// Drop the pending call, if any.
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = pending.take() {
            timer.abort();
        }
    }

    /// Whether a call is scheduled but has not fired yet.
    pub fn is_pending(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.as_ref().is_some_and(|timer| !timer.is_finished())
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }
}

impl<A> Clone for Debouncer<A> {
    fn clone(&self) -> Self {
        Self {
            job: Arc::clone(&self.job),
            wait: self.wait,
            runtime: self.runtime.clone(),
            pending: Arc::clone(&self.pending),
        }
    }
}

/// Convenience wrapper for [`Debouncer::new`]
pub fn debounce<A, F, Fut>(f: F, wait: Duration) -> Debouncer<A>
where
    A: Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Debouncer::new(f, wait)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Instant};

    type Calls = Arc<Mutex<Vec<(u32, Instant)>>>;

    fn recorder(calls: &Calls) -> impl Fn(u32) -> std::future::Ready<anyhow::Result<()>> {
        let calls = Arc::clone(calls);
        move |n| {
            calls.lock().unwrap().push((n, Instant::now()));
            std::future::ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_last_call() {
        let calls: Calls = Arc::default();
        let debounced = debounce(recorder(&calls), Duration::from_millis(100));
        let start = Instant::now();

        debounced.call(1);
        sleep(Duration::from_millis(30)).await;
        debounced.call(2);
        sleep(Duration::from_millis(30)).await;
        debounced.call(3);

        sleep(Duration::from_millis(99)).await;
        assert!(calls.lock().unwrap().is_empty());
        assert!(debounced.is_pending());

        sleep(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 3);
        assert!(calls[0].1 >= start + Duration::from_millis(160));
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_wrappers_are_independent() {
        let calls: Calls = Arc::default();
        let first = debounce(recorder(&calls), Duration::from_millis(50));
        let second = debounce(recorder(&calls), Duration::from_millis(50));

        first.call(1);
        second.call(2);
        sleep(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;

        let mut seen: Vec<u32> = calls.lock().unwrap().iter().map(|(n, _)| *n).collect();
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clones_share_pending_slot() {
        let calls: Calls = Arc::default();
        let first = debounce(recorder(&calls), Duration::from_millis(50));
        let second = first.clone();

        first.call(1);
        second.call(2);
        sleep(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_wait_is_deferred() {
        let calls: Calls = Arc::default();
        let debounced = debounce(recorder(&calls), Duration::ZERO);

        debounced.call(7);
        assert!(calls.lock().unwrap().is_empty());

        sleep(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_call() {
        let calls: Calls = Arc::default();
        let debounced = debounce(recorder(&calls), Duration::from_millis(20));

        debounced.call(1);
        debounced.cancel();
        assert!(!debounced.is_pending());

        sleep(Duration::from_millis(50)).await;
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_poison_wrapper() {
        let runs = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&runs);
        let debounced = debounce(
            move |fail: bool| {
                *counter.lock().unwrap() += 1;
                async move {
                    if fail {
                        anyhow::bail!("boom");
                    }
                    Ok(())
                }
            },
            Duration::from_millis(10),
        );

        debounced.call(true);
        sleep(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;
        debounced.call(false);
        sleep(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;

        assert_eq!(*runs.lock().unwrap(), 2);
    }
}

// ── Task group and debouncer ──
//
// `TaskGroup` owns every background task of one session behind a single
// cancellation token, so teardown is one `stop_all()` call. Periodic and
// delayed bodies run to completion once started; cancellation only
// prevents the next tick or an action whose delay has not elapsed.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A set of cancellable background tasks with one `stop_all()`.
#[derive(Debug, Default)]
pub struct TaskGroup {
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Spawn a one-shot task that is dropped at its next await point once
    /// the group stops. Returns `false` if the group is already stopped.
    pub fn spawn<F>(&self, name: &'static str, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            debug!(task = name, "task group stopped, not spawning");
            return false;
        }
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => debug!(task = name, "task cancelled"),
                () = guarded(name, fut) => {}
            }
        });
        self.track(handle);
        true
    }

    /// Spawn `action` after `delay`. Stopping the group during the delay
    /// drops it; once `action` has started it runs to completion.
    pub fn spawn_after<F, Fut>(&self, name: &'static str, delay: Duration, action: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            debug!(task = name, "task group stopped, not spawning");
            return false;
        }
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(task = name, "delayed task cancelled before it ran");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
            guarded(name, action()).await;
        });
        self.track(handle);
        true
    }

    /// Spawn a fixed-delay loop: first run after `first_delay`, then every
    /// `period`. A panic in one run is logged and the loop continues.
    pub fn spawn_periodic<F, Fut>(
        &self,
        name: &'static str,
        first_delay: Duration,
        period: Duration,
        mut tick: F,
    ) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            debug!(task = name, "task group stopped, not spawning");
            return false;
        }
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + first_delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                guarded(name, tick()).await;
                if cancel.is_cancelled() {
                    break;
                }
            }
            debug!(task = name, "periodic task exiting");
        });
        self.track(handle);
        true
    }

    /// Cancel every task. Idempotent and non-blocking; an in-flight
    /// periodic body finishes but is not re-armed.
    pub fn stop_all(&self) {
        if !self.cancel.is_cancelled() {
            debug!("stopping task group");
        }
        self.cancel.cancel();
    }

    /// Number of tasks that have not finished yet.
    pub fn active(&self) -> usize {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    /// Wait for every task to finish. Call after [`stop_all`](Self::stop_all).
    pub async fn join(&self) {
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Run `fut`, logging instead of propagating a panic.
async fn guarded<F>(name: &'static str, fut: F)
where
    F: Future<Output = ()>,
{
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        error!(task = name, panic = panic_message(&*panic), "background task panicked");
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

// ── Debouncer ────────────────────────────────────────────────────────

/// Coalesces bursts of requests into one delayed execution.
///
/// The first request arms a timer for `window`; further requests before
/// it fires are absorbed. Requests after it fires arm a new one.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    pending: Arc<AtomicBool>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request `action` to run after the window. Returns `true` if this
    /// call armed the timer, `false` if it was coalesced.
    pub fn request<F, Fut>(&self, tasks: &TaskGroup, action: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        let pending = Arc::clone(&self.pending);
        let spawned = tasks.spawn_after("force-refresh", self.window, move || {
            pending.store(false, Ordering::Release);
            action()
        });
        if !spawned {
            self.pending.store(false, Ordering::Release);
        }
        spawned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_runs_at_offset_then_period() {
        let tasks = TaskGroup::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        tasks.spawn_periodic("tick", Duration::from_secs(5), Duration::from_secs(60), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        tasks.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_tick_does_not_kill_loop() {
        let tasks = TaskGroup::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        tasks.spawn_periodic("boom", Duration::ZERO, Duration::from_secs(1), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                assert!(n != 0, "first tick panics");
            }
        });

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        tasks.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_all_is_idempotent_and_drains() {
        let tasks = TaskGroup::new();
        tasks.stop_all();
        tasks.stop_all();

        let tasks = TaskGroup::new();
        tasks.spawn_periodic("idle", Duration::ZERO, Duration::from_secs(1), || async {});
        tasks.spawn("sleeper", tokio::time::sleep(Duration::from_secs(3600)));
        assert_eq!(tasks.active(), 2);

        tasks.stop_all();
        tasks.stop_all();
        settle().await;
        assert_eq!(tasks.active(), 0);
        assert!(!tasks.spawn("late", async {}));
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_coalesces_burst() {
        let tasks = TaskGroup::new();
        let debouncer = Debouncer::new(Duration::from_secs(1));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut armed = 0;
        for _ in 0..10 {
            let runs = Arc::clone(&runs);
            if debouncer.request(&tasks, move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
            }) {
                armed += 1;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(armed, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // fired, so the next request arms again
        assert!(debouncer.request(&tasks, || async {}));
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_on_stopped_group_does_not_stay_pending() {
        let tasks = TaskGroup::new();
        tasks.stop_all();
        let debouncer = Debouncer::new(Duration::from_secs(1));
        assert!(!debouncer.request(&tasks, || async {}));

        let live = TaskGroup::new();
        assert!(debouncer.request(&live, || async {}));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_task_dropped_if_stopped_before_it_runs() {
        let tasks = TaskGroup::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        tasks.spawn_after("later", Duration::from_secs(1), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        tasks.stop_all();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(tasks.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_task_runs_to_completion_once_started() {
        let tasks = TaskGroup::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        tasks.spawn_after("slow", Duration::from_secs(1), move || async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        tasks.stop_all();
        tasks.join().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}

//! Periodic task scheduling.
//!
//! Every registered task runs on its own tokio task with its own interval, so
//! a slow or failing task never delays another. Invocations of the same task
//! never overlap: ticks that come due while an invocation is still running
//! are skipped with a warning.
//!
//! Each invocation is spawned separately, which turns both returned errors and
//! panics into log lines instead of ending the task's schedule.
//!
//! On shutdown no new ticks are issued. An in-flight invocation gets the
//! configured grace period to finish and is aborted after that.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A unit of periodic work.
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Run one invocation.
    async fn run(&self) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`PeriodicTask`].
pub struct FnTask<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> PeriodicTask for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<()> {
        (self.f)().await
    }
}

/// Wrap an async closure as a named periodic task.
pub fn task_fn<F, Fut>(name: &str, f: F) -> Arc<dyn PeriodicTask>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnTask {
        name: name.to_string(),
        f,
    })
}

/// When a task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub period: Duration,
    pub initial_delay: Duration,
}

impl Schedule {
    /// Fire immediately, then every `period`.
    pub fn every(period: Duration) -> Self {
        Self {
            period,
            initial_delay: Duration::ZERO,
        }
    }

    /// Delay the first firing by `delay`.
    pub fn starting_after(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Collects tasks before they are started.
pub struct Scheduler {
    tasks: Vec<(Arc<dyn PeriodicTask>, Schedule)>,
    grace: Duration,
}

impl Scheduler {
    /// Create a scheduler whose shutdown waits at most `grace` for in-flight work.
    pub fn new(grace: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            grace,
        }
    }

    pub fn register(&mut self, task: Arc<dyn PeriodicTask>, schedule: Schedule) -> &mut Self {
        self.tasks.push((task, schedule));
        self
    }

    /// Spawn every registered task. Must be called inside a tokio runtime.
    pub fn start(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let handles = self
            .tasks
            .into_iter()
            .map(|(task, schedule)| {
                info!(
                    task = task.name(),
                    period_secs = schedule.period.as_secs_f64(),
                    initial_delay_secs = schedule.initial_delay.as_secs_f64(),
                    "Scheduling task"
                );
                tokio::spawn(drive(task, schedule, self.grace, cancel.clone()))
            })
            .collect();

        SchedulerHandle { cancel, handles }
    }
}

/// Handle to the running tasks.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Token that is cancelled when shutdown begins.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop issuing ticks and wait for every task loop to exit.
    pub async fn shutdown(self) {
        info!("Stopping scheduler");
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler task loop terminated abnormally");
            }
        }
        info!("Scheduler stopped");
    }
}

async fn drive(
    task: Arc<dyn PeriodicTask>,
    schedule: Schedule,
    grace: Duration,
    cancel: CancellationToken,
) {
    let name = task.name().to_string();
    let mut ticker = interval_at(Instant::now() + schedule.initial_delay, schedule.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let started = Instant::now();
        let mut invocation = tokio::spawn({
            let task = Arc::clone(&task);
            async move { task.run().await }
        });

        let outcome = tokio::select! {
            result = &mut invocation => Some(result),
            () = cancel.cancelled() => {
                debug!(
                    task = %name,
                    grace_secs = grace.as_secs_f64(),
                    "Waiting for in-flight invocation"
                );
                match timeout(grace, &mut invocation).await {
                    Ok(result) => Some(result),
                    Err(_) => {
                        invocation.abort();
                        warn!(task = %name, "In-flight invocation abandoned after grace period");
                        None
                    }
                }
            }
        };

        match outcome {
            Some(Ok(Ok(()))) => debug!(task = %name, "Invocation completed"),
            Some(Ok(Err(e))) => error!(task = %name, error = %e, "Invocation failed"),
            Some(Err(e)) => error!(task = %name, error = %e, "Invocation panicked"),
            None => break,
        }

        let elapsed = started.elapsed();
        if elapsed > schedule.period {
            let skipped = elapsed.as_nanos() / schedule.period.as_nanos().max(1);
            warn!(
                task = %name,
                elapsed_ms = elapsed.as_millis() as u64,
                skipped_ticks = skipped as u64,
                "Invocation overran its period; skipping missed ticks"
            );
        }
    }

    debug!(task = %name, "Task loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[derive(Default)]
    struct Probe {
        runs: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        finished: AtomicUsize,
    }

    struct SleepyTask {
        probe: Arc<Probe>,
        work: Duration,
        fail: bool,
    }

    #[async_trait]
    impl PeriodicTask for SleepyTask {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn run(&self) -> anyhow::Result<()> {
            self.probe.runs.fetch_add(1, Ordering::SeqCst);
            let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
            sleep(self.work).await;
            self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.probe.finished.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("simulated failure");
            }
            Ok(())
        }
    }

    fn sleepy(work: Duration, fail: bool) -> (Arc<Probe>, Arc<dyn PeriodicTask>) {
        let probe = Arc::new(Probe::default());
        let task = Arc::new(SleepyTask {
            probe: Arc::clone(&probe),
            work,
            fail,
        });
        (probe, task)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_on_cadence() {
        let (probe, task) = sleepy(Duration::ZERO, false);
        let mut scheduler = Scheduler::new(secs(1));
        scheduler.register(task, Schedule::every(secs(10)));
        let handle = scheduler.start();

        sleep(secs(35)).await;
        handle.shutdown().await;

        // t = 0, 10, 20, 30
        assert_eq!(probe.runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay() {
        let (probe, task) = sleepy(Duration::ZERO, false);
        let mut scheduler = Scheduler::new(secs(1));
        scheduler.register(task, Schedule::every(secs(10)).starting_after(secs(10)));
        let handle = scheduler.start();

        sleep(secs(5)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 0);
        sleep(secs(10)).await;
        assert_eq!(probe.runs.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_invocations_never_overlap() {
        let (probe, task) = sleepy(secs(25), false);
        let mut scheduler = Scheduler::new(secs(1));
        scheduler.register(task, Schedule::every(secs(10)));
        let handle = scheduler.start();

        sleep(secs(50)).await;

        // Runs at t = 0 and t = 30; ticks at 10 and 20 were skipped.
        assert_eq!(probe.runs.load(Ordering::SeqCst), 2);
        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_do_not_stop_schedule() {
        let (probe, task) = sleepy(Duration::ZERO, true);
        let mut scheduler = Scheduler::new(secs(1));
        scheduler.register(task, Schedule::every(secs(10)));
        let handle = scheduler.start();

        sleep(secs(35)).await;
        handle.shutdown().await;

        assert_eq!(probe.runs.load(Ordering::SeqCst), 4);
    }

    async fn count_then_panic(runs: Arc<AtomicUsize>) -> anyhow::Result<()> {
        runs.fetch_add(1, Ordering::SeqCst);
        panic!("boom")
    }

    #[tokio::test(start_paused = true)]
    async fn test_panics_do_not_stop_schedule() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = task_fn("panicky", {
            let runs = Arc::clone(&runs);
            move || count_then_panic(Arc::clone(&runs))
        });
        let mut scheduler = Scheduler::new(secs(1));
        scheduler.register(task, Schedule::every(secs(10)));
        let handle = scheduler.start();

        sleep(secs(25)).await;
        handle.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_does_not_block_other_task() {
        let (slow_probe, slow) = sleepy(secs(100), false);
        let (fast_probe, fast) = sleepy(Duration::ZERO, false);
        let mut scheduler = Scheduler::new(secs(1));
        scheduler
            .register(slow, Schedule::every(secs(10)))
            .register(fast, Schedule::every(secs(10)));
        let handle = scheduler.start();

        sleep(secs(35)).await;

        assert_eq!(slow_probe.runs.load(Ordering::SeqCst), 1);
        assert_eq!(fast_probe.runs.load(Ordering::SeqCst), 4);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_in_flight_finish_within_grace() {
        let (probe, task) = sleepy(secs(3), false);
        let mut scheduler = Scheduler::new(secs(5));
        scheduler.register(task, Schedule::every(secs(60)));
        let handle = scheduler.start();

        sleep(secs(1)).await;
        handle.shutdown().await;

        assert_eq!(probe.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_after_grace() {
        let (probe, task) = sleepy(secs(100), false);
        let mut scheduler = Scheduler::new(secs(5));
        scheduler.register(task, Schedule::every(secs(60)));
        let handle = scheduler.start();

        sleep(secs(1)).await;
        let began = Instant::now();
        handle.shutdown().await;

        assert!(began.elapsed() <= secs(6));
        assert_eq!(probe.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_new_ticks() {
        let fired = Arc::new(AtomicBool::new(false));
        let task = task_fn("late", {
            let fired = Arc::clone(&fired);
            move || {
                let fired = Arc::clone(&fired);
                async move {
                    fired.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }
        });
        let mut scheduler = Scheduler::new(secs(1));
        scheduler.register(task, Schedule::every(secs(10)).starting_after(secs(10)));
        let handle = scheduler.start();
        let token = handle.cancellation_token();

        handle.shutdown().await;
        sleep(secs(30)).await;

        assert!(token.is_cancelled());
        assert!(!fired.load(Ordering::SeqCst));
    }
}

//! TaskManager - fixed worker pool with a bounded admission queue.
//!
//! # Flow
//! 1. `queue` wraps the task and sends it on the admission channel (blocks while
//!    the channel is full)
//! 2. `delay` / `schedule` wrap the task and hand it to the scheduler, which
//!    sends it on the admission channel once due
//! 3. the dispatch loop forwards admitted handlers to the worker channel
//! 4. workers execute handlers one at a time; failed handlers go back to the
//!    scheduler until their retries are exhausted
//!
//! Stopping drops futures still waiting in the scheduler. Handlers that were
//! already admitted run to completion before `stop` returns.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::worker_loop::WorkerGroup;
use crate::config::Config;
use crate::error::{ConfigError, MarionetteError};
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
use crate::scheduler::Scheduler;
use crate::task::{Submission, TaskHandler, TaskOptions};

#[derive(Default)]
struct ManagerState {
    running: bool,
    stop: Option<CancellationToken>,
    dispatch: Option<JoinHandle<()>>,
    queue: Option<mpsc::WeakSender<TaskHandler>>,
}

pub struct TaskManager {
    conf: Config,
    scheduler: Scheduler<TaskHandler>,
    ids: Arc<dyn IdGenerator>,
    add: mpsc::Sender<TaskHandler>,
    admitted: Arc<Mutex<mpsc::Receiver<TaskHandler>>>,
    state: RwLock<ManagerState>,
}

impl TaskManager {
    /// Create a stopped task manager.
    ///
    /// An all-zero config is replaced by the defaults; any other config must be
    /// valid.
    pub fn new(conf: Config) -> Result<Self, ConfigError> {
        Self::with_id_generator(conf, Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(
        conf: Config,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, ConfigError> {
        let conf = conf.or_defaults();
        conf.validate()?;

        // tokio channels need room for at least one item
        let (add, admitted) = mpsc::channel(conf.queue_size.max(1));

        Ok(Self {
            scheduler: Scheduler::new(add.clone()),
            conf,
            ids,
            add,
            admitted: Arc::new(Mutex::new(admitted)),
            state: RwLock::new(ManagerState::default()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.conf
    }

    /// Wrap a task into a handler with the given options.
    ///
    /// A submission that already is a handler is returned unchanged and `opts`
    /// is ignored.
    pub fn wrap_task(&self, task: impl Into<Submission>, opts: TaskOptions) -> TaskHandler {
        match task.into() {
            Submission::Handler(handler) => handler,
            Submission::Task(task) => TaskHandler::new(
                self.ids.generate_task_id(),
                self.scheduler.downgrade(),
                task,
                opts,
            ),
        }
    }

    /// Queue a task to run as soon as a worker is available.
    pub async fn queue(&self, task: impl Into<Submission>) -> Result<(), MarionetteError> {
        self.queue_with(task, TaskOptions::default()).await
    }

    /// Queue a task with options. Blocks while the queue is full.
    pub async fn queue_with(
        &self,
        task: impl Into<Submission>,
        opts: TaskOptions,
    ) -> Result<(), MarionetteError> {
        let handler = self.wrap_task(task, opts);

        let state = self.state.read().await;
        if !state.running {
            warn!(
                service = %self.conf.service_name,
                error = %MarionetteError::Stopped,
                "task manager stopped"
            );
            return Err(MarionetteError::Stopped);
        }

        // the receiver is owned by self, so the channel cannot be closed here
        self.add
            .send(handler)
            .await
            .map_err(|_| MarionetteError::Stopped)
    }

    /// Run a task `delay` from now.
    pub async fn delay(
        &self,
        delay: Duration,
        task: impl Into<Submission>,
    ) -> Result<(), MarionetteError> {
        self.delay_with(delay, task, TaskOptions::default()).await
    }

    pub async fn delay_with(
        &self,
        delay: Duration,
        task: impl Into<Submission>,
        opts: TaskOptions,
    ) -> Result<(), MarionetteError> {
        self.scheduler.delay(delay, self.wrap_task(task, opts)).await
    }

    /// Run a task at `at`.
    pub async fn schedule(
        &self,
        at: DateTime<Utc>,
        task: impl Into<Submission>,
    ) -> Result<(), MarionetteError> {
        self.schedule_with(at, task, TaskOptions::default()).await
    }

    pub async fn schedule_with(
        &self,
        at: DateTime<Utc>,
        task: impl Into<Submission>,
        opts: TaskOptions,
    ) -> Result<(), MarionetteError> {
        self.scheduler.schedule(at, self.wrap_task(task, opts)).await
    }

    /// Start the scheduler and the workers (no-op if already running).
    pub async fn start(&self) {
        let mut state = self.state.write().await;

        self.scheduler.start().await;

        if state.running {
            return;
        }

        let (queue_tx, queue_rx) = mpsc::channel(self.conf.queue_size.max(1));
        let stop = CancellationToken::new();

        state.queue = Some(queue_tx.downgrade());
        state.stop = Some(stop.clone());
        state.dispatch = Some(tokio::spawn(dispatch(
            self.conf.clone(),
            Arc::clone(&self.admitted),
            queue_tx,
            queue_rx,
            stop,
        )));
        state.running = true;
    }

    /// Stop the scheduler and the workers (no-op if not running).
    ///
    /// Blocks until every admitted task has completed; futures still pending in
    /// the scheduler are dropped.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;

        self.scheduler.stop().await;

        if !state.running {
            return;
        }

        state.running = false;
        let stop = state.stop.take();
        let dispatch = state.dispatch.take();
        drop(state);

        if let Some(stop) = stop {
            stop.cancel();
        }

        if let Some(dispatch) = dispatch
            && let Err(err) = dispatch.await
        {
            error!(error = %err, "task manager dispatch loop exited abnormally");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    /// Number of handlers waiting for a free worker.
    pub async fn queue_len(&self) -> usize {
        let state = self.state.read().await;
        state
            .queue
            .as_ref()
            .and_then(mpsc::WeakSender::upgrade)
            .map(|queue| queue.max_capacity() - queue.capacity())
            .unwrap_or(0)
    }

    /// Number of handlers waiting in the scheduler (delayed, scheduled or
    /// backing off before a retry).
    pub async fn scheduled_len(&self) -> usize {
        self.scheduler.len().await
    }
}

/// Dropping a running manager signals its loops to exit without waiting for
/// them: handlers already admitted still run, scheduled futures are dropped.
/// Call [`TaskManager::stop`] to wait for in-flight tasks.
impl Drop for TaskManager {
    fn drop(&mut self) {
        self.scheduler.close();

        let state = self.state.get_mut();
        if let Some(stop) = state.stop.take() {
            stop.cancel();
        }
    }
}

async fn dispatch(
    conf: Config,
    admitted: Arc<Mutex<mpsc::Receiver<TaskHandler>>>,
    queue: mpsc::Sender<TaskHandler>,
    queue_rx: mpsc::Receiver<TaskHandler>,
    stop: CancellationToken,
) {
    info!(service = %conf.service_name, workers = conf.workers, "task manager running");

    let workers = WorkerGroup::spawn(conf.workers, queue_rx, &conf.service_name);
    let mut admitted = admitted.lock().await;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            handler = admitted.recv() => {
                let Some(handler) = handler else { break };
                if queue.send(handler).await.is_err() {
                    error!(service = %conf.service_name, "worker channel closed");
                    break;
                }
            }
        }
    }

    // handlers accepted by `queue` before the stop signal still run
    while let Ok(handler) = admitted.try_recv() {
        if queue.send(handler).await.is_err() {
            break;
        }
    }

    drop(admitted);
    drop(queue);
    workers.join().await;

    info!(service = %conf.service_name, "task manager stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Context, ContextError};
    use crate::impls::{ConstantBackoff, ZeroBackoff};
    use crate::ports::FixedClock;
    use crate::task::{Task, TaskFn};
    use async_trait::async_trait;
    use rstest::rstest;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::time::{sleep, timeout};

    /// Fails every attempt before the `fail_until`-th.
    struct TestTask {
        fail_until: u32,
        attempts: AtomicU32,
        success: AtomicBool,
    }

    impl TestTask {
        fn new(fail_until: u32) -> Arc<Self> {
            Arc::new(Self {
                fail_until,
                attempts: AtomicU32::new(0),
                success: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Task for TestTask {
        async fn run(&self, _ctx: Context) -> anyhow::Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < self.fail_until {
                anyhow::bail!("task errored on attempt {attempt}");
            }
            self.success.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "test task"
        }
    }

    fn manager() -> TaskManager {
        // A queue size of zero makes every `queue` call wait for the dispatch loop.
        TaskManager::new(Config::new(4, 0, "test")).unwrap()
    }

    fn totals(state: &[Arc<TestTask>]) -> (usize, u32) {
        let completed = state
            .iter()
            .filter(|t| t.success.load(Ordering::SeqCst))
            .count();
        let attempts = state.iter().map(|t| t.attempts.load(Ordering::SeqCst)).sum();
        (completed, attempts)
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        let waited = timeout(Duration::from_secs(10), async {
            while !done() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "condition not reached in time");
    }

    /// Parks its worker until `gate` is cancelled.
    fn gated(gate: &CancellationToken, completed: &Arc<AtomicU32>) -> Arc<dyn Task> {
        let (gate, completed) = (gate.clone(), Arc::clone(completed));
        Arc::new(TaskFn::new(move |_ctx: Context| {
            let (gate, completed) = (gate.clone(), Arc::clone(&completed));
            async move {
                gate.cancelled().await;
                completed.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        }))
    }

    #[test]
    fn new_applies_defaults_and_validates() {
        let tm = TaskManager::new(Config::new(0, 0, "")).unwrap();
        assert_eq!(tm.config(), &Config::default());

        let err = TaskManager::new(Config::new(0, 8, "test")).err();
        assert_eq!(err, Some(ConfigError::NoWorkers));

        let err = TaskManager::new(Config::new(2, 8, "")).err();
        assert_eq!(err, Some(ConfigError::NoServiceName));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn runs_every_queued_task() {
        let tm = manager();
        tm.start().await;
        // start twice without duplicating workers
        tm.start().await;

        let completed = Arc::new(AtomicU32::new(0));
        for _ in 0..100 {
            let completed = Arc::clone(&completed);
            let task = TaskFn::new(move |_ctx: Context| {
                let completed = Arc::clone(&completed);
                async move {
                    sleep(Duration::from_millis(1)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            });
            tm.queue(task).await.unwrap();
        }

        assert!(tm.is_running().await);
        tm.stop().await;
        // stop twice
        tm.stop().await;

        assert_eq!(completed.load(Ordering::SeqCst), 100);
        assert!(!tm.is_running().await);
        assert_eq!(tm.queue_len().await, 0);

        let task = TaskFn::new(|_ctx: Context| async { anyhow::Ok(()) });
        assert_eq!(tm.queue(task).await, Err(MarionetteError::Stopped));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queue_blocks_while_the_queue_is_full() {
        let tm = Arc::new(TaskManager::new(Config::new(1, 0, "test")).unwrap());
        tm.start().await;

        let gate = CancellationToken::new();
        let completed = Arc::new(AtomicU32::new(0));

        // running on the worker, waiting in the worker channel, held by the
        // dispatch loop, waiting in the admission channel
        for _ in 0..4 {
            let queued = timeout(Duration::from_secs(5), tm.queue(gated(&gate, &completed))).await;
            assert_eq!(queued.ok(), Some(Ok(())));
        }
        assert_eq!(tm.queue_len().await, 1);

        let blocked = {
            let tm = Arc::clone(&tm);
            let task = gated(&gate, &completed);
            tokio::spawn(async move { tm.queue(task).await })
        };
        sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());
        assert_eq!(completed.load(Ordering::SeqCst), 0);

        gate.cancel();
        let queued = timeout(Duration::from_secs(5), blocked).await;
        assert!(matches!(queued, Ok(Ok(Ok(())))));

        tm.stop().await;
        assert_eq!(completed.load(Ordering::SeqCst), 5);
    }

    #[rstest]
    #[case::zero(Duration::ZERO)]
    #[case::unbounded(Duration::MAX)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn degenerate_timeouts_do_not_fail_the_task(#[case] limit: Duration) {
        let tm = TaskManager::new(Config::new(1, 0, "test")).unwrap();
        tm.start().await;

        let attempts = Arc::new(AtomicU32::new(0));
        let completed = Arc::new(AtomicU32::new(0));
        let task = {
            let (attempts, completed) = (Arc::clone(&attempts), Arc::clone(&completed));
            TaskFn::new(move |ctx: Context| {
                let (attempts, completed) = (Arc::clone(&attempts), Arc::clone(&completed));
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    if let Some(err) = ctx.err() {
                        return Err(anyhow::Error::from(err));
                    }
                    completed.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            })
        };

        let opts = TaskOptions::new().retries(2).backoff(ZeroBackoff).timeout(limit);
        tm.queue_with(task, opts).await.unwrap();

        wait_for(|| completed.load(Ordering::SeqCst) == 1).await;
        tm.stop().await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dropping_a_running_manager_ends_its_loops() {
        let tm = manager();
        tm.start().await;

        let task = TaskFn::new(|_ctx: Context| async { anyhow::Ok(()) });
        tm.delay(Duration::from_secs(3600), task).await.unwrap();

        // the dispatch loop holds the receiver, the scheduler loop its shared state
        let scheduler = tm.scheduler.downgrade();
        let admitted = Arc::downgrade(&tm.admitted);
        drop(tm);

        wait_for(|| scheduler.upgrade().is_none() && admitted.upgrade().is_none()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queue_after_stop_never_runs() {
        let tm = manager();
        tm.start().await;
        tm.stop().await;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let task = TaskFn::new(move |_ctx: Context| {
            let flag = Arc::clone(&flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                anyhow::Ok(())
            }
        });
        assert_eq!(tm.queue(task).await, Err(MarionetteError::Stopped));

        tm.start().await;
        sleep(Duration::from_millis(50)).await;
        tm.stop().await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn retries_until_success() {
        let tm = manager();
        tm.start().await;

        let state: Vec<_> = (0..100).map(|_| TestTask::new(3)).collect();
        for task in &state {
            let opts = TaskOptions::new().retries(5).backoff(ZeroBackoff);
            tm.queue_with(Arc::clone(task), opts).await.unwrap();
        }

        wait_for(|| totals(&state).0 == 100).await;
        tm.stop().await;

        assert_eq!(totals(&state), (100, 300));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn retries_until_success_with_constant_backoff() {
        let tm = manager();
        tm.start().await;

        let state: Vec<_> = (0..100).map(|_| TestTask::new(3)).collect();
        for task in &state {
            let opts = TaskOptions::new()
                .retries(5)
                .backoff(ConstantBackoff::new(Duration::from_millis(10)));
            tm.queue_with(Arc::clone(task), opts).await.unwrap();
        }

        wait_for(|| totals(&state).0 == 100).await;
        tm.stop().await;

        assert_eq!(totals(&state), (100, 300));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exhausted_retries_are_not_attempted_again() {
        let tm = manager();
        tm.start().await;

        let state: Vec<_> = (0..100).map(|_| TestTask::new(5)).collect();
        for task in &state {
            let opts = TaskOptions::new().retries(1).backoff(ZeroBackoff);
            tm.queue_with(Arc::clone(task), opts).await.unwrap();
        }

        wait_for(|| totals(&state).1 == 200).await;
        sleep(Duration::from_millis(100)).await;
        tm.stop().await;

        assert_eq!(totals(&state), (0, 200));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancelled_context_consumes_retries() {
        let tm = manager();
        tm.start().await;

        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();

        let attempts = Arc::new(AtomicU32::new(0));
        let completed = Arc::new(AtomicU32::new(0));

        for _ in 0..100 {
            let (attempts, completed) = (Arc::clone(&attempts), Arc::clone(&completed));
            let task = TaskFn::new(move |ctx: Context| {
                let (attempts, completed) = (Arc::clone(&attempts), Arc::clone(&completed));
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    if let Some(err) = ctx.err() {
                        return Err(anyhow::Error::from(err));
                    }
                    completed.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            });
            let opts = TaskOptions::new()
                .retries(1)
                .backoff(ZeroBackoff)
                .context(ctx.clone());
            tm.queue_with(task, opts).await.unwrap();
        }

        wait_for(|| attempts.load(Ordering::SeqCst) == 200).await;
        sleep(Duration::from_millis(100)).await;
        tm.stop().await;

        assert_eq!(completed.load(Ordering::SeqCst), 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn retry_and_plain_tasks_side_by_side() {
        let tm = manager();
        tm.start().await;

        let state: Vec<_> = (0..100).map(|_| TestTask::new(2)).collect();
        for (i, task) in state.iter().enumerate() {
            let opts = if i < 50 {
                TaskOptions::new().retries(2).backoff(ZeroBackoff)
            } else {
                TaskOptions::new().backoff(ZeroBackoff)
            };
            tm.queue_with(Arc::clone(task), opts).await.unwrap();
        }

        wait_for(|| totals(&state) == (50, 150)).await;
        sleep(Duration::from_millis(100)).await;
        tm.stop().await;

        assert_eq!(totals(&state), (50, 150));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn timeout_expires_the_attempt_context() {
        let tm = manager();
        tm.start().await;

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let task = TaskFn::new(move |ctx: Context| {
            let seen_tx = seen_tx.clone();
            async move {
                let reason = ctx.done().await;
                let _ = seen_tx.send(reason);
                Err::<(), _>(anyhow::Error::from(reason))
            }
        });
        let opts = TaskOptions::new().timeout(Duration::from_millis(20));
        tm.queue_with(task, opts).await.unwrap();

        let reason = timeout(Duration::from_secs(5), seen_rx.recv()).await.unwrap();
        assert_eq!(reason, Some(ContextError::DeadlineExceeded));
        tm.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn delayed_and_scheduled_tasks_run_once_due() {
        let tm = manager();
        tm.start().await;

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let make = |label: &'static str| {
            let done_tx = done_tx.clone();
            TaskFn::new(move |_ctx: Context| {
                let done_tx = done_tx.clone();
                async move {
                    let _ = done_tx.send(label);
                    anyhow::Ok(())
                }
            })
        };

        let at = Utc::now() + chrono::Duration::milliseconds(40);
        tm.schedule(at, make("scheduled")).await.unwrap();
        tm.delay(Duration::from_millis(10), make("delayed")).await.unwrap();

        let first = timeout(Duration::from_secs(5), done_rx.recv()).await.unwrap();
        let second = timeout(Duration::from_secs(5), done_rx.recv()).await.unwrap();
        assert_eq!(first, Some("delayed"));
        assert_eq!(second, Some("scheduled"));
        assert_eq!(tm.scheduled_len().await, 0);

        tm.stop().await;
    }

    #[tokio::test]
    async fn zero_timestamp_is_rejected() {
        let tm = manager();
        let task = TaskFn::new(|_ctx: Context| async { anyhow::Ok(()) });

        let err = tm.schedule(DateTime::<Utc>::default(), task).await;
        assert_eq!(err, Err(MarionetteError::Unschedulable));
        assert_eq!(tm.scheduled_len().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_drops_pending_futures() {
        let tm = manager();
        tm.start().await;

        let task = TaskFn::new(|_ctx: Context| async { anyhow::Ok(()) });
        tm.delay(Duration::from_secs(3600), task).await.unwrap();
        assert_eq!(tm.scheduled_len().await, 1);

        tm.stop().await;
        assert_eq!(tm.scheduled_len().await, 0);
    }

    #[tokio::test]
    async fn wrapping_a_handler_returns_it_unchanged() {
        let fixed = Utc::now();
        let tm = TaskManager::with_id_generator(
            Config::default(),
            Arc::new(UlidGenerator::new(FixedClock::new(fixed))),
        )
        .unwrap();

        let task = TaskFn::named("wrapped", |_ctx: Context| async { anyhow::Ok(()) });
        let handler = tm.wrap_task(task, TaskOptions::new().retries(3));
        let id = handler.id();
        assert_eq!(id.timestamp_ms(), fixed.timestamp_millis() as u64);

        let again = tm.wrap_task(handler, TaskOptions::new().retries(7));
        assert_eq!(again.id(), id);
        assert_eq!(again.retries(), 3);
        assert_eq!(again.name(), "wrapped");
    }
}

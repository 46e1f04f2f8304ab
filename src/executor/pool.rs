// =============================================================================
// Worker Pool — bounded workers, FIFO queue, per-task deadlines
// =============================================================================
//
// Tasks are queued in submission order and handed to the first idle worker.
// At most `workers` tasks run at once. Each dispatched task gets a supervisor
// future that waits for the reply under the task's deadline:
//
//   reply      -> resolve the caller, free the slot
//   timeout    -> reject with Timeout, replace the worker, free the slot
//   dropped    -> the worker thread panicked; reject with WorkerFault and
//                 respawn it
//
// `destroy` rejects everything queued or running with PoolShutdown. After
// that every submit fails immediately. If every worker slot is dead and none
// can be respawned, queued tasks are rejected with InitFailed instead of
// waiting forever.
//
// Locking: one `parking_lot::Mutex` guards all pool state. Replies are sent
// and listeners are invoked only after the guard is released.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, OnceCell};
use tracing::{debug, error, info, warn};

use super::task::{Task, TaskHandler, TaskKind, TaskOutput};
use super::worker::{Job, Worker};
use crate::error::TaskError;
use crate::runtime_config::PoolConfig;

type Reply = oneshot::Sender<Result<TaskOutput, TaskError>>;

/// Starts the thread for one worker slot: `(pool, index, generation, handler)`.
pub(crate) type Spawner = Arc<dyn Fn(&str, usize, u32, TaskHandler) -> std::io::Result<Worker> + Send + Sync>;

/// Callback invoked with a fresh snapshot whenever pool status changes.
pub type StatusListener = Arc<dyn Fn(&PoolStatus) + Send + Sync>;

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub initialized: bool,
    pub shut_down: bool,
    /// Live worker threads.
    pub total_workers: usize,
    pub busy_workers: usize,
    pub queued: usize,
    /// `busy_workers / total_workers`, 0 when there are no workers.
    pub utilization: f64,
    pub completed: u64,
    pub failed: u64,
    pub respawns: u64,
}

// -----------------------------------------------------------------------------
// Internal state
// -----------------------------------------------------------------------------

struct QueuedTask {
    id: u64,
    task: Task,
    timeout: Duration,
    reply: Reply,
}

struct Slot {
    worker: Option<Worker>,
    generation: u32,
    running: Option<u64>,
}

impl Slot {
    fn is_idle(&self) -> bool {
        self.worker.is_some() && self.running.is_none()
    }
}

#[derive(Default)]
struct PoolState {
    slots: Vec<Slot>,
    queue: VecDeque<QueuedTask>,
    in_flight: HashMap<u64, Reply>,
    shut_down: bool,
    completed: u64,
    failed: u64,
    respawns: u64,
}

enum Outcome {
    Done(TaskOutput),
    Faulted,
    TimedOut,
}

// -----------------------------------------------------------------------------
// WorkerPool
// -----------------------------------------------------------------------------

pub struct WorkerPool {
    name: String,
    config: PoolConfig,
    handler: TaskHandler,
    spawner: Spawner,
    init: OnceCell<()>,
    state: Mutex<PoolState>,
    next_task_id: AtomicU64,
    listeners: Mutex<Vec<(u64, StatusListener)>>,
    next_listener_id: AtomicU64,
}

impl WorkerPool {
    /// Create an uninitialised pool. Workers are spawned by [`initialize`]
    /// or lazily by the first submit.
    ///
    /// [`initialize`]: WorkerPool::initialize
    pub fn new(name: impl Into<String>, config: PoolConfig, handler: TaskHandler) -> Arc<Self> {
        Self::with_spawner(name, config, handler, Arc::new(Worker::spawn))
    }

    pub(crate) fn with_spawner(
        name: impl Into<String>,
        config: PoolConfig,
        handler: TaskHandler,
        spawner: Spawner,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            handler,
            spawner,
            init: OnceCell::new(),
            state: Mutex::new(PoolState::default()),
            next_task_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the worker threads. Idempotent: concurrent callers share one
    /// initialisation and later calls return immediately. A failed attempt
    /// rejects every queued task and may be retried.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), TaskError> {
        if self.state.lock().shut_down {
            return Err(self.shutdown_error());
        }

        match self.init.get_or_try_init(|| self.spawn_workers()).await {
            Ok(_) => {
                self.dispatch();
                Ok(())
            }
            Err(err) => {
                self.reject_queued(&err);
                Err(err)
            }
        }
    }

    async fn spawn_workers(&self) -> Result<(), TaskError> {
        let count = self.config.effective_workers();
        let name = self.name.clone();
        let handler = Arc::clone(&self.handler);
        let spawner = Arc::clone(&self.spawner);

        let spawned = tokio::task::spawn_blocking(move || {
            (0..count)
                .map(|index| spawner(&name, index, 0, Arc::clone(&handler)))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| TaskError::InitFailed {
            pool: self.name.clone(),
            reason: e.to_string(),
        })?;

        let mut slots = Vec::with_capacity(count);
        for (index, result) in spawned.into_iter().enumerate() {
            let worker = match result {
                Ok(worker) => Some(worker),
                Err(e) => {
                    warn!(pool = %self.name, worker = index, error = %e, "failed to spawn worker thread");
                    None
                }
            };
            slots.push(Slot {
                worker,
                generation: 0,
                running: None,
            });
        }

        let live = slots.iter().filter(|s| s.worker.is_some()).count();
        if live == 0 {
            return Err(TaskError::InitFailed {
                pool: self.name.clone(),
                reason: "no worker threads could be spawned".to_string(),
            });
        }

        {
            let mut state = self.state.lock();
            if state.shut_down {
                drop(state);
                for worker in slots.into_iter().filter_map(|s| s.worker) {
                    worker.terminate();
                }
                return Err(self.shutdown_error());
            }
            state.slots = slots;
        }

        info!(pool = %self.name, workers = live, timeout_ms = self.config.task_timeout_ms, "worker pool initialised");
        self.notify();
        Ok(())
    }

    /// Submit `task` under the pool's default deadline.
    pub async fn submit(self: &Arc<Self>, task: Task) -> Result<TaskOutput, TaskError> {
        self.submit_with_timeout(task, self.config.task_timeout()).await
    }

    /// Submit `task` and wait for its result. Tasks start in submission
    /// order; the deadline covers execution only, not time spent queued.
    pub async fn submit_with_timeout(
        self: &Arc<Self>,
        task: Task,
        timeout: Duration,
    ) -> Result<TaskOutput, TaskError> {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let kind = task.kind();
        let (reply, result) = oneshot::channel();

        {
            let mut state = self.state.lock();
            if state.shut_down {
                return Err(self.shutdown_error());
            }
            state.queue.push_back(QueuedTask {
                id,
                task,
                timeout,
                reply,
            });
        }
        debug!(pool = %self.name, task_id = id, %kind, "task queued");
        self.notify();

        // A failed init has already rejected this task through its reply.
        let _ = self.initialize().await;
        self.dispatch();

        result.await.unwrap_or_else(|_| Err(self.shutdown_error()))
    }

    /// Hand queued tasks to idle workers, oldest first.
    fn dispatch(self: &Arc<Self>) {
        let mut started = Vec::new();
        let mut stranded = Vec::new();
        {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }

            while !state.queue.is_empty() {
                let Some(slot) = state.slots.iter().position(Slot::is_idle) else {
                    break;
                };
                let Some(QueuedTask {
                    id,
                    task,
                    timeout,
                    reply,
                }) = state.queue.pop_front()
                else {
                    break;
                };

                let kind = task.kind();
                let (tx, rx) = oneshot::channel();
                let job = Job {
                    task_id: id,
                    task,
                    reply: tx,
                };
                let sent = match state.slots[slot].worker.as_ref() {
                    Some(worker) => worker.send(job),
                    None => Err(job),
                };

                match sent {
                    Ok(()) => {
                        state.slots[slot].running = Some(id);
                        state.in_flight.insert(id, reply);
                        started.push((slot, id, kind, timeout, rx));
                    }
                    Err(job) => {
                        // Thread exited underneath us; put the task back first in line.
                        warn!(pool = %self.name, worker = slot, "worker channel closed, respawning");
                        state.queue.push_front(QueuedTask {
                            id,
                            task: job.task,
                            timeout,
                            reply,
                        });
                        self.replace_worker(&mut state, slot);
                    }
                }
            }

            let all_dead = !state.slots.is_empty() && state.slots.iter().all(|s| s.worker.is_none());
            if all_dead && !state.queue.is_empty() {
                stranded = state.queue.drain(..).collect();
            }
        }

        if !stranded.is_empty() {
            let err = TaskError::InitFailed {
                pool: self.name.clone(),
                reason: "no live worker threads".to_string(),
            };
            error!(pool = %self.name, count = stranded.len(), "no workers left, rejecting queued tasks");
            for queued in stranded {
                let _ = queued.reply.send(Err(err.clone()));
            }
            self.notify();
        }

        if started.is_empty() {
            return;
        }
        for (slot, id, kind, timeout, rx) in started {
            debug!(pool = %self.name, task_id = id, worker = slot, %kind, "task dispatched");
            self.supervise(slot, id, kind, timeout, rx);
        }
        self.notify();
    }

    fn supervise(
        self: &Arc<Self>,
        slot: usize,
        task_id: u64,
        kind: TaskKind,
        timeout: Duration,
        rx: oneshot::Receiver<TaskOutput>,
    ) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(output)) => Outcome::Done(output),
                Ok(Err(_)) => Outcome::Faulted,
                Err(_) => Outcome::TimedOut,
            };
            pool.complete(slot, task_id, kind, timeout, outcome);
        });
    }

    fn complete(self: &Arc<Self>, slot: usize, task_id: u64, kind: TaskKind, timeout: Duration, outcome: Outcome) {
        let (reply, result) = {
            let mut state = self.state.lock();
            // Absent when destroy already rejected it.
            let Some(reply) = state.in_flight.remove(&task_id) else {
                return;
            };

            let result = match outcome {
                Outcome::Done(output) => {
                    state.completed += 1;
                    Ok(output)
                }
                Outcome::Faulted => {
                    state.failed += 1;
                    error!(pool = %self.name, task_id, worker = slot, %kind, "worker crashed, respawning");
                    self.replace_worker(&mut state, slot);
                    Err(TaskError::WorkerFault {
                        task_id,
                        kind: kind.as_str(),
                        worker: slot,
                    })
                }
                Outcome::TimedOut => {
                    state.failed += 1;
                    warn!(
                        pool = %self.name,
                        task_id,
                        worker = slot,
                        %kind,
                        timeout_ms = timeout.as_millis() as u64,
                        "task timed out, replacing worker"
                    );
                    self.replace_worker(&mut state, slot);
                    Err(TaskError::Timeout {
                        task_id,
                        kind: kind.as_str(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
            };

            if let Some(s) = state.slots.get_mut(slot) {
                s.running = None;
            }
            (reply, result)
        };

        let _ = reply.send(result);
        self.dispatch();
        self.notify();
    }

    /// Retire the worker in `slot` and start a fresh thread in its place.
    /// A timed-out thread is detached and left to finish on its own.
    fn replace_worker(&self, state: &mut PoolState, slot: usize) {
        if state.shut_down {
            return;
        }
        let Some(s) = state.slots.get_mut(slot) else {
            return;
        };
        if let Some(old) = s.worker.take() {
            old.terminate();
        }
        s.generation = s.generation.wrapping_add(1);

        match (self.spawner)(&self.name, slot, s.generation, Arc::clone(&self.handler)) {
            Ok(worker) => s.worker = Some(worker),
            Err(e) => error!(pool = %self.name, worker = slot, error = %e, "failed to respawn worker"),
        }
        state.respawns += 1;
    }

    fn reject_queued(&self, err: &TaskError) {
        let drained: Vec<QueuedTask> = self.state.lock().queue.drain(..).collect();
        if drained.is_empty() {
            return;
        }
        warn!(pool = %self.name, count = drained.len(), error = %err, "rejecting queued tasks");
        for queued in drained {
            let _ = queued.reply.send(Err(err.clone()));
        }
        self.notify();
    }

    /// Shut the pool down. Queued and running tasks are rejected with
    /// PoolShutdown and every worker thread is told to exit. Idempotent.
    pub fn destroy(&self) {
        let (queued, in_flight, workers) = {
            let mut state = self.state.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            let queued: Vec<QueuedTask> = state.queue.drain(..).collect();
            let in_flight: Vec<Reply> = state.in_flight.drain().map(|(_, reply)| reply).collect();
            let workers: Vec<Worker> = state
                .slots
                .iter_mut()
                .filter_map(|s| {
                    s.running = None;
                    s.worker.take()
                })
                .collect();
            (queued, in_flight, workers)
        };

        info!(
            pool = %self.name,
            queued = queued.len(),
            running = in_flight.len(),
            "worker pool destroyed"
        );

        for task in queued {
            let _ = task.reply.send(Err(self.shutdown_error()));
        }
        for reply in in_flight {
            let _ = reply.send(Err(self.shutdown_error()));
        }
        for worker in workers {
            worker.terminate();
        }
        self.notify();
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        let total_workers = state.slots.iter().filter(|s| s.worker.is_some()).count();
        let busy_workers = state.slots.iter().filter(|s| s.running.is_some()).count();
        PoolStatus {
            name: self.name.clone(),
            initialized: self.init.initialized(),
            shut_down: state.shut_down,
            total_workers,
            busy_workers,
            queued: state.queue.len(),
            utilization: if total_workers == 0 {
                0.0
            } else {
                busy_workers as f64 / total_workers as f64
            },
            completed: state.completed,
            failed: state.failed,
            respawns: state.respawns,
        }
    }

    /// Register `listener` for status changes. It is called once immediately
    /// with the current status. Dropping the returned handle unsubscribes.
    pub fn on_status_change<F>(self: &Arc<Self>, listener: F) -> StatusSubscription
    where
        F: Fn(&PoolStatus) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let listener: StatusListener = Arc::new(listener);
        self.listeners.lock().push((id, Arc::clone(&listener)));
        self.invoke(&listener, &self.status());
        StatusSubscription {
            pool: Arc::downgrade(self),
            id,
        }
    }

    fn notify(&self) {
        let listeners: Vec<StatusListener> = self.listeners.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        if listeners.is_empty() {
            return;
        }
        let status = self.status();
        for listener in &listeners {
            self.invoke(listener, &status);
        }
    }

    fn invoke(&self, listener: &StatusListener, status: &PoolStatus) {
        if catch_unwind(AssertUnwindSafe(|| listener(status))).is_err() {
            warn!(pool = %self.name, "status listener panicked");
        }
    }

    fn shutdown_error(&self) -> TaskError {
        TaskError::PoolShutdown(self.name.clone())
    }
}

/// Handle returned by [`WorkerPool::on_status_change`].
pub struct StatusSubscription {
    pool: Weak<WorkerPool>,
    id: u64,
}

impl StatusSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::task::{default_handler, execute};
    use crate::types::WeeklyCandle;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Instant;

    fn config(workers: usize, timeout_ms: u64) -> PoolConfig {
        PoolConfig {
            workers,
            task_timeout_ms: timeout_ms,
        }
    }

    /// A KDJ task whose period doubles as a tag the test handlers can read.
    fn tagged(tag: usize) -> Task {
        Task::ComputeKdj {
            weekly: Arc::from(Vec::<WeeklyCandle>::new()),
            period: tag,
            prior: None,
        }
    }

    fn tag_of(task: &Task) -> usize {
        match task {
            Task::ComputeKdj { period, .. } => *period,
            _ => 0,
        }
    }

    fn sleepy(ms: u64, current: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> TaskHandler {
        Arc::new(move |task: Task| -> TaskOutput {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(ms));
            current.fetch_sub(1, Ordering::SeqCst);
            execute(task)
        })
    }

    #[tokio::test]
    async fn five_tasks_on_two_workers_run_in_three_waves() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new("waves", config(2, 5_000), sleepy(50, current, peak.clone()));
        pool.initialize().await.unwrap();

        let started = Instant::now();
        let results = futures_util::future::join_all((0..5).map(|_| pool.submit(Task::Ping))).await;
        let elapsed = started.elapsed();

        assert!(results.iter().all(|r| matches!(r, Ok(TaskOutput::Pong(_)))));
        assert!(elapsed >= Duration::from_millis(145), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "elapsed {elapsed:?}");
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().completed, 5);
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_worker_count() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new("load", config(3, 5_000), sleepy(5, current, peak.clone()));

        let results = futures_util::future::join_all((0..30).map(|_| pool.submit(Task::Ping))).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 30);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        let status = pool.status();
        assert_eq!(status.busy_workers, 0);
        assert_eq!(status.queued, 0);
    }

    #[tokio::test]
    async fn tasks_start_in_submission_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();
        let handler: TaskHandler = Arc::new(move |task: Task| -> TaskOutput {
            seen.lock().push(tag_of(&task));
            execute(task)
        });
        let pool = WorkerPool::new("fifo", config(1, 5_000), handler);
        pool.initialize().await.unwrap();

        let results = futures_util::future::join_all((1..=6).map(|tag| pool.submit(tagged(tag)))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(*order.lock(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn crashing_task_fails_alone_and_worker_is_respawned() {
        let handler: TaskHandler = Arc::new(|task: Task| -> TaskOutput {
            if tag_of(&task) == 13 {
                panic!("bad input");
            }
            execute(task)
        });
        let pool = WorkerPool::new("faults", config(2, 5_000), handler);

        let (bad, good) = tokio::join!(pool.submit(tagged(13)), pool.submit(Task::Ping));

        assert!(matches!(bad, Err(TaskError::WorkerFault { kind: "compute_kdj", .. })));
        assert!(matches!(good, Ok(TaskOutput::Pong(_))));

        let status = pool.status();
        assert_eq!(status.respawns, 1);
        assert_eq!(status.failed, 1);
        assert_eq!(status.total_workers, 2);

        // The replacement worker accepts new work.
        for _ in 0..4 {
            assert!(pool.submit(Task::Ping).await.is_ok());
        }
    }

    #[tokio::test]
    async fn timeout_frees_the_slot() {
        let handler: TaskHandler = Arc::new(|task: Task| -> TaskOutput {
            if tag_of(&task) == 99 {
                std::thread::sleep(Duration::from_millis(400));
            }
            execute(task)
        });
        let pool = WorkerPool::new("deadline", config(1, 5_000), handler);

        let err = pool
            .submit_with_timeout(tagged(99), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Timeout { timeout_ms: 50, .. }));
        assert!(err.is_retryable());

        let started = Instant::now();
        assert!(pool.submit(Task::Ping).await.is_ok());
        assert!(started.elapsed() < Duration::from_millis(300));

        let status = pool.status();
        assert_eq!(status.busy_workers, 0);
        assert_eq!(status.respawns, 1);
    }

    #[tokio::test]
    async fn destroy_rejects_pending_and_later_work() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new("doomed", config(1, 5_000), sleepy(200, current, peak));
        pool.initialize().await.unwrap();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.submit(Task::Ping).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let before = pool.status();
        assert_eq!(before.busy_workers, 1);
        assert_eq!(before.queued, 2);

        pool.destroy();
        pool.destroy();

        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.unwrap_err(), TaskError::PoolShutdown("doomed".into()));
        }
        assert!(matches!(
            pool.submit(Task::Ping).await,
            Err(TaskError::PoolShutdown(_))
        ));
        assert!(pool.initialize().await.is_err());

        let after = pool.status();
        assert!(after.shut_down);
        assert_eq!(after.total_workers, 0);
        assert_eq!(after.queued, 0);
    }

    #[tokio::test]
    async fn initialize_is_idempotent_and_submit_before_init_works() {
        let pool = WorkerPool::new("lazy", config(2, 5_000), default_handler());
        assert!(!pool.status().initialized);
        assert!(matches!(pool.submit(Task::Ping).await, Ok(TaskOutput::Pong(_))));
        assert!(pool.status().initialized);

        let (a, b) = tokio::join!(pool.initialize(), pool.initialize());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(pool.status().total_workers, 2);
    }

    fn failing_spawner(fail: Arc<AtomicBool>) -> Spawner {
        Arc::new(move |pool: &str, index: usize, generation: u32, handler: TaskHandler| {
            if fail.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "thread limit reached"));
            }
            Worker::spawn(pool, index, generation, handler)
        })
    }

    #[tokio::test]
    async fn failed_init_rejects_queued_work_and_can_be_retried() {
        let fail = Arc::new(AtomicBool::new(true));
        let pool = WorkerPool::with_spawner("flaky", config(2, 5_000), default_handler(), failing_spawner(fail.clone()));

        let results = futures_util::future::join_all((0..3).map(|_| pool.submit(Task::Ping))).await;
        for result in results {
            assert!(matches!(result, Err(TaskError::InitFailed { ref pool, .. }) if pool == "flaky"));
        }
        let status = pool.status();
        assert!(!status.initialized);
        assert_eq!(status.queued, 0);
        assert!(pool.initialize().await.is_err());

        fail.store(false, Ordering::SeqCst);
        pool.initialize().await.unwrap();
        assert_eq!(pool.status().total_workers, 2);
        assert!(matches!(pool.submit(Task::Ping).await, Ok(TaskOutput::Pong(_))));
    }

    #[tokio::test]
    async fn losing_the_last_worker_rejects_instead_of_hanging() {
        // First-generation threads start; every respawn fails.
        let spawner: Spawner = Arc::new(|pool: &str, index: usize, generation: u32, handler: TaskHandler| {
            if generation > 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "thread limit reached"));
            }
            Worker::spawn(pool, index, generation, handler)
        });
        let handler: TaskHandler = Arc::new(|task: Task| -> TaskOutput {
            if tag_of(&task) == 13 {
                panic!("bad input");
            }
            execute(task)
        });
        let pool = WorkerPool::with_spawner("last", config(1, 5_000), handler, spawner);

        let (bad, queued) = tokio::join!(pool.submit(tagged(13)), pool.submit(Task::Ping));

        assert!(matches!(bad, Err(TaskError::WorkerFault { .. })));
        assert!(matches!(queued, Err(TaskError::InitFailed { .. })));
        assert_eq!(pool.status().total_workers, 0);

        let later = tokio::time::timeout(Duration::from_secs(2), pool.submit(Task::Ping)).await;
        assert!(matches!(later, Ok(Err(TaskError::InitFailed { .. }))));
    }

    #[tokio::test]
    async fn worker_count_is_clamped() {
        let pool = WorkerPool::new("wide", config(64, 5_000), default_handler());
        pool.initialize().await.unwrap();
        assert_eq!(pool.status().total_workers, crate::runtime_config::MAX_WORKERS);
    }

    #[tokio::test]
    async fn status_subscription_fires_and_unsubscribes() {
        let pool = WorkerPool::new("observed", config(1, 5_000), default_handler());
        let seen = Arc::new(Mutex::new(Vec::<PoolStatus>::new()));
        let sink = seen.clone();
        let sub = pool.on_status_change(move |s| sink.lock().push(s.clone()));

        assert_eq!(seen.lock().len(), 1);
        assert!(!seen.lock()[0].initialized);

        pool.submit(Task::Ping).await.unwrap();
        let count = seen.lock().len();
        assert!(count > 1);
        assert_eq!(seen.lock().last().map(|s| s.completed), Some(1));

        sub.unsubscribe();
        pool.submit(Task::Ping).await.unwrap();
        assert_eq!(seen.lock().len(), count);
    }

    #[tokio::test]
    async fn panicking_listener_does_not_break_the_pool() {
        let pool = WorkerPool::new("noisy", config(1, 5_000), default_handler());
        let _sub = pool.on_status_change(|_| panic!("listener bug"));
        assert!(pool.submit(Task::Ping).await.is_ok());
    }
}

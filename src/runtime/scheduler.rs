use crate::ingestor::CycleRunner;
use crate::observability::{LogLevel, PipelineLogger};
use crate::runtime::registry::SessionRegistry;
use crate::runtime::Clock;
use crate::source::SourceError;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Builds one runner per worker thread. Runners are constructed inside the
/// thread that owns them, so they never cross a thread boundary.
pub type RunnerFactory = Arc<dyn Fn() -> Box<dyn CycleRunner> + Send + Sync>;

/// Worker pool and backoff tunables.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub worker_count: usize,
    pub error_backoff_base_ms: u64,
    pub error_backoff_cap_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            error_backoff_base_ms: 5_000,
            error_backoff_cap_ms: 300_000,
        }
    }
}

/// Summary of one scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub discovered: usize,
    pub enqueued: usize,
    pub retired: usize,
}

struct QueueState {
    jobs: VecDeque<String>,
    closed: bool,
}

/// Handoff between the scheduling pass and session workers. Depth is bounded
/// by the registry's in-flight claims: a session is enqueued at most once.
struct JobQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl JobQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn push(&self, session_id: String) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return false;
        }
        state.jobs.push_back(session_id);
        self.cv.notify_one();
        true
    }

    fn pop_blocking(&self) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return None;
            }
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }
            state = self.cv.wait(state).unwrap();
        }
    }

    /// Closes the queue and drops unstarted jobs. In-flight cycles are left
    /// to reach their next safe boundary.
    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.jobs.clear();
        self.cv.notify_all();
    }
}

/// Dispatches due sessions onto a bounded worker pool.
///
/// Distinct sessions run in parallel; the registry's in-flight marker keeps
/// any single session strictly sequential. One session stuck in an error
/// state never blocks the others.
pub struct IngestScheduler {
    registry: Arc<Mutex<SessionRegistry>>,
    queue: Arc<JobQueue>,
    clock: Arc<dyn Clock>,
    logger: PipelineLogger,
    discovery: Mutex<Box<dyn CycleRunner>>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl IngestScheduler {
    /// Starts the worker pool. Each worker builds its own runner from the
    /// factory; one extra runner serves session discovery and retirement.
    pub fn new(
        config: SchedulerConfig,
        factory: RunnerFactory,
        clock: Arc<dyn Clock>,
        logger: PipelineLogger,
    ) -> Self {
        let registry = Arc::new(Mutex::new(SessionRegistry::new(
            config.error_backoff_base_ms,
            config.error_backoff_cap_ms,
        )));
        let queue = Arc::new(JobQueue::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(config.worker_count.max(1));
        for _ in 0..config.worker_count.max(1) {
            let factory = factory.clone();
            let queue = queue.clone();
            let registry = registry.clone();
            let clock = clock.clone();
            let logger = logger.clone();
            workers.push(thread::spawn(move || {
                let mut runner = factory();
                while let Some(session_id) = queue.pop_blocking() {
                    let result = runner.run_cycle(&session_id, clock.now_ms());
                    let now_ms = clock.now_ms();
                    let requeue = {
                        let mut registry = registry.lock().unwrap();
                        registry.complete(&result, now_ms);
                        result.outcome.is_ok()
                            && result.has_more
                            && registry.claim(&session_id)
                    };
                    let level = if result.outcome.is_ok() {
                        LogLevel::Debug
                    } else {
                        LogLevel::Warn
                    };
                    logger.log(
                        now_ms,
                        level,
                        "scheduler",
                        &session_id,
                        &format!(
                            "cycle outcome={:?} pulled={} delivered={} skipped={}",
                            result.outcome, result.pulled, result.delivered, result.skipped
                        ),
                    );
                    if requeue {
                        queue.push(session_id);
                    }
                }
                runner.close();
            }));
        }
        let discovery = Mutex::new(factory());
        Self {
            registry,
            queue,
            clock,
            logger,
            discovery,
            shutdown,
            workers,
        }
    }

    /// Runs one scheduling pass: discover open sessions, retire drained
    /// sessions that have left the open set, and enqueue everything due.
    pub fn schedule_pass(&self) -> Result<PassStats, SourceError> {
        let open = self.discovery.lock().unwrap().discover_sessions()?;
        let now_ms = self.clock.now_ms();
        let open_set: HashSet<String> = open.iter().cloned().collect();
        let (discovered, retirable) = {
            let mut registry = self.registry.lock().unwrap();
            let discovered = registry.observe_open(&open);
            (discovered, registry.retirable(&open_set))
        };
        let mut retired = 0;
        for session_id in &retirable {
            match self.discovery.lock().unwrap().retire_session(session_id) {
                Ok(()) => {
                    self.registry.lock().unwrap().remove(session_id);
                    retired += 1;
                    self.logger.log(
                        now_ms,
                        LogLevel::Info,
                        "scheduler",
                        session_id,
                        "session retired",
                    );
                }
                Err(err) => {
                    self.logger.log(
                        now_ms,
                        LogLevel::Warn,
                        "scheduler",
                        session_id,
                        &format!("retire failed: {err}"),
                    );
                }
            }
        }
        let due = self.registry.lock().unwrap().claim_due(now_ms);
        let mut enqueued = 0;
        for session_id in due {
            if self.queue.push(session_id) {
                enqueued += 1;
            }
        }
        Ok(PassStats {
            discovered,
            enqueued,
            retired,
        })
    }

    /// Loops scheduling passes until shutdown is requested.
    pub fn run(&self, pass_interval: Duration) {
        while !self.shutdown.load(Ordering::SeqCst) {
            if let Err(err) = self.schedule_pass() {
                self.logger.log(
                    self.clock.now_ms(),
                    LogLevel::Warn,
                    "scheduler",
                    "",
                    &format!("discovery failed: {err}"),
                );
            }
            thread::sleep(pass_interval);
        }
    }

    /// Handle for requesting shutdown from another thread.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Registry view for assertions and health reporting.
    pub fn registry(&self) -> Arc<Mutex<SessionRegistry>> {
        self.registry.clone()
    }

    /// Cooperative shutdown: unstarted jobs are dropped, in-flight cycles
    /// finish, workers drain and join.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.close();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        self.discovery.lock().unwrap().close();
    }
}

//! Bounded background worker pool with delayed resubmission.
//!
//! # Responsibility
//! - Run requeries and other store work off the calling thread.
//! - Bound queued work without ever dropping a task because the queue is full.
//!
//! # Invariants
//! - `submit` never blocks and never fails for a full queue. A rejected task
//!   is handed to the retry timer and offered to the queue again after
//!   `retry_delay`, repeatedly, until it is accepted.
//! - A panicking task is caught at the worker boundary and logged; the worker
//!   thread keeps running and the submitter never observes the failure.
//! - After `shutdown`, new tasks and tasks still waiting on the retry timer
//!   are dropped. Tasks already in the queue still run.

use crate::config::ExecutorConfig;
use log::{debug, error, warn};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A queued unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

const WORKER_THREAD_PREFIX: &str = "tablewatch-worker";
const RETRY_THREAD_NAME: &str = "tablewatch-retry";

/// What happened to a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted by the work queue.
    Queued,
    /// Queue was full; the task will be offered again after the retry delay.
    Deferred,
    /// Executor is shut down; the task was dropped.
    Closed,
}

/// Counter snapshot for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub submitted: u64,
    pub deferred: u64,
    pub completed: u64,
    pub panicked: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    deferred: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            submitted: self.submitted.load(Ordering::Acquire),
            deferred: self.deferred.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
            panicked: self.panicked.load(Ordering::Acquire),
        }
    }
}

/// Fixed-size worker pool with a bounded queue.
pub struct BackgroundExecutor {
    queue: Mutex<Option<SyncSender<Task>>>,
    retry: Mutex<Option<Sender<Task>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl BackgroundExecutor {
    /// Starts `pool_size` workers and the retry timer thread.
    ///
    /// # Errors
    /// - Returns the OS error when a thread cannot be spawned.
    pub fn new(config: &ExecutorConfig) -> std::io::Result<Self> {
        let pool_size = config.pool_size.max(1);
        let (queue_tx, queue_rx) = mpsc::sync_channel::<Task>(config.queue_capacity.max(1));
        let (retry_tx, retry_rx) = mpsc::channel::<Task>();
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let counters = Arc::new(Counters::default());

        let mut threads = Vec::with_capacity(pool_size + 1);
        for index in 0..pool_size {
            let receiver = Arc::clone(&queue_rx);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("{WORKER_THREAD_PREFIX}-{index}"))
                .spawn(move || worker_loop(&receiver, &counters))?;
            threads.push(handle);
        }

        let retry_queue = queue_tx.clone();
        let retry_delay = config.retry_delay();
        let handle = thread::Builder::new()
            .name(RETRY_THREAD_NAME.to_string())
            .spawn(move || retry_loop(&retry_rx, &retry_queue, retry_delay))?;
        threads.push(handle);

        debug!(
            "event=executor_start module=runtime status=ok pool_size={} queue_capacity={} retry_delay_ms={}",
            pool_size, config.queue_capacity, config.retry_delay_ms
        );

        Ok(Self {
            queue: Mutex::new(Some(queue_tx)),
            retry: Mutex::new(Some(retry_tx)),
            threads: Mutex::new(threads),
            counters,
        })
    }

    /// Enqueues `task` for a worker thread. Never blocks.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> SubmitOutcome {
        self.submit_boxed(Box::new(task))
    }

    pub fn submit_boxed(&self, task: Task) -> SubmitOutcome {
        let rejected = {
            let queue = self.queue.lock();
            let Some(sender) = queue.as_ref() else {
                warn!("event=executor_submit module=runtime status=closed");
                return SubmitOutcome::Closed;
            };
            match sender.try_send(task) {
                Ok(()) => {
                    self.counters.submitted.fetch_add(1, Ordering::AcqRel);
                    return SubmitOutcome::Queued;
                }
                Err(TrySendError::Full(task)) => task,
                Err(TrySendError::Disconnected(_)) => {
                    warn!("event=executor_submit module=runtime status=closed");
                    return SubmitOutcome::Closed;
                }
            }
        };

        let retry = self.retry.lock();
        match retry.as_ref().map(|sender| sender.send(rejected)) {
            Some(Ok(())) => {
                self.counters.submitted.fetch_add(1, Ordering::AcqRel);
                self.counters.deferred.fetch_add(1, Ordering::AcqRel);
                debug!("event=executor_deferred module=runtime status=queue_full");
                SubmitOutcome::Deferred
            }
            _ => {
                warn!("event=executor_submit module=runtime status=closed");
                SubmitOutcome::Closed
            }
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        self.counters.snapshot()
    }

    /// Stops accepting work and joins pool threads.
    ///
    /// Idempotent. When called from one of the pool's own threads, that
    /// thread is not joined.
    pub fn shutdown(&self) {
        drop(self.retry.lock().take());
        drop(self.queue.lock().take());

        let current = thread::current().id();
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("event=executor_shutdown module=runtime status=error error=join_failed");
            }
        }
        debug!("event=executor_shutdown module=runtime status=ok");
    }
}

impl Drop for BackgroundExecutor {
    // Closing the channels is enough for the detached threads to exit.
    fn drop(&mut self) {
        drop(self.retry.get_mut().take());
        drop(self.queue.get_mut().take());
    }
}

fn worker_loop(receiver: &Mutex<Receiver<Task>>, counters: &Counters) {
    loop {
        let next = receiver.lock().recv();
        let Ok(task) = next else {
            break;
        };

        match catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::AcqRel);
            }
            Err(_) => {
                counters.panicked.fetch_add(1, Ordering::AcqRel);
                error!(
                    "event=task_panicked module=runtime status=error thread={}",
                    thread::current().name().unwrap_or("unnamed")
                );
            }
        }
    }
}

/// A rejected task waiting for its next admission attempt.
struct Pending {
    due: Instant,
    sequence: u64,
    task: Task,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// Reversed so that `BinaryHeap` pops the earliest deadline first.
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

fn retry_loop(requests: &Receiver<Task>, queue: &SyncSender<Task>, delay: Duration) {
    let mut pending: BinaryHeap<Pending> = BinaryHeap::new();
    let mut sequence = 0_u64;

    loop {
        let received = match pending.peek() {
            Some(next) => {
                let wait = next.due.saturating_duration_since(Instant::now());
                requests.recv_timeout(wait)
            }
            None => requests.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(task) => {
                sequence += 1;
                pending.push(Pending {
                    due: Instant::now() + delay,
                    sequence,
                    task,
                });
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        while pending.peek().is_some_and(|next| next.due <= now) {
            let Some(entry) = pending.pop() else {
                break;
            };
            match queue.try_send(entry.task) {
                Ok(()) => {}
                Err(TrySendError::Full(task)) => {
                    sequence += 1;
                    pending.push(Pending {
                        due: now + delay,
                        sequence,
                        task,
                    });
                    break;
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!(
                        "event=executor_retry module=runtime status=closed dropped={}",
                        pending.len() + 1
                    );
                    return;
                }
            }
        }
    }

    if !pending.is_empty() {
        debug!(
            "event=executor_retry module=runtime status=stopped dropped={}",
            pending.len()
        );
    }
}

//! Observer delivery threads.
//!
//! # Responsibility
//! - Run observer callbacks off the notifying thread on a small named pool.
//! - Give every subscription its own serial lane so callbacks for one
//!   observer run one at a time and in posting order.
//!
//! # Invariants
//! - At most one pool thread drains a given lane at any moment.
//! - A slow or panicking callback holds up only its own lane; other lanes keep
//!   being drained by the remaining threads.
//! - Posting never blocks on callback execution.

use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    sender: Mutex<Option<Sender<Arc<LaneState>>>>,
    pending: Mutex<usize>,
    idle: Condvar,
}

impl Shared {
    fn finish_job(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

#[derive(Default)]
struct LaneQueue {
    jobs: VecDeque<Job>,
    scheduled: bool,
}

#[derive(Default)]
struct LaneState {
    queue: Mutex<LaneQueue>,
}

/// Serial delivery queue for one subscription.
#[derive(Clone)]
pub struct DeliveryLane {
    state: Arc<LaneState>,
    shared: Arc<Shared>,
}

impl DeliveryLane {
    /// Queues `job` behind every job previously posted to this lane.
    ///
    /// Returns `false` when the dispatcher is shut down and the job was dropped.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let sender = self.shared.sender.lock();
        let Some(sender) = sender.as_ref() else {
            debug!("event=dispatch_post module=runtime status=closed");
            return false;
        };

        *self.shared.pending.lock() += 1;
        let schedule = {
            let mut queue = self.state.queue.lock();
            queue.jobs.push_back(Box::new(job));
            !std::mem::replace(&mut queue.scheduled, true)
        };
        if schedule && sender.send(Arc::clone(&self.state)).is_err() {
            error!("event=dispatch_post module=runtime status=error error=pool_gone");
            return false;
        }
        true
    }
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    thread_ids: Vec<ThreadId>,
}

impl Dispatcher {
    /// Spawns `threads` delivery threads named `{thread_name}-{index}`.
    pub fn spawn(thread_name: &str, threads: usize) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Arc<LaneState>>();
        let receiver = Arc::new(Mutex::new(receiver));
        let shared = Arc::new(Shared {
            sender: Mutex::new(Some(sender)),
            pending: Mutex::new(0),
            idle: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let receiver = Arc::clone(&receiver);
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{thread_name}-{index}"))
                .spawn(move || delivery_loop(&receiver, &worker_shared));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    drop(shared.sender.lock().take());
                    return Err(err);
                }
            }
        }
        let thread_ids = handles.iter().map(|handle| handle.thread().id()).collect();

        Ok(Self {
            shared,
            handles: Mutex::new(handles),
            thread_ids,
        })
    }

    /// Opens a new serial lane on this dispatcher.
    pub fn lane(&self) -> DeliveryLane {
        DeliveryLane {
            state: Arc::new(LaneState::default()),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_dispatch_thread(&self) -> bool {
        self.thread_ids.contains(&thread::current().id())
    }

    /// Waits until no job is queued or running on any lane.
    ///
    /// Returns `false` on timeout or when the dispatcher is shut down. Returns
    /// `true` immediately when called on a delivery thread.
    pub fn flush(&self, timeout: Duration) -> bool {
        if self.is_dispatch_thread() {
            return true;
        }
        if self.shared.sender.lock().is_none() {
            return false;
        }

        let deadline = Instant::now() + timeout;
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            if self.shared.idle.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }

    /// Stops the delivery threads after they drain already-posted jobs.
    pub fn shutdown(&self) {
        drop(self.shared.sender.lock().take());
        if self.is_dispatch_thread() {
            return;
        }
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("event=dispatch_shutdown module=runtime status=error error=join_failed");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        drop(self.shared.sender.lock().take());
    }
}

fn delivery_loop(receiver: &Mutex<Receiver<Arc<LaneState>>>, shared: &Shared) {
    loop {
        let next = receiver.lock().recv();
        let Ok(lane) = next else {
            break;
        };
        drain_lane(&lane, shared);
    }
}

fn drain_lane(lane: &LaneState, shared: &Shared) {
    loop {
        let job = {
            let mut queue = lane.queue.lock();
            match queue.jobs.pop_front() {
                Some(job) => job,
                None => {
                    queue.scheduled = false;
                    return;
                }
            }
        };
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            warn!("event=observer_panicked module=runtime status=error");
        }
        shared.finish_job();
    }
}

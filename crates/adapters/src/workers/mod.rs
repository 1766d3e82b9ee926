use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;

use homecloud_application::JobQueue;
use tracing::{debug, error, info, warn};

pub const THUMBNAIL_QUEUE_CAPACITY: usize = 1024;
pub const BACKUP_QUEUE_CAPACITY: usize = 4096;
/// Workers started by an `enqueue` that arrives before `start`.
const LAZY_WORKERS: usize = 1;

/// Work performed by the pool's threads. Failures are the handler's to log.
pub trait JobHandler<J>: Send + Sync {
    fn handle(&self, job: J);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    pub accepted_jobs: u64,
    pub dropped_jobs: u64,
    pub completed_jobs: u64,
    pub panicked_jobs: u64,
}

impl PoolMetrics {
    /// Jobs accepted but not yet finished, queued or running.
    pub fn pending_jobs(&self) -> u64 {
        self.accepted_jobs
            .saturating_sub(self.completed_jobs + self.panicked_jobs)
    }
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Fixed set of OS threads draining one bounded queue. `enqueue` never
/// blocks: a full queue drops the job.
pub struct WorkerPool<J> {
    name: &'static str,
    capacity: usize,
    handler: Arc<dyn JobHandler<J>>,
    sender: OnceLock<SyncSender<J>>,
    counters: Arc<Counters>,
}

impl<J: Send + 'static> WorkerPool<J> {
    pub fn new(name: &'static str, capacity: usize, handler: Arc<dyn JobHandler<J>>) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            handler,
            sender: OnceLock::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Starts `workers` threads. Returns false if the pool was already running.
    pub fn start(&self, workers: usize) -> bool {
        let mut started = false;
        self.sender.get_or_init(|| {
            started = true;
            self.spawn(workers.max(1))
        });
        if !started {
            debug!(pool = self.name, "worker pool already running");
        }
        started
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            accepted_jobs: self.counters.accepted.load(Ordering::Relaxed),
            dropped_jobs: self.counters.dropped.load(Ordering::Relaxed),
            completed_jobs: self.counters.completed.load(Ordering::Relaxed),
            panicked_jobs: self.counters.panicked.load(Ordering::Relaxed),
        }
    }

    fn spawn(&self, workers: usize) -> SyncSender<J> {
        let (sender, receiver) = mpsc::sync_channel::<J>(self.capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        for index in 0..workers {
            let receiver = Arc::clone(&receiver);
            let handler = Arc::clone(&self.handler);
            let counters = Arc::clone(&self.counters);
            let name = self.name;
            let spawned = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || run_worker(name, &receiver, handler.as_ref(), &counters));
            if let Err(error) = spawned {
                error!(pool = name, %error, "failed to spawn worker thread");
            }
        }

        info!(
            pool = self.name,
            workers,
            capacity = self.capacity,
            "worker pool started"
        );
        sender
    }
}

fn run_worker<J>(
    name: &str,
    receiver: &Mutex<Receiver<J>>,
    handler: &dyn JobHandler<J>,
    counters: &Counters,
) {
    loop {
        let next = match receiver.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => {
                error!(pool = name, "job queue lock poisoned; worker exiting");
                return;
            }
        };
        let Ok(job) = next else {
            debug!(pool = name, "job queue closed; worker exiting");
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(job))) {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(pool = name, "job panicked; worker continues");
            }
        }
    }
}

impl<J: Send + 'static> JobQueue<J> for WorkerPool<J> {
    fn enqueue(&self, job: J) -> bool {
        let sender = self.sender.get_or_init(|| {
            warn!(pool = self.name, "job queued before start; starting minimal pool");
            self.spawn(LAZY_WORKERS)
        });

        match sender.try_send(job) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(pool = self.name, dropped, "queue full; job dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(pool = self.name, "no worker is running; job dropped");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

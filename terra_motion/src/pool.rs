//! Fixed-size worker pool for motion tasks.
//!
//! Jobs are move-only one-shot closures. The queue is a mutex plus a
//! condition variable; workers drain it until the pool is dropped, at
//! which point the remaining jobs still run and the threads are
//! joined.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolQueue {
    jobs: VecDeque<Job>,
    stopping: bool,
}

struct PoolInner {
    queue: Mutex<PoolQueue>,
    signal: Condvar,
}

/// Completion handle for one enqueued job.
pub struct JobHandle {
    done: Arc<(Mutex<bool>, Condvar)>,
}

impl JobHandle {
    /// Block until the job has run.
    pub fn wait(&self) {
        let (lock, signal) = &*self.done;
        let mut done = lock.lock();
        while !*done {
            signal.wait(&mut done);
        }
    }

    /// Whether the job has run.
    pub fn is_done(&self) -> bool {
        *self.done.0.lock()
    }
}

/// Thread pool with a fixed worker count.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` threads.
    pub fn new(workers: usize) -> Self {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(PoolQueue {
                jobs: VecDeque::new(),
                stopping: false,
            }),
            signal: Condvar::new(),
        });

        let handles = (0..workers.max(1))
            .map(|i| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("motion-worker-{i}"))
                    .spawn(move || worker_loop(inner))
                    .expect("spawn motion worker")
            })
            .collect();

        Self {
            inner,
            workers: handles,
        }
    }

    /// Queue a job; the handle resolves once it has run.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> JobHandle {
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let signal_done = Arc::clone(&done);

        let wrapped: Job = Box::new(move || {
            job();
            let (lock, signal) = &*signal_done;
            *lock.lock() = true;
            signal.notify_all();
        });

        {
            let mut queue = self.inner.queue.lock();
            queue.jobs.push_back(wrapped);
        }
        self.inner.signal.notify_one();

        JobHandle { done }
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.inner.queue.lock().stopping = true;
        self.inner.signal.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.stopping {
                    return;
                }
                inner.signal.wait(&mut queue);
            }
        };
        job();
    }
}

/*
 * Copyright (c) 2023.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! The process-wide compression pool
//!
//! One pool is shared by every container in the process. Jobs are
//! tagged with the owning container's id and its core budget; a worker
//! takes the first queued job whose owner still has budget left, which
//! stops one container from monopolizing the pool.
//!
//! Nested submissions (a job submitted from inside a worker) are
//! rejected, and therefore run in the calling thread, when the
//! submitter is not the globally oldest active owner and every worker
//! is busy. The oldest owner always makes progress, so jobs that wait
//! on sub-jobs cannot deadlock the pool.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, OnceLock};

use log::error;

/// The degree of parallelism of one container, a value in `[0, 1]`.
///
/// `0` forces sequential in-caller execution; anything above is mapped
/// to a core budget of `ceil(dop * cores)`, clamped to the available
/// cores.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DegreeOfParallelism(f64);

impl DegreeOfParallelism {
    /// Create a handle, clamping the value into `[0.0, 1.0]`
    pub fn new(value: f64) -> DegreeOfParallelism {
        DegreeOfParallelism(value.clamp(0.0, 1.0))
    }

    /// The clamped value
    pub const fn value(self) -> f64 {
        self.0
    }

    /// True when every job should run in the calling thread
    pub fn is_sequential(self) -> bool {
        self.0 == 0.0
    }

    /// The number of cores this handle may occupy at once
    pub fn cores(self) -> usize {
        let cores = max_cores();
        ((self.0 * cores as f64).ceil() as usize).clamp(1, cores)
    }
}

impl Default for DegreeOfParallelism {
    /// Full parallelism, matching the original concurrent containers
    fn default() -> Self {
        DegreeOfParallelism(1.0)
    }
}

/// Number of hardware threads, queried once
pub(crate) fn max_cores() -> usize {
    static CORES: OnceLock<usize> = OnceLock::new();
    *CORES.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|cores| cores.get())
            .unwrap_or(1)
    })
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueuedJob {
    job:    Job,
    cores:  usize,
    owner:  u64
}

struct PoolState {
    queue:   VecDeque<QueuedJob>,
    running: HashMap<u64, usize>
}

pub(crate) struct ThreadPool {
    state:     Mutex<PoolState>,
    available: Condvar,
    workers:   usize,
    spawned:   AtomicUsize,
    next_id:   AtomicU64
}

/// The shared pool, started lazily on first use
pub(crate) fn global_pool() -> &'static ThreadPool {
    static POOL: OnceLock<ThreadPool> = OnceLock::new();
    let pool = POOL.get_or_init(ThreadPool::new);
    pool.start_workers();
    pool
}

impl ThreadPool {
    fn new() -> ThreadPool {
        ThreadPool {
            state:     Mutex::new(PoolState {
                queue:   VecDeque::new(),
                running: HashMap::new()
            }),
            available: Condvar::new(),
            workers:   max_cores().saturating_sub(1).max(1),
            spawned:   AtomicUsize::new(0),
            next_id:   AtomicU64::new(0)
        }
    }

    fn start_workers(&'static self) {
        static STARTED: OnceLock<()> = OnceLock::new();
        STARTED.get_or_init(|| {
            for index in 0..self.workers {
                let spawned = std::thread::Builder::new()
                    .name(format!("trpx-worker-{index}"))
                    .spawn(move || self.worker_loop());
                match spawned {
                    Ok(_) => {
                        self.spawned.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => error!("could not spawn pool worker {index}: {err}")
                }
            }
        });
    }

    /// Hand out the next container id
    pub(crate) fn unique_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Queue a job, or give it back when it must run in the caller.
    ///
    /// Rejection happens when no worker thread exists, or when the
    /// submitter is not the oldest active owner while all workers are
    /// occupied; running the job in the caller then keeps nested jobs
    /// from waiting on a pool that cannot drain.
    pub(crate) fn submit(&self, owner: u64, cores: usize, job: Job) -> Result<(), Job> {
        if self.spawned.load(Ordering::SeqCst) == 0 {
            return Err(job);
        }
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(_) => return Err(job)
        };
        let oldest = state
            .running
            .keys()
            .copied()
            .chain(state.queue.iter().map(|queued| queued.owner))
            .min();
        if let Some(oldest) = oldest {
            let busy: usize = state.running.values().sum();
            if owner != oldest && busy >= self.workers {
                return Err(job);
            }
        }
        state.queue.push_back(QueuedJob { job, cores, owner });
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    fn worker_loop(&self) {
        loop {
            let (job, owner) = {
                let mut state = match self.state.lock() {
                    Ok(guard) => guard,
                    Err(_) => return
                };
                loop {
                    let eligible = state.queue.iter().position(|queued| {
                        state.running.get(&queued.owner).copied().unwrap_or(0) < queued.cores
                    });
                    if let Some(index) = eligible {
                        // remove() cannot fail, the index came from the scan
                        let Some(queued) = state.queue.remove(index) else {
                            continue;
                        };
                        *state.running.entry(queued.owner).or_insert(0) += 1;
                        break (queued.job, queued.owner);
                    }
                    state = match self.available.wait(state) {
                        Ok(guard) => guard,
                        Err(_) => return
                    };
                }
            };

            job();

            if let Ok(mut state) = self.state.lock() {
                if let Some(count) = state.running.get_mut(&owner) {
                    if *count <= 1 {
                        state.running.remove(&owner);
                    } else {
                        *count -= 1;
                    }
                }
            }
            self.available.notify_all();
        }
    }
}

/// A handle to a result that may still be computing.
///
/// The worker stores the outcome and wakes joiners; a panic inside the
/// closure is caught, logged and stored as the failure message.
#[derive(Debug)]
pub(crate) struct Task<R> {
    inner: std::sync::Arc<TaskState<R>>
}

#[derive(Debug)]
struct TaskState<R> {
    result: Mutex<Option<Result<R, String>>>,
    done:   Condvar
}

impl<R: Send + 'static> Task<R> {
    /// Run `work` under `dop`, in the pool when possible, in the caller
    /// otherwise.
    pub(crate) fn run<F>(dop: DegreeOfParallelism, owner: u64, work: F) -> Task<R>
    where
        F: FnOnce() -> R + Send + 'static
    {
        let task = Task {
            inner: std::sync::Arc::new(TaskState {
                result: Mutex::new(None),
                done:   Condvar::new()
            })
        };
        let state = task.inner.clone();
        let job = move || {
            let outcome = catch_unwind(AssertUnwindSafe(work)).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                error!("compression job for container {owner} failed: {message}");
                message
            });
            if let Ok(mut slot) = state.result.lock() {
                *slot = Some(outcome);
            }
            state.done.notify_all();
        };
        if dop.is_sequential() {
            job();
        } else if let Err(job) = global_pool().submit(owner, dop.cores(), Box::new(job)) {
            job();
        }
        task
    }

    /// Block until the result is available and take it
    pub(crate) fn join(self) -> Result<R, String> {
        let mut slot = match self.inner.result.lock() {
            Ok(guard) => guard,
            Err(_) => return Err("task state poisoned".into())
        };
        loop {
            if slot.is_some() {
                // the worker never reads the slot back
                return slot.take().unwrap_or(Err("task result vanished".into()));
            }
            slot = match self.inner.done.wait(slot) {
                Ok(guard) => guard,
                Err(_) => return Err("task state poisoned".into())
            };
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dop_is_clamped() {
        assert_eq!(DegreeOfParallelism::new(2.5).value(), 1.0);
        assert_eq!(DegreeOfParallelism::new(-1.0).value(), 0.0);
        assert!(DegreeOfParallelism::new(0.0).is_sequential());
        assert!(!DegreeOfParallelism::new(0.1).is_sequential());
    }

    #[test]
    fn core_budget_is_at_least_one() {
        assert!(DegreeOfParallelism::new(0.001).cores() >= 1);
        assert_eq!(DegreeOfParallelism::new(1.0).cores(), max_cores());
        assert!(DegreeOfParallelism::new(0.5).cores() <= max_cores());
    }

    #[test]
    fn tasks_deliver_results() {
        let task = Task::run(DegreeOfParallelism::new(1.0), u64::MAX, || 21 * 2);
        assert_eq!(task.join(), Ok(42));
    }

    #[test]
    fn sequential_tasks_run_in_caller() {
        let here = std::thread::current().id();
        let task = Task::run(DegreeOfParallelism::new(0.0), u64::MAX - 1, move || {
            std::thread::current().id() == here
        });
        assert_eq!(task.join(), Ok(true));
    }

    #[test]
    fn panics_are_captured() {
        let task: Task<()> = Task::run(DegreeOfParallelism::new(1.0), u64::MAX - 2, || {
            panic!("boom")
        });
        let failure = task.join().unwrap_err();
        assert!(failure.contains("boom"));
    }

    #[test]
    fn many_tasks_from_many_owners_complete() {
        let tasks: Vec<Task<u64>> = (0..64)
            .map(|i| {
                let owner = global_pool().unique_id();
                Task::run(DegreeOfParallelism::new(0.5), owner, move || i * i)
            })
            .collect();
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.join(), Ok((i as u64) * (i as u64)));
        }
    }
}

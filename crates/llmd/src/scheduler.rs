// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-class admission controller: an interactive reserve and a worker pool
//! share a bounded FIFO wait queue, drained by a single background task.
//!
//! `tokio::sync::Semaphore` can't express "release prefers pool A, falls
//! back to pool B" or a strict cross-class FIFO, so this is hand-rolled:
//! atomic counters per pool plus a queue of waiters woken by `Notify`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

/// Which pool a caller requested and, on success, which pool its slot came
/// from (interactive callers may fall back to the worker pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pool {
    Interactive,
    Worker,
}

struct Waiter {
    id: u64,
    interactive: bool,
    responder: oneshot::Sender<Option<Pool>>,
}

struct SchedulerInner {
    interactive_capacity: usize,
    worker_capacity: usize,
    queue_capacity: usize,
    active_interactive: AtomicUsize,
    active_worker: AtomicUsize,
    queued: AtomicUsize,
    processed: AtomicU64,
    rejected: AtomicU64,
    next_waiter_id: AtomicU64,
    queue: Mutex<VecDeque<Waiter>>,
    notify: Notify,
}

/// Live snapshot of scheduler counters, safe to read without blocking
/// acquirers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchedulerStats {
    pub active_interactive: usize,
    pub active_worker: usize,
    pub queued: usize,
    pub total_processed: u64,
    pub total_rejected: u64,
}

/// A held slot. Released exactly once even if `release()` is called more
/// than once or the guard is dropped without an explicit release.
pub struct SlotGuard {
    scheduler: Arc<SchedulerInner>,
    pool: Pool,
    released: AtomicBool,
}

impl SlotGuard {
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduler.release(self.pool);
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Two-pool admission controller with a bounded FIFO wait queue.
#[derive(Clone)]
pub struct Scheduler(Arc<SchedulerInner>);

impl Scheduler {
    /// `max_concurrent` is `M`, `interactive_reserve` is `R`
    /// (`0 <= R <= M`), `queue_size` is the bounded wait queue capacity.
    /// Non-positive inputs fall back to the spec defaults `M=2, R=1,
    /// Q=64`.
    pub fn new(max_concurrent: usize, interactive_reserve: usize, queue_size: usize) -> Self {
        let max_concurrent = if max_concurrent >= 1 { max_concurrent } else { 2 };
        let interactive_reserve = if interactive_reserve <= max_concurrent { interactive_reserve } else { 1 };
        let queue_size = if queue_size >= 1 { queue_size } else { 64 };

        let inner = Arc::new(SchedulerInner {
            interactive_capacity: interactive_reserve,
            worker_capacity: max_concurrent - interactive_reserve,
            queue_capacity: queue_size,
            active_interactive: AtomicUsize::new(0),
            active_worker: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            next_waiter_id: AtomicU64::new(0),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        });
        Self(inner)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            active_interactive: self.0.active_interactive.load(Ordering::Relaxed),
            active_worker: self.0.active_worker.load(Ordering::Relaxed),
            queued: self.0.queued.load(Ordering::Relaxed),
            total_processed: self.0.processed.load(Ordering::Relaxed),
            total_rejected: self.0.rejected.load(Ordering::Relaxed),
        }
    }

    /// Try to take a slot immediately, without enqueueing. Interactive
    /// callers try the interactive pool first, then the worker pool.
    fn try_acquire_immediate(&self, interactive: bool) -> Option<Pool> {
        if interactive
            && self
                .0
                .active_interactive
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < self.0.interactive_capacity).then_some(n + 1)
                })
                .is_ok()
        {
            return Some(Pool::Interactive);
        }
        if self
            .0
            .active_worker
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.0.worker_capacity).then_some(n + 1)
            })
            .is_ok()
        {
            return Some(Pool::Worker);
        }
        None
    }

    /// Acquire a slot, suspending on a bounded FIFO queue if none is
    /// immediately available. Cancelling `cancel` while queued dequeues the
    /// caller and returns `None`.
    pub async fn acquire(&self, interactive: bool, cancel: &tokio_util::sync::CancellationToken) -> Result<SlotGuard, crate::error::AppError> {
        if let Some(pool) = self.try_acquire_immediate(interactive) {
            return Ok(SlotGuard { scheduler: Arc::clone(&self.0), pool, released: AtomicBool::new(false) });
        }

        let queued_now = self
            .0
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.0.queue_capacity).then_some(n + 1)
            });
        if queued_now.is_err() {
            self.0.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(crate::error::AppError::QueueFull);
        }

        let waiter_id = self.0.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = oneshot::channel();
        self.0.queue.lock().push_back(Waiter { id: waiter_id, interactive, responder: tx });
        self.0.notify.notify_one();

        tokio::select! {
            result = &mut rx => {
                self.0.queued.fetch_sub(1, Ordering::AcqRel);
                match result {
                    Ok(Some(pool)) => Ok(SlotGuard { scheduler: Arc::clone(&self.0), pool, released: AtomicBool::new(false) }),
                    _ => Err(crate::error::AppError::Internal),
                }
            }
            _ = cancel.cancelled() => {
                self.0.queued.fetch_sub(1, Ordering::AcqRel);

                // `drain` and this cancellation both serialize on `queue`'s
                // lock. If our waiter is still there, remove it before it can
                // ever be granted a slot. If it's gone, `drain` already
                // popped it (and may have sent a grant) before we got the
                // lock — reclaim that slot via `try_recv` instead of leaking
                // the capacity it was given.
                let still_queued = {
                    let mut queue = self.0.queue.lock();
                    let before = queue.len();
                    queue.retain(|w| w.id != waiter_id);
                    queue.len() != before
                };
                if !still_queued {
                    if let Ok(Some(pool)) = rx.try_recv() {
                        SlotGuard { scheduler: Arc::clone(&self.0), pool, released: AtomicBool::new(false) }.release();
                    }
                }
                Err(crate::error::AppError::Internal)
            }
        }
    }

    /// Spawn the single background task that drains the wait queue whenever
    /// a slot frees up or a new waiter enqueues. Must be called once at
    /// startup.
    pub fn spawn_drain_task(&self, shutdown: tokio_util::sync::CancellationToken) {
        let inner = Arc::clone(&self.0);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = inner.notify.notified() => {}
                }
                drain(&inner);
            }
        });
    }
}

impl SchedulerInner {
    fn release(&self, pool: Pool) {
        match pool {
            Pool::Interactive => {
                self.active_interactive.fetch_sub(1, Ordering::AcqRel);
            }
            Pool::Worker => {
                self.active_worker.fetch_sub(1, Ordering::AcqRel);
            }
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }
}

/// Serve the FIFO queue in order, stopping at the first waiter that cannot
/// yet be served (preserving strict FIFO rather than skipping ahead).
fn drain(inner: &SchedulerInner) {
    let mut queue = inner.queue.lock();
    while let Some(front) = queue.front() {
        // A waiter whose receiver has already been dropped (cancelled, or
        // the caller's future was dropped outright on client disconnect)
        // can never collect a grant; skip it without spending a slot.
        if front.responder.is_closed() {
            queue.pop_front();
            continue;
        }
        let pool = if front.interactive {
            try_take(inner, Pool::Interactive).or_else(|| try_take(inner, Pool::Worker))
        } else {
            try_take(inner, Pool::Worker)
        };
        match pool {
            Some(pool) => {
                if let Some(waiter) = queue.pop_front() {
                    let _ = waiter.responder.send(Some(pool));
                }
            }
            None => break,
        }
    }
}

fn try_take(inner: &SchedulerInner, pool: Pool) -> Option<Pool> {
    match pool {
        Pool::Interactive => inner
            .active_interactive
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < inner.interactive_capacity).then_some(n + 1)
            })
            .ok()
            .map(|_| Pool::Interactive),
        Pool::Worker => inner
            .active_worker
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < inner.worker_capacity).then_some(n + 1)
            })
            .ok()
            .map(|_| Pool::Worker),
    }
}

//! Bounded, priority-ordered violation queue.
//!
//! Jobs are totally ordered by `(priority, enqueued_at)` through the single
//! comparator in [`types::job_order`]. `enqueue` fails immediately at
//! capacity; that failure is the pipeline's backpressure signal. Statistics
//! are maintained incrementally inside the same short critical section as the
//! mutation they describe, never recomputed from queue contents.

mod types;

pub use types::{
    DropReason, Priority, PriorityCounts, QueuedJob, QueueError, QueueSnapshot, QueueStats,
    RequeueOutcome,
};

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use types::job_order;

/// Heap adapter: `BinaryHeap` is a max-heap, so reverse the comparator to
/// pop the most urgent job first.
struct HeapEntry(QueuedJob);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        job_order(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        job_order(&self.0, &other.0).reverse()
    }
}

struct Inner {
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
    stats: QueueStats,
}

/// Bounded priority queue of pending enrichment jobs.
pub struct ViolationQueue {
    capacity: usize,
    max_retries: u32,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl ViolationQueue {
    pub fn new(capacity: usize, max_retries: u32) -> Self {
        Self {
            capacity,
            max_retries,
            inner: Mutex::new(Inner {
                heap: BinaryHeap::with_capacity(capacity),
                next_seq: 0,
                stats: QueueStats::default(),
            }),
            notify: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit a job.
    ///
    /// Fails immediately at capacity, with no blocking and no partial
    /// mutation (beyond counting the rejection).
    pub async fn enqueue(&self, mut job: QueuedJob) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.heap.len() >= self.capacity {
            inner.stats.rejected += 1;
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }

        job.seq = inner.next_seq;
        inner.next_seq += 1;

        inner.stats.enqueued += 1;
        inner.stats.per_priority.bump(job.priority);
        *inner
            .stats
            .per_device
            .entry(job.device_id.clone())
            .or_insert(0) += 1;

        inner.heap.push(HeapEntry(job));
        drop(inner);

        self.notify.notify_one();
        Ok(())
    }

    /// Take the highest-priority, earliest job, waiting up to `timeout`.
    pub async fn dequeue(&self, timeout: Duration) -> Option<QueuedJob> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register for a wakeup before checking, so an enqueue between
            // the check and the wait is not missed.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(entry) = inner.heap.pop() {
                    return Some(entry.0);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Take up to `max` jobs, waiting up to `timeout` for the first one.
    /// The remainder are whatever is immediately available.
    pub async fn dequeue_batch(&self, max: usize, timeout: Duration) -> Vec<QueuedJob> {
        if max == 0 {
            return Vec::new();
        }
        let Some(first) = self.dequeue(timeout).await else {
            return Vec::new();
        };

        let mut batch = vec![first];
        let mut inner = self.inner.lock().await;
        while batch.len() < max {
            match inner.heap.pop() {
                Some(entry) => batch.push(entry.0),
                None => break,
            }
        }
        batch
    }

    /// Re-admit a job after a failed processing attempt.
    ///
    /// Increments the retry count; once it reaches the retry limit the job is
    /// permanently dropped and counted as failed; the caller is responsible
    /// for reporting the terminal state to persistence. Otherwise the job is
    /// demoted one priority tier and re-enqueued with a fresh admission time.
    /// A full queue at requeue time also drops the job permanently: capacity
    /// is never exceeded.
    pub async fn requeue(&self, mut job: QueuedJob) -> RequeueOutcome {
        job.retry_count += 1;

        let mut inner = self.inner.lock().await;
        if job.retry_count >= self.max_retries {
            debug!(
                "Job {} dropped after {} attempts",
                job.report_id, job.retry_count
            );
            inner.stats.failed += 1;
            return RequeueOutcome::Dropped {
                reason: DropReason::RetriesExhausted,
            };
        }
        if inner.heap.len() >= self.capacity {
            debug!("Job {} dropped on requeue: queue full", job.report_id);
            inner.stats.failed += 1;
            return RequeueOutcome::Dropped {
                reason: DropReason::QueueFull,
            };
        }

        job.priority = job.priority.demoted();
        job.enqueued_at = Utc::now();
        job.seq = inner.next_seq;
        inner.next_seq += 1;
        inner.stats.retried += 1;

        let priority = job.priority;
        inner.heap.push(HeapEntry(job));
        drop(inner);

        self.notify.notify_one();
        RequeueOutcome::Requeued { priority }
    }

    /// Record a successfully processed job.
    pub async fn mark_processed(&self, _job: &QueuedJob) {
        let mut inner = self.inner.lock().await;
        inner.stats.processed += 1;
    }

    /// Record a job that failed terminally outside the requeue path.
    pub async fn mark_failed(&self, _job: &QueuedJob) {
        let mut inner = self.inner.lock().await;
        inner.stats.failed += 1;
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> QueueStats {
        self.inner.lock().await.stats.clone()
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock().await;
        QueueSnapshot {
            size: inner.heap.len(),
            capacity: self.capacity,
            stats: inner.stats.clone(),
        }
    }
}

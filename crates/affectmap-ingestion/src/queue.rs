//! Shared analysis work queue with watermark backpressure.
//!
//! Context preparers append per-paper tasks; analysis workers advance an
//! atomic cursor over the task list (non-destructive dequeue, so tasks stay
//! inspectable for diagnostics). Producers suspend on a `Notify` once the
//! outstanding (enqueued-but-not-completed) count hits the high watermark and
//! resume when it drains to the low watermark; workers park on a second
//! `Notify` while the cursor catches up with the tail. FIFO holds within one
//! researcher's tasks; there is no cross-researcher ordering.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::models::Work;

/// Producers pause at `workers × HIGH_WATERMARK_FACTOR` outstanding tasks…
pub const HIGH_WATERMARK_FACTOR: usize = 12;
/// …and resume once outstanding drops to `workers × LOW_WATERMARK_FACTOR`.
pub const LOW_WATERMARK_FACTOR: usize = 6;

/// One per-paper analysis task.
#[derive(Debug, Clone)]
pub struct Task {
    pub researcher_key: String,
    pub work: Work,
}

struct QueueState {
    tasks: Vec<Task>,
    /// Enqueued but not yet completed.
    outstanding: usize,
    /// Watermark hysteresis: once paused, producers stay paused until the
    /// low watermark, not merely below the high one.
    paused: bool,
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    cursor: AtomicUsize,
    low_watermark: usize,
    high_watermark: usize,
    closed: AtomicBool,
    producer_gate: Notify,
    task_available: Notify,
}

impl WorkQueue {
    pub fn new(worker_concurrency: usize) -> Self {
        let workers = worker_concurrency.max(1);
        Self {
            state: Mutex::new(QueueState { tasks: Vec::new(), outstanding: 0, paused: false }),
            cursor: AtomicUsize::new(0),
            low_watermark: workers * LOW_WATERMARK_FACTOR,
            high_watermark: workers * HIGH_WATERMARK_FACTOR,
            closed: AtomicBool::new(false),
            producer_gate: Notify::new(),
            task_available: Notify::new(),
        }
    }

    /// Append one task, first waiting until the queue is below the high
    /// watermark (or, after a pause, back down to the low watermark).
    pub async fn push(&self, task: Task) {
        let mut task = Some(task);
        loop {
            if self.try_push(&mut task) {
                return;
            }
            let notified = self.producer_gate.notified();
            // Re-check after registering: a completion may have raced in
            // between the failed attempt and the wait.
            if self.try_push(&mut task) {
                return;
            }
            notified.await;
        }
    }

    fn try_push(&self, task: &mut Option<Task>) -> bool {
        let mut state = self.state.lock().expect("queue poisoned");
        let gate = if state.paused { self.low_watermark } else { self.high_watermark };
        if state.outstanding < gate {
            state.paused = false;
            state.outstanding += 1;
            state.tasks.push(task.take().expect("task already consumed"));
            drop(state);
            self.task_available.notify_waiters();
            true
        } else {
            state.paused = true;
            false
        }
    }

    /// Next pending task, or `None` once the queue is closed and drained.
    /// The cursor only moves forward; completed tasks remain in the list.
    pub async fn next_task(&self) -> Option<Task> {
        loop {
            let pending = {
                let state = self.state.lock().expect("queue poisoned");
                state.tasks.len()
            };
            let idx = self.cursor.load(Ordering::SeqCst);
            if idx < pending {
                // Claim the slot; on a lost race, loop and retry.
                if self
                    .cursor
                    .compare_exchange(idx, idx + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    let state = self.state.lock().expect("queue poisoned");
                    return Some(state.tasks[idx].clone());
                }
                continue;
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            let notified = self.task_available.notified();
            // Re-check after registering: a push or close may have raced in.
            let (len, closed) = {
                let state = self.state.lock().expect("queue poisoned");
                (state.tasks.len(), self.closed.load(Ordering::SeqCst))
            };
            if self.cursor.load(Ordering::SeqCst) < len {
                continue;
            }
            if closed {
                return None;
            }
            notified.await;
        }
    }

    /// Mark one task complete, releasing producers if the backlog has
    /// drained to the low watermark.
    pub fn task_done(&self) {
        let release = {
            let mut state = self.state.lock().expect("queue poisoned");
            state.outstanding = state.outstanding.saturating_sub(1);
            if state.paused && state.outstanding <= self.low_watermark {
                state.paused = false;
                true
            } else {
                !state.paused
            }
        };
        if release {
            self.producer_gate.notify_waiters();
        }
    }

    /// No further pushes; wakes idle workers so they can exit.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.task_available.notify_waiters();
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().expect("queue poisoned").outstanding
    }

    pub fn total_enqueued(&self) -> usize {
        self.state.lock().expect("queue poisoned").tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VenueType;
    use std::sync::Arc;
    use std::time::Duration;

    fn task(n: usize) -> Task {
        Task {
            researcher_key: "A1".to_string(),
            work: Work {
                id: format!("W{n}"),
                title: format!("Paper {n}"),
                publication_date: None,
                publication_year: None,
                venue: None,
                venue_type: VenueType::Other,
                cited_by_count: 0,
                doc_type: None,
                is_preprint: false,
                concepts: Vec::new(),
                abstract_text: None,
                analysis: None,
            },
        }
    }

    #[tokio::test]
    async fn test_fifo_within_researcher() {
        let q = WorkQueue::new(4);
        for i in 0..5 {
            q.push(task(i)).await;
        }
        for i in 0..5 {
            let t = q.next_task().await.unwrap();
            assert_eq!(t.work.id, format!("W{i}"));
            q.task_done();
        }
        q.close();
        assert!(q.next_task().await.is_none());
    }

    #[tokio::test]
    async fn test_producer_stalls_at_high_watermark_and_resumes_at_low() {
        // 1 worker → low = 6, high = 12.
        let q = Arc::new(WorkQueue::new(1));

        for i in 0..12 {
            q.push(task(i)).await;
        }
        assert_eq!(q.outstanding(), 12);

        // The 13th push must block.
        let q2 = q.clone();
        let blocked = tokio::spawn(async move { q2.push(task(12)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished(), "push should stall at the high watermark");

        // Draining to just above the low watermark is not enough.
        for _ in 0..5 {
            q.next_task().await.unwrap();
            q.task_done();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished(), "push should stay stalled above the low watermark");

        // One more completion reaches the low watermark and releases it.
        q.next_task().await.unwrap();
        q.task_done();
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("push should resume at the low watermark")
            .unwrap();
        assert_eq!(q.total_enqueued(), 13);
    }

    #[tokio::test]
    async fn test_workers_drain_concurrently() {
        let q = Arc::new(WorkQueue::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                let mut n = 0usize;
                while let Some(_t) = q.next_task().await {
                    q.task_done();
                    n += 1;
                }
                n
            }));
        }

        for i in 0..40 {
            q.push(task(i)).await;
        }
        q.close();

        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 40);
        assert_eq!(q.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_close_wakes_idle_worker() {
        let q = Arc::new(WorkQueue::new(1));
        let q2 = q.clone();
        let worker = tokio::spawn(async move { q2.next_task().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        let got = tokio::time::timeout(Duration::from_secs(1), worker).await.unwrap().unwrap();
        assert!(got.is_none());
    }
}

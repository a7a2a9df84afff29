//! Bounded FIFO worker pool with a pause gate.
//!
//! Tasks are pulled in submission order by a fixed number of worker tasks.
//! While the queue is paused no worker starts a new task, including one it
//! has already dequeued; tasks that are running keep running. Each task is
//! handed its own [`TaskHandle`]; a task cancelled before it starts is
//! dropped without running.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A unit of work waiting in the queue.
struct QueuedTask {
    id: u64,
    cancel: CancellationToken,
    run: BoxTask,
    /// Fires the handle's `done` token when the task is dropped, whether it
    /// ran, was skipped, or was discarded at shutdown.
    _done: DropGuard,
}

/// Handle to a submitted task: a cancellation flag plus a way to await the
/// task leaving the queue.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl TaskHandle {
    /// Queue-unique id of the task.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Request cancellation. A task that has not started will never run; a
    /// running task sees the flag at its own checkpoints.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// True once the task has run to completion or been discarded.
    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Wait until the task has run to completion or been discarded.
    pub async fn finished(&self) {
        self.done.cancelled().await;
    }
}

/// A fixed-size pool of workers draining a FIFO queue.
pub struct FetchQueue {
    job_tx: async_channel::Sender<QueuedTask>,
    paused: watch::Sender<bool>,
    next_id: AtomicU64,
    pool_handle: JoinHandle<()>,
}

impl FetchQueue {
    /// Create a queue served by `num_workers` workers (at least one).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(num_workers: usize) -> Self {
        let (job_tx, job_rx) = async_channel::unbounded::<QueuedTask>();
        let (paused, gate) = watch::channel(false);
        let num_workers = num_workers.max(1);

        let pool_handle = tokio::spawn(async move {
            let mut worker_handles = Vec::with_capacity(num_workers);
            for worker in 0..num_workers {
                worker_handles.push(tokio::spawn(worker_loop(
                    worker,
                    job_rx.clone(),
                    gate.clone(),
                )));
            }

            // Drop our clones so the workers are the last holders
            drop(job_rx);
            drop(gate);

            for h in worker_handles {
                let _ = h.await;
            }
        });

        Self {
            job_tx,
            paused,
            next_id: AtomicU64::new(1),
            pool_handle,
        }
    }

    /// Submit a task. `task` receives a clone of the task's own handle and
    /// returns the future to run.
    pub fn enqueue<F, Fut>(&self, task: F) -> TaskHandle
    where
        F: FnOnce(TaskHandle) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = TaskHandle {
            id,
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
        };

        let queued = QueuedTask {
            id,
            cancel: handle.cancel.clone(),
            run: Box::pin(task(handle.clone())),
            _done: handle.done.clone().drop_guard(),
        };

        // Unbounded, so this only fails once the queue is closed; the task
        // is dropped and its handle reports finished.
        if self.job_tx.try_send(queued).is_err() {
            tracing::warn!(task = id, "queue closed, task discarded");
        }

        handle
    }

    /// Stop dispatching queued tasks. Running tasks are unaffected.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Resume dispatching queued tasks.
    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Number of tasks waiting to be picked up by a worker.
    pub fn queued(&self) -> usize {
        self.job_tx.len()
    }

    /// Close the queue, let workers drain it, and wait for them to exit.
    ///
    /// Pausing is lifted so the remaining tasks can be dispatched; cancel
    /// them first to have them skipped.
    pub async fn shutdown(self) {
        self.job_tx.close();
        self.paused.send_replace(false);
        let _ = self.pool_handle.await;
    }
}

/// Block until the gate is open. Returns false if the queue is gone.
async fn wait_until_running(gate: &mut watch::Receiver<bool>) -> bool {
    gate.wait_for(|paused| !*paused).await.is_ok()
}

async fn worker_loop(
    worker: usize,
    rx: async_channel::Receiver<QueuedTask>,
    mut gate: watch::Receiver<bool>,
) {
    loop {
        if !wait_until_running(&mut gate).await {
            break;
        }
        let Ok(task) = rx.recv().await else {
            break;
        };
        // Paused while we were waiting for work: hold the task until resumed.
        if !wait_until_running(&mut gate).await {
            break;
        }

        if task.cancel.is_cancelled() {
            tracing::trace!(worker, task = task.id, "skipping: cancelled before start");
            continue;
        }

        let id = task.id;
        tracing::trace!(worker, task = id, "task started");
        // A panicking task must not take the worker down.
        match tokio::spawn(task.run).await {
            Ok(()) => tracing::trace!(worker, task = id, "task finished"),
            Err(e) => tracing::warn!(worker, task = id, error = %e, "task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn runs_in_submission_order() {
        let queue = FetchQueue::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<TaskHandle> = (0..5)
            .map(|i| {
                let order = order.clone();
                queue.enqueue(move |_| async move {
                    order.lock().unwrap().push(i);
                })
            })
            .collect();

        for h in &handles {
            h.finished().await;
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_worker_count() {
        let queue = FetchQueue::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<TaskHandle> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                queue.enqueue(move |_| async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in &handles {
            h.finished().await;
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn paused_queue_holds_tasks_until_resume() {
        let queue = FetchQueue::new(1);
        queue.pause();
        assert!(queue.is_paused());

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let handle = queue.enqueue(move |_| async move {
            flag.store(true, Ordering::SeqCst);
        });

        settle().await;
        assert!(!ran.load(Ordering::SeqCst));
        assert!(!handle.is_finished());

        queue.resume();
        handle.finished().await;
        assert!(ran.load(Ordering::SeqCst));
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pause_does_not_interrupt_running_task() {
        let queue = FetchQueue::new(1);
        let release = Arc::new(tokio::sync::Notify::new());
        let started = Arc::new(AtomicBool::new(false));

        let (r, s) = (release.clone(), started.clone());
        let running = queue.enqueue(move |_| async move {
            s.store(true, Ordering::SeqCst);
            r.notified().await;
        });
        let ran_second = Arc::new(AtomicBool::new(false));
        let flag = ran_second.clone();
        let second = queue.enqueue(move |_| async move {
            flag.store(true, Ordering::SeqCst);
        });

        settle().await;
        assert!(started.load(Ordering::SeqCst));
        queue.pause();
        release.notify_one();
        running.finished().await;

        settle().await;
        assert!(!ran_second.load(Ordering::SeqCst));
        queue.resume();
        second.finished().await;
        assert!(ran_second.load(Ordering::SeqCst));
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_never_runs() {
        let queue = FetchQueue::new(1);
        queue.pause();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let handle = queue.enqueue(move |_| async move {
            flag.store(true, Ordering::SeqCst);
        });
        handle.cancel();
        assert!(handle.is_cancelled());

        queue.resume();
        handle.finished().await;
        assert!(!ran.load(Ordering::SeqCst));
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn task_sees_its_own_cancellation() {
        let queue = FetchQueue::new(1);
        let observed = Arc::new(AtomicBool::new(false));
        let flag = observed.clone();
        let handle = queue.enqueue(move |task| async move {
            task.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });

        settle().await;
        handle.cancel();
        handle.finished().await;
        assert!(observed.load(Ordering::SeqCst));
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn worker_survives_a_panicking_task() {
        let queue = FetchQueue::new(1);
        let failing = queue.enqueue(|_| async {
            panic!("task blew up");
        });
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let next = queue.enqueue(move |_| async move {
            flag.store(true, Ordering::SeqCst);
        });

        failing.finished().await;
        next.finished().await;
        assert!(ran.load(Ordering::SeqCst));
        queue.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_queued_tasks() {
        let queue = FetchQueue::new(1);
        let count = Arc::new(AtomicUsize::new(0));
        queue.pause();
        for _ in 0..3 {
            let count = count.clone();
            queue.enqueue(move |_| async move {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(queue.queued(), 3);

        queue.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}

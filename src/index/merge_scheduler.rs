//! Merge schedulers: bounded execution of selected merges.
//!
//! The policy decides *what* to merge; a scheduler decides *when and where*
//! it runs. [`ConcurrentMergeScheduler`] executes merges on a bounded pool
//! of worker threads, queueing excess work in submission order.
//! [`SerialMergeScheduler`] runs each merge inline on the submitting thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::{Condvar, Mutex};

use crate::error::{Result, XystonError};
use crate::index::merge::CancelFlag;

/// A unit of merge work. The closure receives the scheduler's cancellation
/// flag and must handle its own errors (the writer records failures).
pub type MergeTask = Box<dyn FnOnce(&CancelFlag) + Send + 'static>;

/// Executes merge tasks.
pub trait MergeScheduler: Send + Sync + std::fmt::Debug {
    /// Submit a task. Tasks beyond the concurrency cap queue in submission
    /// order.
    fn schedule(&self, task: MergeTask) -> Result<()>;

    /// Block until every submitted task has finished.
    fn wait_for_idle(&self);

    /// Shut down. In-flight tasks observe the cancellation flag and abort
    /// cleanly at their next stream boundary; queued tasks are discarded.
    fn close(&self);
}

/// Runs each merge inline on the thread that submits it.
#[derive(Debug, Clone, Default)]
pub struct SerialMergeScheduler;

impl SerialMergeScheduler {
    /// Create a serial scheduler.
    pub fn new() -> Self {
        Self
    }
}

impl MergeScheduler for SerialMergeScheduler {
    fn schedule(&self, task: MergeTask) -> Result<()> {
        task(&CancelFlag::new());
        Ok(())
    }

    fn wait_for_idle(&self) {}

    fn close(&self) {}
}

/// Configuration for the concurrent scheduler.
#[derive(Debug, Clone)]
pub struct ConcurrentSchedulerConfig {
    /// Maximum number of merges executing simultaneously.
    pub max_concurrent_merges: usize,
}

impl Default for ConcurrentSchedulerConfig {
    fn default() -> Self {
        ConcurrentSchedulerConfig {
            max_concurrent_merges: num_cpus::get().clamp(1, 4),
        }
    }
}

/// Executes merges on a bounded pool of worker threads.
#[derive(Debug)]
pub struct ConcurrentMergeScheduler {
    task_sender: Sender<MergeTask>,
    task_receiver: Receiver<MergeTask>,
    running: Arc<AtomicBool>,
    cancel: CancelFlag,
    pending: Arc<(Mutex<usize>, Condvar)>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ConcurrentMergeScheduler {
    /// Create and start a scheduler with the given configuration.
    pub fn new(config: ConcurrentSchedulerConfig) -> Self {
        let (task_sender, task_receiver) = unbounded::<MergeTask>();
        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancelFlag::new();
        let pending = Arc::new((Mutex::new(0usize), Condvar::new()));

        let scheduler = ConcurrentMergeScheduler {
            task_sender,
            task_receiver,
            running,
            cancel,
            pending,
            workers: Mutex::new(Vec::new()),
        };

        let mut workers = scheduler.workers.lock();
        for worker_id in 0..config.max_concurrent_merges.max(1) {
            workers.push(scheduler.spawn_worker(worker_id));
        }
        drop(workers);

        scheduler
    }

    /// Create a scheduler with the default concurrency cap.
    pub fn new_default() -> Self {
        Self::new(ConcurrentSchedulerConfig::default())
    }

    fn spawn_worker(&self, worker_id: usize) -> thread::JoinHandle<()> {
        let receiver = self.task_receiver.clone();
        let running = Arc::clone(&self.running);
        let cancel = self.cancel.clone();
        let pending = Arc::clone(&self.pending);

        thread::Builder::new()
            .name(format!("xyston-merge-{worker_id}"))
            .spawn(move || {
                loop {
                    match receiver.recv_timeout(Duration::from_millis(100)) {
                        Ok(task) => {
                            task(&cancel);
                            let (lock, condvar) = &*pending;
                            let mut count = lock.lock();
                            *count -= 1;
                            condvar.notify_all();
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if !running.load(Ordering::Acquire) {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("failed to spawn merge worker")
    }

    /// Number of tasks queued or executing.
    pub fn pending_tasks(&self) -> usize {
        *self.pending.0.lock()
    }
}

impl MergeScheduler for ConcurrentMergeScheduler {
    fn schedule(&self, task: MergeTask) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(XystonError::index("Merge scheduler is closed"));
        }

        {
            let (lock, _) = &*self.pending;
            *lock.lock() += 1;
        }

        self.task_sender.send(task).map_err(|_| {
            let (lock, _) = &*self.pending;
            *lock.lock() -= 1;
            XystonError::index("Merge scheduler is closed")
        })
    }

    fn wait_for_idle(&self) {
        let (lock, condvar) = &*self.pending;
        let mut count = lock.lock();
        while *count > 0 {
            condvar.wait(&mut count);
        }
    }

    fn close(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        // In-flight merges see the flag at their next stream boundary and
        // abort without publishing anything.
        self.cancel.cancel();

        // Discard queued tasks so workers can drain and exit.
        {
            let (lock, condvar) = &*self.pending;
            while self.task_receiver.try_recv().is_ok() {
                let mut count = lock.lock();
                *count -= 1;
                condvar.notify_all();
            }
        }

        let mut workers = self.workers.lock();
        while let Some(worker) = workers.pop() {
            let _ = worker.join();
        }
    }
}

impl Drop for ConcurrentMergeScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_serial_scheduler_runs_inline() {
        let scheduler = SerialMergeScheduler::new();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        scheduler
            .schedule(Box::new(move |_| flag.store(true, Ordering::SeqCst)))
            .unwrap();

        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_concurrent_scheduler_executes_all() {
        let scheduler = ConcurrentMergeScheduler::new(ConcurrentSchedulerConfig {
            max_concurrent_merges: 2,
        });
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            scheduler
                .schedule(Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        scheduler.wait_for_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
        scheduler.close();
    }

    #[test]
    fn test_schedule_after_close_fails() {
        let scheduler = ConcurrentMergeScheduler::new_default();
        scheduler.close();

        assert!(scheduler.schedule(Box::new(|_| {})).is_err());
    }

    #[test]
    fn test_close_cancels_in_flight_tasks() {
        let scheduler = ConcurrentMergeScheduler::new(ConcurrentSchedulerConfig {
            max_concurrent_merges: 1,
        });
        let observed_cancel = Arc::new(AtomicBool::new(false));

        let started = Arc::new((Mutex::new(false), Condvar::new()));
        {
            let started = Arc::clone(&started);
            let observed = Arc::clone(&observed_cancel);
            scheduler
                .schedule(Box::new(move |cancel| {
                    {
                        let (lock, condvar) = &*started;
                        *lock.lock() = true;
                        condvar.notify_all();
                    }
                    // Simulate a merge polling its cancellation flag at
                    // stream boundaries.
                    for _ in 0..200 {
                        if cancel.is_cancelled() {
                            observed.store(true, Ordering::SeqCst);
                            return;
                        }
                        thread::sleep(Duration::from_millis(5));
                    }
                }))
                .unwrap();
        }

        // Wait until the task is running, then close.
        {
            let (lock, condvar) = &*started;
            let mut flag = lock.lock();
            while !*flag {
                condvar.wait(&mut flag);
            }
        }
        scheduler.close();

        assert!(observed_cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_for_idle_with_no_tasks() {
        let scheduler = ConcurrentMergeScheduler::new_default();
        scheduler.wait_for_idle();
        scheduler.close();
    }
}

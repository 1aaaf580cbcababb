//! One-shot and periodic task queues, plus the clock they are measured with.
//!
//! One-shot tasks are drained with swap-and-run: the queue is emptied under
//! its lock and the tasks run afterwards, so a task posting another task
//! defers it to the next cycle. Periodic tasks run under their own lock for
//! the whole batch.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::logging::targets;

/// Source of time in microseconds.
pub trait Clock: Send + Sync {
    /// Current time in microseconds. Must not go backwards.
    fn now_us(&self) -> i64;
}

/// Wall clock anchored at the Unix epoch, advanced monotonically.
#[derive(Debug)]
pub struct SystemClock {
    origin_us: i64,
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let origin_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Self {
            origin_us,
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> i64 {
        self.origin_us + self.start.elapsed().as_micros() as i64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_us: i64) -> Self {
        Self {
            now: AtomicI64::new(start_us),
        }
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now.fetch_add(ms * 1000, Ordering::SeqCst);
    }

    pub fn set_us(&self, us: i64) {
        self.now.store(us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A unique identifier for a one-shot task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Get the raw u64 value of this task ID.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Global counter for generating unique task IDs.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

struct TaskData {
    id: TaskId,
    task: BoxedTask,
}

/// Queue of one-shot tasks.
#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<TaskData>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task. It runs on the next [`run_all`](Self::run_all).
    pub fn post<F>(&self, task: F) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = next_task_id();
        self.tasks.lock().push_back(TaskData {
            id,
            task: Box::new(task),
        });
        id
    }

    /// Cancel a pending task. Returns `true` if it was still queued.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.iter().position(|t| t.id == id) {
            Some(pos) => {
                tasks.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run every task queued so far, outside the lock.
    ///
    /// Returns the number of tasks executed.
    pub fn run_all(&self) -> usize {
        let batch = std::mem::take(&mut *self.tasks.lock());
        let count = batch.len();
        for data in batch {
            (data.task)();
        }
        count
    }
}

type BoxedPeriodicTask = Box<dyn FnMut() + Send + 'static>;

struct PeriodicTask {
    task: BoxedPeriodicTask,
    period_ms: u32,
    last_run_us: i64,
}

/// Named tasks that run repeatedly, optionally rate-limited by a period.
#[derive(Default)]
pub struct PeriodicTasks {
    tasks: Mutex<BTreeMap<String, PeriodicTask>>,
}

impl PeriodicTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a named task running at most every `period_ms`
    /// milliseconds, or on every cycle when `period_ms` is 0.
    ///
    /// Fails when called while the tasks are running, including from inside
    /// a periodic task.
    pub fn add<F>(&self, name: &str, period_ms: u32, task: F) -> bool
    where
        F: FnMut() + Send + 'static,
    {
        let Some(mut tasks) = self.tasks.try_lock() else {
            return false;
        };
        tasks.insert(
            name.to_owned(),
            PeriodicTask {
                task: Box::new(task),
                period_ms,
                last_run_us: i64::MIN,
            },
        );
        true
    }

    /// Remove a named task. Fails while the tasks are running.
    pub fn remove(&self, name: &str) -> bool {
        match self.tasks.try_lock() {
            Some(mut tasks) => tasks.remove(name).is_some(),
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.try_lock().is_some_and(|tasks| tasks.contains_key(name))
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every task whose period has elapsed. Returns how many ran.
    pub fn run_due(&self, clock: &dyn Clock) -> usize {
        let mut tasks = self.tasks.lock();
        let now = clock.now_us();
        let mut count = 0;
        for (name, periodic) in tasks.iter_mut() {
            let due = periodic.period_ms == 0
                || periodic.last_run_us == i64::MIN
                || now - periodic.last_run_us > i64::from(periodic.period_ms) * 1000;
            if due {
                tracing::trace!(target: targets::TASK, task = %name, "running periodic task");
                periodic.last_run_us = now;
                (periodic.task)();
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_task_queue_run_all() {
        let queue = TaskQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = counter.clone();
            queue.post(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(queue.pending_count(), 3);
        assert_eq!(queue.run_all(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(queue.run_all(), 0);
    }

    #[test]
    fn test_task_queue_cancel() {
        let queue = TaskQueue::new();
        let id = queue.post(|| panic!("cancelled task ran"));
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert_eq!(queue.run_all(), 0);
    }

    #[test]
    fn test_task_ids_are_unique() {
        let queue = TaskQueue::new();
        let a = queue.post(|| {});
        let b = queue.post(|| {});
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_posting_during_run_defers() {
        let queue = Arc::new(TaskQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let q = queue.clone();
        let c = counter.clone();
        queue.post(move || {
            let c = c.clone();
            q.post(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(queue.run_all(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_all(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_periodic_period() {
        let clock = ManualClock::new(0);
        let tasks = PeriodicTasks::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        assert!(tasks.add("tick", 10, move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(tasks.run_due(&clock), 1);
        clock.advance_ms(5);
        assert_eq!(tasks.run_due(&clock), 0);
        clock.advance_ms(6);
        assert_eq!(tasks.run_due(&clock), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_periodic_replace_and_remove() {
        let clock = ManualClock::new(0);
        let tasks = PeriodicTasks::new();
        let counter = Arc::new(AtomicUsize::new(0));

        tasks.add("job", 0, || panic!("replaced task ran"));
        let c = counter.clone();
        tasks.add("job", 0, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(tasks.len(), 1);

        tasks.run_due(&clock);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(tasks.remove("job"));
        assert!(!tasks.remove("job"));
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_periodic_add_from_inside_fails() {
        let clock = ManualClock::new(0);
        let tasks = Arc::new(PeriodicTasks::new());
        let results = Arc::new(Mutex::new(Vec::new()));

        let t = tasks.clone();
        let r = results.clone();
        tasks.add("outer", 0, move || {
            r.lock().push(t.add("inner", 0, || {}));
        });

        assert_eq!(tasks.run_due(&clock), 1);
        assert_eq!(tasks.run_due(&clock), 1);
        assert_eq!(*results.lock(), vec![false, false]);
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b >= a);
        assert!(a > 0);
    }
}

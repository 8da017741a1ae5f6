//! Cooperative scheduling: tasks, weights and the scheduler contract.
//!
//! Materializers never block. A request either resolves on the spot or registers a continuation,
//! and any follow-up work (pulling the next chunk of an upstream, running a deferred search) is
//! handed to a [`Scheduler`] as a [`Task`]. Two schedulers ship with the crate:
//!
//! - [`LocalScheduler`], a queue that is drained on whichever thread calls
//!   [`LocalScheduler::run_until_idle`].
//! - [`Executor`][crate::Executor], an owned worker thread that drains its queue continuously.
//!
//! Both share the same weighted admission policy, implemented by the internal `TaskQueue`.

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, ThreadId},
};

use crate::sync::Mutex;

/// Tasks at or above this weight are admitted through the heavy lane by default.
pub const DEFAULT_HEAVY_WEIGHT: Weight = Weight(64);

/// Light-lane weight that has to be spent before a queued heavy task is admitted.
pub const DEFAULT_QUANTUM: u64 = 256;

/// An advisory cost estimate.
///
/// Weights steer admission order only. They carry no deadline and never affect results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Weight(u32);

impl Weight {
    /// The cost of an operation served from already materialized data.
    pub const ONE: Weight = Weight(1);
    pub const MAX: Weight = Weight(u32::MAX);

    #[inline]
    pub const fn new(weight: u32) -> Self {
        Self(weight)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Sums two weights, saturating at [`Weight::MAX`].
    #[inline]
    pub fn combine(self, other: Weight) -> Weight {
        Weight(self.0.saturating_add(other.0))
    }
}

impl Default for Weight {
    fn default() -> Self {
        Weight::ONE
    }
}

impl std::iter::Sum for Weight {
    fn sum<I: Iterator<Item = Weight>>(iter: I) -> Self {
        iter.fold(Weight(0), Weight::combine)
    }
}

/// Identifies the tasks belonging to one materializer graph.
///
/// Interruption works per id: [`Scheduler::interrupt_task`] affects every queued task carrying it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TaskId(Arc<str>);

impl TaskId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Creates a process-unique id.
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        Self(format!("task-{n}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// A unit of work submitted to a [`Scheduler`].
///
/// A task runs at most once. If it is interrupted before it gets to run, its interruption hook
/// (see [`Task::on_interrupt`]) runs instead, so whoever waits on the task's outcome still gets an
/// answer.
pub struct Task {
    id: TaskId,
    weight: Weight,
    run: Job,
    interrupt: Option<Job>,
}

impl Task {
    pub fn new<F>(id: TaskId, weight: Weight, run: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id,
            weight,
            run: Box::new(run),
            interrupt: None,
        }
    }

    /// Sets the closure to run instead of the task when it gets interrupted.
    pub fn on_interrupt<F>(self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            interrupt: Some(Box::new(hook)),
            ..self
        }
    }

    #[inline]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    #[inline]
    pub fn weight(&self) -> Weight {
        self.weight
    }

    pub fn run(self) {
        (self.run)();
    }

    pub fn interrupt(self) {
        log::debug!("task '{}' interrupted before running", self.id);
        if let Some(hook) = self.interrupt {
            hook();
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

/// The execution context materializers submit their work to.
pub trait Scheduler: Send + Sync {
    /// Queues `task` behind the work already submitted.
    fn schedule_after(&self, task: Task);

    /// Queues `task` ahead of all regular work.
    fn schedule_before(&self, task: Task);

    /// Interrupts every queued task with the given id, on a best-effort basis.
    ///
    /// Returns `false` when the request certainly had no effect.
    fn interrupt_task(&self, id: &TaskId) -> bool;

    /// Returns whether the calling thread is the one executing this scheduler's tasks.
    ///
    /// Blocking on a result from such a thread can never succeed, since the result would have to
    /// be produced by the very thread that is blocked.
    fn is_current(&self) -> bool;

    /// The id of the task currently running, if called from inside one.
    fn current_task_id(&self) -> Option<TaskId>;
}

/// Task queue with weighted admission.
///
/// `schedule_before` work goes to an urgent lane that always runs first. Regular work is split by
/// weight: cheap tasks run in submission order, and a task at or above the heavy threshold is
/// admitted once `quantum` units of cheap work have been spent (or nothing cheap is left), so
/// expensive pulls neither starve nor stall quick lookups.
pub(crate) struct TaskQueue {
    urgent: VecDeque<Task>,
    light: VecDeque<Task>,
    heavy: VecDeque<Task>,
    heavy_weight: Weight,
    quantum: u64,
    credit: u64,
}

impl TaskQueue {
    pub(crate) fn new(heavy_weight: Weight, quantum: u64) -> Self {
        Self {
            urgent: VecDeque::new(),
            light: VecDeque::new(),
            heavy: VecDeque::new(),
            heavy_weight,
            quantum,
            credit: 0,
        }
    }

    pub(crate) fn push_back(&mut self, task: Task) {
        if task.weight >= self.heavy_weight {
            self.heavy.push_back(task);
        } else {
            self.light.push_back(task);
        }
    }

    pub(crate) fn push_front(&mut self, task: Task) {
        self.urgent.push_back(task);
    }

    pub(crate) fn pop(&mut self) -> Option<Task> {
        if let Some(task) = self.urgent.pop_front() {
            return Some(task);
        }
        let admit_heavy =
            !self.heavy.is_empty() && (self.light.is_empty() || self.credit >= self.quantum);
        if admit_heavy {
            self.credit = 0;
            return self.heavy.pop_front();
        }
        let task = self.light.pop_front()?;
        self.credit = self.credit.saturating_add(u64::from(task.weight.get()));
        Some(task)
    }

    /// Removes every queued task with the given id.
    pub(crate) fn remove(&mut self, id: &TaskId) -> Vec<Task> {
        let mut removed = Vec::new();
        for lane in [&mut self.urgent, &mut self.light, &mut self.heavy] {
            let mut kept = VecDeque::with_capacity(lane.len());
            for task in lane.drain(..) {
                if task.id == *id {
                    removed.push(task);
                } else {
                    kept.push_back(task);
                }
            }
            *lane = kept;
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.urgent.len() + self.light.len() + self.heavy.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A scheduler drained explicitly by its owner.
///
/// Tasks accumulate until [`LocalScheduler::run_until_idle`] is called, which runs them (and
/// anything they schedule in turn) on the calling thread. This makes evaluation order
/// deterministic, which is what tests and single-threaded embedders want.
///
/// Note that the blocking adapters in [`blocking`][crate::blocking] cannot be used with a
/// [`LocalScheduler`] from a thread that is not draining it, since nothing would make progress.
pub struct LocalScheduler {
    queue: Mutex<TaskQueue>,
    driver: Mutex<Option<ThreadId>>,
    current: Mutex<Option<TaskId>>,
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self::with_lanes(DEFAULT_HEAVY_WEIGHT, DEFAULT_QUANTUM)
    }

    /// Creates a scheduler with a custom heavy-task threshold and admission quantum.
    pub fn with_lanes(heavy_weight: Weight, quantum: u64) -> Self {
        Self {
            queue: Mutex::new(TaskQueue::new(heavy_weight, quantum)),
            driver: Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    /// Runs queued tasks on the calling thread until the queue is empty.
    ///
    /// Returns the number of tasks that ran. Calling this from inside one of the scheduler's own
    /// tasks returns 0 immediately; the outer call keeps draining.
    pub fn run_until_idle(&self) -> usize {
        self.drive(usize::MAX)
    }

    /// Runs at most one queued task. Returns whether a task ran.
    pub fn run_next(&self) -> bool {
        self.drive(1) == 1
    }

    fn drive(&self, limit: usize) -> usize {
        let me = thread::current().id();
        {
            let mut driver = self.driver.lock();
            if *driver == Some(me) {
                return 0;
            }
            *driver = Some(me);
        }
        let _guard = DriverGuard(self);

        let mut ran = 0;
        while ran < limit {
            let task = self.queue.lock().pop();
            let Some(task) = task else { break };
            *self.current.lock() = Some(task.id().clone());
            task.run();
            *self.current.lock() = None;
            ran += 1;
        }
        ran
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

struct DriverGuard<'a>(&'a LocalScheduler);

impl Drop for DriverGuard<'_> {
    fn drop(&mut self) {
        *self.0.driver.lock() = None;
        *self.0.current.lock() = None;
    }
}

impl Scheduler for LocalScheduler {
    fn schedule_after(&self, task: Task) {
        self.queue.lock().push_back(task);
    }

    fn schedule_before(&self, task: Task) {
        self.queue.lock().push_front(task);
    }

    fn interrupt_task(&self, id: &TaskId) -> bool {
        let removed = self.queue.lock().remove(id);
        let hit = !removed.is_empty();
        for task in removed {
            task.interrupt();
        }
        hit
    }

    fn is_current(&self) -> bool {
        *self.driver.lock() == Some(thread::current().id())
    }

    fn current_task_id(&self) -> Option<TaskId> {
        if !self.is_current() {
            return None;
        }
        self.current.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, id: &TaskId, w: u32, name: &'static str) -> Task {
        let log = log.clone();
        Task::new(id.clone(), Weight::new(w), move || log.lock().push(name))
    }

    #[test]
    fn weight_combine_saturates() {
        assert_eq!(Weight::new(2).combine(Weight::new(3)), Weight::new(5));
        assert_eq!(Weight::MAX.combine(Weight::ONE), Weight::MAX);
        let total: Weight = [Weight::new(1), Weight::new(2)].into_iter().sum();
        assert_eq!(total, Weight::new(3));
    }

    #[test]
    fn urgent_tasks_run_first() {
        let sched = LocalScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = TaskId::new("t");
        sched.schedule_after(recording(&log, &id, 1, "a"));
        sched.schedule_after(recording(&log, &id, 1, "b"));
        sched.schedule_before(recording(&log, &id, 1, "urgent"));
        assert_eq!(sched.run_until_idle(), 3);
        assert_eq!(*log.lock(), ["urgent", "a", "b"]);
    }

    #[test]
    fn run_next_steps_one_task() {
        let sched = LocalScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = TaskId::new("t");
        sched.schedule_after(recording(&log, &id, 1, "a"));
        sched.schedule_after(recording(&log, &id, 1, "b"));
        assert!(sched.run_next());
        assert_eq!(*log.lock(), ["a"]);
        assert_eq!(sched.pending(), 1);
        assert!(sched.run_next());
        assert!(!sched.run_next());
    }

    #[test]
    fn heavy_tasks_admitted_after_quantum() {
        let sched = LocalScheduler::with_lanes(Weight::new(10), 2);
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = TaskId::new("t");
        sched.schedule_after(recording(&log, &id, 50, "heavy"));
        sched.schedule_after(recording(&log, &id, 1, "l1"));
        sched.schedule_after(recording(&log, &id, 1, "l2"));
        sched.schedule_after(recording(&log, &id, 1, "l3"));
        sched.run_until_idle();
        assert_eq!(*log.lock(), ["l1", "l2", "heavy", "l3"]);
    }

    #[test]
    fn interrupt_runs_hooks_instead_of_tasks() {
        let sched = LocalScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let doomed = TaskId::new("doomed");
        let other = TaskId::new("other");
        let hook_log = log.clone();
        sched.schedule_after(
            recording(&log, &doomed, 1, "doomed").on_interrupt(move || hook_log.lock().push("hook")),
        );
        sched.schedule_after(recording(&log, &other, 1, "other"));
        assert!(sched.interrupt_task(&doomed));
        assert!(!sched.interrupt_task(&doomed));
        sched.run_until_idle();
        assert_eq!(*log.lock(), ["hook", "other"]);
    }

    #[test]
    fn current_only_while_draining() {
        let sched = Arc::new(LocalScheduler::new());
        assert!(!sched.is_current());
        let seen = Arc::new(Mutex::new(None));
        let (s, seen2) = (sched.clone(), seen.clone());
        sched.schedule_after(Task::new(TaskId::new("probe"), Weight::ONE, move || {
            *seen2.lock() = Some((s.is_current(), s.current_task_id()));
        }));
        sched.run_until_idle();
        assert_eq!(*seen.lock(), Some((true, Some(TaskId::new("probe")))));
        assert_eq!(sched.current_task_id(), None);
    }
}

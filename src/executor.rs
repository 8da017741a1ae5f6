//! An owned worker thread that runs scheduled tasks.

use std::{
    io,
    panic::resume_unwind,
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::{
    scheduler::{Scheduler, Task, TaskId, TaskQueue, Weight, DEFAULT_HEAVY_WEIGHT, DEFAULT_QUANTUM},
    sync::Mutex,
};

enum Message {
    After(Task),
    Before(Task),
    Interrupt(TaskId),
}

/// A builder object that can be used to configure and spawn an [`Executor`].
#[derive(Clone)]
pub struct ExecutorBuilder {
    name: Option<String>,
    heavy_weight: Weight,
    quantum: u64,
}

impl ExecutorBuilder {
    /// Sets the name of the [`Executor`] thread.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the weight from which on a task is admitted through the heavy lane.
    ///
    /// Defaults to [`DEFAULT_HEAVY_WEIGHT`].
    pub fn heavy_weight(self, heavy_weight: Weight) -> Self {
        Self { heavy_weight, ..self }
    }

    /// Sets how much light-lane weight has to run before a waiting heavy task is admitted.
    ///
    /// Defaults to [`DEFAULT_QUANTUM`].
    #[inline]
    pub fn quantum(self, quantum: u64) -> Self {
        Self { quantum, ..self }
    }

    /// Spawns the [`Executor`] thread.
    pub fn spawn(self) -> io::Result<Executor> {
        let (sender, recv) = crossbeam_channel::unbounded();
        let current = Arc::new(Mutex::new(None));
        let name = self.name.unwrap_or_else(|| "materializer-executor".to_string());
        let mut queue = TaskQueue::new(self.heavy_weight, self.quantum);

        let worker_current = current.clone();
        let worker_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            log::trace!("executor '{worker_name}' starting");
            run(&recv, &mut queue, &worker_current);
            log::trace!("executor '{worker_name}' exiting");
        })?;

        Ok(Executor {
            name,
            thread: handle.thread().id(),
            current,
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

fn run(recv: &Receiver<Message>, queue: &mut TaskQueue, current: &Mutex<Option<TaskId>>) {
    loop {
        // Take in everything submitted so far, so that admission sees the whole backlog.
        loop {
            match recv.try_recv() {
                Ok(message) => accept(queue, message),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        match queue.pop() {
            Some(task) => {
                *current.lock() = Some(task.id().clone());
                let _reset = ClearCurrent(current);
                task.run();
            }
            None => match recv.recv() {
                Ok(message) => accept(queue, message),
                // Every handle is gone and nothing is queued.
                Err(_) => return,
            },
        }
    }
}

fn accept(queue: &mut TaskQueue, message: Message) {
    match message {
        Message::After(task) => queue.push_back(task),
        Message::Before(task) => queue.push_front(task),
        Message::Interrupt(id) => {
            for task in queue.remove(&id) {
                task.interrupt();
            }
        }
    }
}

struct ClearCurrent<'a>(&'a Mutex<Option<TaskId>>);

impl Drop for ClearCurrent<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

/// A cooperative worker thread implementing [`Scheduler`].
///
/// Tasks run one at a time, in the order the weighted admission policy picks them. Submissions
/// and interruptions travel through one channel, so an interruption affects exactly the tasks
/// submitted before it.
///
/// This type enforces structured concurrency: when it's dropped, queued work is drained and the
/// thread is joined. If a task has panicked, the panic will be forwarded to the thread dropping
/// the [`Executor`]. When the last handle is dropped by one of the executor's own tasks, the
/// thread is detached instead, since it cannot join itself.
pub struct Executor {
    name: String,
    thread: ThreadId,
    current: Arc<Mutex<Option<TaskId>>>,
    sender: Option<Sender<Message>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Close the channel to signal the thread to exit.
        drop(self.sender.take());

        if self.is_current() {
            log::trace!("executor '{}' dropped by its own task, detaching", self.name);
            return;
        }
        self.wait_for_exit();
    }
}

impl Executor {
    /// Returns a builder that can be used to configure and spawn an [`Executor`].
    #[inline]
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder {
            name: None,
            heavy_weight: DEFAULT_HEAVY_WEIGHT,
            quantum: DEFAULT_QUANTUM,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn wait_for_exit(&mut self) {
        // Wait for it to exit and propagate its panic if it panicked.
        if let Some(handle) = self.handle.take() {
            if let Err(payload) = handle.join() {
                if !thread::panicking() {
                    resume_unwind(payload);
                }
            }
        }
    }

    fn submit(&self, message: Message) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.send(message) {
            Ok(()) => true,
            Err(crossbeam_channel::SendError(message)) => {
                // The thread is gone, most likely because a task panicked.
                log::warn!("executor '{}' is not accepting work", self.name);
                if let Message::After(task) | Message::Before(task) = message {
                    task.interrupt();
                }
                false
            }
        }
    }
}

impl Scheduler for Executor {
    fn schedule_after(&self, task: Task) {
        self.submit(Message::After(task));
    }

    fn schedule_before(&self, task: Task) {
        self.submit(Message::Before(task));
    }

    fn interrupt_task(&self, id: &TaskId) -> bool {
        self.submit(Message::Interrupt(id.clone()))
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }

    fn current_task_id(&self) -> Option<TaskId> {
        if !self.is_current() {
            return None;
        }
        self.current.lock().clone()
    }
}

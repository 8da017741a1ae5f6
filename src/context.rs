//! Per-graph shared state: scheduler handle, cancellation cell and diagnostics.

use std::{
    any::Any,
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{
    scheduler::{Scheduler, Task, TaskId, Weight},
    Cancellation, Error,
};

/// The write-once cancellation slot shared by every node of a graph.
///
/// Once a cause is stored it is never replaced or cleared. Nodes consult it when an upstream
/// fails, so that a failure racing with a cancellation is reported as the cancellation.
#[derive(Clone, Default)]
pub struct CancellationCell(Arc<OnceLock<Cancellation>>);

impl CancellationCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `cause` unless a cause is already set. Returns whether this call set it.
    pub fn set(&self, cause: Cancellation) -> bool {
        self.0.set(cause).is_ok()
    }

    pub fn get(&self) -> Option<&Cancellation> {
        self.0.get()
    }

    pub fn is_set(&self) -> bool {
        self.0.get().is_some()
    }
}

impl fmt::Debug for CancellationCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancellationCell").field(&self.get()).finish()
    }
}

/// Receives faults that were isolated at a result channel.
pub trait DiagnosticSink: Send + Sync {
    /// A consumer callback panicked while being handed a result.
    fn consumer_panicked(&self, task: &TaskId, message: &str);
}

/// The default sink, forwarding to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn consumer_panicked(&self, task: &TaskId, message: &str) {
        log::error!("consumer of '{task}' panicked: {message}");
    }
}

/// A cloneable handle to a [`DiagnosticSink`].
#[derive(Clone)]
pub struct Diagnostics(Arc<dyn DiagnosticSink>);

impl Diagnostics {
    pub fn new(sink: impl DiagnosticSink + 'static) -> Self {
        Self(Arc::new(sink))
    }

    pub(crate) fn consumer_panicked(&self, task: &TaskId, payload: &(dyn Any + Send)) {
        self.0.consumer_panicked(task, &panic_message(payload));
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(LogSink)
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Diagnostics")
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

struct Inner {
    scheduler: Arc<dyn Scheduler>,
    task_id: TaskId,
    cancellation: CancellationCell,
    diagnostics: Diagnostics,
}

/// Everything the nodes of one materializer graph share.
///
/// Cloning a [`Context`] is cheap and yields a handle to the same graph state. Nodes built from
/// the same context share one [`CancellationCell`] and submit their work under one [`TaskId`].
#[derive(Clone)]
pub struct Context(Arc<Inner>);

impl Context {
    /// Creates a context for a new graph with default settings.
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::builder(scheduler).build()
    }

    pub fn builder(scheduler: Arc<dyn Scheduler>) -> ContextBuilder {
        ContextBuilder {
            scheduler,
            task_id: None,
            diagnostics: None,
        }
    }

    #[inline]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.0.scheduler
    }

    #[inline]
    pub fn task_id(&self) -> &TaskId {
        &self.0.task_id
    }

    #[inline]
    pub fn cancellation(&self) -> &CancellationCell {
        &self.0.cancellation
    }

    #[inline]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.0.diagnostics
    }

    /// Decides how an upstream failure is reported.
    ///
    /// If the graph has been cancelled the cancellation wins, whatever the failure was.
    pub fn escalate(&self, error: Error) -> Error {
        match self.0.cancellation.get() {
            Some(cause) => Error::Cancelled(cause.clone()),
            None => error,
        }
    }

    /// Submits `run` under the graph's task id.
    ///
    /// `interrupted` runs instead if the task is interrupted before it starts.
    pub(crate) fn schedule<R, I>(&self, weight: Weight, run: R, interrupted: I)
    where
        R: FnOnce() + Send + 'static,
        I: FnOnce() + Send + 'static,
    {
        let task = Task::new(self.0.task_id.clone(), weight, run).on_interrupt(interrupted);
        self.0.scheduler.schedule_after(task);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("task_id", &self.0.task_id)
            .field("cancellation", &self.0.cancellation)
            .finish_non_exhaustive()
    }
}

/// A builder object that can be used to configure a [`Context`].
pub struct ContextBuilder {
    scheduler: Arc<dyn Scheduler>,
    task_id: Option<TaskId>,
    diagnostics: Option<Diagnostics>,
}

impl ContextBuilder {
    /// Sets the id all tasks of this graph are submitted under.
    ///
    /// By default, a process-unique id is generated.
    pub fn task_id(self, task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            ..self
        }
    }

    /// Sets where isolated consumer faults are reported. Defaults to [`LogSink`].
    pub fn diagnostics(self, diagnostics: Diagnostics) -> Self {
        Self {
            diagnostics: Some(diagnostics),
            ..self
        }
    }

    pub fn build(self) -> Context {
        Context(Arc::new(Inner {
            scheduler: self.scheduler,
            task_id: self.task_id.unwrap_or_else(TaskId::unique),
            cancellation: CancellationCell::new(),
            diagnostics: self.diagnostics.unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalScheduler;

    #[test]
    fn cell_is_write_once() {
        let cell = CancellationCell::new();
        assert!(!cell.is_set());
        assert!(cell.set(Cancellation::new("first")));
        assert!(!cell.set(Cancellation::new("second")));
        assert_eq!(cell.get().map(Cancellation::reason), Some("first"));
        let clone = cell.clone();
        assert!(clone.is_set());
    }

    #[test]
    fn escalate_prefers_cancellation() {
        let ctx = Context::new(Arc::new(LocalScheduler::new()));
        let err = ctx.escalate(Error::failure("boom"));
        assert!(matches!(err, Error::Failed(_)));
        ctx.cancellation().set(Cancellation::new("stop"));
        let err = ctx.escalate(Error::failure("boom"));
        assert!(matches!(err, Error::Cancelled(c) if c.reason() == "stop"));
    }

    #[test]
    fn builder_sets_task_id() {
        let ctx = Context::builder(Arc::new(LocalScheduler::new()))
            .task_id(TaskId::new("graph"))
            .build();
        assert_eq!(ctx.task_id().as_str(), "graph");
    }

    #[test]
    fn panic_messages() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&5u8), "<non-string panic payload>");
    }
}

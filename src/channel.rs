//! Result channels.
//!
//! Every asynchronous answer travels through one of these:
//!
//! - [`Consumer`]: a single-shot callback receiving a value or an [`Error`].
//! - [`Consumer<Indexed<T>>`][Indexed]: the element lookup channel, which distinguishes "here is
//!   the element at this index" from "the sequence ended before this index".
//! - [`ScanPredicate`]: a multi-shot scan callback that can stop the producer early.
//!
//! Channels are where user code meets producer bookkeeping, so a panicking consumer is caught and
//! reported to the graph's [`Diagnostics`][crate::Diagnostics] rather than unwinding into the
//! producer.

use std::panic::{self, AssertUnwindSafe};

use crate::{context::panic_message, Context, Error};

/// A single-shot result callback.
pub struct Consumer<R> {
    f: Box<dyn FnOnce(Result<R, Error>) + Send>,
}

impl<R> Consumer<R> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Result<R, Error>) + Send + 'static,
    {
        Self { f: Box::new(f) }
    }

    /// Hands `result` to the callback, isolating the producer from a panic inside it.
    pub fn deliver(self, ctx: &Context, result: Result<R, Error>) {
        let f = self.f;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || f(result))) {
            ctx.diagnostics().consumer_panicked(ctx.task_id(), &*payload);
        }
    }
}

/// Outcome of an element lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indexed<T> {
    /// The element exists. `size` is the best size hint the producer had at the time.
    Element {
        size: Option<usize>,
        index: usize,
        element: T,
    },
    /// The sequence has exactly `size` elements, and the requested index is not among them.
    End { size: usize },
}

impl<T> Indexed<T> {
    /// Returns the element, if one was found.
    pub fn into_element(self) -> Option<T> {
        match self {
            Indexed::Element { element, .. } => Some(element),
            Indexed::End { .. } => None,
        }
    }
}

/// A scan callback.
///
/// [`test`][ScanPredicate::test] is called for each visited element. Returning `false` stops the
/// scan on the spot: neither [`complete`][ScanPredicate::complete] nor
/// [`error`][ScanPredicate::error] will be called afterwards. Otherwise exactly one of those two
/// ends the scan.
pub trait ScanPredicate<T>: Send {
    fn test(&mut self, size: Option<usize>, index: usize, element: &T) -> bool;

    /// The scan ran off the end of a sequence of `size` elements.
    fn complete(self: Box<Self>, size: usize);

    fn error(self: Box<Self>, error: Error);
}

/// Builds a [`ScanPredicate`] from a test closure and a completion closure.
///
/// `done` receives the size on completion or the error; it is not called if `test` stops the scan.
pub fn scan_fn<T, F, D>(test: F, done: D) -> Box<dyn ScanPredicate<T>>
where
    T: 'static,
    F: FnMut(Option<usize>, usize, &T) -> bool + Send + 'static,
    D: FnOnce(Result<usize, Error>) + Send + 'static,
{
    Box::new(ScanFn { test, done })
}

struct ScanFn<F, D> {
    test: F,
    done: D,
}

impl<T, F, D> ScanPredicate<T> for ScanFn<F, D>
where
    F: FnMut(Option<usize>, usize, &T) -> bool + Send,
    D: FnOnce(Result<usize, Error>) + Send,
{
    fn test(&mut self, size: Option<usize>, index: usize, element: &T) -> bool {
        (self.test)(size, index, element)
    }

    fn complete(self: Box<Self>, size: usize) {
        (self.done)(Ok(size))
    }

    fn error(self: Box<Self>, error: Error) {
        (self.done)(Err(error))
    }
}

/// Calls `predicate.test`, treating a panic as a request to stop the scan.
pub(crate) fn test_isolated<T>(
    ctx: &Context,
    predicate: &mut Box<dyn ScanPredicate<T>>,
    size: Option<usize>,
    index: usize,
    element: &T,
) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| predicate.test(size, index, element))) {
        Ok(more) => more,
        Err(payload) => {
            ctx.diagnostics().consumer_panicked(ctx.task_id(), &*payload);
            false
        }
    }
}

pub(crate) fn complete_isolated<T>(ctx: &Context, predicate: Box<dyn ScanPredicate<T>>, size: usize) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || predicate.complete(size))) {
        ctx.diagnostics().consumer_panicked(ctx.task_id(), &*payload);
    }
}

pub(crate) fn error_isolated<T>(ctx: &Context, predicate: Box<dyn ScanPredicate<T>>, error: Error) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || predicate.error(error))) {
        ctx.diagnostics().consumer_panicked(ctx.task_id(), &*payload);
    }
}

/// Runs a user-supplied operator function, turning a panic into [`Error::Panicked`].
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, Error> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| Error::Panicked(panic_message(&*payload)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{context::DiagnosticSink, sync::Mutex, Diagnostics, LocalScheduler, TaskId};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl DiagnosticSink for Arc<Recorder> {
        fn consumer_panicked(&self, _task: &TaskId, message: &str) {
            self.0.lock().push(message.to_string());
        }
    }

    fn recording_context() -> (Context, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let ctx = Context::builder(Arc::new(LocalScheduler::new()))
            .diagnostics(Diagnostics::new(recorder.clone()))
            .build();
        (ctx, recorder)
    }

    #[test]
    fn consumer_panic_is_reported_not_propagated() {
        let (ctx, recorder) = recording_context();
        let consumer = Consumer::<u32>::new(|_| panic!("consumer bug"));
        consumer.deliver(&ctx, Ok(1));
        assert_eq!(*recorder.0.lock(), ["consumer bug"]);
    }

    #[test]
    fn panicking_predicate_stops_scan() {
        let (ctx, recorder) = recording_context();
        let mut predicate = scan_fn::<u32, _, _>(|_, _, _| panic!("predicate bug"), |_| {});
        assert!(!test_isolated(&ctx, &mut predicate, None, 0, &1));
        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[test]
    fn guarded_converts_panics() {
        assert_eq!(guarded(|| 3).unwrap(), 3);
        let err = guarded(|| -> u32 { panic!("bad mapper") }).unwrap_err();
        assert!(matches!(err, Error::Panicked(msg) if msg == "bad mapper"));
    }

    #[test]
    fn indexed_into_element() {
        let found = Indexed::Element {
            size: None,
            index: 0,
            element: 'a',
        };
        assert_eq!(found.into_element(), Some('a'));
        assert_eq!(Indexed::<char>::End { size: 0 }.into_element(), None);
    }
}

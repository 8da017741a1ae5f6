//! Blocking adapters.
//!
//! These bridge the asynchronous [`Materializer`] contract to ordinary blocking calls. Each one
//! submits its request to the node's scheduler and parks the calling thread on a
//! [`PromiseHandle`] until the answer arrives.
//!
//! Blocking only makes sense from a thread the scheduler does not run on: called from inside one
//! of the scheduler's own tasks, every adapter fails right away with [`Error::Deadlock`]. With a
//! [`LocalScheduler`][crate::LocalScheduler], somebody else has to keep draining the queue.

use std::{sync::Arc, time::Duration};

use crate::{
    channel::{guarded, Consumer, Indexed, ScanPredicate},
    materializer::{Element, Elements, MaterializerRef, Op},
    promise::{promise, Promise, PromiseHandle},
    sync::Mutex,
    Cancellation, Context, Error,
};

/// Submits `request` against `node` and returns the handle its answer arrives at.
fn submit<T, R, F>(node: &MaterializerRef<T>, op: Op, request: F) -> Result<PromiseHandle<Result<R, Error>>, Error>
where
    T: Element,
    R: Send + 'static,
    F: FnOnce(&MaterializerRef<T>, Slot<R>) + Send + 'static,
{
    let ctx = node.context().clone();
    if ctx.scheduler().is_current() {
        return Err(Error::Deadlock);
    }
    let (promise, handle) = promise();
    let slot = Slot(Arc::new(Mutex::new(Some(promise))));
    let interrupted = slot.clone();
    let cancelled_ctx = ctx.clone();
    let target = node.clone();
    ctx.schedule(
        node.weight(op),
        move || request(&target, slot),
        move || interrupted.fulfill(Err(interruption(&cancelled_ctx))),
    );
    Ok(handle)
}

fn interruption(ctx: &Context) -> Error {
    let cause = ctx.cancellation().get().cloned().unwrap_or_else(Cancellation::interrupted);
    Error::Cancelled(cause)
}

/// The promise side of a blocking request, shared between the task and its interruption hook.
struct Slot<R>(Arc<Mutex<Option<Promise<Result<R, Error>>>>>);

impl<R> Clone for Slot<R> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<R: Send + 'static> Slot<R> {
    fn fulfill(&self, result: Result<R, Error>) {
        let promise = self.0.lock().take();
        if let Some(promise) = promise {
            promise.fulfill(result);
        }
    }

    fn consumer(self) -> Consumer<R> {
        Consumer::new(move |result| self.fulfill(result))
    }
}

fn wait<R>(handle: PromiseHandle<Result<R, Error>>, timeout: Option<Duration>) -> Result<R, Error> {
    match timeout {
        Some(timeout) => handle.block_timeout(timeout)?,
        None => handle.block()?,
    }
}

/// Blocks until every element of `node` is materialized.
pub fn get_all<T: Element>(node: &MaterializerRef<T>) -> Result<Elements<T>, Error> {
    let handle = submit(node, Op::Elements, |node, slot| node.all_elements(slot.consumer()))?;
    wait(handle, None)
}

/// Like [`get_all`], giving up with [`Error::Timeout`] after `timeout`.
///
/// Timing out does not cancel the node; the work already started keeps running.
pub fn get_all_timeout<T: Element>(node: &MaterializerRef<T>, timeout: Duration) -> Result<Elements<T>, Error> {
    let handle = submit(node, Op::Elements, |node, slot| node.all_elements(slot.consumer()))?;
    wait(handle, Some(timeout))
}

pub fn get_size<T: Element>(node: &MaterializerRef<T>) -> Result<usize, Error> {
    let handle = submit(node, Op::Size, |node, slot| node.size(slot.consumer()))?;
    wait(handle, None)
}

/// Blocks until the element at `index` is known. Returns `None` past the end.
pub fn get_element<T: Element>(node: &MaterializerRef<T>, index: isize) -> Result<Option<T>, Error> {
    let handle = submit(node, Op::Element, move |node, slot| {
        let found = Consumer::new(move |result: Result<_, Error>| {
            slot.fulfill(result.map(Indexed::into_element));
        });
        node.element_at(index, found);
    })?;
    wait(handle, None)
}

/// Calls `f` for every element, in order, on the scheduler's thread.
pub fn for_each<T, F>(node: &MaterializerRef<T>, mut f: F) -> Result<(), Error>
where
    T: Element,
    F: FnMut(&T) + Send + 'static,
{
    for_each_while(node, move |element| {
        f(element);
        true
    })
}

/// Calls `f` for the elements in order until it returns `false`.
///
/// Only the prefix that `f` gets to see is pulled from the node. A panic inside `f` ends the
/// iteration with [`Error::Panicked`].
pub fn for_each_while<T, F>(node: &MaterializerRef<T>, f: F) -> Result<(), Error>
where
    T: Element,
    F: FnMut(&T) -> bool + Send + 'static,
{
    let handle = submit(node, Op::ScanForward, move |node, slot| {
        node.scan_forward(0, Box::new(Visitor { f, slot }));
    })?;
    wait(handle, None)
}

struct Visitor<F> {
    f: F,
    slot: Slot<()>,
}

impl<T, F> ScanPredicate<T> for Visitor<F>
where
    F: FnMut(&T) -> bool + Send + 'static,
{
    fn test(&mut self, _size: Option<usize>, _index: usize, element: &T) -> bool {
        let f = &mut self.f;
        match guarded(|| f(element)) {
            Ok(true) => true,
            Ok(false) => {
                self.slot.fulfill(Ok(()));
                false
            }
            Err(error) => {
                self.slot.fulfill(Err(error));
                false
            }
        }
    }

    fn complete(self: Box<Self>, _size: usize) {
        self.slot.fulfill(Ok(()));
    }

    fn error(self: Box<Self>, error: Error) {
        self.slot.fulfill(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        ops::Compose,
        scheduler::{Task, TaskId, Weight},
        terminal::{failed, list},
        test::Harness,
        Executor, Scheduler,
    };

    fn executor_context() -> (Arc<Executor>, Context) {
        let executor = Arc::new(Executor::builder().name("blocking-test").spawn().unwrap());
        let ctx = Context::new(executor.clone());
        (executor, ctx)
    }

    #[test]
    fn blocking_queries_on_executor() {
        let (_executor, ctx) = executor_context();
        let m = list(&ctx, (1..=10).collect::<Vec<u32>>()).filter(|x| x % 2 == 1).append(100);
        assert_eq!(get_element(&m, 1).unwrap(), Some(3));
        assert_eq!(get_element(&m, 40).unwrap(), None);
        assert_eq!(get_size(&m).unwrap(), 6);
        assert_eq!(&*get_all(&m).unwrap(), &[1, 3, 5, 7, 9, 100]);
        assert!(matches!(get_element(&m, -1), Err(Error::NegativeIndex(-1))));
    }

    #[test]
    fn for_each_while_stops_early() {
        let (_executor, ctx) = executor_context();
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let m = list(&ctx, (0..100).collect::<Vec<u32>>()).filter(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        for_each_while(&m, move |x| {
            s.lock().push(*x);
            *x < 2
        })
        .unwrap();
        assert_eq!(*seen.lock(), [0, 1, 2]);
        assert!(pulled.load(Ordering::SeqCst) < 100);

        let total = Arc::new(AtomicUsize::new(0));
        let t = total.clone();
        for_each(&m, move |x| {
            t.fetch_add(*x as usize, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 4950);
    }

    #[test]
    fn panicking_visitor_reports_error() {
        let (_executor, ctx) = executor_context();
        let m = list(&ctx, vec![1, 2]);
        let result = for_each(&m, |_: &i32| panic!("visitor bug"));
        assert!(matches!(result, Err(Error::Panicked(msg)) if msg == "visitor bug"));
    }

    #[test]
    fn failures_are_reported() {
        let (_executor, ctx) = executor_context();
        let m = failed::<u8>(&ctx, Error::failure("offline")).skip(1);
        assert!(matches!(get_all(&m), Err(Error::Failed(_))));
    }

    #[test]
    fn blocking_from_own_worker_is_a_deadlock() {
        let (executor, ctx) = executor_context();
        let m = list(&ctx, vec![1]);
        let (tx, rx) = crossbeam_channel::bounded(1);
        executor.schedule_after(Task::new(TaskId::new("reentrant"), Weight::ONE, move || {
            let _ = tx.send(get_all(&m).map(|all| all.len()));
        }));
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(Error::Deadlock)));
    }

    #[test]
    fn undrained_local_scheduler_times_out() {
        let h = Harness::new();
        let m = list(h.ctx(), vec![1, 2, 3]).map(|x| x + 1);
        let result = get_all_timeout(&m, Duration::from_millis(20));
        assert!(matches!(result, Err(Error::Timeout)));
        // The request is still queued and can be drained later.
        assert_eq!(h.scheduler().pending(), 1);
        h.run();
        assert_eq!(h.vec(&m), [2, 3, 4]);
    }

    #[test]
    fn interrupted_request_resolves_as_cancelled() {
        let h = Harness::new();
        let m = list(h.ctx(), vec![1u8]);
        let handle = submit(&m, Op::Elements, |node, slot| node.all_elements(slot.consumer())).unwrap();
        assert!(h.ctx().scheduler().interrupt_task(h.ctx().task_id()));
        let result = wait(handle, Some(Duration::from_secs(5)));
        assert!(matches!(result, Err(Error::Cancelled(cause)) if cause.reason() == "task interrupted"));
    }
}

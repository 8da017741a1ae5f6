//! The materializer contract.

use std::sync::Arc;

use crate::{
    channel::{error_isolated, Consumer, Indexed, ScanPredicate},
    scheduler::Weight,
    Cancellation, Context, Error,
};

/// Types that can flow through a materializer graph.
pub trait Element: Clone + PartialEq + Send + Sync + 'static {}

impl<T: Clone + PartialEq + Send + Sync + 'static> Element for T {}

/// The frozen contents of a fully materialized sequence.
pub type Elements<T> = Arc<[T]>;

/// A shared handle to any materializer.
pub type MaterializerRef<T> = Arc<dyn Materializer<T>>;

/// Lifecycle of a materializer.
///
/// A node starts out [`Pending`][Status::Pending] and settles exactly once into one of the
/// terminal states, after which it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Done,
    Failed,
    Cancelled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        self != Status::Pending
    }
}

/// The operations whose cost can be queried through [`Materializer::weight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Size,
    Empty,
    Contains,
    Element,
    Elements,
    ScanForward,
    ScanBackward,
    Cancel,
}

/// A lazily computed, memoizing sequence of `T`.
///
/// Every query is asynchronous: it answers through the channel it is given, either right away
/// (once the node is materialized) or later, after the upstream work it depends on has finished.
/// Each request is answered exactly once.
///
/// Indices are 0-based. A negative index is rejected with [`Error::NegativeIndex`] before any
/// upstream is consulted. An index at or past the end of the sequence is not an error: lookups
/// answer [`Indexed::End`] and scans call [`ScanPredicate::complete`].
///
/// When an upstream fails, a node settles as failed, unless its graph has been cancelled, in
/// which case it settles as cancelled with the recorded cause.
pub trait Materializer<T: Element>: Send + Sync + 'static {
    fn context(&self) -> &Context;

    /// The size, if it is known without further work.
    fn known_size(&self) -> Option<usize>;

    fn status(&self) -> Status;

    /// Current cost estimate for `op`.
    ///
    /// Materialized nodes report [`Weight::ONE`]; pending nodes report something in proportion to
    /// the upstream work the operation would trigger.
    fn weight(&self, op: Op) -> Weight;

    /// Cancels the node and, eagerly, its upstreams. Terminal nodes ignore this.
    fn cancel(&self, cause: Cancellation);

    fn size(&self, consumer: Consumer<usize>);

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<T>>);

    fn all_elements(&self, consumer: Consumer<Elements<T>>);

    /// Visits elements in order, starting at `from`, until `predicate` returns `false` or the
    /// sequence ends.
    fn scan_forward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>);

    /// Visits elements in reverse order, starting at `from` (clamped to the last element) and
    /// ending at index 0.
    fn scan_backward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>);

    fn is_empty(&self, consumer: Consumer<bool>) {
        let ctx = self.context().clone();
        self.element_at(
            0,
            Consumer::new(move |result| {
                let result = result.map(|found| matches!(found, Indexed::End { .. }));
                consumer.deliver(&ctx, result)
            }),
        );
    }

    fn contains(&self, element: T, consumer: Consumer<bool>) {
        let ctx = self.context().clone();
        self.scan_forward(
            0,
            Box::new(ContainsScan {
                ctx,
                element,
                consumer: Some(consumer),
            }),
        );
    }

    /// Returns the materialized elements without waiting.
    ///
    /// Nodes that have not settled yet answer [`Error::Unsupported`]; this is a protocol check,
    /// not a way to trigger work.
    fn try_elements(&self) -> Result<Elements<T>, Error> {
        Err(Error::Unsupported("elements are not materialized yet"))
    }
}

struct ContainsScan<T> {
    ctx: Context,
    element: T,
    consumer: Option<Consumer<bool>>,
}

impl<T: Element> ScanPredicate<T> for ContainsScan<T> {
    fn test(&mut self, _size: Option<usize>, _index: usize, element: &T) -> bool {
        if *element != self.element {
            return true;
        }
        if let Some(consumer) = self.consumer.take() {
            consumer.deliver(&self.ctx, Ok(true));
        }
        false
    }

    fn complete(mut self: Box<Self>, _size: usize) {
        if let Some(consumer) = self.consumer.take() {
            consumer.deliver(&self.ctx, Ok(false));
        }
    }

    fn error(mut self: Box<Self>, error: Error) {
        if let Some(consumer) = self.consumer.take() {
            consumer.deliver(&self.ctx, Err(error));
        }
    }
}

/// Hook used to propagate a cancellation to an upstream node.
pub(crate) type CancelHook = Arc<dyn Fn(&Cancellation) + Send + Sync>;

pub(crate) fn cancel_hook<T: Element>(upstream: &MaterializerRef<T>) -> CancelHook {
    let upstream = upstream.clone();
    Arc::new(move |cause| upstream.cancel(cause.clone()))
}

/// Rejects a negative scan start, reporting it through the predicate.
pub(crate) fn scan_start<T>(
    ctx: &Context,
    from: isize,
    predicate: Box<dyn ScanPredicate<T>>,
) -> Option<(usize, Box<dyn ScanPredicate<T>>)> {
    match crate::arith::checked_index(from) {
        Ok(from) => Some((from, predicate)),
        Err(error) => {
            error_isolated(ctx, predicate, error);
            None
        }
    }
}

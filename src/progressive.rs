//! Incremental materialization.
//!
//! Operators such as `filter` or `flat_map` cannot know their size upfront, but they can serve
//! index requests long before they are done: the element at index 0 of a filtered sequence is
//! known as soon as the first match has been pulled. [`Progressive`] implements that pattern once:
//!
//! - produced elements are appended to a buffer, and requests for buffered indices are answered
//!   right away;
//! - a request for an index past the buffer registers a waiter and triggers a pull, unless one is
//!   already in flight;
//! - a pull is one step of the operator's [`Pull`] strategy, which pushes zero or more elements
//!   and then either parks (more pulls may follow) or completes;
//! - on completion the buffer is frozen into a terminal list and every remaining waiter learns
//!   where the sequence ended.
//!
//! The strategy is moved out of the node for the duration of a pull and handed back through
//! [`Step::park`], so two pulls can never be in flight at once.

use std::{collections::BTreeMap, mem, sync::Arc};

use crate::{
    arith,
    channel::{complete_isolated, error_isolated, test_isolated, Consumer, Indexed, ScanPredicate},
    materializer::{scan_start, CancelHook, Element, Elements, Materializer, MaterializerRef, Op, Status},
    scheduler::Weight,
    state::Replay,
    sync::Mutex,
    terminal::Frozen,
    Cancellation, Context, Error,
};

/// One step of an incremental operator.
pub trait Pull<U: Element>: Send + Sized + 'static {
    /// Pulls from upstream, reporting through `step`.
    ///
    /// The step must end in exactly one of [`Step::park`] (handing the strategy back),
    /// [`Step::complete`] or [`Step::fail`]. It may end asynchronously.
    fn pull(self, step: Step<U, Self>);
}

struct Pending<U, S> {
    buffer: Vec<U>,
    /// Absent while a pull is in flight.
    strategy: Option<S>,
    waiters: BTreeMap<usize, Vec<Consumer<Indexed<U>>>>,
    whole: Vec<Replay<U>>,
    pulls: usize,
}

impl<U, S> Pending<U, S> {
    fn has_demand(&self) -> bool {
        !self.waiters.is_empty() || !self.whole.is_empty()
    }
}

enum State<U, S> {
    Pending(Pending<U, S>),
    Settled(Arc<Frozen<U>>),
}

struct Shared<U, S> {
    ctx: Context,
    state: Mutex<State<U, S>>,
    upstreams: Vec<CancelHook>,
    weight: WeightFn,
}

/// Estimates the cost of one pull from the upstreams' current weights.
type WeightFn = Box<dyn Fn() -> Weight + Send + Sync>;

/// What a scan finds at its current position.
enum Cursor<U> {
    Element(U),
    Frozen(Arc<Frozen<U>>),
    Waiting,
}

impl<U: Element, S: Pull<U>> Shared<U, S> {
    fn frozen(&self) -> Option<Arc<Frozen<U>>> {
        match &*self.state.lock() {
            State::Settled(frozen) => Some(frozen.clone()),
            State::Pending(_) => None,
        }
    }

    fn lookup(self: &Arc<Self>, index: usize, consumer: Consumer<Indexed<U>>) {
        let mut state = self.state.lock();
        match &mut *state {
            State::Settled(frozen) => {
                let frozen = frozen.clone();
                drop(state);
                frozen.element_at(arith::to_request(index), consumer);
            }
            State::Pending(pending) => {
                if let Some(element) = pending.buffer.get(index) {
                    let element = element.clone();
                    drop(state);
                    let found = Indexed::Element {
                        size: None,
                        index,
                        element,
                    };
                    consumer.deliver(&self.ctx, Ok(found));
                } else {
                    pending.waiters.entry(index).or_default().push(consumer);
                    drop(state);
                    self.pump();
                }
            }
        }
    }

    fn await_all(self: &Arc<Self>, replay: Replay<U>) {
        let mut state = self.state.lock();
        match &mut *state {
            State::Settled(frozen) => {
                let frozen = frozen.clone();
                drop(state);
                replay(&frozen);
            }
            State::Pending(pending) => {
                pending.whole.push(replay);
                drop(state);
                self.pump();
            }
        }
    }

    /// Starts a pull if there is demand and none is in flight.
    fn pump(self: &Arc<Self>) {
        let (strategy, pull) = {
            let mut state = self.state.lock();
            let State::Pending(pending) = &mut *state else {
                return;
            };
            if !pending.has_demand() {
                return;
            }
            let Some(strategy) = pending.strategy.take() else {
                return;
            };
            pending.pulls += 1;
            (strategy, pending.pulls)
        };
        log::trace!("'{}': scheduling pull #{pull}", self.ctx.task_id());
        let step = Step {
            shared: self.clone(),
        };
        let interrupted = self.clone();
        self.ctx.schedule(
            (self.weight)(),
            move || strategy.pull(step),
            move || interrupted.cancel(Cancellation::interrupted()),
        );
    }

    fn scan_forward_from(self: &Arc<Self>, mut index: usize, mut predicate: Box<dyn ScanPredicate<U>>) {
        loop {
            let mut state = self.state.lock();
            let element = match &mut *state {
                State::Settled(frozen) => {
                    let frozen = frozen.clone();
                    drop(state);
                    return frozen.scan_forward(arith::to_request(index), predicate);
                }
                State::Pending(pending) => match pending.buffer.get(index) {
                    Some(element) => element.clone(),
                    None => {
                        // Resume from the waiter once the element arrives.
                        let shared = self.clone();
                        let resume = Consumer::new(move |result| match result {
                            Ok(Indexed::Element { index, element, .. }) => {
                                if test_isolated(&shared.ctx, &mut predicate, None, index, &element) {
                                    shared.scan_forward_from(index + 1, predicate);
                                }
                            }
                            Ok(Indexed::End { size }) => complete_isolated(&shared.ctx, predicate, size),
                            Err(error) => error_isolated(&shared.ctx, predicate, error),
                        });
                        pending.waiters.entry(index).or_default().push(resume);
                        drop(state);
                        return self.pump();
                    }
                },
            };
            drop(state);
            if !test_isolated(&self.ctx, &mut predicate, None, index, &element) {
                return;
            }
            index += 1;
        }
    }

    fn scan_backward_from(self: &Arc<Self>, from: usize, mut predicate: Box<dyn ScanPredicate<U>>) {
        // Every index up to `from` is buffered by now, or the node has settled.
        for index in (0..=from).rev() {
            let cursor = match &*self.state.lock() {
                State::Settled(frozen) => Cursor::Frozen(frozen.clone()),
                State::Pending(pending) => match pending.buffer.get(index) {
                    Some(element) => Cursor::Element(element.clone()),
                    None => Cursor::Waiting,
                },
            };
            match cursor {
                Cursor::Element(element) => {
                    if !test_isolated(&self.ctx, &mut predicate, None, index, &element) {
                        return;
                    }
                }
                Cursor::Frozen(frozen) => {
                    return frozen.scan_backward(arith::to_request(index), predicate);
                }
                Cursor::Waiting => {
                    let error = Error::Unsupported("backward scan ran past the buffered elements");
                    return error_isolated(&self.ctx, predicate, error);
                }
            }
        }
        // Completion needs the final size.
        let shared = self.clone();
        self.await_all(Box::new(move |frozen| match frozen.outcome() {
            Ok(elements) => complete_isolated(&shared.ctx, predicate, elements.len()),
            Err(error) => error_isolated(&shared.ctx, predicate, error.clone()),
        }));
    }

    fn push(&self, element: U) -> bool {
        let (index, waiters) = {
            let mut state = self.state.lock();
            let State::Pending(pending) = &mut *state else {
                return false;
            };
            let index = pending.buffer.len();
            pending.buffer.push(element.clone());
            (index, pending.waiters.remove(&index).unwrap_or_default())
        };
        for waiter in waiters {
            let found = Indexed::Element {
                size: None,
                index,
                element: element.clone(),
            };
            waiter.deliver(&self.ctx, Ok(found));
        }
        match &*self.state.lock() {
            State::Pending(pending) => pending.has_demand(),
            State::Settled(_) => false,
        }
    }

    fn park(self: &Arc<Self>, strategy: S) {
        {
            let mut state = self.state.lock();
            let State::Pending(pending) = &mut *state else {
                return;
            };
            pending.strategy = Some(strategy);
        }
        self.pump();
    }

    fn complete(&self) {
        let (frozen, waiters, whole) = {
            let mut state = self.state.lock();
            let State::Pending(pending) = &mut *state else {
                return;
            };
            let buffer = mem::take(&mut pending.buffer);
            let waiters = mem::take(&mut pending.waiters);
            let whole = mem::take(&mut pending.whole);
            let pulls = pending.pulls;
            let frozen = Arc::new(Frozen::from_vec(self.ctx.clone(), buffer));
            *state = State::Settled(frozen.clone());
            log::trace!("'{}': progressive node frozen after {pulls} pulls", self.ctx.task_id());
            (frozen, waiters, whole)
        };
        let size = frozen.known_size().unwrap_or(0);
        for waiter in waiters.into_values().flatten() {
            waiter.deliver(&self.ctx, Ok(Indexed::End { size }));
        }
        for replay in whole {
            replay(&frozen);
        }
    }

    fn settle_error(&self, error: Error) {
        let (frozen, waiters, whole) = {
            let mut state = self.state.lock();
            let State::Pending(pending) = &mut *state else {
                return;
            };
            let waiters = mem::take(&mut pending.waiters);
            let whole = mem::take(&mut pending.whole);
            let frozen = Arc::new(Frozen::new(self.ctx.clone(), Err(error.clone())));
            *state = State::Settled(frozen.clone());
            log::trace!("'{}': progressive node settled with error: {error}", self.ctx.task_id());
            (frozen, waiters, whole)
        };
        for waiter in waiters.into_values().flatten() {
            waiter.deliver(&self.ctx, Err(error.clone()));
        }
        for replay in whole {
            replay(&frozen);
        }
    }

    fn cancel(&self, cause: Cancellation) {
        if self.frozen().is_some() {
            return;
        }
        self.ctx.cancellation().set(cause.clone());
        let cause = self.ctx.cancellation().get().cloned().unwrap_or(cause);
        log::debug!("'{}': cancelling progressive node: {cause}", self.ctx.task_id());
        for upstream in &self.upstreams {
            upstream(&cause);
        }
        self.settle_error(Error::Cancelled(cause));
    }
}

/// Handle through which a [`Pull`] strategy reports the outcome of one pull.
pub struct Step<U, S> {
    shared: Arc<Shared<U, S>>,
}

impl<U: Element, S: Pull<U>> Step<U, S> {
    pub fn context(&self) -> &Context {
        &self.shared.ctx
    }

    /// Appends an element, answering whoever waits for its index.
    ///
    /// Returns whether more elements are wanted. Once this returns `false` the strategy should
    /// stop pulling and [`park`][Step::park].
    pub fn push(&self, element: U) -> bool {
        self.shared.push(element)
    }

    /// Ends the pull, handing the strategy back. Another pull follows if there is demand.
    pub fn park(self, strategy: S) {
        self.shared.park(strategy);
    }

    /// Ends the pull: the upstream is exhausted and the buffer is final.
    pub fn complete(self) {
        self.shared.complete();
    }

    /// Ends the pull with an upstream failure, which is reported as a cancellation if the graph
    /// has been cancelled.
    pub fn fail(self, error: Error) {
        let error = self.shared.ctx.escalate(error);
        self.shared.settle_error(error);
    }
}

/// Decides what a visited upstream element contributes: nothing, or one element to push.
pub(crate) type Visit<T, U, S> = fn(&mut S, usize, &T) -> Result<Option<U>, Error>;

/// Called when the upstream scan runs out, with the upstream size.
pub(crate) type Exhausted<U, S> = fn(S, Step<U, S>, usize);

/// Runs one pull as a forward scan of `upstream` starting at `from`.
///
/// The scan stops and parks the strategy as soon as nobody is waiting for more elements.
pub(crate) fn feed<T, U, S>(
    upstream: &MaterializerRef<T>,
    from: usize,
    strategy: S,
    step: Step<U, S>,
    visit: Visit<T, U, S>,
    exhausted: Exhausted<U, S>,
) where
    T: Element,
    U: Element,
    S: Pull<U>,
{
    upstream.scan_forward(
        arith::to_request(from),
        Box::new(Feed {
            strategy: Some(strategy),
            step: Some(step),
            visit,
            exhausted,
        }),
    );
}

struct Feed<T, U, S> {
    strategy: Option<S>,
    step: Option<Step<U, S>>,
    visit: Visit<T, U, S>,
    exhausted: Exhausted<U, S>,
}

impl<T: Element, U: Element, S: Pull<U>> ScanPredicate<T> for Feed<T, U, S> {
    fn test(&mut self, _size: Option<usize>, index: usize, element: &T) -> bool {
        let (Some(strategy), Some(step)) = (self.strategy.as_mut(), self.step.as_ref()) else {
            return false;
        };
        match (self.visit)(strategy, index, element) {
            Ok(None) => true,
            Ok(Some(produced)) => {
                if step.push(produced) {
                    return true;
                }
                if let (Some(strategy), Some(step)) = (self.strategy.take(), self.step.take()) {
                    step.park(strategy);
                }
                false
            }
            Err(error) => {
                if let Some(step) = self.step.take() {
                    step.fail(error);
                }
                false
            }
        }
    }

    fn complete(self: Box<Self>, size: usize) {
        let Feed {
            strategy,
            step,
            exhausted,
            ..
        } = *self;
        if let (Some(strategy), Some(step)) = (strategy, step) {
            exhausted(strategy, step, size);
        }
    }

    fn error(self: Box<Self>, error: Error) {
        if let Some(step) = self.step {
            step.fail(error);
        }
    }
}

/// A materializer filled incrementally by a [`Pull`] strategy.
pub struct Progressive<U, S> {
    shared: Arc<Shared<U, S>>,
}

impl<U: Element, S: Pull<U>> Progressive<U, S> {
    /// `weight` estimates the cost of one pull. It is asked again on every pull, so it can
    /// follow upstreams that get cheaper once they are materialized.
    pub(crate) fn new<W>(ctx: Context, upstreams: Vec<CancelHook>, weight: W, strategy: S) -> Self
    where
        W: Fn() -> Weight + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                ctx,
                state: Mutex::new(State::Pending(Pending {
                    buffer: Vec::new(),
                    strategy: Some(strategy),
                    waiters: BTreeMap::new(),
                    whole: Vec::new(),
                    pulls: 0,
                })),
                upstreams,
                weight: Box::new(weight),
            }),
        }
    }

    /// Number of pulls started so far.
    pub fn pulls(&self) -> usize {
        match &*self.shared.state.lock() {
            State::Pending(pending) => pending.pulls,
            State::Settled(_) => 0,
        }
    }

    /// Number of elements produced so far.
    pub fn buffered(&self) -> usize {
        match &*self.shared.state.lock() {
            State::Pending(pending) => pending.buffer.len(),
            State::Settled(frozen) => frozen.known_size().unwrap_or(0),
        }
    }
}

impl<U: Element, S: Pull<U>> Materializer<U> for Progressive<U, S> {
    fn context(&self) -> &Context {
        &self.shared.ctx
    }

    fn known_size(&self) -> Option<usize> {
        self.shared.frozen().and_then(|frozen| frozen.known_size())
    }

    fn status(&self) -> Status {
        match self.shared.frozen() {
            Some(frozen) => frozen.status(),
            None => Status::Pending,
        }
    }

    fn weight(&self, op: Op) -> Weight {
        if self.shared.frozen().is_some() || op == Op::Cancel {
            Weight::ONE
        } else {
            (self.shared.weight)()
        }
    }

    fn cancel(&self, cause: Cancellation) {
        self.shared.cancel(cause);
    }

    fn size(&self, consumer: Consumer<usize>) {
        self.shared.await_all(Box::new(move |frozen| frozen.size(consumer)));
    }

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<U>>) {
        match arith::checked_index(index) {
            Ok(index) => self.shared.lookup(index, consumer),
            Err(error) => consumer.deliver(&self.shared.ctx, Err(error)),
        }
    }

    fn all_elements(&self, consumer: Consumer<Elements<U>>) {
        self.shared.await_all(Box::new(move |frozen| frozen.all_elements(consumer)));
    }

    fn scan_forward(&self, from: isize, predicate: Box<dyn ScanPredicate<U>>) {
        if let Some((from, predicate)) = scan_start(&self.shared.ctx, from, predicate) {
            self.shared.scan_forward_from(from, predicate);
        }
    }

    fn scan_backward(&self, from: isize, predicate: Box<dyn ScanPredicate<U>>) {
        let Some((from, predicate)) = scan_start(&self.shared.ctx, from, predicate) else {
            return;
        };
        let shared = self.shared.clone();
        self.shared.lookup(
            from,
            Consumer::new(move |result| match result {
                Ok(Indexed::Element { index, .. }) => shared.scan_backward_from(index, predicate),
                Ok(Indexed::End { size }) => match shared.frozen() {
                    Some(frozen) if size > 0 => frozen.scan_backward(arith::to_request(size - 1), predicate),
                    _ => complete_isolated(&shared.ctx, predicate, size),
                },
                Err(error) => error_isolated(&shared.ctx, predicate, error),
            }),
        );
    }

    fn try_elements(&self) -> Result<Elements<U>, Error> {
        match self.shared.frozen() {
            Some(frozen) => frozen.try_elements(),
            None => Err(Error::Unsupported("progressive result is not materialized yet")),
        }
    }
}

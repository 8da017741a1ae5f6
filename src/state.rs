//! The pending-to-terminal transition shared by composed materializers.
//!
//! A composed node starts out pending and eventually replaces its pending state with a
//! [`Frozen`] terminal. Requests that cannot be answered while pending are queued as *replays*:
//! closures that re-issue the request against the terminal once it exists. The transition is
//! committed under the cell's lock and can only happen once; whoever loses the race sees the
//! terminal installed by the winner.

use std::sync::Arc;

use crate::{
    channel::Consumer,
    materializer::{CancelHook, Element, Elements, Op, Status},
    scheduler::Weight,
    sync::Mutex,
    terminal::Frozen,
    Cancellation, Context, Error,
};

pub(crate) type Replay<T> = Box<dyn FnOnce(&Arc<Frozen<T>>) + Send>;

/// What happened to a request queued with [`StateCell::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// First demand: the caller has to start the work that settles the cell.
    Start,
    /// Work is already underway; the request will be replayed.
    Queued,
    /// The cell had already settled and the request was answered.
    Replayed,
}

enum Stage<T> {
    Pending {
        started: bool,
        replays: Vec<Replay<T>>,
    },
    Settled(Arc<Frozen<T>>),
}

pub(crate) struct StateCell<T> {
    stage: Mutex<Stage<T>>,
}

impl<T: Element> StateCell<T> {
    pub(crate) fn new() -> Self {
        Self {
            stage: Mutex::new(Stage::Pending {
                started: false,
                replays: Vec::new(),
            }),
        }
    }

    pub(crate) fn settled(&self) -> Option<Arc<Frozen<T>>> {
        match &*self.stage.lock() {
            Stage::Settled(frozen) => Some(frozen.clone()),
            Stage::Pending { .. } => None,
        }
    }

    pub(crate) fn enqueue(&self, replay: Replay<T>) -> Admission {
        let mut stage = self.stage.lock();
        match &mut *stage {
            Stage::Settled(frozen) => {
                let frozen = frozen.clone();
                drop(stage);
                replay(&frozen);
                Admission::Replayed
            }
            Stage::Pending { started, replays } => {
                replays.push(replay);
                if *started {
                    Admission::Queued
                } else {
                    *started = true;
                    Admission::Start
                }
            }
        }
    }

    /// Installs the terminal and replays every queued request against it.
    ///
    /// Returns `false` (and drops `frozen`) if the cell had already settled.
    pub(crate) fn settle(&self, frozen: Frozen<T>) -> bool {
        let frozen = Arc::new(frozen);
        let replays = {
            let mut stage = self.stage.lock();
            match &mut *stage {
                Stage::Settled(_) => return false,
                Stage::Pending { replays, .. } => {
                    let replays = std::mem::take(replays);
                    *stage = Stage::Settled(frozen.clone());
                    replays
                }
            }
        };
        for replay in replays {
            replay(&frozen);
        }
        true
    }
}

/// A composed node's handle on its context, state cell and upstreams.
///
/// Cheap to clone; continuations capture a clone to settle the node from wherever the upstream
/// answers.
pub(crate) struct Core<T> {
    pub(crate) ctx: Context,
    cell: Arc<StateCell<T>>,
    upstreams: Arc<[CancelHook]>,
}

impl<T> Clone for Core<T> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            cell: self.cell.clone(),
            upstreams: self.upstreams.clone(),
        }
    }
}

impl<T: Element> Core<T> {
    pub(crate) fn new(ctx: Context, upstreams: Vec<CancelHook>) -> Self {
        Self {
            ctx,
            cell: Arc::new(StateCell::new()),
            upstreams: upstreams.into(),
        }
    }

    #[inline]
    pub(crate) fn frozen(&self) -> Option<Arc<Frozen<T>>> {
        self.cell.settled()
    }

    pub(crate) fn status(&self) -> Status {
        match self.frozen() {
            Some(frozen) => crate::Materializer::status(&*frozen),
            None => Status::Pending,
        }
    }

    pub(crate) fn enqueue(&self, replay: Replay<T>) -> Admission {
        self.cell.enqueue(replay)
    }

    /// Queues `replay` until the node settles, calling `start` on first demand.
    pub(crate) fn demand(&self, replay: Replay<T>, start: impl FnOnce(Core<T>)) {
        if self.enqueue(replay) == Admission::Start {
            start(self.clone());
        }
    }

    /// Queues a request for the full element list, calling `start` on first demand.
    pub(crate) fn materialize(&self, consumer: Consumer<Elements<T>>, start: impl FnOnce(Core<T>)) {
        self.demand(
            Box::new(move |frozen| crate::Materializer::all_elements(&**frozen, consumer)),
            start,
        );
    }

    /// Builds the consumer that settles the node from an upstream answer.
    pub(crate) fn settle_from<U: 'static>(
        &self,
        build: impl FnOnce(U) -> Result<Vec<T>, Error> + Send + 'static,
    ) -> Consumer<U> {
        let core = self.clone();
        Consumer::new(move |result: Result<U, Error>| match result.and_then(build) {
            Ok(elements) => core.done(elements),
            Err(error) => {
                core.fail(error);
            }
        })
    }

    /// Current weight of `op`, given the weight of the upstream work it would trigger.
    ///
    /// Backward scans materialize the node first, so they cost what a full materialization does.
    pub(crate) fn weight(&self, op: Op, upstream: impl FnOnce(Op) -> Weight) -> Weight {
        if op == Op::Cancel || self.frozen().is_some() {
            return Weight::ONE;
        }
        match op {
            Op::ScanBackward => upstream(Op::Elements),
            op => upstream(op),
        }
    }

    pub(crate) fn try_elements(&self) -> Result<Elements<T>, Error> {
        match self.frozen() {
            Some(frozen) => frozen.outcome().clone(),
            None => Err(Error::Unsupported("elements are not materialized yet")),
        }
    }

    pub(crate) fn done(&self, elements: Vec<T>) {
        if self.cell.settle(Frozen::from_vec(self.ctx.clone(), elements)) {
            log::trace!("'{}': node materialized", self.ctx.task_id());
        }
    }

    /// Settles the node after an upstream failure and returns the error to report.
    ///
    /// The error is upgraded to a cancellation if the graph has been cancelled. If the node had
    /// already settled with an error, that error is reported instead, so every waiter sees the
    /// same outcome.
    pub(crate) fn fail(&self, error: Error) -> Error {
        let error = self.ctx.escalate(error);
        if self.cell.settle(Frozen::new(self.ctx.clone(), Err(error.clone()))) {
            log::trace!("'{}': node settled with error: {error}", self.ctx.task_id());
            return error;
        }
        match self.frozen().map(|f| f.outcome().clone()) {
            Some(Err(settled)) => settled,
            _ => error,
        }
    }

    /// Cancels the node: latches the graph's cancellation cell, cancels every upstream and
    /// settles as cancelled. Does nothing once the node has settled.
    pub(crate) fn cancel(&self, cause: Cancellation) {
        if self.frozen().is_some() {
            return;
        }
        self.ctx.cancellation().set(cause.clone());
        let cause = self.ctx.cancellation().get().cloned().unwrap_or(cause);
        log::debug!("'{}': cancelling node: {cause}", self.ctx.task_id());
        for upstream in self.upstreams.iter() {
            upstream(&cause);
        }
        self.cell
            .settle(Frozen::new(self.ctx.clone(), Err(Error::Cancelled(cause))));
    }

    /// Wraps `consumer` for a request sent upstream.
    ///
    /// Successful answers go through `then`; failures settle the node and reach `consumer` as the
    /// node's final error.
    pub(crate) fn relay<U, R>(
        &self,
        consumer: Consumer<R>,
        then: impl FnOnce(U, Consumer<R>) + Send + 'static,
    ) -> Consumer<U>
    where
        U: 'static,
        R: 'static,
    {
        let core = self.clone();
        Consumer::new(move |result| match result {
            Ok(value) => then(value, consumer),
            Err(error) => {
                let error = core.fail(error);
                consumer.deliver(&core.ctx, Err(error));
            }
        })
    }

    /// Like [`Core::relay`], for answers that only need translating.
    ///
    /// A translation error (a panicking user function) settles the node like an upstream failure.
    pub(crate) fn relay_map<U, R>(
        &self,
        consumer: Consumer<R>,
        map: impl FnOnce(U) -> Result<R, Error> + Send + 'static,
    ) -> Consumer<U>
    where
        U: 'static,
        R: 'static,
    {
        let core = self.clone();
        self.relay(consumer, move |value, consumer| {
            let result = map(value).map_err(|error| core.fail(error));
            consumer.deliver(&core.ctx, result);
        })
    }

    #[inline]
    pub(crate) fn reply<R>(&self, consumer: Consumer<R>, result: Result<R, Error>) {
        consumer.deliver(&self.ctx, result);
    }
}

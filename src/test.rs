//! Internal unit test utilities.

use std::{collections::HashMap, sync::Arc};

use crate::{
    channel::{scan_fn, Consumer, Indexed, ScanPredicate},
    materializer::{Element, Elements, Materializer, MaterializerRef, Op, Status},
    scheduler::{LocalScheduler, Weight},
    sync::Mutex,
    terminal::Frozen,
    Cancellation, Context, Error,
};

/// A [`LocalScheduler`]-backed context plus helpers that run requests to completion.
pub struct Harness {
    sched: Arc<LocalScheduler>,
    ctx: Context,
}

/// A request submitted but not yet necessarily answered.
pub struct Pending<R>(Arc<Mutex<Option<Result<R, Error>>>>);

impl<R> Pending<R> {
    pub fn take(&self) -> Option<Result<R, Error>> {
        self.0.lock().take()
    }

    pub fn is_resolved(&self) -> bool {
        self.0.lock().is_some()
    }
}

impl Harness {
    pub fn new() -> Self {
        let sched = Arc::new(LocalScheduler::new());
        let ctx = Context::new(sched.clone());
        Self { sched, ctx }
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub fn scheduler(&self) -> &Arc<LocalScheduler> {
        &self.sched
    }

    pub fn run(&self) -> usize {
        self.sched.run_until_idle()
    }

    /// Issues a request without draining the scheduler.
    pub fn submit<R: Send + 'static>(&self, request: impl FnOnce(Consumer<R>)) -> Pending<R> {
        let slot = Arc::new(Mutex::new(None));
        let s = slot.clone();
        request(Consumer::new(move |result| {
            let mut slot = s.lock();
            assert!(slot.is_none(), "request answered twice");
            *slot = Some(result);
        }));
        Pending(slot)
    }

    /// Issues a request and drains the scheduler until it is answered.
    pub fn resolve<R: Send + 'static>(&self, request: impl FnOnce(Consumer<R>)) -> Result<R, Error> {
        let pending = self.submit(request);
        self.run();
        pending.take().expect("request was never answered")
    }

    pub fn size<T: Element>(&self, m: &MaterializerRef<T>) -> Result<usize, Error> {
        self.resolve(|c| m.size(c))
    }

    pub fn is_empty<T: Element>(&self, m: &MaterializerRef<T>) -> Result<bool, Error> {
        self.resolve(|c| m.is_empty(c))
    }

    pub fn contains<T: Element>(&self, m: &MaterializerRef<T>, element: T) -> Result<bool, Error> {
        self.resolve(|c| m.contains(element, c))
    }

    pub fn element<T: Element>(&self, m: &MaterializerRef<T>, index: isize) -> Result<Option<T>, Error> {
        self.resolve(|c| m.element_at(index, c)).map(Indexed::into_element)
    }

    pub fn all<T: Element>(&self, m: &MaterializerRef<T>) -> Result<Elements<T>, Error> {
        self.resolve(|c| m.all_elements(c))
    }

    pub fn vec<T: Element>(&self, m: &MaterializerRef<T>) -> Vec<T> {
        self.all(m).expect("materialization failed").to_vec()
    }

    /// Runs a full forward scan, returning the visited `(index, element)` pairs and the size.
    pub fn scan_forward<T: Element>(
        &self,
        m: &MaterializerRef<T>,
        from: isize,
    ) -> Result<(Vec<(usize, T)>, usize), Error> {
        self.scan(|p| m.scan_forward(from, p))
    }

    pub fn scan_backward<T: Element>(
        &self,
        m: &MaterializerRef<T>,
        from: isize,
    ) -> Result<(Vec<(usize, T)>, usize), Error> {
        self.scan(|p| m.scan_backward(from, p))
    }

    fn scan<T: Element>(
        &self,
        start: impl FnOnce(Box<dyn ScanPredicate<T>>),
    ) -> Result<(Vec<(usize, T)>, usize), Error> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let result = self.resolve(|c: Consumer<usize>| {
            let ctx = self.ctx.clone();
            start(scan_fn(
                move |_, index, element: &T| {
                    s.lock().push((index, element.clone()));
                    true
                },
                move |done| c.deliver(&ctx, done),
            ))
        })?;
        let visited = std::mem::take(&mut *seen.lock());
        Ok((visited, result))
    }
}

/// An upstream that records the requests it receives.
///
/// With `deferred` set, every answer is produced from a scheduled task instead of inline, which
/// exercises the asynchronous paths of the nodes built on top of it.
pub struct Probe<T> {
    inner: Frozen<T>,
    deferred: bool,
    calls: Mutex<HashMap<&'static str, usize>>,
    cancelled: Mutex<Option<Cancellation>>,
}

impl<T: Element> Probe<T> {
    pub fn new(ctx: &Context, elements: Vec<T>, deferred: bool) -> Arc<Self> {
        Self::with_outcome(ctx, Ok(elements.into()), deferred)
    }

    pub fn failing(ctx: &Context, error: Error, deferred: bool) -> Arc<Self> {
        Self::with_outcome(ctx, Err(error), deferred)
    }

    fn with_outcome(ctx: &Context, outcome: Result<Elements<T>, Error>, deferred: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: Frozen::new(ctx.clone(), outcome),
            deferred,
            calls: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(None),
        })
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.lock().is_some()
    }

    fn record(&self, op: &'static str) {
        *self.calls.lock().entry(op).or_default() += 1;
    }

    fn answer(self: &Arc<Self>, op: &'static str, f: impl FnOnce(&Frozen<T>) + Send + 'static) {
        self.record(op);
        if self.deferred {
            let this = self.clone();
            self.inner
                .context()
                .schedule(Weight::ONE, move || f(&this.inner), || {});
        } else {
            f(&self.inner);
        }
    }
}

/// Lets a `Probe` be used as an upstream while the test keeps its concrete handle.
pub fn upstream<T: Element>(probe: &Arc<Probe<T>>) -> MaterializerRef<T> {
    Arc::new(ProbeRef(probe.clone()))
}

struct ProbeRef<T>(Arc<Probe<T>>);

impl<T: Element> Materializer<T> for ProbeRef<T> {
    fn context(&self) -> &Context {
        self.0.inner.context()
    }

    fn known_size(&self) -> Option<usize> {
        None
    }

    fn status(&self) -> Status {
        if self.0.was_cancelled() {
            Status::Cancelled
        } else {
            Status::Pending
        }
    }

    fn weight(&self, _op: Op) -> Weight {
        Weight::new(4)
    }

    fn cancel(&self, cause: Cancellation) {
        self.0.record("cancel");
        *self.0.cancelled.lock() = Some(cause);
    }

    fn size(&self, consumer: Consumer<usize>) {
        self.0.answer("size", move |f| f.size(consumer));
    }

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<T>>) {
        self.0.answer("element_at", move |f| f.element_at(index, consumer));
    }

    fn all_elements(&self, consumer: Consumer<Elements<T>>) {
        self.0.answer("all_elements", move |f| f.all_elements(consumer));
    }

    fn scan_forward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        self.0.answer("scan_forward", move |f| f.scan_forward(from, predicate));
    }

    fn scan_backward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        self.0.answer("scan_backward", move |f| f.scan_backward(from, predicate));
    }
}

//! Materializers computed by a single deferred job.
//!
//! Searches, folds and set predicates cannot answer anything useful before they have run, so
//! every request is queued until one scheduled job settles the node into a terminal result.
//! From then on all queries are served synchronously by that terminal.

use crate::{
    arith,
    channel::{Consumer, Indexed, ScanPredicate},
    materializer::{scan_start, CancelHook, Element, Elements, Materializer, Op, Status},
    scheduler::Weight,
    state::{Admission, Core, Replay},
    sync::Mutex,
    Cancellation, Context, Error,
};

type Job<T> = Box<dyn FnOnce(Core<T>) + Send>;

/// A materializer whose result is produced by one job, started on first demand.
///
/// The job receives the node's [`Core`] and must eventually settle it through `Core::done` or
/// `Core::fail`.
pub struct Deferred<T> {
    core: Core<T>,
    job: Mutex<Option<Job<T>>>,
    size_hint: Option<usize>,
    weight: Weight,
}

impl<T: Element> Deferred<T> {
    /// `size_hint` is the result size if it is known upfront (a fold always yields exactly one
    /// element). It is only reported through `known_size`: `size` and `is_empty` still wait for
    /// the job, since a failing job has no size.
    pub(crate) fn new<J>(
        ctx: Context,
        upstreams: Vec<CancelHook>,
        size_hint: Option<usize>,
        weight: Weight,
        job: J,
    ) -> Self
    where
        J: FnOnce(Core<T>) + Send + 'static,
    {
        Self {
            core: Core::new(ctx, upstreams),
            job: Mutex::new(Some(Box::new(job))),
            size_hint,
            weight,
        }
    }

    fn defer(&self, replay: Replay<T>) {
        if self.core.enqueue(replay) == Admission::Start {
            self.launch();
        }
    }

    fn launch(&self) {
        let Some(job) = self.job.lock().take() else {
            return;
        };
        log::trace!("'{}': starting deferred job", self.core.ctx.task_id());
        let core = self.core.clone();
        let interrupted = self.core.clone();
        self.core.ctx.schedule(
            self.weight,
            move || job(core),
            move || interrupted.cancel(Cancellation::interrupted()),
        );
    }
}

impl<T: Element> Materializer<T> for Deferred<T> {
    fn context(&self) -> &Context {
        &self.core.ctx
    }

    fn known_size(&self) -> Option<usize> {
        match self.core.frozen() {
            Some(frozen) => frozen.known_size(),
            None => self.size_hint,
        }
    }

    fn status(&self) -> Status {
        self.core.status()
    }

    fn weight(&self, op: Op) -> Weight {
        if self.core.frozen().is_some() {
            return Weight::ONE;
        }
        match op {
            Op::Cancel => Weight::ONE,
            _ => self.weight,
        }
    }

    fn cancel(&self, cause: Cancellation) {
        self.core.cancel(cause);
    }

    fn size(&self, consumer: Consumer<usize>) {
        self.defer(Box::new(move |f| f.size(consumer)));
    }

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<T>>) {
        if let Err(error) = arith::checked_index(index) {
            return self.core.reply(consumer, Err(error));
        }
        self.defer(Box::new(move |f| f.element_at(index, consumer)));
    }

    fn all_elements(&self, consumer: Consumer<Elements<T>>) {
        self.defer(Box::new(move |f| f.all_elements(consumer)));
    }

    fn scan_forward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        if let Some((_, predicate)) = scan_start(&self.core.ctx, from, predicate) {
            self.defer(Box::new(move |f| f.scan_forward(from, predicate)));
        }
    }

    fn scan_backward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        if let Some((_, predicate)) = scan_start(&self.core.ctx, from, predicate) {
            self.defer(Box::new(move |f| f.scan_backward(from, predicate)));
        }
    }

    fn is_empty(&self, consumer: Consumer<bool>) {
        self.defer(Box::new(move |f| f.is_empty(consumer)));
    }

    fn contains(&self, element: T, consumer: Consumer<bool>) {
        self.defer(Box::new(move |f| f.contains(element, consumer)));
    }

    fn try_elements(&self) -> Result<Elements<T>, Error> {
        match self.core.frozen() {
            Some(frozen) => frozen.try_elements(),
            None => Err(Error::Unsupported("deferred result is not materialized yet")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{scheduler::Scheduler, test::Harness, MaterializerRef};

    fn counting(h: &Harness, runs: &Arc<AtomicUsize>, size_hint: Option<usize>) -> MaterializerRef<u32> {
        let runs = runs.clone();
        Arc::new(Deferred::new(h.ctx().clone(), Vec::new(), size_hint, Weight::new(3), move |core| {
            runs.fetch_add(1, Ordering::SeqCst);
            core.done(vec![10, 20]);
        }))
    }

    #[test]
    fn job_runs_once_for_many_waiters() {
        let h = Harness::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let m = counting(&h, &runs, None);
        assert!(matches!(m.try_elements(), Err(Error::Unsupported(_))));

        let a = h.submit(|c| m.all_elements(c));
        let b = h.submit(|c| m.element_at(1, c));
        let c = h.submit(|c| m.size(c));
        assert_eq!(m.status(), Status::Pending);
        assert_eq!(m.weight(Op::Elements), Weight::new(3));
        h.run();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(&*a.take().unwrap().unwrap(), &[10, 20]);
        assert_eq!(b.take().unwrap().unwrap().into_element(), Some(20));
        assert_eq!(c.take().unwrap().unwrap(), 2);
        assert_eq!(h.size(&m).unwrap(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(m.weight(Op::Elements), Weight::ONE);
    }

    #[test]
    fn size_hint_is_reported_but_size_waits_for_job() {
        let h = Harness::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let m = counting(&h, &runs, Some(2));
        assert_eq!(m.known_size(), Some(2));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(h.size(&m).unwrap(), 2);
        assert!(!h.is_empty(&m).unwrap());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_job_has_no_size() {
        let h = Harness::new();
        let m: MaterializerRef<u32> = Arc::new(Deferred::new(
            h.ctx().clone(),
            Vec::new(),
            Some(1),
            Weight::new(3),
            |core: Core<u32>| {
                core.fail(Error::failure("broken"));
            },
        ));
        assert!(matches!(h.size(&m), Err(Error::Failed(_))));
        assert!(matches!(h.is_empty(&m), Err(Error::Failed(_))));
        assert!(matches!(h.all(&m), Err(Error::Failed(_))));
    }

    #[test]
    fn negative_index_does_not_start_job() {
        let h = Harness::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let m = counting(&h, &runs, None);
        assert!(matches!(h.element(&m, -3), Err(Error::NegativeIndex(-3))));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(m.status(), Status::Pending);
    }

    #[test]
    fn interrupted_job_cancels_waiters() {
        let h = Harness::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let m = counting(&h, &runs, None);
        let waiter = h.submit(|c| m.all_elements(c));
        assert!(h.scheduler().interrupt_task(h.ctx().task_id()));
        assert!(waiter.take().unwrap().unwrap_err().is_cancelled());
        assert_eq!(m.status(), Status::Cancelled);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}

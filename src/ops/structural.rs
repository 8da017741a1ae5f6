//! Single-element insertions: append, prepend and insert-after.
//!
//! These nodes answer index and size queries by translating them onto the wrapped node, and only
//! materialize themselves when the whole list (or a backward scan) is requested.

use crate::{
    arith,
    channel::{test_isolated, Consumer, Indexed, ScanPredicate},
    materializer::{cancel_hook, scan_start, Element, Elements, Materializer, MaterializerRef, Op, Status},
    scheduler::Weight,
    state::Core,
    Cancellation, Context, Error,
};

use super::scan::Shift;

/// The wrapped sequence followed by one more element.
pub struct Append<T> {
    core: Core<T>,
    wrapped: MaterializerRef<T>,
    element: T,
}

impl<T: Element> Append<T> {
    pub fn new(wrapped: MaterializerRef<T>, element: T) -> Self {
        Self {
            core: Core::new(wrapped.context().clone(), vec![cancel_hook(&wrapped)]),
            wrapped,
            element,
        }
    }

    fn start(&self, core: Core<T>) {
        let element = self.element.clone();
        self.wrapped.all_elements(core.settle_from(move |elements: Elements<T>| {
            let mut all = elements.to_vec();
            all.push(element);
            Ok(all)
        }));
    }
}

impl<T: Element> Materializer<T> for Append<T> {
    fn context(&self) -> &Context {
        &self.core.ctx
    }

    fn known_size(&self) -> Option<usize> {
        match self.core.frozen() {
            Some(frozen) => frozen.known_size(),
            None => arith::hint_add(self.wrapped.known_size(), 1),
        }
    }

    fn status(&self) -> Status {
        self.core.status()
    }

    fn weight(&self, op: Op) -> Weight {
        match op {
            Op::Empty => Weight::ONE,
            op => self.core.weight(op, |op| self.wrapped.weight(op)),
        }
    }

    fn cancel(&self, cause: Cancellation) {
        self.core.cancel(cause);
    }

    fn size(&self, consumer: Consumer<usize>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.size(consumer);
        }
        self.wrapped
            .size(self.core.relay_map(consumer, |size| Ok(arith::add(size, 1))));
    }

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<T>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.element_at(index, consumer);
        }
        let requested = match arith::checked_index(index) {
            Ok(requested) => requested,
            Err(error) => return self.core.reply(consumer, Err(error)),
        };
        let extra = self.element.clone();
        self.wrapped.element_at(
            index,
            self.core.relay_map(consumer, move |found| {
                Ok(match found {
                    Indexed::Element { size, index, element } => Indexed::Element {
                        size: arith::hint_add(size, 1),
                        index,
                        element,
                    },
                    Indexed::End { size } if size == requested => Indexed::Element {
                        size: Some(arith::add(size, 1)),
                        index: requested,
                        element: extra,
                    },
                    Indexed::End { size } => Indexed::End {
                        size: arith::add(size, 1),
                    },
                })
            }),
        );
    }

    fn all_elements(&self, consumer: Consumer<Elements<T>>) {
        self.core.materialize(consumer, |core| self.start(core));
    }

    fn scan_forward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.scan_forward(from, predicate);
        }
        let Some((start, predicate)) = scan_start(&self.core.ctx, from, predicate) else {
            return;
        };
        self.wrapped.scan_forward(
            from,
            Box::new(AppendScan {
                inner: predicate,
                core: self.core.clone(),
                element: self.element.clone(),
                from: start,
            }),
        );
    }

    fn scan_backward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        let Some((_, predicate)) = scan_start(&self.core.ctx, from, predicate) else {
            return;
        };
        self.core
            .demand(Box::new(move |f| f.scan_backward(from, predicate)), |core| self.start(core));
    }

    fn is_empty(&self, consumer: Consumer<bool>) {
        match self.core.frozen() {
            Some(frozen) => frozen.is_empty(consumer),
            None => self.core.reply(consumer, Ok(false)),
        }
    }

    fn try_elements(&self) -> Result<Elements<T>, Error> {
        self.core.try_elements()
    }
}

struct AppendScan<T> {
    inner: Box<dyn ScanPredicate<T>>,
    core: Core<T>,
    element: T,
    from: usize,
}

impl<T: Element> ScanPredicate<T> for AppendScan<T> {
    fn test(&mut self, size: Option<usize>, index: usize, element: &T) -> bool {
        self.inner.test(arith::hint_add(size, 1), index, element)
    }

    fn complete(self: Box<Self>, size: usize) {
        let AppendScan {
            mut inner,
            element,
            from,
            ..
        } = *self;
        let total = arith::add(size, 1);
        if from <= size && !inner.test(Some(total), size, &element) {
            return;
        }
        inner.complete(total);
    }

    fn error(self: Box<Self>, error: Error) {
        let error = self.core.fail(error);
        self.inner.error(error);
    }
}

/// One element followed by the wrapped sequence.
pub struct Prepend<T> {
    core: Core<T>,
    wrapped: MaterializerRef<T>,
    element: T,
}

impl<T: Element> Prepend<T> {
    pub fn new(wrapped: MaterializerRef<T>, element: T) -> Self {
        Self {
            core: Core::new(wrapped.context().clone(), vec![cancel_hook(&wrapped)]),
            wrapped,
            element,
        }
    }

    fn start(&self, core: Core<T>) {
        let element = self.element.clone();
        self.wrapped.all_elements(core.settle_from(move |elements: Elements<T>| {
            let mut all = Vec::with_capacity(arith::add(elements.len(), 1));
            all.push(element);
            all.extend(elements.iter().cloned());
            Ok(all)
        }));
    }
}

impl<T: Element> Materializer<T> for Prepend<T> {
    fn context(&self) -> &Context {
        &self.core.ctx
    }

    fn known_size(&self) -> Option<usize> {
        match self.core.frozen() {
            Some(frozen) => frozen.known_size(),
            None => arith::hint_add(self.wrapped.known_size(), 1),
        }
    }

    fn status(&self) -> Status {
        self.core.status()
    }

    fn weight(&self, op: Op) -> Weight {
        match op {
            Op::Empty => Weight::ONE,
            op => self.core.weight(op, |op| self.wrapped.weight(op)),
        }
    }

    fn cancel(&self, cause: Cancellation) {
        self.core.cancel(cause);
    }

    fn size(&self, consumer: Consumer<usize>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.size(consumer);
        }
        self.wrapped
            .size(self.core.relay_map(consumer, |size| Ok(arith::add(size, 1))));
    }

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<T>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.element_at(index, consumer);
        }
        let requested = match arith::checked_index(index) {
            Ok(requested) => requested,
            Err(error) => return self.core.reply(consumer, Err(error)),
        };
        if requested == 0 {
            let found = Indexed::Element {
                size: arith::hint_add(self.wrapped.known_size(), 1),
                index: 0,
                element: self.element.clone(),
            };
            return self.core.reply(consumer, Ok(found));
        }
        self.wrapped.element_at(
            arith::to_request(requested - 1),
            self.core.relay_map(consumer, move |found| {
                Ok(match found {
                    Indexed::Element { size, element, .. } => Indexed::Element {
                        size: arith::hint_add(size, 1),
                        index: requested,
                        element,
                    },
                    Indexed::End { size } => Indexed::End {
                        size: arith::add(size, 1),
                    },
                })
            }),
        );
    }

    fn all_elements(&self, consumer: Consumer<Elements<T>>) {
        self.core.materialize(consumer, |core| self.start(core));
    }

    fn scan_forward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.scan_forward(from, predicate);
        }
        let Some((start, mut predicate)) = scan_start(&self.core.ctx, from, predicate) else {
            return;
        };
        if start == 0 {
            let size = arith::hint_add(self.wrapped.known_size(), 1);
            if !test_isolated(&self.core.ctx, &mut predicate, size, 0, &self.element) {
                return;
            }
        }
        self.wrapped.scan_forward(
            arith::to_request(start.saturating_sub(1)),
            Shift::by(predicate, &self.core, 1),
        );
    }

    fn scan_backward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        let Some((_, predicate)) = scan_start(&self.core.ctx, from, predicate) else {
            return;
        };
        self.core
            .demand(Box::new(move |f| f.scan_backward(from, predicate)), |core| self.start(core));
    }

    fn is_empty(&self, consumer: Consumer<bool>) {
        match self.core.frozen() {
            Some(frozen) => frozen.is_empty(consumer),
            None => self.core.reply(consumer, Ok(false)),
        }
    }

    fn try_elements(&self) -> Result<Elements<T>, Error> {
        self.core.try_elements()
    }
}

/// Size of the wrapped sequence once `position` has been considered for insertion.
///
/// The element is only inserted if the sequence has at least `position` elements.
#[inline]
fn grown(position: usize, size: usize) -> usize {
    if position <= size {
        arith::add(size, 1)
    } else {
        size
    }
}

/// The wrapped sequence with one element inserted after its first `position` elements.
pub struct InsertAfter<T> {
    core: Core<T>,
    wrapped: MaterializerRef<T>,
    position: usize,
    element: T,
}

impl<T: Element> InsertAfter<T> {
    pub fn new(wrapped: MaterializerRef<T>, position: usize, element: T) -> Self {
        Self {
            core: Core::new(wrapped.context().clone(), vec![cancel_hook(&wrapped)]),
            wrapped,
            position,
            element,
        }
    }

    fn start(&self, core: Core<T>) {
        let (position, element) = (self.position, self.element.clone());
        self.wrapped.all_elements(core.settle_from(move |elements: Elements<T>| {
            let mut all = elements.to_vec();
            if position <= all.len() {
                all.insert(position, element);
            }
            Ok(all)
        }));
    }
}

impl<T: Element> Materializer<T> for InsertAfter<T> {
    fn context(&self) -> &Context {
        &self.core.ctx
    }

    fn known_size(&self) -> Option<usize> {
        match self.core.frozen() {
            Some(frozen) => frozen.known_size(),
            None => self.wrapped.known_size().map(|size| grown(self.position, size)),
        }
    }

    fn status(&self) -> Status {
        self.core.status()
    }

    fn weight(&self, op: Op) -> Weight {
        self.core.weight(op, |op| self.wrapped.weight(op))
    }

    fn cancel(&self, cause: Cancellation) {
        self.core.cancel(cause);
    }

    fn size(&self, consumer: Consumer<usize>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.size(consumer);
        }
        let position = self.position;
        self.wrapped
            .size(self.core.relay_map(consumer, move |size| Ok(grown(position, size))));
    }

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<T>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.element_at(index, consumer);
        }
        let requested = match arith::checked_index(index) {
            Ok(requested) => requested,
            Err(error) => return self.core.reply(consumer, Err(error)),
        };
        let position = self.position;
        let resize = move |size: Option<usize>| size.map(|size| grown(position, size));

        if requested < position {
            // Ends before the insertion point are reported as they are.
            self.wrapped.element_at(
                index,
                self.core.relay_map(consumer, move |found| {
                    Ok(match found {
                        Indexed::Element { size, index, element } => Indexed::Element {
                            size: resize(size),
                            index,
                            element,
                        },
                        end => end,
                    })
                }),
            );
        } else if requested == position {
            if position == 0 {
                let found = Indexed::Element {
                    size: resize(self.wrapped.known_size()),
                    index: 0,
                    element: self.element.clone(),
                };
                return self.core.reply(consumer, Ok(found));
            }
            // The element exists if the wrapped sequence reaches the insertion point.
            let inserted = self.element.clone();
            self.wrapped.element_at(
                arith::to_request(position - 1),
                self.core.relay_map(consumer, move |found| {
                    Ok(match found {
                        Indexed::Element { size, .. } => Indexed::Element {
                            size: resize(size),
                            index: position,
                            element: inserted,
                        },
                        end => end,
                    })
                }),
            );
        } else {
            self.wrapped.element_at(
                arith::to_request(requested - 1),
                self.core.relay_map(consumer, move |found| {
                    Ok(match found {
                        Indexed::Element { size, element, .. } => Indexed::Element {
                            size: resize(size),
                            index: requested,
                            element,
                        },
                        Indexed::End { size } => Indexed::End {
                            size: grown(position, size),
                        },
                    })
                }),
            );
        }
    }

    fn all_elements(&self, consumer: Consumer<Elements<T>>) {
        self.core.materialize(consumer, |core| self.start(core));
    }

    fn scan_forward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.scan_forward(from, predicate);
        }
        let Some((start, predicate)) = scan_start(&self.core.ctx, from, predicate) else {
            return;
        };
        let pending = start <= self.position;
        let upstream_start = if pending { start } else { start - 1 };
        self.wrapped.scan_forward(
            arith::to_request(upstream_start),
            Box::new(InsertScan {
                inner: predicate,
                core: self.core.clone(),
                position: self.position,
                element: self.element.clone(),
                pending,
            }),
        );
    }

    fn scan_backward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        let Some((_, predicate)) = scan_start(&self.core.ctx, from, predicate) else {
            return;
        };
        self.core
            .demand(Box::new(move |f| f.scan_backward(from, predicate)), |core| self.start(core));
    }

    fn is_empty(&self, consumer: Consumer<bool>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.is_empty(consumer);
        }
        if self.position == 0 {
            return self.core.reply(consumer, Ok(false));
        }
        self.wrapped.is_empty(self.core.relay_map(consumer, Ok));
    }

    fn try_elements(&self) -> Result<Elements<T>, Error> {
        self.core.try_elements()
    }
}

struct InsertScan<T> {
    inner: Box<dyn ScanPredicate<T>>,
    core: Core<T>,
    position: usize,
    element: T,
    /// The inserted element has not been visited yet.
    pending: bool,
}

impl<T: Element> ScanPredicate<T> for InsertScan<T> {
    fn test(&mut self, size: Option<usize>, index: usize, element: &T) -> bool {
        let size = size.map(|size| grown(self.position, size));
        if self.pending && index == self.position {
            self.pending = false;
            if !self.inner.test(size, index, &self.element) {
                return false;
            }
        }
        let index = if index >= self.position {
            arith::add(index, 1)
        } else {
            index
        };
        self.inner.test(size, index, element)
    }

    fn complete(self: Box<Self>, size: usize) {
        let InsertScan {
            mut inner,
            position,
            element,
            pending,
            ..
        } = *self;
        if pending && size == position && !inner.test(Some(arith::add(size, 1)), size, &element) {
            return;
        }
        inner.complete(grown(position, size));
    }

    fn error(self: Box<Self>, error: Error) {
        let error = self.core.fail(error);
        self.inner.error(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ops::Compose,
        terminal::list,
        test::{upstream, Harness, Probe},
    };

    #[test]
    fn append_translates_the_end() {
        let h = Harness::new();
        let m = list(h.ctx(), vec![1, 2, 3]).append(4);
        assert_eq!(m.known_size(), Some(4));
        assert_eq!(h.element(&m, 3).unwrap(), Some(4));
        assert_eq!(h.element(&m, 1).unwrap(), Some(2));
        assert_eq!(h.resolve(|c| m.element_at(6, c)).unwrap(), Indexed::End { size: 4 });
        assert_eq!(h.size(&m).unwrap(), 4);
        assert_eq!(h.scan_forward(&m, 2).unwrap(), (vec![(2, 3), (3, 4)], 4));
        assert_eq!(h.scan_backward(&m, 9).unwrap().0, [(3, 4), (2, 3), (1, 2), (0, 1)]);
        assert_eq!(h.vec(&m), [1, 2, 3, 4]);
        assert_eq!(m.status(), Status::Done);
    }

    #[test]
    fn append_to_pending_upstream() {
        let h = Harness::new();
        let probe = Probe::new(h.ctx(), vec!['a'], true);
        let m = upstream(&probe).append('b');
        assert_eq!(m.known_size(), None);
        assert_eq!(h.element(&m, 1).unwrap(), Some('b'));
        assert!(!h.is_empty(&m).unwrap());
        assert_eq!(h.vec(&m), ['a', 'b']);
        assert_eq!(h.vec(&m), ['a', 'b']);
        assert_eq!(probe.calls("all_elements"), 1);
    }

    #[test]
    fn prepend_shifts_indices() {
        let h = Harness::new();
        let m = list(h.ctx(), vec![1, 2, 3]).prepend(0);
        assert_eq!(h.element(&m, 0).unwrap(), Some(0));
        assert_eq!(h.element(&m, 2).unwrap(), Some(2));
        assert_eq!(h.resolve(|c| m.element_at(4, c)).unwrap(), Indexed::End { size: 4 });
        assert_eq!(h.scan_forward(&m, 0).unwrap(), (vec![(0, 0), (1, 1), (2, 2), (3, 3)], 4));
        assert_eq!(h.scan_forward(&m, 3).unwrap(), (vec![(3, 3)], 4));
        assert_eq!(h.size(&m).unwrap(), 4);
        assert_eq!(h.vec(&m), [0, 1, 2, 3]);
    }

    #[test]
    fn insert_after_within_and_past_the_end() {
        let h = Harness::new();
        let m = list(h.ctx(), vec![1, 2, 3]).insert_after(1, 9);
        assert_eq!(m.known_size(), Some(4));
        let found: Vec<_> = (0..5).map(|i| h.element(&m, i).unwrap()).collect();
        assert_eq!(found, [Some(1), Some(9), Some(2), Some(3), None]);
        assert_eq!(h.scan_forward(&m, 0).unwrap().0, [(0, 1), (1, 9), (2, 2), (3, 3)]);
        assert_eq!(h.scan_forward(&m, 2).unwrap().0, [(2, 2), (3, 3)]);

        let at_end = list(h.ctx(), vec![1, 2]).insert_after(2, 9);
        assert_eq!(h.scan_forward(&at_end, 0).unwrap(), (vec![(0, 1), (1, 2), (2, 9)], 3));
        assert_eq!(h.element(&at_end, 2).unwrap(), Some(9));

        let beyond = list(h.ctx(), vec![1, 2]).insert_after(5, 9);
        assert_eq!(beyond.known_size(), Some(2));
        assert_eq!(h.resolve(|c| beyond.element_at(5, c)).unwrap(), Indexed::End { size: 2 });
        assert_eq!(h.resolve(|c| beyond.element_at(7, c)).unwrap(), Indexed::End { size: 2 });
        assert_eq!(h.vec(&beyond), [1, 2]);

        let empty = list::<u8>(h.ctx(), Vec::new()).insert_after(1, 9);
        assert!(h.is_empty(&empty).unwrap());
    }

    #[test]
    fn negative_index_skips_upstream() {
        let h = Harness::new();
        let probe = Probe::new(h.ctx(), vec![1, 2], false);
        for m in [
            upstream(&probe).append(3),
            upstream(&probe).prepend(0),
            upstream(&probe).insert_after(1, 7),
        ] {
            assert!(matches!(h.element(&m, -1), Err(Error::NegativeIndex(-1))));
            assert!(matches!(h.scan_forward(&m, -2), Err(Error::NegativeIndex(-2))));
        }
        assert_eq!(probe.total_calls(), 0);
    }

    #[test]
    fn upstream_failure_settles_node() {
        let h = Harness::new();
        let probe = Probe::<u8>::failing(h.ctx(), Error::failure("disk on fire"), true);
        let m = upstream(&probe).prepend(1);
        assert!(matches!(h.size(&m), Err(Error::Failed(_))));
        assert_eq!(m.status(), Status::Failed);
        assert!(matches!(h.element(&m, 0), Err(Error::Failed(_))));
    }
}

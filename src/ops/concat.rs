//! Concatenation of two sequences.

use crate::{
    arith,
    channel::{Consumer, Indexed, ScanPredicate},
    materializer::{cancel_hook, scan_start, Element, Elements, Materializer, MaterializerRef, Op, Status},
    scheduler::Weight,
    state::Core,
    Cancellation, Context, Error,
};

use super::scan::Shift;

/// The elements of `first` followed by those of `second`.
///
/// Indices past the end of `first` are looked up in `second`, shifted by the size `first` turned
/// out to have.
pub struct AppendAll<T> {
    core: Core<T>,
    first: MaterializerRef<T>,
    second: MaterializerRef<T>,
}

impl<T: Element> AppendAll<T> {
    pub fn new(first: MaterializerRef<T>, second: MaterializerRef<T>) -> Self {
        Self {
            core: Core::new(
                first.context().clone(),
                vec![cancel_hook(&first), cancel_hook(&second)],
            ),
            first,
            second,
        }
    }

    fn start(&self, core: Core<T>) {
        let second = self.second.clone();
        self.first.all_elements(Consumer::new(move |head: Result<Elements<T>, Error>| match head {
            Ok(head) => second.all_elements(core.settle_from(move |tail: Elements<T>| {
                Ok(head.iter().chain(tail.iter()).cloned().collect())
            })),
            Err(error) => {
                core.fail(error);
            }
        }));
    }
}

impl<T: Element> Materializer<T> for AppendAll<T> {
    fn context(&self) -> &Context {
        &self.core.ctx
    }

    fn known_size(&self) -> Option<usize> {
        match self.core.frozen() {
            Some(frozen) => frozen.known_size(),
            None => arith::hint_sum(self.first.known_size(), self.second.known_size()),
        }
    }

    fn status(&self) -> Status {
        self.core.status()
    }

    fn weight(&self, op: Op) -> Weight {
        self.core
            .weight(op, |op| self.first.weight(op).combine(self.second.weight(op)))
    }

    fn cancel(&self, cause: Cancellation) {
        self.core.cancel(cause);
    }

    fn size(&self, consumer: Consumer<usize>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.size(consumer);
        }
        let (core, second) = (self.core.clone(), self.second.clone());
        self.first.size(self.core.relay(consumer, move |head, consumer| {
            second.size(core.relay_map(consumer, move |tail| Ok(arith::add(head, tail))));
        }));
    }

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<T>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.element_at(index, consumer);
        }
        let requested = match arith::checked_index(index) {
            Ok(requested) => requested,
            Err(error) => return self.core.reply(consumer, Err(error)),
        };
        let (core, second) = (self.core.clone(), self.second.clone());
        self.first.element_at(
            index,
            self.core.relay(consumer, move |found, consumer| match found {
                Indexed::Element { size, index, element } => {
                    let size = arith::hint_sum(size, second.known_size());
                    core.reply(consumer, Ok(Indexed::Element { size, index, element }));
                }
                Indexed::End { size: skipped } => second.element_at(
                    arith::to_request(arith::sub(requested, skipped)),
                    core.relay_map(consumer, move |found| {
                        Ok(match found {
                            Indexed::Element { size, element, .. } => Indexed::Element {
                                size: arith::hint_add(size, skipped),
                                index: requested,
                                element,
                            },
                            Indexed::End { size } => Indexed::End {
                                size: arith::add(skipped, size),
                            },
                        })
                    }),
                ),
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
        self.first.scan_forward(
            from,
            Box::new(ConcatScan {
                inner: predicate,
                core: self.core.clone(),
                second: self.second.clone(),
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
        if let Some(frozen) = self.core.frozen() {
            return frozen.is_empty(consumer);
        }
        let (core, second) = (self.core.clone(), self.second.clone());
        self.first.is_empty(self.core.relay(consumer, move |empty, consumer| {
            if empty {
                second.is_empty(core.relay_map(consumer, Ok));
            } else {
                core.reply(consumer, Ok(false));
            }
        }));
    }

    fn try_elements(&self) -> Result<Elements<T>, Error> {
        self.core.try_elements()
    }
}

/// Scans `first`, then continues into `second` once `first` runs out.
struct ConcatScan<T> {
    inner: Box<dyn ScanPredicate<T>>,
    core: Core<T>,
    second: MaterializerRef<T>,
    from: usize,
}

impl<T: Element> ScanPredicate<T> for ConcatScan<T> {
    fn test(&mut self, size: Option<usize>, index: usize, element: &T) -> bool {
        let size = arith::hint_sum(size, self.second.known_size());
        self.inner.test(size, index, element)
    }

    fn complete(self: Box<Self>, skipped: usize) {
        let ConcatScan {
            inner,
            core,
            second,
            from,
        } = *self;
        let delta = i128::try_from(skipped).unwrap_or(i128::MAX);
        second.scan_forward(
            arith::to_request(arith::sub(from, skipped)),
            Shift::by(inner, &core, delta),
        );
    }

    fn error(self: Box<Self>, error: Error) {
        let error = self.core.fail(error);
        self.inner.error(error);
    }
}

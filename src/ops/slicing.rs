//! Prefix and suffix removal: `skip`, `skip_last` and `take`.

use crate::{
    arith,
    channel::{Consumer, Indexed, ScanPredicate},
    materializer::{cancel_hook, scan_start, Element, Elements, Materializer, MaterializerRef, Op, Status},
    scheduler::Weight,
    state::Core,
    Cancellation, Context, Error,
};

use super::scan::{Bounded, Shift};

/// The wrapped sequence without its first `count` elements.
pub struct Skip<T> {
    core: Core<T>,
    wrapped: MaterializerRef<T>,
    count: usize,
}

impl<T: Element> Skip<T> {
    pub fn new(wrapped: MaterializerRef<T>, count: usize) -> Self {
        Self {
            core: Core::new(wrapped.context().clone(), vec![cancel_hook(&wrapped)]),
            wrapped,
            count,
        }
    }

    fn start(&self, core: Core<T>) {
        let count = self.count;
        self.wrapped.all_elements(core.settle_from(move |elements: Elements<T>| {
            Ok(elements.iter().skip(count).cloned().collect())
        }));
    }
}

impl<T: Element> Materializer<T> for Skip<T> {
    fn context(&self) -> &Context {
        &self.core.ctx
    }

    fn known_size(&self) -> Option<usize> {
        match self.core.frozen() {
            Some(frozen) => frozen.known_size(),
            None => arith::hint_sub(self.wrapped.known_size(), self.count),
        }
    }

    fn status(&self) -> Status {
        self.core.status()
    }

    fn weight(&self, op: Op) -> Weight {
        match op {
            Op::Empty => self.core.weight(Op::Element, |op| self.wrapped.weight(op)),
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
        let count = self.count;
        self.wrapped
            .size(self.core.relay_map(consumer, move |size| Ok(arith::sub(size, count))));
    }

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<T>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.element_at(index, consumer);
        }
        let requested = match arith::checked_index(index) {
            Ok(requested) => requested,
            Err(error) => return self.core.reply(consumer, Err(error)),
        };
        let count = self.count;
        self.wrapped.element_at(
            arith::to_request(arith::add(requested, count)),
            self.core.relay_map(consumer, move |found| {
                Ok(match found {
                    Indexed::Element { size, element, .. } => Indexed::Element {
                        size: arith::hint_sub(size, count),
                        index: requested,
                        element,
                    },
                    Indexed::End { size } => Indexed::End {
                        size: arith::sub(size, count),
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
        let delta = -i128::try_from(self.count).unwrap_or(i128::MAX);
        self.wrapped.scan_forward(
            arith::to_request(arith::add(start, self.count)),
            Shift::by(predicate, &self.core, delta),
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
        self.wrapped.element_at(
            arith::to_request(self.count),
            self.core
                .relay_map(consumer, |found| Ok(matches!(found, Indexed::End { .. }))),
        );
    }

    fn try_elements(&self) -> Result<Elements<T>, Error> {
        self.core.try_elements()
    }
}

/// The wrapped sequence without its last `count` elements.
///
/// Every query needs the wrapped size first, since it decides where the result ends.
pub struct SkipLast<T> {
    core: Core<T>,
    wrapped: MaterializerRef<T>,
    count: usize,
}

impl<T: Element> SkipLast<T> {
    pub fn new(wrapped: MaterializerRef<T>, count: usize) -> Self {
        Self {
            core: Core::new(wrapped.context().clone(), vec![cancel_hook(&wrapped)]),
            wrapped,
            count,
        }
    }

    fn start(&self, core: Core<T>) {
        let count = self.count;
        self.wrapped.all_elements(core.settle_from(move |elements: Elements<T>| {
            let keep = arith::sub(elements.len(), count);
            Ok(elements[..keep].to_vec())
        }));
    }
}

impl<T: Element> Materializer<T> for SkipLast<T> {
    fn context(&self) -> &Context {
        &self.core.ctx
    }

    fn known_size(&self) -> Option<usize> {
        match self.core.frozen() {
            Some(frozen) => frozen.known_size(),
            None => arith::hint_sub(self.wrapped.known_size(), self.count),
        }
    }

    fn status(&self) -> Status {
        self.core.status()
    }

    fn weight(&self, op: Op) -> Weight {
        self.core.weight(op, |op| match op {
            Op::Size | Op::Empty => self.wrapped.weight(Op::Size),
            op => self.wrapped.weight(Op::Size).combine(self.wrapped.weight(op)),
        })
    }

    fn cancel(&self, cause: Cancellation) {
        self.core.cancel(cause);
    }

    fn size(&self, consumer: Consumer<usize>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.size(consumer);
        }
        let count = self.count;
        self.wrapped
            .size(self.core.relay_map(consumer, move |size| Ok(arith::sub(size, count))));
    }

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<T>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.element_at(index, consumer);
        }
        let requested = match arith::checked_index(index) {
            Ok(requested) => requested,
            Err(error) => return self.core.reply(consumer, Err(error)),
        };
        let (core, wrapped, count) = (self.core.clone(), self.wrapped.clone(), self.count);
        self.wrapped.size(self.core.relay(consumer, move |size, consumer| {
            let limit = arith::sub(size, count);
            if requested >= limit {
                return core.reply(consumer, Ok(Indexed::End { size: limit }));
            }
            wrapped.element_at(
                index,
                core.relay_map(consumer, move |found| {
                    Ok(match found {
                        Indexed::Element { element, .. } => Indexed::Element {
                            size: Some(limit),
                            index: requested,
                            element,
                        },
                        Indexed::End { size } => Indexed::End {
                            size: arith::sub(size, count),
                        },
                    })
                }),
            );
        }));
    }

    fn all_elements(&self, consumer: Consumer<Elements<T>>) {
        self.core.materialize(consumer, |core| self.start(core));
    }

    fn scan_forward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.scan_forward(from, predicate);
        }
        let Some((_, predicate)) = scan_start(&self.core.ctx, from, predicate) else {
            return;
        };
        let (wrapped, count) = (self.wrapped.clone(), self.count);
        let mut bounded = Box::new(Bounded {
            inner: Some(predicate),
            core: self.core.clone(),
            limit: 0,
            exact: true,
        });
        self.wrapped.size(Consumer::new(move |size: Result<usize, Error>| match size {
            Ok(size) => {
                bounded.limit = arith::sub(size, count);
                wrapped.scan_forward(from, bounded);
            }
            Err(error) => bounded.error(error),
        }));
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
        let count = self.count;
        self.wrapped
            .size(self.core.relay_map(consumer, move |size| Ok(size <= count)));
    }

    fn try_elements(&self) -> Result<Elements<T>, Error> {
        self.core.try_elements()
    }
}

/// The first `count` elements of the wrapped sequence.
pub struct Take<T> {
    core: Core<T>,
    wrapped: MaterializerRef<T>,
    count: usize,
}

impl<T: Element> Take<T> {
    pub fn new(wrapped: MaterializerRef<T>, count: usize) -> Self {
        Self {
            core: Core::new(wrapped.context().clone(), vec![cancel_hook(&wrapped)]),
            wrapped,
            count,
        }
    }

    /// Collects the prefix with a bounded scan, so the wrapped node never has to produce more
    /// than `count` elements.
    fn start(&self, core: Core<T>) {
        let count = self.count;
        if count == 0 {
            return core.done(Vec::new());
        }
        self.wrapped.scan_forward(
            0,
            Box::new(Collect {
                items: Vec::new(),
                core,
                limit: count,
            }),
        );
    }
}

/// Gathers elements until `limit` of them have been seen, then settles the node.
struct Collect<T> {
    items: Vec<T>,
    core: Core<T>,
    limit: usize,
}

impl<T: Element> ScanPredicate<T> for Collect<T> {
    fn test(&mut self, _size: Option<usize>, _index: usize, element: &T) -> bool {
        self.items.push(element.clone());
        if self.items.len() < self.limit {
            return true;
        }
        self.core.done(std::mem::take(&mut self.items));
        false
    }

    fn complete(self: Box<Self>, _size: usize) {
        let Collect { items, core, .. } = *self;
        core.done(items);
    }

    fn error(self: Box<Self>, error: Error) {
        self.core.fail(error);
    }
}

impl<T: Element> Materializer<T> for Take<T> {
    fn context(&self) -> &Context {
        &self.core.ctx
    }

    fn known_size(&self) -> Option<usize> {
        match self.core.frozen() {
            Some(frozen) => frozen.known_size(),
            None if self.count == 0 => Some(0),
            None => self.wrapped.known_size().map(|size| size.min(self.count)),
        }
    }

    fn status(&self) -> Status {
        self.core.status()
    }

    fn weight(&self, op: Op) -> Weight {
        match op {
            Op::ScanBackward => self.core.weight(Op::ScanForward, |op| self.wrapped.weight(op)),
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
        if self.count == 0 {
            return self.core.reply(consumer, Ok(0));
        }
        // The element at `count - 1` decides whether the prefix is complete.
        let count = self.count;
        self.wrapped.element_at(
            arith::to_request(count - 1),
            self.core.relay_map(consumer, move |found| {
                Ok(match found {
                    Indexed::Element { .. } => count,
                    Indexed::End { size } => size,
                })
            }),
        );
    }

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<T>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.element_at(index, consumer);
        }
        let requested = match arith::checked_index(index) {
            Ok(requested) => requested,
            Err(error) => return self.core.reply(consumer, Err(error)),
        };
        let count = self.count;
        if requested >= count {
            if count == 0 {
                return self.core.reply(consumer, Ok(Indexed::End { size: 0 }));
            }
            return self.wrapped.element_at(
                arith::to_request(count - 1),
                self.core.relay_map(consumer, move |found| {
                    Ok(match found {
                        Indexed::Element { .. } => Indexed::End { size: count },
                        end => end,
                    })
                }),
            );
        }
        self.wrapped.element_at(
            index,
            self.core.relay_map(consumer, move |found| {
                Ok(match found {
                    Indexed::Element { size, index, element } => Indexed::Element {
                        size: size.map(|size| size.min(count)),
                        index,
                        element,
                    },
                    end => end,
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
        let Some((_, predicate)) = scan_start(&self.core.ctx, from, predicate) else {
            return;
        };
        self.wrapped.scan_forward(
            from,
            Box::new(Bounded {
                inner: Some(predicate),
                core: self.core.clone(),
                limit: self.count,
                exact: false,
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
        if self.count == 0 {
            return self.core.reply(consumer, Ok(true));
        }
        self.wrapped.is_empty(self.core.relay_map(consumer, Ok));
    }

    fn try_elements(&self) -> Result<Elements<T>, Error> {
        self.core.try_elements()
    }
}

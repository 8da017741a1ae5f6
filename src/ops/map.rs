use std::sync::Arc;

use crate::{
    channel::{guarded, Consumer, Indexed, ScanPredicate},
    materializer::{cancel_hook, scan_start, Element, Elements, Materializer, MaterializerRef, Op, Status},
    scheduler::Weight,
    state::Core,
    Cancellation, Context, Error,
};

pub(crate) type MapFn<T, U> = Arc<dyn Fn(&T) -> U + Send + Sync>;

/// Applies a function to every element.
///
/// The function runs once per lookup, not once per element: results are only memoized once the
/// whole sequence has been materialized. A panicking function fails the node.
pub struct Map<T, U> {
    core: Core<U>,
    wrapped: MaterializerRef<T>,
    f: MapFn<T, U>,
}

impl<T: Element, U: Element> Map<T, U> {
    pub fn new(wrapped: MaterializerRef<T>, f: impl Fn(&T) -> U + Send + Sync + 'static) -> Self {
        Self {
            core: Core::new(wrapped.context().clone(), vec![cancel_hook(&wrapped)]),
            wrapped,
            f: Arc::new(f),
        }
    }

    fn start(&self, core: Core<U>) {
        let f = self.f.clone();
        self.wrapped.all_elements(core.settle_from(move |elements: Elements<T>| {
            guarded(|| elements.iter().map(|element| f(element)).collect())
        }));
    }
}

impl<T: Element, U: Element> Materializer<U> for Map<T, U> {
    fn context(&self) -> &Context {
        &self.core.ctx
    }

    fn known_size(&self) -> Option<usize> {
        match self.core.frozen() {
            Some(frozen) => frozen.known_size(),
            None => self.wrapped.known_size(),
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
        match self.core.frozen() {
            Some(frozen) => frozen.size(consumer),
            None => self.wrapped.size(self.core.relay_map(consumer, Ok)),
        }
    }

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<U>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.element_at(index, consumer);
        }
        if let Err(error) = crate::arith::checked_index(index) {
            return self.core.reply(consumer, Err(error));
        }
        let f = self.f.clone();
        self.wrapped.element_at(
            index,
            self.core.relay_map(consumer, move |found| match found {
                Indexed::Element { size, index, element } => {
                    let element = guarded(|| f(&element))?;
                    Ok(Indexed::Element { size, index, element })
                }
                Indexed::End { size } => Ok(Indexed::End { size }),
            }),
        );
    }

    fn all_elements(&self, consumer: Consumer<Elements<U>>) {
        self.core.materialize(consumer, |core| self.start(core));
    }

    fn scan_forward(&self, from: isize, predicate: Box<dyn ScanPredicate<U>>) {
        if let Some(frozen) = self.core.frozen() {
            return frozen.scan_forward(from, predicate);
        }
        let Some((_, predicate)) = scan_start(&self.core.ctx, from, predicate) else {
            return;
        };
        self.wrapped.scan_forward(
            from,
            Box::new(MapScan {
                inner: Some(predicate),
                core: self.core.clone(),
                f: self.f.clone(),
            }),
        );
    }

    fn scan_backward(&self, from: isize, predicate: Box<dyn ScanPredicate<U>>) {
        let Some((_, predicate)) = scan_start(&self.core.ctx, from, predicate) else {
            return;
        };
        self.core
            .demand(Box::new(move |f| f.scan_backward(from, predicate)), |core| self.start(core));
    }

    fn is_empty(&self, consumer: Consumer<bool>) {
        match self.core.frozen() {
            Some(frozen) => frozen.is_empty(consumer),
            None => self.wrapped.is_empty(self.core.relay_map(consumer, Ok)),
        }
    }

    fn try_elements(&self) -> Result<Elements<U>, Error> {
        self.core.try_elements()
    }
}

struct MapScan<T, U> {
    inner: Option<Box<dyn ScanPredicate<U>>>,
    core: Core<U>,
    f: MapFn<T, U>,
}

impl<T: Element, U: Element> ScanPredicate<T> for MapScan<T, U> {
    fn test(&mut self, size: Option<usize>, index: usize, element: &T) -> bool {
        match guarded(|| (self.f)(element)) {
            Ok(mapped) => match &mut self.inner {
                Some(inner) => inner.test(size, index, &mapped),
                None => false,
            },
            Err(error) => {
                let error = self.core.fail(error);
                if let Some(inner) = self.inner.take() {
                    inner.error(error);
                }
                false
            }
        }
    }

    fn complete(self: Box<Self>, size: usize) {
        if let Some(inner) = self.inner {
            inner.complete(size);
        }
    }

    fn error(self: Box<Self>, error: Error) {
        let error = self.core.fail(error);
        if let Some(inner) = self.inner {
            inner.error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ops::Compose, terminal::list, test::Harness};

    #[test]
    fn maps_lookups_scans_and_lists() {
        let h = Harness::new();
        let m = list(h.ctx(), vec![1, 2, 3]).map(|x| x * 10);
        assert_eq!(m.known_size(), Some(3));
        assert_eq!(h.element(&m, 1).unwrap(), Some(20));
        assert_eq!(h.element(&m, 3).unwrap(), None);
        assert_eq!(h.scan_forward(&m, 1).unwrap(), (vec![(1, 20), (2, 30)], 3));
        assert_eq!(h.vec(&m), [10, 20, 30]);
        assert!(h.contains(&m, 30).unwrap());
    }

    #[test]
    fn changes_element_type() {
        let h = Harness::new();
        let m = list(h.ctx(), vec![1u8, 22]).map(|x| x.to_string());
        assert_eq!(h.vec(&m), ["1".to_string(), "22".to_string()]);
    }

    #[test]
    fn panicking_function_fails_node() {
        let h = Harness::new();
        let m = list(h.ctx(), vec![1, 2]).map(|x: &i32| {
            if *x == 2 {
                panic!("cannot map two");
            }
            *x
        });
        assert_eq!(h.element(&m, 0).unwrap(), Some(1));
        assert_eq!(m.status(), Status::Pending);
        assert!(matches!(h.element(&m, 1), Err(Error::Panicked(msg)) if msg == "cannot map two"));
        assert_eq!(m.status(), Status::Failed);
        assert!(matches!(h.all(&m), Err(Error::Panicked(_))));
    }
}

use std::sync::Arc;

use crate::{
    arith,
    channel::{guarded, Consumer, Indexed},
    materializer::{cancel_hook, CancelHook, Element, MaterializerRef, Op},
    progressive::{feed, Progressive, Pull, Step},
    sync::Mutex,
    terminal, Cancellation, Error,
};

pub(crate) type Expand<T, U> = Arc<dyn Fn(&T) -> MaterializerRef<U> + Send + Sync>;

/// Replaces every outer element with the sequence `expand` returns for it.
///
/// Outer elements are fetched one at a time, and each inner sequence is scanned only as far as
/// the demand on this node requires.
pub(crate) fn flat_map<T: Element, U: Element>(
    outer: MaterializerRef<T>,
    expand: Expand<T, U>,
) -> Arc<Progressive<U, FlatMapPull<T, U>>> {
    let ctx = outer.context().clone();
    let active: Arc<Mutex<Option<MaterializerRef<U>>>> = Arc::default();
    let draining = active.clone();
    let inner_hook: CancelHook = Arc::new(move |cause: &Cancellation| {
        let inner = draining.lock().take();
        if let Some(inner) = inner {
            inner.cancel(cause.clone());
        }
    });
    let hooks = vec![cancel_hook(&outer), inner_hook];
    let source = outer.clone();
    let weight = move || source.weight(Op::Element).combine(source.weight(Op::ScanForward));
    let strategy = FlatMapPull {
        outer,
        expand,
        next_outer: 0,
        inner: None,
        active,
    };
    Arc::new(Progressive::new(ctx, hooks, weight, strategy))
}

/// Expands the elements matching `predicate` and keeps the others as they are.
pub(crate) fn flat_map_where<T: Element>(
    outer: MaterializerRef<T>,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    expand: Expand<T, T>,
) -> Arc<Progressive<T, FlatMapPull<T, T>>> {
    let ctx = outer.context().clone();
    let selective: Expand<T, T> = Arc::new(move |element: &T| {
        if predicate(element) {
            expand(element)
        } else {
            terminal::element(&ctx, element.clone())
        }
    });
    flat_map(outer, selective)
}

pub(crate) struct FlatMapPull<T, U> {
    outer: MaterializerRef<T>,
    expand: Expand<T, U>,
    next_outer: usize,
    /// The inner sequence being drained, and the position reached in it.
    inner: Option<(MaterializerRef<U>, usize)>,
    /// The same inner sequence, reachable from the node's cancel hook.
    active: Arc<Mutex<Option<MaterializerRef<U>>>>,
}

impl<T: Element, U: Element> FlatMapPull<T, U> {
    fn visit(&mut self, index: usize, element: &U) -> Result<Option<U>, Error> {
        if let Some((_, position)) = &mut self.inner {
            *position = index + 1;
        }
        Ok(Some(element.clone()))
    }

    /// The current inner sequence ran out: move on to the next outer element.
    fn exhausted(mut self, step: Step<U, Self>, _size: usize) {
        self.inner = None;
        *self.active.lock() = None;
        step.park(self);
    }

    fn advance(mut self, step: Step<U, Self>) {
        let outer = self.outer.clone();
        outer.element_at(
            arith::to_request(self.next_outer),
            Consumer::new(move |found: Result<Indexed<T>, Error>| match found {
                Ok(Indexed::Element { element, .. }) => {
                    match guarded(|| (self.expand)(&element)) {
                        Ok(inner) => {
                            self.next_outer += 1;
                            *self.active.lock() = Some(inner.clone());
                            self.inner = Some((inner, 0));
                            self.pull(step);
                        }
                        Err(error) => step.fail(error),
                    }
                }
                Ok(Indexed::End { .. }) => step.complete(),
                Err(error) => step.fail(error),
            }),
        );
    }
}

impl<T: Element, U: Element> Pull<U> for FlatMapPull<T, U> {
    fn pull(self, step: Step<U, Self>) {
        let current = self
            .inner
            .as_ref()
            .map(|(inner, position)| (inner.clone(), *position));
        match current {
            Some((inner, position)) => feed(&inner, position, self, step, Self::visit, Self::exhausted),
            None => self.advance(step),
        }
    }
}

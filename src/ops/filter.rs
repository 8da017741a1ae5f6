//! Element-dropping operators built on the progressive base: `filter` and `distinct_by`.

use std::{collections::HashSet, hash::Hash, sync::Arc};

use crate::{
    channel::guarded,
    materializer::{cancel_hook, Element, MaterializerRef, Op},
    progressive::{feed, Progressive, Pull, Step},
    Error,
};

pub(crate) type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Keeps the elements `predicate` accepts.
pub(crate) fn filter<T: Element>(
    upstream: MaterializerRef<T>,
    predicate: Predicate<T>,
) -> Arc<Progressive<T, FilterPull<T>>> {
    let (ctx, hooks) = (upstream.context().clone(), vec![cancel_hook(&upstream)]);
    let source = upstream.clone();
    let weight = move || source.weight(Op::ScanForward);
    let strategy = FilterPull {
        upstream,
        predicate,
        next: 0,
    };
    Arc::new(Progressive::new(ctx, hooks, weight, strategy))
}

pub(crate) struct FilterPull<T> {
    upstream: MaterializerRef<T>,
    predicate: Predicate<T>,
    /// Upstream index the next pull resumes from.
    next: usize,
}

impl<T: Element> FilterPull<T> {
    fn visit(&mut self, index: usize, element: &T) -> Result<Option<T>, Error> {
        self.next = index + 1;
        let keep = guarded(|| (self.predicate)(element))?;
        Ok(keep.then(|| element.clone()))
    }
}

impl<T: Element> Pull<T> for FilterPull<T> {
    fn pull(self, step: Step<T, Self>) {
        let upstream = self.upstream.clone();
        let from = self.next;
        feed(&upstream, from, self, step, Self::visit, |_, step, _| step.complete());
    }
}

/// Keeps the first element of every group of elements sharing a key.
pub(crate) fn distinct_by<T, K>(
    upstream: MaterializerRef<T>,
    key: Arc<dyn Fn(&T) -> K + Send + Sync>,
) -> Arc<Progressive<T, DistinctPull<T, K>>>
where
    T: Element,
    K: Eq + Hash + Send + 'static,
{
    let (ctx, hooks) = (upstream.context().clone(), vec![cancel_hook(&upstream)]);
    let source = upstream.clone();
    let weight = move || source.weight(Op::ScanForward);
    let strategy = DistinctPull {
        upstream,
        key,
        seen: HashSet::new(),
        next: 0,
    };
    Arc::new(Progressive::new(ctx, hooks, weight, strategy))
}

pub(crate) struct DistinctPull<T, K> {
    upstream: MaterializerRef<T>,
    key: Arc<dyn Fn(&T) -> K + Send + Sync>,
    seen: HashSet<K>,
    next: usize,
}

impl<T: Element, K: Eq + Hash + Send + 'static> DistinctPull<T, K> {
    fn visit(&mut self, index: usize, element: &T) -> Result<Option<T>, Error> {
        self.next = index + 1;
        let key = guarded(|| (self.key)(element))?;
        Ok(self.seen.insert(key).then(|| element.clone()))
    }
}

impl<T: Element, K: Eq + Hash + Send + 'static> Pull<T> for DistinctPull<T, K> {
    fn pull(self, step: Step<T, Self>) {
        let upstream = self.upstream.clone();
        let from = self.next;
        feed(&upstream, from, self, step, Self::visit, |_, step, _| step.complete());
    }
}

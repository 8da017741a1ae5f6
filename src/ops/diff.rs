//! Multiset difference: `diff` and `symmetric_diff`.
//!
//! Both load the right-hand side in full before the first pull can produce anything, then walk
//! the left-hand side progressively, cancelling out one right-hand occurrence per match.
//! `symmetric_diff` additionally emits the right-hand elements that found no partner, in their
//! original order, once the left-hand side is exhausted.

use std::{collections::HashMap, hash::Hash, sync::Arc};

use crate::{
    channel::Consumer,
    materializer::{cancel_hook, Element, Elements, MaterializerRef, Op},
    progressive::{feed, Progressive, Pull, Step},
    Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// The right-hand side has not been loaded yet.
    Load,
    /// Walking the left-hand side.
    Sieve,
    /// Emitting unmatched right-hand elements.
    Tail,
}

pub(crate) struct DiffPull<T> {
    left: MaterializerRef<T>,
    right: MaterializerRef<T>,
    symmetric: bool,
    phase: Phase,
    /// Right-hand occurrences not matched yet.
    remaining: HashMap<T, usize>,
    /// Right-hand occurrences cancelled out by the left-hand side.
    matched: HashMap<T, usize>,
    right_elements: Elements<T>,
    /// Left index during [`Phase::Sieve`], right index during [`Phase::Tail`].
    next: usize,
}

pub(crate) fn diff<T: Element + Eq + Hash>(
    left: MaterializerRef<T>,
    right: MaterializerRef<T>,
    symmetric: bool,
) -> Arc<Progressive<T, DiffPull<T>>> {
    let ctx = left.context().clone();
    let hooks = vec![cancel_hook(&left), cancel_hook(&right)];
    let (l, r) = (left.clone(), right.clone());
    let weight = move || l.weight(Op::ScanForward).combine(r.weight(Op::Elements));
    let strategy = DiffPull {
        left,
        right,
        symmetric,
        phase: Phase::Load,
        remaining: HashMap::new(),
        matched: HashMap::new(),
        right_elements: Vec::new().into(),
        next: 0,
    };
    Arc::new(Progressive::new(ctx, hooks, weight, strategy))
}

impl<T: Element + Eq + Hash> DiffPull<T> {
    fn load(&mut self, right: Elements<T>) {
        for element in right.iter() {
            *self.remaining.entry(element.clone()).or_default() += 1;
        }
        self.right_elements = right;
        self.phase = Phase::Sieve;
    }

    fn visit(&mut self, index: usize, element: &T) -> Result<Option<T>, Error> {
        self.next = index + 1;
        match self.remaining.get_mut(element) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if self.symmetric {
                    *self.matched.entry(element.clone()).or_default() += 1;
                }
                Ok(None)
            }
            _ => Ok(Some(element.clone())),
        }
    }

    fn exhausted(mut self, step: Step<T, Self>, _size: usize) {
        if !self.symmetric {
            return step.complete();
        }
        self.phase = Phase::Tail;
        self.next = 0;
        self.pull(step);
    }

    /// Emits the right-hand elements left over, skipping as many occurrences of each value as
    /// were matched.
    fn tail(mut self, step: Step<T, Self>) {
        while let Some(element) = self.right_elements.get(self.next).cloned() {
            self.next += 1;
            if let Some(count) = self.matched.get_mut(&element) {
                if *count > 0 {
                    *count -= 1;
                    continue;
                }
            }
            if !step.push(element) {
                return step.park(self);
            }
        }
        step.complete();
    }
}

impl<T: Element + Eq + Hash> Pull<T> for DiffPull<T> {
    fn pull(mut self, step: Step<T, Self>) {
        match self.phase {
            Phase::Load => {
                let right = self.right.clone();
                right.all_elements(Consumer::new(move |result: Result<Elements<T>, Error>| {
                    match result {
                        Ok(elements) => {
                            self.load(elements);
                            self.pull(step);
                        }
                        Err(error) => step.fail(error),
                    }
                }));
            }
            Phase::Sieve => {
                let left = self.left.clone();
                let from = self.next;
                feed(&left, from, self, step, Self::visit, Self::exhausted);
            }
            Phase::Tail => self.tail(step),
        }
    }
}

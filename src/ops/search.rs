//! Searches: `find_first`, `find_last`, their index variants, and slice search.
//!
//! A search runs as a single deferred job driving one scan of the upstream. The first hit stops
//! the scan and settles the node into a one-element list; a scan that runs out settles it empty.

use std::sync::Arc;

use crate::{
    channel::{guarded, Consumer, ScanPredicate},
    deferred::Deferred,
    materializer::{cancel_hook, Element, Elements, MaterializerRef, Op},
    state::Core,
    Error,
};

use super::filter::Predicate;

pub(super) type Matcher<T, R> = Box<dyn FnMut(usize, &T) -> Result<Option<R>, Error> + Send>;

/// Scan predicate settling a deferred node with the first value `matcher` produces.
pub(super) struct Search<T, R> {
    pub(super) core: Core<R>,
    pub(super) matcher: Matcher<T, R>,
    /// Result when the scan runs out without a hit.
    pub(super) fallback: Option<R>,
}

impl<T: Element, R: Element> ScanPredicate<T> for Search<T, R> {
    fn test(&mut self, _size: Option<usize>, index: usize, element: &T) -> bool {
        match (self.matcher)(index, element) {
            Ok(None) => true,
            Ok(Some(found)) => {
                self.core.done(vec![found]);
                false
            }
            Err(error) => {
                self.core.fail(error);
                false
            }
        }
    }

    fn complete(self: Box<Self>, _size: usize) {
        let Search { core, fallback, .. } = *self;
        core.done(fallback.into_iter().collect());
    }

    fn error(self: Box<Self>, error: Error) {
        self.core.fail(error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

fn search<T: Element, R: Element>(
    upstream: MaterializerRef<T>,
    direction: Direction,
    matcher: Matcher<T, R>,
) -> MaterializerRef<R> {
    let op = match direction {
        Direction::Forward => Op::ScanForward,
        Direction::Backward => Op::ScanBackward,
    };
    let (ctx, hooks, weight) = (
        upstream.context().clone(),
        vec![cancel_hook(&upstream)],
        upstream.weight(op),
    );
    Arc::new(Deferred::new(ctx, hooks, None, weight, move |core: Core<R>| {
        let search = Box::new(Search {
            core,
            matcher,
            fallback: None,
        });
        match direction {
            Direction::Forward => upstream.scan_forward(0, search),
            Direction::Backward => upstream.scan_backward(isize::MAX, search),
        }
    }))
}

fn element_matcher<T: Element>(predicate: Predicate<T>) -> Matcher<T, T> {
    Box::new(move |_, element| {
        let hit = guarded(|| predicate(element))?;
        Ok(hit.then(|| element.clone()))
    })
}

fn index_matcher<T: Element>(predicate: Predicate<T>) -> Matcher<T, usize> {
    Box::new(move |index, element| {
        let hit = guarded(|| predicate(element))?;
        Ok(hit.then_some(index))
    })
}

pub(crate) fn find_first<T: Element>(upstream: MaterializerRef<T>, predicate: Predicate<T>) -> MaterializerRef<T> {
    search(upstream, Direction::Forward, element_matcher(predicate))
}

pub(crate) fn find_last<T: Element>(upstream: MaterializerRef<T>, predicate: Predicate<T>) -> MaterializerRef<T> {
    search(upstream, Direction::Backward, element_matcher(predicate))
}

pub(crate) fn find_index<T: Element>(
    upstream: MaterializerRef<T>,
    predicate: Predicate<T>,
) -> MaterializerRef<usize> {
    search(upstream, Direction::Forward, index_matcher(predicate))
}

pub(crate) fn find_last_index<T: Element>(
    upstream: MaterializerRef<T>,
    predicate: Predicate<T>,
) -> MaterializerRef<usize> {
    search(upstream, Direction::Backward, index_matcher(predicate))
}

/// Streaming substring matcher over a sequence, using the prefix function so that a broken
/// partial match resumes from the longest border instead of rescanning.
struct Kmp<T> {
    pattern: Vec<T>,
    border: Vec<usize>,
    matched: usize,
}

impl<T: PartialEq> Kmp<T> {
    /// `pattern` must not be empty.
    fn new(pattern: Vec<T>) -> Self {
        let mut border = vec![0; pattern.len()];
        let mut k = 0;
        for i in 1..pattern.len() {
            while k > 0 && pattern[i] != pattern[k] {
                k = border[k - 1];
            }
            if pattern[i] == pattern[k] {
                k += 1;
            }
            border[i] = k;
        }
        Self {
            pattern,
            border,
            matched: 0,
        }
    }

    /// Feeds the next element; returns whether a full match ends with it.
    fn push(&mut self, element: &T) -> bool {
        while self.matched > 0 && self.pattern[self.matched] != *element {
            self.matched = self.border[self.matched - 1];
        }
        if self.pattern[self.matched] == *element {
            self.matched += 1;
        }
        if self.matched == self.pattern.len() {
            self.matched = self.border[self.matched - 1];
            return true;
        }
        false
    }
}

fn slice_search<T: Element>(
    upstream: MaterializerRef<T>,
    slice: MaterializerRef<T>,
    direction: Direction,
) -> MaterializerRef<usize> {
    let op = match direction {
        Direction::Forward => Op::ScanForward,
        Direction::Backward => Op::ScanBackward,
    };
    let ctx = upstream.context().clone();
    let hooks = vec![cancel_hook(&upstream), cancel_hook(&slice)];
    let weight = upstream.weight(op).combine(slice.weight(Op::Elements));
    Arc::new(Deferred::new(ctx, hooks, None, weight, move |core: Core<usize>| {
        slice.all_elements(Consumer::new(move |pattern: Result<Elements<T>, Error>| {
            let pattern = match pattern {
                Ok(pattern) => pattern,
                Err(error) => {
                    core.fail(error);
                    return;
                }
            };
            let len = pattern.len();
            if len == 0 {
                return empty_slice(upstream, core, direction);
            }
            match direction {
                Direction::Forward => {
                    let mut kmp = Kmp::new(pattern.to_vec());
                    let matcher: Matcher<T, usize> =
                        Box::new(move |index, element| Ok(kmp.push(element).then(|| index + 1 - len)));
                    upstream.scan_forward(
                        0,
                        Box::new(Search {
                            core,
                            matcher,
                            fallback: None,
                        }),
                    );
                }
                Direction::Backward => {
                    // Matching the reversed pattern backwards completes at the start of the
                    // rightmost occurrence.
                    let mut kmp = Kmp::new(pattern.iter().rev().cloned().collect());
                    let matcher: Matcher<T, usize> =
                        Box::new(move |index, element| Ok(kmp.push(element).then_some(index)));
                    upstream.scan_backward(
                        isize::MAX,
                        Box::new(Search {
                            core,
                            matcher,
                            fallback: None,
                        }),
                    );
                }
            }
        }));
    }))
}

/// The empty slice occurs at index 0 first and at the upstream size last.
fn empty_slice<T: Element>(upstream: MaterializerRef<T>, core: Core<usize>, direction: Direction) {
    match direction {
        Direction::Forward => core.done(vec![0]),
        Direction::Backward => upstream.size(core.settle_from(|size| Ok(vec![size]))),
    }
}

pub(crate) fn index_of_slice<T: Element>(
    upstream: MaterializerRef<T>,
    slice: MaterializerRef<T>,
) -> MaterializerRef<usize> {
    slice_search(upstream, slice, Direction::Forward)
}

pub(crate) fn last_index_of_slice<T: Element>(
    upstream: MaterializerRef<T>,
    slice: MaterializerRef<T>,
) -> MaterializerRef<usize> {
    slice_search(upstream, slice, Direction::Backward)
}

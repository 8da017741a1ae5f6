//! Reductions: `fold_left` and `fold_right`.

use std::sync::Arc;

use crate::{
    channel::{guarded, ScanPredicate},
    deferred::Deferred,
    materializer::{cancel_hook, Element, MaterializerRef, Op},
    scheduler::Weight,
    state::Core,
    Error,
};

/// Accumulates over one full scan, then settles into a single-element list.
struct Fold<T, R> {
    core: Core<R>,
    acc: Option<R>,
    step: Arc<dyn Fn(R, &T) -> R + Send + Sync>,
}

impl<T: Element, R: Element> ScanPredicate<T> for Fold<T, R> {
    fn test(&mut self, _size: Option<usize>, _index: usize, element: &T) -> bool {
        let Some(acc) = self.acc.take() else {
            return false;
        };
        let step = &self.step;
        match guarded(move || step(acc, element)) {
            Ok(acc) => {
                self.acc = Some(acc);
                true
            }
            Err(error) => {
                self.core.fail(error);
                false
            }
        }
    }

    fn complete(self: Box<Self>, _size: usize) {
        let Fold { core, acc, .. } = *self;
        core.done(acc.into_iter().collect());
    }

    fn error(self: Box<Self>, error: Error) {
        self.core.fail(error);
    }
}

fn fold<T: Element, R: Element>(
    upstream: MaterializerRef<T>,
    init: R,
    step: Arc<dyn Fn(R, &T) -> R + Send + Sync>,
    backward: bool,
) -> MaterializerRef<R> {
    let op = if backward { Op::ScanBackward } else { Op::ScanForward };
    let ctx = upstream.context().clone();
    let hooks = vec![cancel_hook(&upstream)];
    let weight: Weight = upstream.weight(op);
    Arc::new(Deferred::new(ctx, hooks, Some(1), weight, move |core: Core<R>| {
        let fold = Box::new(Fold {
            core,
            acc: Some(init),
            step,
        });
        if backward {
            upstream.scan_backward(isize::MAX, fold);
        } else {
            upstream.scan_forward(0, fold);
        }
    }))
}

/// Folds from the first element to the last: `f(f(f(init, a), b), c)`.
pub(crate) fn fold_left<T: Element, R: Element>(
    upstream: MaterializerRef<T>,
    init: R,
    f: impl Fn(R, &T) -> R + Send + Sync + 'static,
) -> MaterializerRef<R> {
    fold(upstream, init, Arc::new(f), false)
}

/// Folds from the last element to the first: `f(a, f(b, f(c, init)))`.
pub(crate) fn fold_right<T: Element, R: Element>(
    upstream: MaterializerRef<T>,
    init: R,
    f: impl Fn(&T, R) -> R + Send + Sync + 'static,
) -> MaterializerRef<R> {
    fold(upstream, init, Arc::new(move |acc, element: &T| f(element, acc)), true)
}

#[cfg(test)]
mod tests {
    use crate::{
        ops::Compose,
        terminal::{empty, failed, list},
        test::{upstream, Harness, Probe},
        Error, Status,
    };

    #[test]
    fn folds_in_both_directions() {
        let h = Harness::new();
        let digits = list(h.ctx(), vec!['1', '2', '3']);
        let left = digits.fold_left(String::new(), |mut acc, c| {
            acc.push(*c);
            acc
        });
        let right = digits.fold_right(String::new(), |c, mut acc| {
            acc.push(*c);
            acc
        });
        assert_eq!(h.vec(&left), ["123".to_string()]);
        assert_eq!(h.vec(&right), ["321".to_string()]);
    }

    #[test]
    fn empty_fold_yields_init() {
        let h = Harness::new();
        let sum = empty::<u32>(h.ctx()).fold_left(7u32, |acc, x| acc + x);
        assert_eq!(h.element(&sum, 0).unwrap(), Some(7));
    }

    #[test]
    fn size_is_hinted_before_folding() {
        let h = Harness::new();
        let probe = Probe::new(h.ctx(), vec![1u64, 2, 3], true);
        let sum = upstream(&probe).fold_left(0u64, |acc, x| acc + x);
        assert_eq!(sum.known_size(), Some(1));
        assert_eq!(probe.total_calls(), 0);
        assert_eq!(h.size(&sum).unwrap(), 1);
        assert_eq!(h.vec(&sum), [6]);
        assert_eq!(probe.calls("scan_forward"), 1);
    }

    #[test]
    fn failed_fold_reports_error_from_size() {
        let h = Harness::new();
        let count = failed::<u8>(h.ctx(), Error::failure("offline")).fold_left(0usize, |acc, _| acc + 1);
        assert!(matches!(h.size(&count), Err(Error::Failed(_))));
        assert!(matches!(h.is_empty(&count), Err(Error::Failed(_))));
        assert!(matches!(h.all(&count), Err(Error::Failed(_))));
    }

    #[test]
    fn fold_over_progressive_upstream() {
        let h = Harness::new();
        let evens = list(h.ctx(), (1..=10).collect::<Vec<u32>>()).filter(|x| x % 2 == 0);
        let product = evens.fold_right(1u32, |x, acc| acc * x);
        assert_eq!(h.vec(&product), [3840]);
    }

    #[test]
    fn upstream_failure_fails_fold() {
        let h = Harness::new();
        let probe = Probe::<u8>::failing(h.ctx(), Error::failure("gone"), false);
        let count = upstream(&probe).fold_left(0usize, |acc, _| acc + 1);
        assert!(matches!(h.all(&count), Err(Error::Failed(_))));
        assert_eq!(count.status(), Status::Failed);
    }
}

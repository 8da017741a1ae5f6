//! Whole-sequence predicates: `includes_all`, `starts_with` and `ends_with`.
//!
//! Each settles into a single boolean. The other side is loaded in full first; the upstream is
//! then scanned only as far as needed to decide.

use std::{collections::HashSet, hash::Hash, sync::Arc};

use crate::{
    arith,
    channel::Consumer,
    deferred::Deferred,
    materializer::{cancel_hook, Element, Elements, MaterializerRef, Op},
    state::Core,
    Error,
};

use super::search::{Matcher, Search};

/// Builds a boolean node that first loads `other`, then hands it to `decide`.
fn decided_by<T, D>(upstream: MaterializerRef<T>, other: MaterializerRef<T>, decide: D) -> MaterializerRef<bool>
where
    T: Element,
    D: FnOnce(MaterializerRef<T>, Elements<T>, Core<bool>) + Send + 'static,
{
    let ctx = upstream.context().clone();
    let hooks = vec![cancel_hook(&upstream), cancel_hook(&other)];
    let weight = upstream
        .weight(Op::ScanForward)
        .combine(other.weight(Op::Elements));
    Arc::new(Deferred::new(ctx, hooks, Some(1), weight, move |core: Core<bool>| {
        other.all_elements(Consumer::new(move |loaded: Result<Elements<T>, Error>| match loaded {
            Ok(loaded) => decide(upstream, loaded, core),
            Err(error) => {
                core.fail(error);
            }
        }));
    }))
}

fn scan_deciding<T: Element>(upstream: &MaterializerRef<T>, from: usize, core: Core<bool>, matcher: Matcher<T, bool>) {
    upstream.scan_forward(
        arith::to_request(from),
        Box::new(Search {
            core,
            matcher,
            fallback: Some(false),
        }),
    );
}

/// Whether every element of `other` occurs in the upstream (set semantics).
pub(crate) fn includes_all<T: Element + Eq + Hash>(
    upstream: MaterializerRef<T>,
    other: MaterializerRef<T>,
) -> MaterializerRef<bool> {
    decided_by(upstream, other, |upstream, wanted, core| {
        let mut missing: HashSet<T> = wanted.iter().cloned().collect();
        if missing.is_empty() {
            return core.done(vec![true]);
        }
        let matcher: Matcher<T, bool> = Box::new(move |_, element| {
            missing.remove(element);
            Ok(missing.is_empty().then_some(true))
        });
        scan_deciding(&upstream, 0, core, matcher);
    })
}

fn compare_from<T: Element>(expected: Elements<T>, start: usize) -> Matcher<T, bool> {
    Box::new(move |index, element| {
        let offset = index - start;
        if expected[offset] != *element {
            Ok(Some(false))
        } else if offset + 1 == expected.len() {
            Ok(Some(true))
        } else {
            Ok(None)
        }
    })
}

pub(crate) fn starts_with<T: Element>(upstream: MaterializerRef<T>, prefix: MaterializerRef<T>) -> MaterializerRef<bool> {
    decided_by(upstream, prefix, |upstream, prefix, core| {
        if prefix.is_empty() {
            return core.done(vec![true]);
        }
        scan_deciding(&upstream, 0, core, compare_from(prefix, 0));
    })
}

/// Needs the upstream size to know where the suffix would begin.
pub(crate) fn ends_with<T: Element>(upstream: MaterializerRef<T>, suffix: MaterializerRef<T>) -> MaterializerRef<bool> {
    decided_by(upstream, suffix, |upstream, suffix, core| {
        if suffix.is_empty() {
            return core.done(vec![true]);
        }
        let source = upstream.clone();
        let settle = core.clone();
        upstream.size(Consumer::new(move |size: Result<usize, Error>| match size {
            Ok(size) if size < suffix.len() => core.done(vec![false]),
            Ok(size) => {
                let start = size - suffix.len();
                scan_deciding(&source, start, core, compare_from(suffix, start));
            }
            Err(error) => {
                settle.fail(error);
            }
        }));
    })
}

#[cfg(test)]
mod tests {
    use crate::{
        ops::Compose,
        terminal::{empty, failed, list},
        test::{upstream, Harness, Probe},
        Error,
    };

    #[test]
    fn includes_all_uses_set_semantics() {
        let h = Harness::new();
        let source = list(h.ctx(), vec![1, 2, 3, 4]);
        assert_eq!(h.vec(&source.includes_all(&list(h.ctx(), vec![4, 2, 2]))), [true]);
        assert_eq!(h.vec(&source.includes_all(&list(h.ctx(), vec![1, 5]))), [false]);
        assert_eq!(h.vec(&source.includes_all(&empty(h.ctx()))), [true]);
    }

    #[test]
    fn includes_all_stops_once_satisfied() {
        let h = Harness::new();
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = seen.clone();
        let source = list(h.ctx(), (0..50).collect::<Vec<u32>>()).filter(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            true
        });
        let m = source.includes_all(&list(h.ctx(), vec![1, 3]));
        assert_eq!(h.vec(&m), [true]);
        assert!(seen.load(std::sync::atomic::Ordering::SeqCst) < 50);
    }

    #[test]
    fn prefix_and_suffix_checks() {
        let h = Harness::new();
        let source = list(h.ctx(), vec!['a', 'b', 'c']);
        let ab = list(h.ctx(), vec!['a', 'b']);
        let bc = list(h.ctx(), vec!['b', 'c']);
        assert_eq!(h.vec(&source.starts_with(&ab)), [true]);
        assert_eq!(h.vec(&source.starts_with(&bc)), [false]);
        assert_eq!(h.vec(&source.ends_with(&bc)), [true]);
        assert_eq!(h.vec(&source.ends_with(&ab)), [false]);

        let longer = list(h.ctx(), vec!['a', 'b', 'c', 'd']);
        assert_eq!(h.vec(&source.starts_with(&longer)), [false]);
        assert_eq!(h.vec(&source.ends_with(&longer)), [false]);
        assert_eq!(h.vec(&source.ends_with(&empty(h.ctx()))), [true]);
    }

    #[test]
    fn ends_with_over_deferred_upstream() {
        let h = Harness::new();
        let probe = Probe::new(h.ctx(), vec![1, 2, 3], true);
        let m = upstream(&probe).ends_with(&list(h.ctx(), vec![3]));
        assert_eq!(h.vec(&m), [true]);
        assert_eq!(probe.calls("size"), 1);
        assert_eq!(probe.calls("scan_forward"), 1);
    }

    #[test]
    fn failed_upstream_has_no_size() {
        let h = Harness::new();
        let broken = failed::<u8>(h.ctx(), Error::failure("offline"));
        let m = broken.starts_with(&list(h.ctx(), vec![1]));
        assert_eq!(m.known_size(), Some(1));
        assert!(matches!(h.size(&m), Err(Error::Failed(_))));
        let m = list(h.ctx(), vec![1u8]).includes_all(&broken);
        assert!(matches!(h.is_empty(&m), Err(Error::Failed(_))));
    }
}

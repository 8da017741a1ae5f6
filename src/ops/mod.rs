//! The operator family.
//!
//! Operators come in three shapes:
//!
//! - **Structural** nodes ([`Append`], [`Skip`], [`Map`], ...) translate every request into a
//!   request on their upstream and memoize the whole sequence the first time it is materialized.
//! - **Progressive** nodes (`filter`, `distinct`, `diff`, `flat_map`, ...) pull their upstream
//!   incrementally and buffer what they have produced so far.
//! - **Deferred** nodes (searches, folds and whole-sequence predicates) run a single job on the
//!   scheduler and settle into a short list, usually of one element.
//!
//! All of them are built through the [`Compose`] extension trait on [`MaterializerRef`].

mod concat;
mod diff;
mod filter;
mod flat_map;
mod fold;
mod map;
mod predicate;
mod scan;
mod search;
mod slicing;
mod structural;

use std::{hash::Hash, sync::Arc};

use crate::materializer::{Element, MaterializerRef};

pub use concat::AppendAll;
pub use map::Map;
pub use slicing::{Skip, SkipLast, Take};
pub use structural::{Append, InsertAfter, Prepend};

/// Builds operator nodes on top of an existing materializer.
///
/// Every method returns a new, lazy node sharing the receiver's [`Context`][crate::Context]. No
/// work is done until the returned node is queried.
pub trait Compose<T: Element> {
    /// The sequence followed by `element`.
    fn append(&self, element: T) -> MaterializerRef<T>;

    /// `element` followed by the sequence.
    fn prepend(&self, element: T) -> MaterializerRef<T>;

    /// The sequence followed by all of `other`.
    fn append_all(&self, other: &MaterializerRef<T>) -> MaterializerRef<T>;

    /// All of `other` followed by the sequence.
    fn prepend_all(&self, other: &MaterializerRef<T>) -> MaterializerRef<T>;

    /// Inserts `element` after the first `position` elements.
    ///
    /// When the sequence is shorter than `position`, nothing is inserted.
    fn insert_after(&self, position: usize, element: T) -> MaterializerRef<T>;

    /// Drops the first `count` elements.
    fn skip(&self, count: usize) -> MaterializerRef<T>;

    /// Drops the last `count` elements.
    fn skip_last(&self, count: usize) -> MaterializerRef<T>;

    /// Keeps at most the first `count` elements.
    fn take(&self, count: usize) -> MaterializerRef<T>;

    fn map<U: Element>(&self, f: impl Fn(&T) -> U + Send + Sync + 'static) -> MaterializerRef<U>;

    fn filter(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> MaterializerRef<T>;

    /// Keeps the first occurrence of every element.
    fn distinct(&self) -> MaterializerRef<T>
    where
        T: Eq + Hash;

    /// Keeps the first element of every group sharing a key.
    fn distinct_by<K>(&self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> MaterializerRef<T>
    where
        K: Eq + Hash + Send + 'static;

    /// Multiset difference: each element of `other` cancels out one equal element.
    fn diff(&self, other: &MaterializerRef<T>) -> MaterializerRef<T>
    where
        T: Eq + Hash;

    /// The unmatched elements of the sequence, then the unmatched elements of `other`.
    fn symmetric_diff(&self, other: &MaterializerRef<T>) -> MaterializerRef<T>
    where
        T: Eq + Hash;

    fn flat_map<U: Element>(
        &self,
        expand: impl Fn(&T) -> MaterializerRef<U> + Send + Sync + 'static,
    ) -> MaterializerRef<U>;

    /// Expands only the elements matching `predicate`.
    fn flat_map_where(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
        expand: impl Fn(&T) -> MaterializerRef<T> + Send + Sync + 'static,
    ) -> MaterializerRef<T>;

    /// Settles into the first matching element, or into an empty sequence.
    fn find_first(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> MaterializerRef<T>;

    fn find_last(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> MaterializerRef<T>;

    fn find_index(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> MaterializerRef<usize>;

    fn find_last_index(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> MaterializerRef<usize>;

    /// Index of the first occurrence of `slice` as a contiguous run.
    fn index_of_slice(&self, slice: &MaterializerRef<T>) -> MaterializerRef<usize>;

    fn last_index_of_slice(&self, slice: &MaterializerRef<T>) -> MaterializerRef<usize>;

    fn fold_left<R: Element>(&self, init: R, f: impl Fn(R, &T) -> R + Send + Sync + 'static) -> MaterializerRef<R>;

    fn fold_right<R: Element>(&self, init: R, f: impl Fn(&T, R) -> R + Send + Sync + 'static) -> MaterializerRef<R>;

    /// Whether every element of `other` occurs somewhere in the sequence.
    fn includes_all(&self, other: &MaterializerRef<T>) -> MaterializerRef<bool>
    where
        T: Eq + Hash;

    fn starts_with(&self, prefix: &MaterializerRef<T>) -> MaterializerRef<bool>;

    fn ends_with(&self, suffix: &MaterializerRef<T>) -> MaterializerRef<bool>;
}

impl<T: Element> Compose<T> for MaterializerRef<T> {
    fn append(&self, element: T) -> MaterializerRef<T> {
        Arc::new(Append::new(self.clone(), element))
    }

    fn prepend(&self, element: T) -> MaterializerRef<T> {
        Arc::new(Prepend::new(self.clone(), element))
    }

    fn append_all(&self, other: &MaterializerRef<T>) -> MaterializerRef<T> {
        Arc::new(AppendAll::new(self.clone(), other.clone()))
    }

    fn prepend_all(&self, other: &MaterializerRef<T>) -> MaterializerRef<T> {
        Arc::new(AppendAll::new(other.clone(), self.clone()))
    }

    fn insert_after(&self, position: usize, element: T) -> MaterializerRef<T> {
        Arc::new(InsertAfter::new(self.clone(), position, element))
    }

    fn skip(&self, count: usize) -> MaterializerRef<T> {
        Arc::new(Skip::new(self.clone(), count))
    }

    fn skip_last(&self, count: usize) -> MaterializerRef<T> {
        Arc::new(SkipLast::new(self.clone(), count))
    }

    fn take(&self, count: usize) -> MaterializerRef<T> {
        Arc::new(Take::new(self.clone(), count))
    }

    fn map<U: Element>(&self, f: impl Fn(&T) -> U + Send + Sync + 'static) -> MaterializerRef<U> {
        Arc::new(Map::new(self.clone(), f))
    }

    fn filter(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> MaterializerRef<T> {
        filter::filter(self.clone(), Arc::new(predicate))
    }

    fn distinct(&self) -> MaterializerRef<T>
    where
        T: Eq + Hash,
    {
        self.distinct_by(T::clone)
    }

    fn distinct_by<K>(&self, key: impl Fn(&T) -> K + Send + Sync + 'static) -> MaterializerRef<T>
    where
        K: Eq + Hash + Send + 'static,
    {
        filter::distinct_by(self.clone(), Arc::new(key))
    }

    fn diff(&self, other: &MaterializerRef<T>) -> MaterializerRef<T>
    where
        T: Eq + Hash,
    {
        diff::diff(self.clone(), other.clone(), false)
    }

    fn symmetric_diff(&self, other: &MaterializerRef<T>) -> MaterializerRef<T>
    where
        T: Eq + Hash,
    {
        diff::diff(self.clone(), other.clone(), true)
    }

    fn flat_map<U: Element>(
        &self,
        expand: impl Fn(&T) -> MaterializerRef<U> + Send + Sync + 'static,
    ) -> MaterializerRef<U> {
        flat_map::flat_map(self.clone(), Arc::new(expand))
    }

    fn flat_map_where(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
        expand: impl Fn(&T) -> MaterializerRef<T> + Send + Sync + 'static,
    ) -> MaterializerRef<T> {
        flat_map::flat_map_where(self.clone(), Arc::new(predicate), Arc::new(expand))
    }

    fn find_first(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> MaterializerRef<T> {
        search::find_first(self.clone(), Arc::new(predicate))
    }

    fn find_last(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> MaterializerRef<T> {
        search::find_last(self.clone(), Arc::new(predicate))
    }

    fn find_index(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> MaterializerRef<usize> {
        search::find_index(self.clone(), Arc::new(predicate))
    }

    fn find_last_index(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> MaterializerRef<usize> {
        search::find_last_index(self.clone(), Arc::new(predicate))
    }

    fn index_of_slice(&self, slice: &MaterializerRef<T>) -> MaterializerRef<usize> {
        search::index_of_slice(self.clone(), slice.clone())
    }

    fn last_index_of_slice(&self, slice: &MaterializerRef<T>) -> MaterializerRef<usize> {
        search::last_index_of_slice(self.clone(), slice.clone())
    }

    fn fold_left<R: Element>(&self, init: R, f: impl Fn(R, &T) -> R + Send + Sync + 'static) -> MaterializerRef<R> {
        fold::fold_left(self.clone(), init, f)
    }

    fn fold_right<R: Element>(&self, init: R, f: impl Fn(&T, R) -> R + Send + Sync + 'static) -> MaterializerRef<R> {
        fold::fold_right(self.clone(), init, f)
    }

    fn includes_all(&self, other: &MaterializerRef<T>) -> MaterializerRef<bool>
    where
        T: Eq + Hash,
    {
        predicate::includes_all(self.clone(), other.clone())
    }

    fn starts_with(&self, prefix: &MaterializerRef<T>) -> MaterializerRef<bool> {
        predicate::starts_with(self.clone(), prefix.clone())
    }

    fn ends_with(&self, suffix: &MaterializerRef<T>) -> MaterializerRef<bool> {
        predicate::ends_with(self.clone(), suffix.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;

    use super::*;
    use crate::{
        terminal::list,
        test::{upstream, Harness, Probe},
        Context, Error,
    };

    /// One operator application, paired with a plain `Vec` model of what it should produce.
    #[derive(Debug, Clone)]
    enum Stage {
        Append(i8),
        Prepend(i8),
        InsertAfter(usize, i8),
        AppendAll(Vec<i8>),
        PrependAll(Vec<i8>),
        Skip(usize),
        SkipLast(usize),
        Take(usize),
        Map,
        Filter,
        Distinct,
        Diff(Vec<i8>),
        SymmetricDiff(Vec<i8>),
        FlatMap,
    }

    fn small_list() -> impl Strategy<Value = Vec<i8>> {
        prop::collection::vec(-4i8..4, 0..6)
    }

    fn stage() -> impl Strategy<Value = Stage> {
        prop_oneof![
            any::<i8>().prop_map(Stage::Append),
            any::<i8>().prop_map(Stage::Prepend),
            (0usize..8, any::<i8>()).prop_map(|(p, e)| Stage::InsertAfter(p, e)),
            small_list().prop_map(Stage::AppendAll),
            small_list().prop_map(Stage::PrependAll),
            (0usize..8).prop_map(Stage::Skip),
            (0usize..8).prop_map(Stage::SkipLast),
            (0usize..8).prop_map(Stage::Take),
            Just(Stage::Map),
            Just(Stage::Filter),
            Just(Stage::Distinct),
            small_list().prop_map(Stage::Diff),
            small_list().prop_map(Stage::SymmetricDiff),
            Just(Stage::FlatMap),
        ]
    }

    fn copies(x: i8) -> usize {
        x.rem_euclid(3) as usize
    }

    fn build(ctx: &Context, m: &MaterializerRef<i8>, stage: &Stage) -> MaterializerRef<i8> {
        match stage {
            Stage::Append(e) => m.append(*e),
            Stage::Prepend(e) => m.prepend(*e),
            Stage::InsertAfter(p, e) => m.insert_after(*p, *e),
            Stage::AppendAll(other) => m.append_all(&list(ctx, other.clone())),
            Stage::PrependAll(other) => m.prepend_all(&list(ctx, other.clone())),
            Stage::Skip(n) => m.skip(*n),
            Stage::SkipLast(n) => m.skip_last(*n),
            Stage::Take(n) => m.take(*n),
            Stage::Map => m.map(|x| x.wrapping_mul(3)),
            Stage::Filter => m.filter(|x| x % 2 == 0),
            Stage::Distinct => m.distinct(),
            Stage::Diff(other) => m.diff(&list(ctx, other.clone())),
            Stage::SymmetricDiff(other) => m.symmetric_diff(&list(ctx, other.clone())),
            Stage::FlatMap => {
                let ctx = ctx.clone();
                m.flat_map(move |x| list(&ctx, vec![*x; copies(*x)]))
            }
        }
    }

    fn model(v: Vec<i8>, stage: &Stage) -> Vec<i8> {
        match stage {
            Stage::Append(e) => v.into_iter().chain([*e]).collect(),
            Stage::Prepend(e) => [*e].into_iter().chain(v).collect(),
            Stage::InsertAfter(p, e) => {
                let mut v = v;
                if *p <= v.len() {
                    v.insert(*p, *e);
                }
                v
            }
            Stage::AppendAll(other) => v.into_iter().chain(other.iter().copied()).collect(),
            Stage::PrependAll(other) => other.iter().copied().chain(v).collect(),
            Stage::Skip(n) => v.into_iter().skip(*n).collect(),
            Stage::SkipLast(n) => {
                let keep = v.len().saturating_sub(*n);
                v.into_iter().take(keep).collect()
            }
            Stage::Take(n) => v.into_iter().take(*n).collect(),
            Stage::Map => v.into_iter().map(|x| x.wrapping_mul(3)).collect(),
            Stage::Filter => v.into_iter().filter(|x| x % 2 == 0).collect(),
            Stage::Distinct => {
                let mut seen = std::collections::HashSet::new();
                v.into_iter().filter(|x| seen.insert(*x)).collect()
            }
            Stage::Diff(other) | Stage::SymmetricDiff(other) => {
                let mut remaining: HashMap<i8, usize> = HashMap::new();
                for x in other {
                    *remaining.entry(*x).or_default() += 1;
                }
                let mut matched: HashMap<i8, usize> = HashMap::new();
                let mut out = Vec::new();
                for x in v {
                    match remaining.get_mut(&x) {
                        Some(count) if *count > 0 => {
                            *count -= 1;
                            *matched.entry(x).or_default() += 1;
                        }
                        _ => out.push(x),
                    }
                }
                if matches!(stage, Stage::SymmetricDiff(_)) {
                    for x in other {
                        match matched.get_mut(x) {
                            Some(count) if *count > 0 => *count -= 1,
                            _ => out.push(*x),
                        }
                    }
                }
                out
            }
            Stage::FlatMap => v.into_iter().flat_map(|x| vec![x; copies(x)]).collect(),
        }
    }

    proptest! {
        #[test]
        fn lookups_agree_with_model(
            source in prop::collection::vec(any::<i8>(), 0..8),
            stages in prop::collection::vec(stage(), 1..4),
            deferred in any::<bool>(),
        ) {
            let h = Harness::new();
            let probe = Probe::new(h.ctx(), source.clone(), deferred);
            let mut m = upstream(&probe);
            let mut expected = source;
            for stage in &stages {
                m = build(h.ctx(), &m, stage);
                expected = model(expected, stage);
            }

            // Point lookups first, so progressive nodes are exercised before they settle.
            for i in 0..expected.len() + 2 {
                let found = h.element(&m, i as isize).unwrap();
                prop_assert_eq!(found, expected.get(i).copied());
            }
            let from = expected.len() / 2;
            let (visited, size) = h.scan_forward(&m, from as isize).unwrap();
            prop_assert_eq!(size, expected.len());
            let tail: Vec<i8> = visited.into_iter().map(|(_, x)| x).collect();
            prop_assert_eq!(&tail[..], &expected[from..]);
            prop_assert_eq!(h.size(&m).unwrap(), expected.len());
            prop_assert_eq!(h.vec(&m), expected.clone());
            let (backward, _) = h.scan_backward(&m, isize::MAX).unwrap();
            let reversed: Vec<i8> = backward.into_iter().map(|(_, x)| x).collect();
            prop_assert_eq!(reversed, expected.iter().rev().copied().collect::<Vec<_>>());
        }

        #[test]
        fn known_sizes_are_exact(
            source in prop::collection::vec(any::<i8>(), 0..8),
            stage in stage(),
        ) {
            let h = Harness::new();
            let m = build(h.ctx(), &list(h.ctx(), source.clone()), &stage);
            let len = model(source, &stage).len();
            let _ = h.element(&m, 0);
            if let Some(hint) = m.known_size() {
                prop_assert_eq!(hint, len);
            }
            h.vec(&m);
            prop_assert_eq!(m.known_size(), Some(len));
        }
    }

    #[test]
    fn negative_indices_never_reach_upstream() {
        let h = Harness::new();
        let probe = Probe::new(h.ctx(), vec![1i8, 2, 3], false);
        let source = upstream(&probe);
        let stages = [
            Stage::Append(0),
            Stage::Prepend(0),
            Stage::InsertAfter(1, 0),
            Stage::AppendAll(vec![4]),
            Stage::Skip(1),
            Stage::SkipLast(1),
            Stage::Take(2),
            Stage::Map,
            Stage::Filter,
            Stage::Distinct,
            Stage::Diff(vec![1]),
            Stage::SymmetricDiff(vec![1]),
            Stage::FlatMap,
        ];
        for stage in &stages {
            let m = build(h.ctx(), &source, stage);
            assert!(
                matches!(h.element(&m, -1), Err(Error::NegativeIndex(-1))),
                "{stage:?} accepted a negative lookup"
            );
            assert!(
                matches!(h.scan_forward(&m, -3), Err(Error::NegativeIndex(-3))),
                "{stage:?} accepted a negative scan"
            );
            assert!(matches!(h.scan_backward(&m, -3), Err(Error::NegativeIndex(-3))));
        }
        assert_eq!(probe.total_calls(), 0);
    }

    #[test]
    fn chained_operators_share_one_graph() {
        let h = Harness::new();
        let m = list(h.ctx(), (1..=20).collect::<Vec<u32>>())
            .filter(|x| x % 3 != 0)
            .skip(2)
            .map(|x| x * x)
            .take(4);
        assert_eq!(h.vec(&m), [16, 25, 49, 64]);
        let total = m.fold_left(0u32, |acc, x| acc + x);
        assert_eq!(h.vec(&total), [154]);
    }
}

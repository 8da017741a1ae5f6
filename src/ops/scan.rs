//! Scan adapters shared by the structural operators.

use crate::{
    arith,
    channel::ScanPredicate,
    materializer::Element,
    state::Core,
    Error,
};

#[inline]
fn shift(value: usize, delta: i128) -> usize {
    arith::safe_cast(value as i128 + delta)
}

/// Forwards an upstream scan with every index and size moved by a constant.
pub(super) struct Shift<T> {
    pub(super) inner: Box<dyn ScanPredicate<T>>,
    pub(super) core: Core<T>,
    pub(super) index: i128,
    pub(super) size: i128,
}

impl<T: Element> Shift<T> {
    /// Same displacement for indices and sizes, as for a prefix of `delta` elements.
    pub(super) fn by(inner: Box<dyn ScanPredicate<T>>, core: &Core<T>, delta: i128) -> Box<Self> {
        Box::new(Self {
            inner,
            core: core.clone(),
            index: delta,
            size: delta,
        })
    }
}

impl<T: Element> ScanPredicate<T> for Shift<T> {
    fn test(&mut self, size: Option<usize>, index: usize, element: &T) -> bool {
        let size = size.map(|size| shift(size, self.size));
        self.inner.test(size, shift(index, self.index), element)
    }

    fn complete(self: Box<Self>, size: usize) {
        let size = shift(size, self.size);
        self.inner.complete(size);
    }

    fn error(self: Box<Self>, error: Error) {
        let error = self.core.fail(error);
        self.inner.error(error);
    }
}

/// Forwards an upstream scan, cutting it off at `limit`.
pub(super) struct Bounded<T> {
    pub(super) inner: Option<Box<dyn ScanPredicate<T>>>,
    pub(super) core: Core<T>,
    pub(super) limit: usize,
    /// Whether the upstream is known to extend past `limit`.
    pub(super) exact: bool,
}

impl<T: Element> ScanPredicate<T> for Bounded<T> {
    fn test(&mut self, size: Option<usize>, index: usize, element: &T) -> bool {
        if index >= self.limit {
            if let Some(inner) = self.inner.take() {
                inner.complete(self.limit);
            }
            return false;
        }
        let size = if self.exact {
            Some(self.limit)
        } else {
            size.map(|size| size.min(self.limit))
        };
        match &mut self.inner {
            Some(inner) => inner.test(size, index, element),
            None => false,
        }
    }

    fn complete(self: Box<Self>, size: usize) {
        let limit = self.limit;
        if let Some(inner) = self.inner {
            inner.complete(size.min(limit));
        }
    }

    fn error(self: Box<Self>, error: Error) {
        let error = self.core.fail(error);
        if let Some(inner) = self.inner {
            inner.error(error);
        }
    }
}

//! Terminal materializers.
//!
//! A [`Frozen`] node holds a final outcome, either a list of elements or an error, and answers
//! every query synchronously from it. Leaves of a graph (already known lists, single elements,
//! failures) are frozen from the start; composed nodes settle into one once their work is done.

use std::sync::Arc;

use crate::{
    arith,
    channel::{complete_isolated, error_isolated, test_isolated, Consumer, Indexed, ScanPredicate},
    materializer::{scan_start, Element, Elements, Materializer, MaterializerRef, Op, Status},
    scheduler::Weight,
    Cancellation, Context, Error,
};

/// A materializer whose outcome is already known.
pub struct Frozen<T> {
    ctx: Context,
    outcome: Result<Elements<T>, Error>,
}

impl<T: Element> Frozen<T> {
    pub fn new(ctx: Context, outcome: Result<Elements<T>, Error>) -> Self {
        Self { ctx, outcome }
    }

    pub fn from_vec(ctx: Context, elements: Vec<T>) -> Self {
        Self::new(ctx, Ok(elements.into()))
    }

    pub fn outcome(&self) -> &Result<Elements<T>, Error> {
        &self.outcome
    }
}

/// A materializer over an already known list.
pub fn list<T: Element>(ctx: &Context, elements: Vec<T>) -> MaterializerRef<T> {
    Arc::new(Frozen::from_vec(ctx.clone(), elements))
}

pub fn empty<T: Element>(ctx: &Context) -> MaterializerRef<T> {
    list(ctx, Vec::new())
}

pub fn element<T: Element>(ctx: &Context, element: T) -> MaterializerRef<T> {
    list(ctx, vec![element])
}

/// A materializer that fails every request with `error`.
pub fn failed<T: Element>(ctx: &Context, error: Error) -> MaterializerRef<T> {
    Arc::new(Frozen::new(ctx.clone(), Err(error)))
}

pub fn cancelled<T: Element>(ctx: &Context, cause: Cancellation) -> MaterializerRef<T> {
    failed(ctx, Error::Cancelled(cause))
}

impl<T: Element> Materializer<T> for Frozen<T> {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn known_size(&self) -> Option<usize> {
        self.outcome.as_ref().ok().map(|elements| elements.len())
    }

    fn status(&self) -> Status {
        match &self.outcome {
            Ok(_) => Status::Done,
            Err(Error::Cancelled(_)) => Status::Cancelled,
            Err(_) => Status::Failed,
        }
    }

    fn weight(&self, _op: Op) -> Weight {
        Weight::ONE
    }

    fn cancel(&self, _cause: Cancellation) {}

    fn size(&self, consumer: Consumer<usize>) {
        let result = self.outcome.as_ref().map(|e| e.len()).map_err(Clone::clone);
        consumer.deliver(&self.ctx, result);
    }

    fn element_at(&self, index: isize, consumer: Consumer<Indexed<T>>) {
        let result = arith::checked_index(index).and_then(|index| {
            let elements = self.outcome.as_ref().map_err(Clone::clone)?;
            Ok(match elements.get(index) {
                Some(element) => Indexed::Element {
                    size: Some(elements.len()),
                    index,
                    element: element.clone(),
                },
                None => Indexed::End {
                    size: elements.len(),
                },
            })
        });
        consumer.deliver(&self.ctx, result);
    }

    fn all_elements(&self, consumer: Consumer<Elements<T>>) {
        consumer.deliver(&self.ctx, self.outcome.clone());
    }

    fn scan_forward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        let Some((from, mut predicate)) = scan_start(&self.ctx, from, predicate) else {
            return;
        };
        let elements = match &self.outcome {
            Ok(elements) => elements,
            Err(error) => return error_isolated(&self.ctx, predicate, error.clone()),
        };
        let size = elements.len();
        for (index, element) in elements.iter().enumerate().skip(from) {
            if !test_isolated(&self.ctx, &mut predicate, Some(size), index, element) {
                return;
            }
        }
        complete_isolated(&self.ctx, predicate, size);
    }

    fn scan_backward(&self, from: isize, predicate: Box<dyn ScanPredicate<T>>) {
        let Some((from, mut predicate)) = scan_start(&self.ctx, from, predicate) else {
            return;
        };
        let elements = match &self.outcome {
            Ok(elements) => elements,
            Err(error) => return error_isolated(&self.ctx, predicate, error.clone()),
        };
        let size = elements.len();
        if size > 0 {
            let start = from.min(size - 1);
            for index in (0..=start).rev() {
                if !test_isolated(&self.ctx, &mut predicate, Some(size), index, &elements[index]) {
                    return;
                }
            }
        }
        complete_isolated(&self.ctx, predicate, size);
    }

    fn is_empty(&self, consumer: Consumer<bool>) {
        let result = self.outcome.as_ref().map(|e| e.is_empty()).map_err(Clone::clone);
        consumer.deliver(&self.ctx, result);
    }

    fn contains(&self, element: T, consumer: Consumer<bool>) {
        let result = self
            .outcome
            .as_ref()
            .map(|e| e.contains(&element))
            .map_err(Clone::clone);
        consumer.deliver(&self.ctx, result);
    }

    fn try_elements(&self) -> Result<Elements<T>, Error> {
        self.outcome.clone()
    }
}

//! Lazy, memoizing sequences evaluated on a cooperative, weight-aware scheduler.
//!
//! # Overview
//!
//! A [`Materializer`] is a not-yet-computed list. Nodes are composed into graphs with the
//! [`Compose`] operators (`append`, `filter`, `flat_map`, `fold_left`, ...), and nothing is
//! computed until somebody asks a question: its size, the element at some index, a scan, or the
//! whole list. Each node computes its result at most once and then answers everything from the
//! memoized outcome.
//!
//! ## Asynchronous requests
//!
//! Requests never block. They take a result channel (a [`Consumer`] or a [`ScanPredicate`]) that
//! is called exactly once with the answer, either right away or after the upstream work has been
//! run by the graph's [`Scheduler`]. The [`blocking`] module wraps this in ordinary blocking
//! calls for code that lives outside the scheduler.
//!
//! ## Schedulers
//!
//! Work is submitted as weighted [`Task`]s. [`LocalScheduler`] is drained explicitly on the
//! calling thread, which makes evaluation deterministic. [`Executor`] is an owned worker thread:
//! when it's dropped, its queue is drained and the thread is joined, forwarding any panic to the
//! owner.
//!
//! ## Cancellation
//!
//! All nodes built from one [`Context`] share a write-once [`CancellationCell`]. Cancelling any
//! node latches the cell, cancels its upstreams, and settles it as cancelled. From then on an
//! upstream failure anywhere in the graph is reported as the cancellation.
//!
//! # Usage
//!
//! Driving a graph with a [`LocalScheduler`]:
//!
//! ```
//! use std::sync::Arc;
//! use materializer::{terminal::list, Compose, Consumer, Context, LocalScheduler, Materializer};
//!
//! let sched = Arc::new(LocalScheduler::new());
//! let ctx = Context::new(sched.clone());
//!
//! let words = list(&ctx, vec!["apple", "avocado", "banana", "cherry", "cranberry"]);
//! let initials = words.map(|w: &&str| w.chars().next()).distinct();
//!
//! let (tx, rx) = crossbeam_channel::bounded(1);
//! initials.size(Consumer::new(move |size| tx.send(size).unwrap()));
//! assert!(rx.is_empty()); // nothing ran yet
//!
//! sched.run_until_idle();
//! assert_eq!(rx.recv().unwrap().unwrap(), 3);
//! ```
//!
//! Blocking on a graph evaluated by an [`Executor`]:
//!
//! ```
//! use std::sync::Arc;
//! use materializer::{blocking, terminal::list, Compose, Context, Executor};
//!
//! let executor = Arc::new(Executor::builder().name("evaluator").spawn().unwrap());
//! let ctx = Context::new(executor.clone());
//!
//! let evens = list(&ctx, (1..=10).collect::<Vec<u32>>())
//!     .filter(|x| x % 2 == 0)
//!     .map(|x| x * 10);
//! assert_eq!(&*blocking::get_all(&evens).unwrap(), &[20, 40, 60, 80, 100]);
//!
//! let sum = evens.fold_left(0u32, |acc, x| acc + x);
//! assert_eq!(blocking::get_element(&sum, 0).unwrap(), Some(300));
//! ```

mod arith;
pub mod blocking;
mod channel;
mod context;
mod deferred;
mod error;
mod executor;
mod materializer;
mod ops;
mod progressive;
mod promise;
mod scheduler;
mod state;
mod sync;
pub mod terminal;
#[cfg(test)]
mod test;

pub use channel::{scan_fn, Consumer, Indexed, ScanPredicate};
pub use context::{CancellationCell, Context, ContextBuilder, DiagnosticSink, Diagnostics, LogSink};
pub use error::{Cancellation, Error};
pub use executor::{Executor, ExecutorBuilder};
pub use materializer::{Element, Elements, Materializer, MaterializerRef, Op, Status};
pub use ops::{Append, AppendAll, Compose, InsertAfter, Map, Prepend, Skip, SkipLast, Take};
pub use promise::{promise, Promise, PromiseHandle};
pub use scheduler::{
    LocalScheduler, Scheduler, Task, TaskId, Weight, DEFAULT_HEAVY_WEIGHT, DEFAULT_QUANTUM,
};

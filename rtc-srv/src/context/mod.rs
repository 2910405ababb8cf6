//! Execution and delivery contexts.
//!
//! An operation touches two contexts:
//!
//! - An [`ExecutionContext`] owns the operation's event sources. Every hook,
//!   reply callback and timer of the operation runs there, one at a time,
//!   so the operation itself needs no internal locking.
//! - A [`DeliveryContext`] receives the notifications meant for the caller
//!   (results and the completion). It is a serial FIFO queue, which is what
//!   gives per-operation delivery ordering.
//!
//! Two implementations are provided:
//!
//! - [`RunLoop`]: a dedicated thread driving a tokio current-thread runtime.
//!   It implements both traits, so one loop can serve as an execution
//!   context, a delivery queue, or both.
//! - [`ManualLoop`]: a single-threaded simulation with a virtual clock. Hooks
//!   run synchronously on the thread that owns the loop, which makes
//!   lifecycle races reproducible in tests.
//!
//! ```rust
//! use rtc_srv::{ExecutionContext, ManualLoop};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let run_loop = ManualLoop::new();
//! let fired = Arc::new(AtomicUsize::new(0));
//!
//! let counter = Arc::clone(&fired);
//! run_loop.post_after(
//!     Duration::from_secs(1),
//!     Box::new(move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     }),
//! );
//!
//! run_loop.advance(Duration::from_millis(999));
//! assert_eq!(fired.load(Ordering::SeqCst), 0);
//! run_loop.advance(Duration::from_millis(1));
//! assert_eq!(fired.load(Ordering::SeqCst), 1);
//! ```


pub(crate) mod manual;
pub(crate) mod run_loop;

use std::time::Duration;

pub use manual::ManualLoop;
pub use run_loop::RunLoop;

/// A unit of work posted to a context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a timer armed with [`ExecutionContext::post_after`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

/// The single-threaded context that owns an operation's event sources.
pub trait ExecutionContext: Send + Sync {
    /// Runs `task` on this context after every task posted before it.
    fn post(&self, task: Task);

    /// Runs `task` on this context no earlier than `delay` from now.
    fn post_after(&self, delay: Duration, task: Task) -> TimerId;

    /// Disarms a timer. Unknown or already fired timers are ignored.
    fn cancel_timer(&self, id: TimerId);

    /// Returns `true` iff the caller is running on this context.
    fn is_current(&self) -> bool;
}

/// A serial queue that receives caller-facing notifications.
pub trait DeliveryContext: Send + Sync {
    /// Enqueues `task` behind every task delivered before it.
    fn deliver(&self, task: Task);
}

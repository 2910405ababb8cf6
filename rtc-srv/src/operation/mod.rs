//! Run-loop operations.
//!
//! This module provides the lifecycle engine shared by every long-running,
//! cancellable task in this crate. An operation:
//!
//! 1. Is configured once, with an [`ExecutionContext`] that owns its event
//!    sources and a [`DeliveryContext`] that receives its notifications.
//! 2. Is started once with [`OperationHandle::start`], from any thread. The
//!    engine moves onto the execution context and calls
//!    [`Operation::operation_did_start`] there.
//! 3. Leaves [`OperationState::Executing`] through exactly one successful
//!    call to [`Operation::finish`], which calls
//!    [`Operation::operation_will_finish`] and then posts the completion to
//!    the delivery context.
//!
//! # State Machine
//!
//! ```text
//!                start()                 finish(error)
//! Initialized ───────────▶ Executing ──────────────────▶ Finished
//!      │                                                    ▲
//!      └──── start() after cancel() ───────────────────────┘
//!                 (ErrCancelled, no hooks)
//! ```
//!
//! # Cancellation
//!
//! [`OperationHandle::cancel`] may be called from any thread at any time.
//! Before start it makes `start()` finish immediately with
//! [`Error::ErrCancelled`] without running any hook. While executing it
//! records the request and schedules [`Operation::operation_was_cancelled`]
//! on the execution context; the default implementation finishes the
//! operation with [`Error::ErrCancelled`].
//!
//! # Example
//!
//! ```rust
//! use rtc_srv::{
//!     ExecutionContext, ManualLoop, Operation, OperationCore, OperationHandle,
//!     OperationState, TimerId, WeakOperation,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Sleep {
//!     core: OperationCore,
//!     timer: Option<TimerId>,
//! }
//!
//! impl Operation for Sleep {
//!     fn core(&self) -> &OperationCore {
//!         &self.core
//!     }
//!
//!     fn operation_did_start(&mut self, this: WeakOperation<Self>) {
//!         let timer = self.core.execution_context().post_after(
//!             Duration::from_secs(1),
//!             Box::new(move || {
//!                 this.with(|op| op.finish(None));
//!             }),
//!         );
//!         self.timer = Some(timer);
//!     }
//!
//!     fn operation_will_finish(&mut self) {
//!         if let Some(timer) = self.timer.take() {
//!             self.core.execution_context().cancel_timer(timer);
//!         }
//!     }
//! }
//!
//! let run_loop = Arc::new(ManualLoop::new());
//! let core = OperationCore::new("sleep", run_loop.clone(), run_loop.clone());
//! let op = OperationHandle::new(Sleep { core, timer: None });
//!
//! op.start();
//! assert_eq!(op.state(), OperationState::Executing);
//!
//! run_loop.advance(Duration::from_secs(1));
//! assert_eq!(op.state(), OperationState::Finished);
//! assert_eq!(op.error(), None);
//! ```

#[cfg(test)]
mod operation_test;

pub(crate) mod queue;

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::context::{DeliveryContext, ExecutionContext, Task};
use crate::error::Error;

pub use queue::{OperationQueue, Startable};

/// Lifecycle state of an operation.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperationState {
    /// Configured but not started.
    #[default]
    Initialized,
    /// Started; event sources may be live. A cancelled operation stays
    /// here until its finish transition runs.
    Executing,
    /// Terminal. The completion has been posted to the delivery context.
    Finished,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            OperationState::Initialized => "initialized",
            OperationState::Executing => "executing",
            OperationState::Finished => "finished",
        };
        write!(f, "{s}")
    }
}

/// Callback posted to the delivery context when an operation finishes.
pub type Completion = Box<dyn FnOnce(Option<Error>) + Send + 'static>;

type CancelNotifier = Box<dyn FnOnce() + Send + 'static>;

pub(crate) enum StartOutcome {
    Started,
    Cancelled,
    AlreadyStarted,
}

#[derive(Default)]
struct CoreInner {
    state: OperationState,
    finishing: bool,
    error: Option<Error>,
    cancel_requested: bool,
    completion: Option<Completion>,
    on_cancel: Option<CancelNotifier>,
    keep_alive: Option<Box<dyn Any + Send>>,
}

struct CoreShared {
    name: String,
    execution: Arc<dyn ExecutionContext>,
    delivery: Arc<dyn DeliveryContext>,
    inner: Mutex<CoreInner>,
}

/// Thread-safe lifecycle state shared by an operation and its handles.
///
/// Every state transition happens under one mutex, so `start`, `cancel` and
/// `finish` are linearized no matter which threads they come from.
#[derive(Clone)]
pub struct OperationCore {
    shared: Arc<CoreShared>,
}

impl fmt::Debug for OperationCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("OperationCore")
            .field("name", &self.shared.name)
            .field("state", &inner.state)
            .field("cancel_requested", &inner.cancel_requested)
            .field("error", &inner.error)
            .finish()
    }
}

impl OperationCore {
    /// Creates the core of a new operation.
    ///
    /// `name` only appears in log records.
    pub fn new(
        name: impl Into<String>,
        execution: Arc<dyn ExecutionContext>,
        delivery: Arc<dyn DeliveryContext>,
    ) -> Self {
        Self {
            shared: Arc::new(CoreShared {
                name: name.into(),
                execution,
                delivery,
                inner: Mutex::new(CoreInner::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Sets the callback posted to the delivery context on completion.
    ///
    /// Ignored once the operation has started.
    pub fn set_completion(&self, completion: impl FnOnce(Option<Error>) + Send + 'static) {
        let mut inner = self.lock();
        if inner.state != OperationState::Initialized {
            log::warn!(
                "operation {}: completion set after start is ignored",
                self.shared.name
            );
            return;
        }
        inner.completion = Some(Box::new(completion));
    }

    pub fn state(&self) -> OperationState {
        self.lock().state
    }

    /// The terminal error. `None` while running and on success.
    ///
    /// Already set while [`Operation::operation_will_finish`] runs.
    pub fn error(&self) -> Option<Error> {
        self.lock().error.clone()
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.lock().cancel_requested
    }

    /// Returns `true` between start and the beginning of the finish
    /// transition.
    pub fn is_executing(&self) -> bool {
        let inner = self.lock();
        inner.state == OperationState::Executing && !inner.finishing
    }

    pub fn is_finished(&self) -> bool {
        self.lock().state == OperationState::Finished
    }

    pub fn is_on_execution_context(&self) -> bool {
        self.shared.execution.is_current()
    }

    pub fn execution_context(&self) -> &Arc<dyn ExecutionContext> {
        &self.shared.execution
    }

    pub fn delivery_context(&self) -> &Arc<dyn DeliveryContext> {
        &self.shared.delivery
    }

    /// Posts a notification to the delivery context, behind everything
    /// delivered before it.
    pub fn deliver(&self, task: Task) {
        self.shared.delivery.deliver(task);
    }

    /// Requests cancellation. Safe to call from any thread, any number of
    /// times.
    pub fn cancel(&self) {
        let notify = {
            let mut inner = self.lock();
            if inner.cancel_requested || inner.state == OperationState::Finished {
                return;
            }
            inner.cancel_requested = true;
            inner.on_cancel.take()
        };

        log::debug!("operation {}: cancel requested", self.shared.name);
        if let Some(notify) = notify {
            notify();
        }
    }

    pub(crate) fn begin_start(&self, keep_alive: Box<dyn Any + Send>) -> StartOutcome {
        let completion = {
            let mut inner = self.lock();
            if inner.state != OperationState::Initialized {
                return StartOutcome::AlreadyStarted;
            }
            if !inner.cancel_requested {
                inner.state = OperationState::Executing;
                inner.keep_alive = Some(keep_alive);
                log::debug!("operation {}: executing", self.shared.name);
                return StartOutcome::Started;
            }
            inner.state = OperationState::Finished;
            inner.error = Some(Error::ErrCancelled);
            inner.completion.take()
        };

        log::debug!("operation {}: cancelled before start", self.shared.name);
        self.post_completion(completion, Some(Error::ErrCancelled));
        StartOutcome::Cancelled
    }

    /// Installs the cancel notifier once `operation_did_start` is queued.
    ///
    /// A cancel that arrived after `begin_start` is forwarded right away, so
    /// its hook lands behind `operation_did_start` on the execution context.
    pub(crate) fn arm_cancel(&self, on_cancel: CancelNotifier) {
        let notify = {
            let mut inner = self.lock();
            if inner.state != OperationState::Executing || inner.finishing {
                return;
            }
            if !inner.cancel_requested {
                inner.on_cancel = Some(on_cancel);
                return;
            }
            on_cancel
        };
        log::debug!("operation {}: cancel arrived while starting", self.shared.name);
        notify();
    }

    /// The compare-and-set at the heart of `finish`: only one caller ever
    /// gets `true`.
    pub(crate) fn begin_finish(&self, error: Option<Error>) -> bool {
        let mut inner = self.lock();
        if inner.state != OperationState::Executing || inner.finishing {
            return false;
        }
        inner.finishing = true;
        inner.error = error;
        true
    }

    pub(crate) fn complete(&self) {
        let (completion, error, on_cancel, keep_alive) = {
            let mut inner = self.lock();
            inner.state = OperationState::Finished;
            (
                inner.completion.take(),
                inner.error.clone(),
                inner.on_cancel.take(),
                inner.keep_alive.take(),
            )
        };

        match &error {
            Some(err) => log::debug!("operation {}: finished with {err}", self.shared.name),
            None => log::debug!("operation {}: finished", self.shared.name),
        }
        self.post_completion(completion, error);
        drop(on_cancel);
        drop(keep_alive);
    }

    fn post_completion(&self, completion: Option<Completion>, error: Option<Error>) {
        if let Some(completion) = completion {
            self.shared
                .delivery
                .deliver(Box::new(move || completion(error)));
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoreInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// An asynchronous, run-loop based operation.
///
/// Implementations provide their [`OperationCore`] and override the hooks
/// they need. Hooks always run on the operation's execution context, one at
/// a time.
pub trait Operation: Send + Sized + 'static {
    fn core(&self) -> &OperationCore;

    /// Called once, right after the operation starts executing. Set up event
    /// sources here; `this` lets their callbacks get back to the operation.
    ///
    /// May call [`finish`](Self::finish) if setup fails.
    fn operation_did_start(&mut self, _this: WeakOperation<Self>) {}

    /// Called once, right before the operation leaves `Executing`, including
    /// on cancellation. Tear down event sources here. The terminal error is
    /// already visible through [`OperationCore::error`].
    fn operation_will_finish(&mut self) {}

    /// Called on the execution context after a cancel request arrives while
    /// the operation is executing.
    fn operation_was_cancelled(&mut self) {
        self.finish(Some(Error::ErrCancelled));
    }

    /// Finishes the operation with `error` (`None` on success).
    ///
    /// Must be called on the execution context. Returns `true` only for the
    /// call that performed the transition; later calls, and calls on an
    /// operation that is not executing, return `false` and change nothing.
    fn finish(&mut self, error: Option<Error>) -> bool {
        let core = self.core().clone();
        if !core.is_on_execution_context() {
            log::warn!(
                "operation {}: finish called off its execution context",
                core.name()
            );
        }
        if !core.begin_finish(error) {
            log::trace!("operation {}: finish ignored", core.name());
            return false;
        }
        self.operation_will_finish();
        core.complete();
        true
    }
}

fn lock_operation<O>(op: &Mutex<O>) -> MutexGuard<'_, O> {
    op.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owning handle to a configured operation.
///
/// Clones refer to the same operation.
pub struct OperationHandle<O: Operation> {
    op: Arc<Mutex<O>>,
    core: OperationCore,
}

impl<O: Operation> Clone for OperationHandle<O> {
    fn clone(&self) -> Self {
        Self {
            op: Arc::clone(&self.op),
            core: self.core.clone(),
        }
    }
}

impl<O: Operation> fmt::Debug for OperationHandle<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("core", &self.core)
            .finish()
    }
}

impl<O: Operation> OperationHandle<O> {
    pub fn new(operation: O) -> Self {
        let core = operation.core().clone();
        Self {
            op: Arc::new(Mutex::new(operation)),
            core,
        }
    }

    /// Starts the operation.
    ///
    /// Callable from any thread; [`Operation::operation_did_start`] runs on
    /// the execution context, inline if the caller is already on it. A
    /// started operation keeps itself alive until it finishes. Starting twice
    /// is ignored.
    pub fn start(&self) {
        let this = self.downgrade();
        let on_cancel: CancelNotifier = {
            let execution = Arc::clone(self.core.execution_context());
            let this = this.clone();
            Box::new(move || {
                execution.post(Box::new(move || {
                    this.with(|op| {
                        if op.core().is_executing() {
                            op.operation_was_cancelled();
                        }
                    });
                }));
            })
        };

        match self.core.begin_start(Box::new(Arc::clone(&self.op))) {
            StartOutcome::Started => {}
            StartOutcome::Cancelled => return,
            StartOutcome::AlreadyStarted => {
                log::warn!("operation {}: already started", self.core.name());
                return;
            }
        }

        let execution = self.core.execution_context();
        if execution.is_current() {
            lock_operation(&self.op).operation_did_start(this);
        } else {
            let op = Arc::clone(&self.op);
            execution.post(Box::new(move || {
                let mut op = lock_operation(&op);
                if op.core().is_executing() {
                    op.operation_did_start(this);
                }
            }));
        }
        self.core.arm_cancel(on_cancel);
    }

    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn state(&self) -> OperationState {
        self.core.state()
    }

    pub fn error(&self) -> Option<Error> {
        self.core.error()
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    pub fn core(&self) -> &OperationCore {
        &self.core
    }

    /// Runs `f` with exclusive access to the operation.
    ///
    /// Must not be called from inside one of the operation's own hooks.
    pub fn with<R>(&self, f: impl FnOnce(&mut O) -> R) -> R {
        let mut op = lock_operation(&self.op);
        f(&mut op)
    }

    pub fn downgrade(&self) -> WeakOperation<O> {
        WeakOperation {
            op: Arc::downgrade(&self.op),
        }
    }
}

/// Non-owning reference used by event-source callbacks to re-enter an
/// operation.
pub struct WeakOperation<O> {
    op: Weak<Mutex<O>>,
}

impl<O> Clone for WeakOperation<O> {
    fn clone(&self) -> Self {
        Self {
            op: Weak::clone(&self.op),
        }
    }
}

impl<O> fmt::Debug for WeakOperation<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakOperation")
            .field("alive", &(self.op.strong_count() > 0))
            .finish()
    }
}

impl<O: Operation> WeakOperation<O> {
    /// Runs `f` with exclusive access to the operation, or returns `None` if
    /// it no longer exists.
    ///
    /// Meant for callbacks posted to the execution context; calling it while
    /// the operation is already borrowed on this thread deadlocks.
    pub fn with<R>(&self, f: impl FnOnce(&mut O) -> R) -> Option<R> {
        let op = self.op.upgrade()?;
        let mut guard = lock_operation(&op);
        Some(f(&mut guard))
    }
}

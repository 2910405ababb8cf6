use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Operation, OperationHandle, OperationState};
use crate::context::{ExecutionContext, RunLoop};
use crate::error::Result;

/// Anything an [`OperationQueue`] can schedule.
pub trait Startable: Send + Sync {
    fn start(&self);
    fn cancel(&self);
    fn state(&self) -> OperationState;
}

impl<O: Operation> Startable for OperationHandle<O> {
    fn start(&self) {
        OperationHandle::start(self)
    }

    fn cancel(&self) {
        OperationHandle::cancel(self)
    }

    fn state(&self) -> OperationState {
        OperationHandle::state(self)
    }
}

/// Starts submitted operations, in submission order, from a dispatch thread.
///
/// The queue keeps track of every operation it started until that operation
/// finishes, so the whole batch can be cancelled at once.
///
/// ```rust
/// use rtc_srv::{
///     Error, MemoryDnsService, OperationHandle, OperationQueue, OperationState, SrvResolver,
///     SrvResolverConfig,
/// };
/// use std::sync::Arc;
/// use std::time::{Duration, Instant};
///
/// let name = "_sip._udp.example.com";
/// let service = MemoryDnsService::new().with_silent_name(name);
/// let resolver =
///     OperationHandle::new(SrvResolver::new(SrvResolverConfig::new(name, Arc::new(service)))?);
///
/// let queue = OperationQueue::new("srv-queue")?;
/// queue.add_operation(resolver.clone());
/// queue.cancel_all_operations();
///
/// let deadline = Instant::now() + Duration::from_secs(5);
/// while resolver.state() != OperationState::Finished && Instant::now() < deadline {
///     std::thread::sleep(Duration::from_millis(5));
/// }
/// assert_eq!(resolver.error(), Some(Error::ErrCancelled));
/// assert_eq!(queue.operation_count(), 0);
/// # Ok::<(), rtc_srv::Error>(())
/// ```
pub struct OperationQueue {
    dispatcher: RunLoop,
    operations: Mutex<Vec<Arc<dyn Startable>>>,
}

impl fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue")
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl OperationQueue {
    /// Creates a queue whose dispatch thread is named `name`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            dispatcher: RunLoop::new(name)?,
            operations: Mutex::new(Vec::new()),
        })
    }

    /// Submits an operation; it is started on the dispatch thread.
    pub fn add_operation<S: Startable + 'static>(&self, operation: S) {
        let operation: Arc<dyn Startable> = Arc::new(operation);
        {
            let mut operations = self.lock();
            operations.retain(|op| op.state() != OperationState::Finished);
            operations.push(Arc::clone(&operation));
        }
        self.dispatcher.post(Box::new(move || operation.start()));
    }

    /// Number of submitted operations that have not finished yet.
    pub fn operation_count(&self) -> usize {
        let mut operations = self.lock();
        operations.retain(|op| op.state() != OperationState::Finished);
        operations.len()
    }

    /// Cancels every operation that has not finished yet.
    pub fn cancel_all_operations(&self) {
        let operations: Vec<Arc<dyn Startable>> = self.lock().iter().cloned().collect();
        log::debug!("cancelling {} operation(s)", operations.len());
        for operation in operations {
            operation.cancel();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn Startable>>> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

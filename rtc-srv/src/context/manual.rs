use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use super::{DeliveryContext, ExecutionContext, Task, TimerId};

/// A single-threaded, manually driven context with a virtual clock.
///
/// Nothing runs until the owning thread calls [`run_until_idle`](Self::run_until_idle)
/// or [`advance`](Self::advance). The thread that created the loop is treated
/// as the loop's own thread, so [`ExecutionContext::is_current`] returns `true`
/// there and operation hooks run inline when started from it.
///
/// Time only moves through [`advance`](Self::advance): a timer armed with a
/// delay of `d` fires once the accumulated advances reach its deadline, and
/// never earlier.
pub struct ManualLoop {
    owner: ThreadId,
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    tasks: VecDeque<Task>,
    timers: BTreeMap<(Duration, TimerId), Task>,
    next_timer_id: u64,
}

impl Default for ManualLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ManualLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ManualLoop")
            .field("now", &state.now)
            .field("tasks", &state.tasks.len())
            .field("timers", &state.timers.len())
            .finish()
    }
}

impl ManualLoop {
    /// Creates a loop owned by the calling thread.
    pub fn new() -> Self {
        Self {
            owner: thread::current().id(),
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Virtual time elapsed since the loop was created.
    pub fn elapsed(&self) -> Duration {
        self.lock().now
    }

    /// Number of posted tasks that have not run yet.
    pub fn pending_tasks(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Number of armed timers that have neither fired nor been cancelled.
    pub fn pending_timers(&self) -> usize {
        self.lock().timers.len()
    }

    /// Runs posted tasks, and timers that are already due, until none remain.
    ///
    /// Tasks posted by running tasks are run too. Returns how many tasks and
    /// timers ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = {
                let mut state = self.lock();
                match state.tasks.pop_front() {
                    Some(task) => Some(task),
                    None => state.pop_due_timer(),
                }
            };
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Moves the virtual clock forward by `by`, firing timers in deadline
    /// order and running the tasks they post. Returns how many tasks and
    /// timers ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now + by;
        let mut ran = self.run_until_idle();
        loop {
            let next = {
                let mut state = self.lock();
                let deadline = state.timers.keys().next().map(|(deadline, _)| *deadline);
                match deadline {
                    Some(deadline) if deadline <= target => {
                        state.now = state.now.max(deadline);
                        state.pop_due_timer()
                    }
                    _ => {
                        state.now = target;
                        None
                    }
                }
            };
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                    ran += self.run_until_idle();
                }
                None => return ran + self.run_until_idle(),
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ManualState {
    fn pop_due_timer(&mut self) -> Option<Task> {
        let key = *self.timers.keys().next()?;
        if key.0 > self.now {
            return None;
        }
        self.timers.remove(&key)
    }
}

impl ExecutionContext for ManualLoop {
    fn post(&self, task: Task) {
        self.lock().tasks.push_back(task);
    }

    fn post_after(&self, delay: Duration, task: Task) -> TimerId {
        let mut state = self.lock();
        let id = TimerId(state.next_timer_id);
        state.next_timer_id += 1;
        let deadline = state.now + delay;
        state.timers.insert((deadline, id), task);
        id
    }

    fn cancel_timer(&self, id: TimerId) {
        self.lock().timers.retain(|(_, timer), _| *timer != id);
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }
}

impl DeliveryContext for ManualLoop {
    fn deliver(&self, task: Task) {
        self.post(task);
    }
}

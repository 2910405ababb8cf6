use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{DeliveryContext, ExecutionContext, Task, TimerId};
use crate::error::{Error, Result};

/// Thread name of the process-wide loop returned by [`RunLoop::shared`].
pub(crate) const SHARED_RUN_LOOP_NAME: &str = "rtc-srv-run-loop";

static SHARED_RUN_LOOP: OnceLock<RunLoop> = OnceLock::new();

enum Command {
    Run(Task),
    Arm(TimerId, Duration, Task),
    Disarm(TimerId),
}

struct Inner {
    name: String,
    thread_id: ThreadId,
    commands: mpsc::UnboundedSender<Command>,
    next_timer_id: AtomicU64,
}

/// A dedicated thread that runs posted tasks and timers one at a time.
///
/// The thread drives a tokio current-thread runtime, so timers are tokio
/// sleeps and every task (including timer callbacks) runs on the same OS
/// thread. `RunLoop` is a cheap handle: clones refer to the same thread, and
/// the thread exits after the last handle is dropped and the queued tasks
/// have run.
///
/// ```rust
/// use rtc_srv::{DeliveryContext, RunLoop};
/// use std::sync::mpsc;
///
/// let run_loop = RunLoop::new("example")?;
/// let (tx, rx) = mpsc::channel();
/// run_loop.deliver(Box::new(move || {
///     let _ = tx.send(std::thread::current().name().map(str::to_owned));
/// }));
/// assert_eq!(rx.recv().unwrap().as_deref(), Some("example"));
/// # Ok::<(), rtc_srv::Error>(())
/// ```
#[derive(Clone)]
pub struct RunLoop {
    inner: Arc<Inner>,
}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoop")
            .field("name", &self.inner.name)
            .field("thread_id", &self.inner.thread_id)
            .finish()
    }
}

impl RunLoop {
    /// Spawns a new loop thread with the given name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|err| Error::ErrRunLoop(err.to_string()))?;
        let (commands, rx) = mpsc::unbounded_channel();

        let loop_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                runtime.block_on(drive(&loop_name, rx));
                log::trace!("run loop {loop_name} exited");
            })
            .map_err(|err| Error::ErrRunLoop(err.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                thread_id: handle.thread().id(),
                commands,
                next_timer_id: AtomicU64::new(1),
            }),
        })
    }

    /// Returns the process-wide loop used when no execution context is
    /// configured.
    pub fn shared() -> Result<Self> {
        if let Some(run_loop) = SHARED_RUN_LOOP.get() {
            return Ok(run_loop.clone());
        }
        let run_loop = RunLoop::new(SHARED_RUN_LOOP_NAME)?;
        Ok(SHARED_RUN_LOOP.get_or_init(|| run_loop).clone())
    }

    /// The loop thread's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn send(&self, command: Command) {
        if self.inner.commands.send(command).is_err() {
            log::warn!("run loop {} is gone, dropping task", self.inner.name);
        }
    }
}

async fn drive(name: &str, mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut timers: HashMap<TimerId, JoinHandle<()>> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Run(task) => run_task(name, task),
            Command::Arm(id, delay, task) => {
                timers.retain(|_, timer| !timer.is_finished());
                let name = name.to_owned();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    run_task(&name, task);
                });
                timers.insert(id, timer);
            }
            Command::Disarm(id) => {
                if let Some(timer) = timers.remove(&id) {
                    timer.abort();
                }
            }
        }
    }

    for (_, timer) in timers {
        timer.abort();
    }
}

fn run_task(name: &str, task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        log::error!("task panicked on run loop {name}");
    }
}

impl ExecutionContext for RunLoop {
    fn post(&self, task: Task) {
        self.send(Command::Run(task));
    }

    fn post_after(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId(self.inner.next_timer_id.fetch_add(1, Ordering::Relaxed));
        self.send(Command::Arm(id, delay, task));
        id
    }

    fn cancel_timer(&self, id: TimerId) {
        self.send(Command::Disarm(id));
    }

    fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }
}

impl DeliveryContext for RunLoop {
    fn deliver(&self, task: Task) {
        self.send(Command::Run(task));
    }
}

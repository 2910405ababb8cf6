use super::*;
use crate::context::{ManualLoop, TimerId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Default, Debug)]
struct Counters {
    did_start: AtomicUsize,
    will_finish: AtomicUsize,
    was_cancelled: AtomicUsize,
    error_at_will_finish: Mutex<Option<Error>>,
}

impl Counters {
    fn get(&self) -> (usize, usize, usize) {
        (
            self.did_start.load(Ordering::SeqCst),
            self.will_finish.load(Ordering::SeqCst),
            self.was_cancelled.load(Ordering::SeqCst),
        )
    }
}

/// Finishes successfully `delay` after it starts.
struct Timed {
    core: OperationCore,
    counters: Arc<Counters>,
    delay: Duration,
    cooperative: bool,
    timer: Option<TimerId>,
}

impl Operation for Timed {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn operation_did_start(&mut self, this: WeakOperation<Self>) {
        self.counters.did_start.fetch_add(1, Ordering::SeqCst);
        let timer = self.core.execution_context().post_after(
            self.delay,
            Box::new(move || {
                this.with(|op| op.finish(None));
            }),
        );
        self.timer = Some(timer);
    }

    fn operation_will_finish(&mut self) {
        self.counters.will_finish.fetch_add(1, Ordering::SeqCst);
        *self.counters.error_at_will_finish.lock().unwrap() = self.core.error();
        if let Some(timer) = self.timer.take() {
            self.core.execution_context().cancel_timer(timer);
        }
    }

    fn operation_was_cancelled(&mut self) {
        self.counters.was_cancelled.fetch_add(1, Ordering::SeqCst);
        if !self.cooperative {
            self.finish(Some(Error::ErrCancelled));
        }
    }
}

type Completions = Arc<Mutex<Vec<Option<Error>>>>;

struct Fixture {
    run_loop: Arc<ManualLoop>,
    counters: Arc<Counters>,
    completions: Completions,
    op: OperationHandle<Timed>,
}

fn fixture(delay: Duration, cooperative: bool) -> Fixture {
    let run_loop = Arc::new(ManualLoop::new());
    let counters = Arc::new(Counters::default());
    let completions: Completions = Arc::new(Mutex::new(vec![]));

    let core = OperationCore::new("timed", run_loop.clone(), run_loop.clone());
    let sink = Arc::clone(&completions);
    core.set_completion(move |error| sink.lock().unwrap().push(error));

    let op = OperationHandle::new(Timed {
        core,
        counters: Arc::clone(&counters),
        delay,
        cooperative,
        timer: None,
    });

    Fixture {
        run_loop,
        counters,
        completions,
        op,
    }
}

fn completions(f: &Fixture) -> Vec<Option<Error>> {
    f.completions.lock().unwrap().clone()
}

#[test]
fn test_operation_runs_to_completion() {
    let f = fixture(Duration::from_secs(1), false);
    assert_eq!(f.op.state(), OperationState::Initialized);

    f.op.start();
    assert_eq!(f.op.state(), OperationState::Executing);
    assert_eq!(f.counters.get(), (1, 0, 0));

    f.run_loop.advance(Duration::from_secs(1));
    assert_eq!(f.op.state(), OperationState::Finished);
    assert_eq!(f.op.error(), None);
    assert_eq!(f.counters.get(), (1, 1, 0));
    assert_eq!(completions(&f), vec![None]);
}

#[test]
fn test_start_from_another_thread_posts_did_start() {
    let f = fixture(Duration::from_secs(1), false);

    let op = f.op.clone();
    thread::spawn(move || op.start()).join().unwrap();

    assert_eq!(f.op.state(), OperationState::Executing);
    assert_eq!(f.counters.get(), (0, 0, 0));
    assert_eq!(f.run_loop.pending_tasks(), 1);

    f.run_loop.run_until_idle();
    assert_eq!(f.counters.get(), (1, 0, 0));
}

#[test]
fn test_cancel_before_start_runs_no_hooks() {
    let f = fixture(Duration::from_secs(1), false);

    f.op.cancel();
    assert!(f.op.is_cancelled());
    assert_eq!(f.op.state(), OperationState::Initialized);

    f.op.start();
    assert_eq!(f.op.state(), OperationState::Finished);
    assert_eq!(f.op.error(), Some(Error::ErrCancelled));

    f.run_loop.advance(Duration::from_secs(10));
    assert_eq!(f.counters.get(), (0, 0, 0));
    assert_eq!(completions(&f), vec![Some(Error::ErrCancelled)]);
}

#[test]
fn test_cancel_while_executing() {
    let f = fixture(Duration::from_secs(1), false);

    f.op.start();
    f.op.cancel();
    f.op.cancel();
    assert_eq!(f.op.state(), OperationState::Executing);
    assert_eq!(f.run_loop.pending_tasks(), 1);

    f.run_loop.run_until_idle();
    assert_eq!(f.op.state(), OperationState::Finished);
    assert_eq!(f.counters.get(), (1, 1, 1));
    assert_eq!(
        *f.counters.error_at_will_finish.lock().unwrap(),
        Some(Error::ErrCancelled)
    );
    assert_eq!(f.run_loop.pending_timers(), 0);

    f.run_loop.advance(Duration::from_secs(10));
    assert_eq!(completions(&f), vec![Some(Error::ErrCancelled)]);
}

#[test]
fn test_cooperative_cancel_keeps_running() {
    let f = fixture(Duration::from_secs(1), true);

    f.op.start();
    f.op.cancel();
    f.run_loop.run_until_idle();

    assert!(f.op.is_cancelled());
    assert_eq!(f.op.state(), OperationState::Executing);
    assert_eq!(f.counters.get(), (1, 0, 1));

    f.run_loop.advance(Duration::from_secs(1));
    assert_eq!(f.op.state(), OperationState::Finished);
    assert_eq!(completions(&f), vec![None]);
}

#[test]
fn test_cancel_after_finish_has_no_effect() {
    let f = fixture(Duration::from_secs(1), false);

    f.op.start();
    f.run_loop.advance(Duration::from_secs(1));
    f.op.cancel();
    f.run_loop.run_until_idle();

    assert!(!f.op.is_cancelled());
    assert_eq!(f.counters.get(), (1, 1, 0));
    assert_eq!(completions(&f), vec![None]);
}

#[test]
fn test_finish_happens_once() {
    let f = fixture(Duration::from_secs(1), false);

    assert!(!f.op.with(|op| op.finish(None)));
    assert_eq!(f.op.state(), OperationState::Initialized);

    f.op.start();
    assert!(f.op.with(|op| op.finish(Some(Error::ErrTimeout))));
    assert!(!f.op.with(|op| op.finish(None)));
    f.run_loop.advance(Duration::from_secs(1));

    assert_eq!(f.op.error(), Some(Error::ErrTimeout));
    assert_eq!(f.counters.get(), (1, 1, 0));
    assert_eq!(completions(&f), vec![Some(Error::ErrTimeout)]);
}

#[test]
fn test_second_start_is_ignored() {
    let f = fixture(Duration::from_secs(1), false);

    f.op.start();
    f.op.start();
    f.run_loop.advance(Duration::from_secs(1));
    f.op.start();

    assert_eq!(f.counters.get(), (1, 1, 0));
    assert_eq!(completions(&f), vec![None]);
}

#[test]
fn test_completion_follows_earlier_deliveries() {
    let f = fixture(Duration::from_secs(1), false);
    let order = Arc::new(Mutex::new(vec![]));

    f.op.start();
    for i in 0..3 {
        let order = Arc::clone(&order);
        f.op.core().deliver(Box::new(move || order.lock().unwrap().push(i)));
    }
    f.op.with(|op| op.finish(None));

    assert!(completions(&f).is_empty());
    f.run_loop.run_until_idle();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(completions(&f), vec![None]);
}

#[test]
fn test_completion_set_after_start_is_ignored() {
    let f = fixture(Duration::from_secs(1), false);
    let late = Arc::new(AtomicUsize::new(0));

    f.op.start();
    let counter = Arc::clone(&late);
    f.op.core().set_completion(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    f.run_loop.advance(Duration::from_secs(1));

    assert_eq!(late.load(Ordering::SeqCst), 0);
    assert_eq!(completions(&f), vec![None]);
}

#[test]
fn test_started_operation_keeps_itself_alive() {
    let f = fixture(Duration::from_secs(1), false);
    let weak = f.op.downgrade();
    let Fixture {
        run_loop,
        completions,
        op,
        ..
    } = f;

    op.start();
    drop(op);
    assert!(weak.with(|_| ()).is_some());

    run_loop.advance(Duration::from_secs(1));
    assert!(weak.with(|_| ()).is_none());
    assert_eq!(*completions.lock().unwrap(), vec![None]);
}

#[test]
fn test_unstarted_operation_is_dropped_with_its_handle() {
    let f = fixture(Duration::from_secs(1), false);
    let weak = f.op.downgrade();

    drop(f);
    assert!(weak.with(|_| ()).is_none());
}

#[test]
fn test_is_executing_turns_false_during_finish() {
    struct Check {
        core: OperationCore,
        seen: Arc<Mutex<Option<(bool, OperationState)>>>,
    }

    impl Operation for Check {
        fn core(&self) -> &OperationCore {
            &self.core
        }

        fn operation_will_finish(&mut self) {
            *self.seen.lock().unwrap() = Some((self.core.is_executing(), self.core.state()));
        }
    }

    let run_loop = Arc::new(ManualLoop::new());
    let seen = Arc::new(Mutex::new(None));
    let op = OperationHandle::new(Check {
        core: OperationCore::new("check", run_loop.clone(), run_loop.clone()),
        seen: Arc::clone(&seen),
    });

    op.start();
    assert!(op.core().is_executing());
    op.with(|check| check.finish(None));

    assert_eq!(
        *seen.lock().unwrap(),
        Some((false, OperationState::Executing))
    );
    assert!(op.core().is_finished());
}

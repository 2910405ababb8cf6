//! Integration tests for rtc-srv
//!
//! These tests run resolvers on real run-loop threads, started directly or
//! through an operation queue.

use rtc_srv::{
    Error, MemoryDnsService, OperationHandle, OperationQueue, RunLoop, SrvRecord, SrvResolver,
    SrvResolverConfig, SrvResolverDelegate,
};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Result(SrvRecord, Option<String>),
    Finish(Option<Error>),
}

/// Forwards every notification, tagged with the service name, to a channel.
struct Forward {
    tx: mpsc::Sender<(String, Event)>,
}

impl SrvResolverDelegate for Forward {
    fn on_result(&self, service_name: &str, record: SrvRecord) {
        let thread = thread::current().name().map(str::to_owned);
        let _ = self
            .tx
            .send((service_name.to_owned(), Event::Result(record, thread)));
    }

    fn on_finish(&self, service_name: &str, error: Option<Error>) {
        let _ = self
            .tx
            .send((service_name.to_owned(), Event::Finish(error)));
    }
}

fn forward() -> (Arc<Forward>, mpsc::Receiver<(String, Event)>) {
    let (tx, rx) = mpsc::channel();
    (Arc::new(Forward { tx }), rx)
}

/// Receives events until the completion of `count` resolvers.
fn collect(rx: &mpsc::Receiver<(String, Event)>, count: usize) -> Vec<(String, Event)> {
    let mut events = vec![];
    let mut finished = 0;
    while finished < count {
        let event = rx.recv_timeout(WAIT).expect("resolver did not finish in time");
        if matches!(event.1, Event::Finish(_)) {
            finished += 1;
        }
        events.push(event);
    }
    events
}

fn records(host: &str, n: u16) -> Vec<SrvRecord> {
    (0..n)
        .map(|i| SrvRecord::new(i, 10, 8000 + i, format!("{host}{i}.example.com")))
        .collect()
}

#[test]
fn test_resolve_on_run_loops() -> Result<(), Error> {
    let name = "_sip._udp.example.com";
    let service = MemoryDnsService::new().with_records(name, records("sip", 3));
    let (delegate, rx) = forward();

    let config = SrvResolverConfig::new(name, Arc::new(service.clone()))
        .with_delegate(&delegate)
        .with_execution_context(Arc::new(RunLoop::new("srv-exec")?))
        .with_delivery_context(Arc::new(RunLoop::new("srv-deliver")?));
    let resolver = OperationHandle::new(SrvResolver::new(config)?);
    resolver.start();

    let events = collect(&rx, 1);
    let delivered_on = Some("srv-deliver".to_owned());
    let mut want: Vec<(String, Event)> = records("sip", 3)
        .into_iter()
        .map(|record| (name.to_owned(), Event::Result(record, delivered_on.clone())))
        .collect();
    want.push((name.to_owned(), Event::Finish(None)));
    assert_eq!(events, want);
    assert_eq!(service.active_queries(), 0);

    Ok(())
}

#[test]
fn test_resolve_with_default_contexts() -> Result<(), Error> {
    let name = "_xmpp._tcp.example.com";
    let service = MemoryDnsService::new().with_records(name, records("xmpp", 1));
    let (delegate, rx) = forward();

    let config = SrvResolverConfig::new(name, Arc::new(service)).with_delegate(&delegate);
    let resolver = OperationHandle::new(SrvResolver::new(config)?);
    resolver.start();

    let events = collect(&rx, 1);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].1, Event::Finish(None));

    Ok(())
}

#[test]
fn test_timeout_on_run_loop() -> Result<(), Error> {
    let name = "_silent._udp.example.com";
    let timeout = Duration::from_millis(100);
    let service = MemoryDnsService::new().with_silent_name(name);
    let (delegate, rx) = forward();

    let config = SrvResolverConfig::new(name, Arc::new(service.clone()))
        .with_timeout(timeout)
        .with_delegate(&delegate)
        .with_execution_context(Arc::new(RunLoop::new("srv-timeout")?));
    let resolver = OperationHandle::new(SrvResolver::new(config)?);

    let started = Instant::now();
    resolver.start();
    let events = collect(&rx, 1);

    assert!(started.elapsed() >= timeout);
    assert_eq!(events, vec![(name.to_owned(), Event::Finish(Some(Error::ErrTimeout)))]);
    assert_eq!(service.active_queries(), 0);

    Ok(())
}

#[test]
fn test_cancel_from_another_thread() -> Result<(), Error> {
    let name = "_silent._tcp.example.com";
    let service = MemoryDnsService::new().with_silent_name(name);
    let (delegate, rx) = forward();

    let config = SrvResolverConfig::new(name, Arc::new(service.clone()))
        .with_timeout(Duration::ZERO)
        .with_delegate(&delegate)
        .with_execution_context(Arc::new(RunLoop::new("srv-cancel")?));
    let resolver = OperationHandle::new(SrvResolver::new(config)?);
    resolver.start();

    let canceller = resolver.clone();
    thread::spawn(move || canceller.cancel())
        .join()
        .expect("cancel thread panicked");

    let events = collect(&rx, 1);
    assert_eq!(events, vec![(name.to_owned(), Event::Finish(Some(Error::ErrCancelled)))]);
    assert!(resolver.is_cancelled());
    assert_eq!(service.active_queries(), 0);

    Ok(())
}

#[test]
fn test_queue_runs_resolvers_sharing_one_loop() -> Result<(), Error> {
    let names = ["_a._tcp.example.com", "_b._tcp.example.com", "_c._tcp.example.com"];
    let mut service = MemoryDnsService::new();
    for (i, name) in names.iter().enumerate() {
        service = service.with_records(name, records("host", i as u16 + 1));
    }
    let (delegate, rx) = forward();
    let execution = Arc::new(RunLoop::new("srv-shared-exec")?);
    let queue = OperationQueue::new("srv-queue")?;

    for name in names {
        let config = SrvResolverConfig::new(name, Arc::new(service.clone()))
            .with_delegate(&delegate)
            .with_execution_context(execution.clone());
        queue.add_operation(OperationHandle::new(SrvResolver::new(config)?));
    }

    let events = collect(&rx, names.len());
    for (i, name) in names.iter().enumerate() {
        let mine: Vec<&Event> = events
            .iter()
            .filter(|(service_name, _)| service_name == name)
            .map(|(_, event)| event)
            .collect();
        assert_eq!(mine.len(), i + 2, "{name}");
        assert_eq!(mine.last(), Some(&&Event::Finish(None)), "{name}");
    }
    assert_eq!(queue.operation_count(), 0);
    assert_eq!(service.issued_queries(), names.len());
    assert_eq!(service.active_queries(), 0);

    Ok(())
}

#[test]
fn test_queue_cancel_all_operations() -> Result<(), Error> {
    let silent = ["_x._udp.example.com", "_y._udp.example.com"];
    let live = "_z._udp.example.com";
    let mut service = MemoryDnsService::new().with_records(live, records("z", 2));
    for name in silent {
        service = service.with_silent_name(name);
    }
    let (delegate, rx) = forward();
    let queue = OperationQueue::new("srv-cancel-queue")?;

    for name in silent {
        let config = SrvResolverConfig::new(name, Arc::new(service.clone()))
            .with_timeout(Duration::ZERO)
            .with_delegate(&delegate)
            .with_execution_context(Arc::new(RunLoop::new("srv-silent")?));
        queue.add_operation(OperationHandle::new(SrvResolver::new(config)?));
    }
    assert_eq!(queue.operation_count(), 2);

    queue.cancel_all_operations();
    let events = collect(&rx, silent.len());
    for (_, event) in &events {
        assert_eq!(event, &Event::Finish(Some(Error::ErrCancelled)));
    }
    assert_eq!(queue.operation_count(), 0);

    let config = SrvResolverConfig::new(live, Arc::new(service.clone())).with_delegate(&delegate);
    queue.add_operation(OperationHandle::new(SrvResolver::new(config)?));
    let events = collect(&rx, 1);
    assert_eq!(events.len(), 3);
    assert_eq!(events[2], (live.to_owned(), Event::Finish(None)));
    assert_eq!(service.active_queries(), 0);

    Ok(())
}

#[test]
fn test_start_and_cancel_race_across_threads() -> Result<(), Error> {
    let name = "_race._tcp.example.com";
    let service = MemoryDnsService::new().with_silent_name(name);
    let (delegate, rx) = forward();
    let execution = Arc::new(RunLoop::new("srv-race")?);
    let delivery = Arc::new(RunLoop::new("srv-race-deliver")?);

    let rounds = 200;
    for _ in 0..rounds {
        let config = SrvResolverConfig::new(name, Arc::new(service.clone()))
            .with_timeout(Duration::ZERO)
            .with_delegate(&delegate)
            .with_execution_context(execution.clone())
            .with_delivery_context(delivery.clone());
        let resolver = OperationHandle::new(SrvResolver::new(config)?);

        let starter = resolver.clone();
        let start = thread::spawn(move || starter.start());
        let canceller = resolver.clone();
        let cancel = thread::spawn(move || canceller.cancel());
        start.join().expect("start thread panicked");
        cancel.join().expect("cancel thread panicked");
    }

    let events = collect(&rx, rounds);
    assert_eq!(events.len(), rounds);
    for (_, event) in &events {
        assert_eq!(event, &Event::Finish(Some(Error::ErrCancelled)));
    }

    // Everything queued on the execution loop has run once this arrives.
    let (tx, barrier) = mpsc::channel();
    rtc_srv::ExecutionContext::post(
        execution.as_ref(),
        Box::new(move || {
            let _ = tx.send(());
        }),
    );
    barrier.recv_timeout(WAIT).expect("execution loop stalled");

    assert!(rx.try_recv().is_err());
    assert_eq!(service.active_queries(), 0);

    Ok(())
}

//! The SRV resolver operation.
//!
//! [`SrvResolver`] looks up the SRV records of one service name through a
//! [`DnsService`] and reports them to a [`SrvResolverDelegate`]:
//!
//! 1. Each well-formed answer is delivered as soon as it arrives, through
//!    [`SrvResolverDelegate::on_result`].
//! 2. Exactly one [`SrvResolverDelegate::on_finish`] follows, after every
//!    result. Its error is `None` when the service reported the last answer,
//!    or one of [`Error::ErrResolver`], [`Error::ErrSetup`],
//!    [`Error::ErrTimeout`] and [`Error::ErrCancelled`].
//!
//! Answers that cannot be parsed are dropped and counted in
//! [`ResolverStats::malformed_answers`]; they never end the query.
//!
//! # Example
//!
//! ```rust
//! use rtc_srv::{
//!     Error, ManualLoop, MemoryDnsService, OperationHandle, SrvRecord, SrvResolver,
//!     SrvResolverConfig, SrvResolverDelegate,
//! };
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct Collect(Mutex<Vec<SrvRecord>>);
//!
//! impl SrvResolverDelegate for Collect {
//!     fn on_result(&self, _service_name: &str, record: SrvRecord) {
//!         self.0.lock().unwrap().push(record);
//!     }
//!
//!     fn on_finish(&self, _service_name: &str, error: Option<Error>) {
//!         assert_eq!(error, None);
//!     }
//! }
//!
//! let service = MemoryDnsService::new().with_records(
//!     "_http._tcp.example.com",
//!     vec![SrvRecord::new(10, 60, 443, "a.example.com")],
//! );
//! let run_loop = Arc::new(ManualLoop::new());
//! let delegate = Arc::new(Collect::default());
//!
//! let config = SrvResolverConfig::new("_http._tcp.example.com", Arc::new(service))
//!     .with_delegate(&delegate)
//!     .with_execution_context(run_loop.clone())
//!     .with_delivery_context(run_loop.clone());
//! let resolver = OperationHandle::new(SrvResolver::new(config)?);
//!
//! resolver.start();
//! run_loop.run_until_idle();
//!
//! assert_eq!(delegate.0.lock().unwrap()[0].to_string(), "10 60 443 a.example.com");
//! # Ok::<(), Error>(())
//! ```


use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::config::SrvResolverConfig;
use crate::context::{DeliveryContext, ExecutionContext, RunLoop, TimerId};
use crate::error::{Error, Result};
use crate::operation::{Operation, OperationCore, WeakOperation};
use crate::record::SrvRecord;
use crate::service::{DnsService, QueryHandle, QueryReply, ReplyCallback, ReplyFlags};

/// Thread name of the delivery loop a resolver creates when none is
/// configured.
const DELIVERY_LOOP_NAME: &str = "rtc-srv-delivery";

/// Receives the notifications of an [`SrvResolver`], on its delivery
/// context.
pub trait SrvResolverDelegate: Send + Sync {
    fn on_result(&self, service_name: &str, record: SrvRecord);

    fn on_finish(&self, service_name: &str, error: Option<Error>);
}

/// Counters kept by an [`SrvResolver`].
#[derive(Default, Debug)]
pub struct ResolverStats {
    results: AtomicUsize,
    malformed_answers: AtomicUsize,
}

impl ResolverStats {
    /// Records parsed and handed to the delivery context.
    pub fn results(&self) -> usize {
        self.results.load(Ordering::SeqCst)
    }

    /// Answers dropped because their RDATA could not be parsed.
    pub fn malformed_answers(&self) -> usize {
        self.malformed_answers.load(Ordering::SeqCst)
    }
}

/// An [`Operation`] resolving the SRV records of one service name.
pub struct SrvResolver {
    core: OperationCore,
    service_name: String,
    timeout: Duration,
    service: Arc<dyn DnsService>,
    delegate: Option<Weak<dyn SrvResolverDelegate>>,
    query: Option<Box<dyn QueryHandle>>,
    timer: Option<TimerId>,
    stats: Arc<ResolverStats>,
}

impl fmt::Debug for SrvResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrvResolver")
            .field("core", &self.core)
            .field("service_name", &self.service_name)
            .field("timeout", &self.timeout)
            .field("query", &self.query.is_some())
            .field("timer", &self.timer)
            .field("stats", &self.stats)
            .finish()
    }
}

impl SrvResolver {
    /// Creates a resolver from `config`.
    ///
    /// Fails with [`Error::ErrEmptyServiceName`] if no service name is set,
    /// or with [`Error::ErrRunLoop`] if a default context cannot be spawned.
    pub fn new(config: SrvResolverConfig) -> Result<Self> {
        if config.service_name.is_empty() {
            return Err(Error::ErrEmptyServiceName);
        }

        let execution: Arc<dyn ExecutionContext> = match config.execution_context {
            Some(context) => context,
            None => Arc::new(RunLoop::shared()?),
        };
        let delivery: Arc<dyn DeliveryContext> = match config.delivery_context {
            Some(context) => context,
            None => Arc::new(RunLoop::new(DELIVERY_LOOP_NAME)?),
        };

        let core = OperationCore::new(
            format!("srv {}", config.service_name),
            execution,
            delivery,
        );
        let service_name = config.service_name;
        {
            let delegate = config.delegate.clone();
            let service_name = service_name.clone();
            core.set_completion(move |error| {
                match delegate.as_ref().and_then(Weak::upgrade) {
                    Some(delegate) => delegate.on_finish(&service_name, error),
                    None => log::trace!("srv {service_name}: no delegate for completion"),
                }
            });
        }

        Ok(Self {
            core,
            service_name,
            timeout: config.timeout,
            service: config.service,
            delegate: config.delegate,
            query: None,
            timer: None,
            stats: Arc::new(ResolverStats::default()),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Counters that stay readable after the resolver is gone.
    pub fn stats(&self) -> Arc<ResolverStats> {
        Arc::clone(&self.stats)
    }

    fn handle_reply(&mut self, reply: QueryReply) {
        if !self.core.is_executing() {
            log::trace!("srv {}: reply after finish ignored", self.service_name);
            return;
        }
        log::trace!(
            "srv {}: reply flags={:#x} error={} rdata={}B",
            self.service_name,
            reply.flags.0,
            reply.error.0,
            reply.rdata.len()
        );

        if reply.error.is_error() {
            self.finish(Some(Error::ErrResolver(reply.error)));
            return;
        }

        if reply.flags.contains(ReplyFlags::ADD) {
            match SrvRecord::unpack(&reply.rdata) {
                Ok(record) => {
                    self.stats.results.fetch_add(1, Ordering::SeqCst);
                    self.deliver_result(record);
                }
                Err(err) => {
                    self.stats.malformed_answers.fetch_add(1, Ordering::SeqCst);
                    log::debug!("srv {}: dropping malformed answer: {err}", self.service_name);
                }
            }
        }

        if !reply.flags.contains(ReplyFlags::MORE_COMING) {
            self.finish(None);
        }
    }

    fn handle_timeout(&mut self) {
        self.timer = None;
        if self.core.is_executing() {
            log::debug!(
                "srv {}: no final answer within {:?}",
                self.service_name,
                self.timeout
            );
            self.finish(Some(Error::ErrTimeout));
        }
    }

    fn deliver_result(&self, record: SrvRecord) {
        let delegate = self.delegate.clone();
        let service_name = self.service_name.clone();
        self.core.deliver(Box::new(move || {
            if let Some(delegate) = delegate.as_ref().and_then(Weak::upgrade) {
                delegate.on_result(&service_name, record);
            }
        }));
    }
}

impl Operation for SrvResolver {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn operation_did_start(&mut self, this: WeakOperation<Self>) {
        let on_reply = this.clone();
        let callback: ReplyCallback = Box::new(move |reply| {
            on_reply.with(|resolver| resolver.handle_reply(reply));
        });

        log::debug!("srv {}: querying", self.service_name);
        let execution = Arc::clone(self.core.execution_context());
        match self.service.query_srv(&self.service_name, execution, callback) {
            Ok(query) => self.query = Some(query),
            Err(code) => {
                log::debug!("srv {}: query not issued: {code}", self.service_name);
                self.finish(Some(Error::ErrSetup(code)));
                return;
            }
        }

        if !self.timeout.is_zero() {
            let timer = self.core.execution_context().post_after(
                self.timeout,
                Box::new(move || {
                    this.with(|resolver| resolver.handle_timeout());
                }),
            );
            self.timer = Some(timer);
        }
    }

    fn operation_will_finish(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.core.execution_context().cancel_timer(timer);
        }
        if let Some(query) = self.query.take() {
            query.dispose();
        }
    }
}

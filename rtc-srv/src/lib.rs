//! # rtc-srv
//!
//! Cancellable DNS SRV lookups built on run-loop operations.
//!
//! This crate provides two layers:
//!
//! - A small **operation engine**: an [`Operation`] is started once, runs its
//!   hooks on an [`ExecutionContext`], finishes exactly once, and posts its
//!   completion to a [`DeliveryContext`]. Cancellation is safe from any thread
//!   at any time.
//! - An **SRV resolver** built on it: [`SrvResolver`] queries a
//!   [`DnsService`], delivers each well-formed [`SrvRecord`] as it arrives and
//!   then reports a single completion to its [`SrvResolverDelegate`].
//!
//! ## Contexts
//!
//! | Context | Threads | Use |
//! |---------|---------|-----|
//! | [`RunLoop`] | one dedicated thread per loop | production |
//! | [`ManualLoop`] | the caller's thread, virtual clock | deterministic tests |
//!
//! Both implement [`ExecutionContext`] and [`DeliveryContext`].
//!
//! ## Quick Start
//!
//! ```rust
//! use rtc_srv::{
//!     Error, MemoryDnsService, OperationHandle, RunLoop, SrvRecord, SrvResolver,
//!     SrvResolverConfig, SrvResolverDelegate,
//! };
//! use std::sync::mpsc;
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! struct Print(Mutex<mpsc::Sender<Option<Error>>>);
//!
//! impl SrvResolverDelegate for Print {
//!     fn on_result(&self, service_name: &str, record: SrvRecord) {
//!         println!("{service_name}: {record}");
//!     }
//!
//!     fn on_finish(&self, _service_name: &str, error: Option<Error>) {
//!         let _ = self.0.lock().unwrap().send(error);
//!     }
//! }
//!
//! let service = MemoryDnsService::new().with_records(
//!     "_sip._udp.example.com",
//!     vec![SrvRecord::new(10, 60, 5060, "sip.example.com")],
//! );
//! let (tx, rx) = mpsc::channel();
//! let delegate = Arc::new(Print(Mutex::new(tx)));
//!
//! let config = SrvResolverConfig::new("_sip._udp.example.com", Arc::new(service))
//!     .with_timeout(Duration::from_secs(2))
//!     .with_delegate(&delegate)
//!     .with_execution_context(Arc::new(RunLoop::new("srv-exec")?));
//! let resolver = OperationHandle::new(SrvResolver::new(config)?);
//! resolver.start();
//!
//! assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), None);
//! # Ok::<(), Error>(())
//! ```
//!
//! ## Scheduling
//!
//! Operations can be started directly or handed to an [`OperationQueue`],
//! which starts them from its own dispatch thread and can cancel all of them
//! at once.

#![warn(rust_2018_idioms)]

pub(crate) mod config;
pub(crate) mod context;
pub(crate) mod error;
pub(crate) mod operation;
pub(crate) mod record;
pub(crate) mod resolver;
pub(crate) mod service;

pub use config::{DEFAULT_TIMEOUT, SrvResolverConfig};
pub use context::{DeliveryContext, ExecutionContext, ManualLoop, RunLoop, Task, TimerId};
pub use error::{Error, Result};
pub use operation::{
    Completion, Operation, OperationCore, OperationHandle, OperationQueue, OperationState,
    Startable, WeakOperation,
};
pub use record::SrvRecord;
pub use resolver::{ResolverStats, SrvResolver, SrvResolverDelegate};
pub use service::{
    DnsService, MemoryDnsService, QueryHandle, QueryReply, ReplyCallback, ReplyFlags,
    ServiceErrorCode,
};

//! Configuration for SRV resolvers.
//!
//! This module provides the [`SrvResolverConfig`] struct, consumed by
//! [`SrvResolver::new`](crate::SrvResolver::new).
//!
//! # Examples
//!
//! ## Minimal
//!
//! Only the service name and the resolver service are required:
//!
//! ```rust
//! use rtc_srv::{MemoryDnsService, SrvResolverConfig};
//! use std::sync::Arc;
//!
//! let config = SrvResolverConfig::new("_sip._udp.example.com", Arc::new(MemoryDnsService::new()));
//! assert_eq!(config.timeout, rtc_srv::DEFAULT_TIMEOUT);
//! ```
//!
//! ## Explicit contexts
//!
//! Tests usually drive both contexts from one [`ManualLoop`](crate::ManualLoop):
//!
//! ```rust
//! use rtc_srv::{ManualLoop, MemoryDnsService, SrvResolverConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let run_loop = Arc::new(ManualLoop::new());
//! let config = SrvResolverConfig::new("_http._tcp.example.com", Arc::new(MemoryDnsService::new()))
//!     .with_timeout(Duration::from_secs(2))
//!     .with_execution_context(run_loop.clone())
//!     .with_delivery_context(run_loop);
//! ```


use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::context::{DeliveryContext, ExecutionContext};
use crate::resolver::SrvResolverDelegate;
use crate::service::DnsService;

/// Default time a resolver waits for the end of its answers (10 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for one [`SrvResolver`](crate::SrvResolver).
///
/// Use the builder methods to adjust the defaults:
///
/// - `timeout`: [`DEFAULT_TIMEOUT`]; zero disables the timeout
/// - `delegate`: none, so results are only counted
/// - `execution_context`: [`RunLoop::shared`](crate::RunLoop::shared)
/// - `delivery_context`: a private [`RunLoop`](crate::RunLoop) per resolver
#[derive(Clone)]
pub struct SrvResolverConfig {
    /// The SRV owner name to query, e.g. `"_sip._udp.example.com"`.
    pub service_name: String,

    /// Time allowed between start and the last answer. The resolver
    /// finishes with [`Error::ErrTimeout`](crate::Error::ErrTimeout) when it
    /// elapses.
    pub timeout: Duration,

    /// The resolver service queries are issued through.
    pub service: Arc<dyn DnsService>,

    pub delegate: Option<Weak<dyn SrvResolverDelegate>>,

    pub execution_context: Option<Arc<dyn ExecutionContext>>,

    pub delivery_context: Option<Arc<dyn DeliveryContext>>,
}

impl fmt::Debug for SrvResolverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrvResolverConfig")
            .field("service_name", &self.service_name)
            .field("timeout", &self.timeout)
            .field("delegate", &self.delegate.is_some())
            .field("execution_context", &self.execution_context.is_some())
            .field("delivery_context", &self.delivery_context.is_some())
            .finish()
    }
}

impl SrvResolverConfig {
    pub fn new(service_name: impl Into<String>, service: Arc<dyn DnsService>) -> Self {
        Self {
            service_name: service_name.into(),
            timeout: DEFAULT_TIMEOUT,
            service,
            delegate: None,
            execution_context: None,
            delivery_context: None,
        }
    }

    /// Sets the timeout. `Duration::ZERO` waits forever.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the delegate receiving results and the completion.
    ///
    /// Only a weak reference is kept; notifications for a delegate that has
    /// been dropped are discarded.
    pub fn with_delegate<D: SrvResolverDelegate + 'static>(mut self, delegate: &Arc<D>) -> Self {
        let delegate: Weak<D> = Arc::downgrade(delegate);
        self.delegate = Some(delegate);
        self
    }

    pub fn with_execution_context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.execution_context = Some(context);
        self
    }

    pub fn with_delivery_context(mut self, context: Arc<dyn DeliveryContext>) -> Self {
        self.delivery_context = Some(context);
        self
    }
}

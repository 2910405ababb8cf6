//! The resolver service seam.
//!
//! [`SrvResolver`](crate::SrvResolver) does not talk to the network itself.
//! It issues queries through a [`DnsService`], the same shape as a system
//! resolver daemon API: issuing a query either fails immediately or returns a
//! [`QueryHandle`], replies arrive later as [`QueryReply`] values posted to
//! the caller's execution context, and disposing the handle stops the query.
//!
//! [`MemoryDnsService`] answers from an in-memory table and is what the demos
//! and tests use.


pub(crate) mod memory;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::context::ExecutionContext;

pub use memory::MemoryDnsService;

/// Status code reported by a resolver service.
///
/// The named constants follow the values used by DNS-SD resolver daemons;
/// any other value is passed through untouched.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceErrorCode(pub i32);

impl ServiceErrorCode {
    pub const NO_ERROR: ServiceErrorCode = ServiceErrorCode(0);
    pub const UNKNOWN: ServiceErrorCode = ServiceErrorCode(-65537);
    pub const NO_SUCH_NAME: ServiceErrorCode = ServiceErrorCode(-65538);
    pub const NO_MEMORY: ServiceErrorCode = ServiceErrorCode(-65539);
    pub const BAD_PARAM: ServiceErrorCode = ServiceErrorCode(-65540);
    pub const BAD_STATE: ServiceErrorCode = ServiceErrorCode(-65542);
    pub const UNSUPPORTED: ServiceErrorCode = ServiceErrorCode(-65544);
    pub const REFUSED: ServiceErrorCode = ServiceErrorCode(-65553);
    pub const NO_SUCH_RECORD: ServiceErrorCode = ServiceErrorCode(-65554);
    pub const SERVICE_NOT_RUNNING: ServiceErrorCode = ServiceErrorCode(-65563);
    pub const TIMEOUT: ServiceErrorCode = ServiceErrorCode(-65568);

    pub fn is_error(&self) -> bool {
        *self != ServiceErrorCode::NO_ERROR
    }

    fn label(&self) -> Option<&'static str> {
        let label = match *self {
            ServiceErrorCode::NO_ERROR => "no error",
            ServiceErrorCode::UNKNOWN => "unknown",
            ServiceErrorCode::NO_SUCH_NAME => "no such name",
            ServiceErrorCode::NO_MEMORY => "no memory",
            ServiceErrorCode::BAD_PARAM => "bad parameter",
            ServiceErrorCode::BAD_STATE => "bad state",
            ServiceErrorCode::UNSUPPORTED => "unsupported",
            ServiceErrorCode::REFUSED => "refused",
            ServiceErrorCode::NO_SUCH_RECORD => "no such record",
            ServiceErrorCode::SERVICE_NOT_RUNNING => "service not running",
            ServiceErrorCode::TIMEOUT => "timeout",
            _ => return None,
        };
        Some(label)
    }
}

impl fmt::Display for ServiceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => write!(f, "{label} ({})", self.0),
            None => write!(f, "code {}", self.0),
        }
    }
}

/// Flags attached to a [`QueryReply`].
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReplyFlags(pub u32);

impl ReplyFlags {
    /// More replies are queued right behind this one.
    pub const MORE_COMING: ReplyFlags = ReplyFlags(0x1);
    /// The reply carries an answer being added, as opposed to one being
    /// withdrawn or an empty marker.
    pub const ADD: ReplyFlags = ReplyFlags(0x2);

    pub fn contains(&self, other: ReplyFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ReplyFlags {
    type Output = ReplyFlags;

    fn bitor(self, rhs: ReplyFlags) -> ReplyFlags {
        ReplyFlags(self.0 | rhs.0)
    }
}

/// One reply from a resolver service.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct QueryReply {
    pub flags: ReplyFlags,
    pub error: ServiceErrorCode,
    /// Raw SRV RDATA. Empty on error and marker replies.
    pub rdata: Bytes,
}

impl QueryReply {
    /// An answer reply.
    pub fn answer(rdata: Bytes, more_coming: bool) -> Self {
        let mut flags = ReplyFlags::ADD;
        if more_coming {
            flags = flags | ReplyFlags::MORE_COMING;
        }
        Self {
            flags,
            error: ServiceErrorCode::NO_ERROR,
            rdata,
        }
    }

    /// A reply without an answer that ends the current batch.
    pub fn done() -> Self {
        Self::default()
    }

    /// A reply reporting a failure.
    pub fn failure(error: ServiceErrorCode) -> Self {
        Self {
            error,
            ..Default::default()
        }
    }
}

/// Receives the replies of one query, on the execution context it was
/// registered with.
pub type ReplyCallback = Box<dyn FnMut(QueryReply) + Send + 'static>;

/// A live query. Disposing it stops the query; no reply is delivered after
/// `dispose` returns.
pub trait QueryHandle: Send {
    fn dispose(self: Box<Self>);
}

/// A resolver service able to run SRV queries.
pub trait DnsService: Send + Sync {
    /// Issues an SRV query for `name`.
    ///
    /// Replies must be delivered by posting `callback` invocations to
    /// `context`, never synchronously from inside this call. An error return
    /// means the query could not be issued and `callback` will never run.
    fn query_srv(
        &self,
        name: &str,
        context: Arc<dyn ExecutionContext>,
        callback: ReplyCallback,
    ) -> std::result::Result<Box<dyn QueryHandle>, ServiceErrorCode>;
}

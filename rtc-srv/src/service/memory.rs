use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use super::{DnsService, QueryHandle, QueryReply, ReplyCallback, ServiceErrorCode};
use crate::context::ExecutionContext;
use crate::record::SrvRecord;

#[derive(Clone, Debug)]
enum Zone {
    Answers(Vec<Bytes>),
    Silent,
    Failure(ServiceErrorCode),
}

#[derive(Default, Debug)]
struct MemoryState {
    zones: HashMap<String, Zone>,
    setup_failure: Option<ServiceErrorCode>,
    issued_queries: usize,
    active_queries: usize,
}

/// A [`DnsService`] answering from an in-memory table.
///
/// Each answer is posted to the query's execution context as its own reply,
/// with [`ReplyFlags::MORE_COMING`](super::ReplyFlags::MORE_COMING) set on all
/// but the last one. Unknown names fail with
/// [`ServiceErrorCode::NO_SUCH_RECORD`]; a name registered with no records
/// gets a single empty reply that ends the query.
///
/// Clones share the same table and counters.
#[derive(Clone, Default)]
pub struct MemoryDnsService {
    state: Arc<Mutex<MemoryState>>,
}

impl fmt::Debug for MemoryDnsService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryDnsService")
            .field("zones", &state.zones.len())
            .field("issued_queries", &state.issued_queries)
            .field("active_queries", &state.active_queries)
            .finish()
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl MemoryDnsService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `name` with `records`, in order.
    pub fn with_records(self, name: &str, records: Vec<SrvRecord>) -> Self {
        let answers = records.iter().map(SrvRecord::pack).collect();
        self.with_raw_answers(name, answers)
    }

    /// Answers `name` with the given RDATA payloads, in order, without
    /// checking that they are well formed.
    pub fn with_raw_answers(self, name: &str, answers: Vec<Bytes>) -> Self {
        self.insert(name, Zone::Answers(answers));
        self
    }

    /// Accepts queries for `name` but never replies.
    pub fn with_silent_name(self, name: &str) -> Self {
        self.insert(name, Zone::Silent);
        self
    }

    /// Replies to queries for `name` with a single failure.
    pub fn with_failure(self, name: &str, code: ServiceErrorCode) -> Self {
        self.insert(name, Zone::Failure(code));
        self
    }

    /// Refuses to issue any query.
    pub fn with_setup_failure(self, code: ServiceErrorCode) -> Self {
        self.lock().setup_failure = Some(code);
        self
    }

    /// Number of queries issued so far.
    pub fn issued_queries(&self) -> usize {
        self.lock().issued_queries
    }

    /// Number of issued queries whose handle has not been released.
    pub fn active_queries(&self) -> usize {
        self.lock().active_queries
    }

    fn insert(&self, name: &str, zone: Zone) {
        self.lock().zones.insert(normalize(name), zone);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DnsService for MemoryDnsService {
    fn query_srv(
        &self,
        name: &str,
        context: Arc<dyn ExecutionContext>,
        callback: ReplyCallback,
    ) -> std::result::Result<Box<dyn QueryHandle>, ServiceErrorCode> {
        let zone = {
            let mut state = self.lock();
            if let Some(code) = state.setup_failure {
                log::debug!("refusing SRV query for {name}: {code}");
                return Err(code);
            }
            state.issued_queries += 1;
            state.active_queries += 1;
            state.zones.get(&normalize(name)).cloned()
        };

        let replies = match zone {
            None => vec![QueryReply::failure(ServiceErrorCode::NO_SUCH_RECORD)],
            Some(Zone::Failure(code)) => vec![QueryReply::failure(code)],
            Some(Zone::Silent) => vec![],
            Some(Zone::Answers(answers)) if answers.is_empty() => vec![QueryReply::done()],
            Some(Zone::Answers(answers)) => {
                let last = answers.len() - 1;
                answers
                    .into_iter()
                    .enumerate()
                    .map(|(i, rdata)| QueryReply::answer(rdata, i < last))
                    .collect()
            }
        };
        log::trace!("SRV query for {name}: {} reply(ies) queued", replies.len());

        let disposed = Arc::new(AtomicBool::new(false));
        let callback = Arc::new(Mutex::new(callback));
        for reply in replies {
            let disposed = Arc::clone(&disposed);
            let callback = Arc::clone(&callback);
            context.post(Box::new(move || {
                if disposed.load(Ordering::SeqCst) {
                    return;
                }
                let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
                (*callback)(reply);
            }));
        }

        Ok(Box::new(MemoryQuery {
            disposed,
            released: false,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryQuery {
    disposed: Arc<AtomicBool>,
    released: bool,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryQuery {
    /// Stops pending replies and drops the query from the active count.
    /// Runs at most once per query.
    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        self.disposed.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.active_queries = state.active_queries.saturating_sub(1);
    }
}

impl QueryHandle for MemoryQuery {
    fn dispose(mut self: Box<Self>) {
        self.release();
    }
}

// A handle dropped without `dispose` must not leave its query counted.
impl Drop for MemoryQuery {
    fn drop(&mut self) {
        self.release();
    }
}

//! The transaction: the unit of work driven through the event pipeline.
//!
//! A [`Transaction`] is a cheap-clone handle. Clones refer to the same
//! request/response/exception slots, so the caller, the adapter and every
//! listener observe the same state. Identity is the [`TransactionId`]; a
//! transaction is never compared by content.
//!
//! The internal lock is only held for the duration of an accessor call; the
//! pipeline never invokes listeners while holding it.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{Request, Response};
use crate::error::RequestError;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable transaction identity, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(u64);

impl TransactionId {
    fn next() -> Self {
        Self(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Lifecycle state.
///
/// `Created → Before → {Intercepted | Transferring} → {Complete | Error}`,
/// with `Error → Complete` on interception and `Complete | Error → Before`
/// when a listener asks for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    Created,
    Before,
    Intercepted,
    Transferring,
    Complete,
    Error,
}

/// Statistics gathered from a finished native transfer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferInfo {
    pub effective_url: Option<String>,
    pub response_code: Option<u32>,
    pub total_time: Option<Duration>,
    pub connect_time: Option<Duration>,
    pub primary_ip: Option<String>,
    pub redirect_count: Option<u32>,
    /// Native result code of the transfer (`0` on success).
    pub result_code: Option<i32>,
}

/// Opaque owning context attached by the caller.
pub type ClientHandle = Arc<dyn Any + Send + Sync>;

struct TransactionInner {
    client: Option<ClientHandle>,
    request: Request,
    response: Option<Response>,
    exception: Option<Arc<RequestError>>,
    state: TransactionState,
    retry_delay: Option<Duration>,
    retries: u32,
    transfer_info: Option<TransferInfo>,
}

/// Request, response and exception slots for one exchange.
#[derive(Clone)]
pub struct Transaction {
    id: TransactionId,
    inner: Arc<Mutex<TransactionInner>>,
}

impl Transaction {
    pub fn new(request: Request) -> Self {
        Self {
            id: TransactionId::next(),
            inner: Arc::new(Mutex::new(TransactionInner {
                client: None,
                request,
                response: None,
                exception: None,
                state: TransactionState::Created,
                retry_delay: None,
                retries: 0,
                transfer_info: None,
            })),
        }
    }

    pub fn with_client(request: Request, client: ClientHandle) -> Self {
        let tx = Self::new(request);
        tx.inner.lock().client = Some(client);
        tx
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn client(&self) -> Option<ClientHandle> {
        self.inner.lock().client.clone()
    }

    /// A snapshot of the request.
    pub fn request(&self) -> Request {
        self.inner.lock().request.clone()
    }

    pub fn with_request<R>(&self, f: impl FnOnce(&Request) -> R) -> R {
        f(&self.inner.lock().request)
    }

    pub fn with_request_mut<R>(&self, f: impl FnOnce(&mut Request) -> R) -> R {
        f(&mut self.inner.lock().request)
    }

    pub fn response(&self) -> Option<Response> {
        self.inner.lock().response.clone()
    }

    pub fn has_response(&self) -> bool {
        self.inner.lock().response.is_some()
    }

    pub fn set_response(&self, response: Response) {
        self.inner.lock().response = Some(response);
    }

    pub fn take_response(&self) -> Option<Response> {
        self.inner.lock().response.take()
    }

    /// Mutate the response in place, if there is one.
    pub fn with_response_mut<R>(&self, f: impl FnOnce(&mut Response) -> R) -> Option<R> {
        self.inner.lock().response.as_mut().map(f)
    }

    pub fn exception(&self) -> Option<Arc<RequestError>> {
        self.inner.lock().exception.clone()
    }

    pub fn set_exception(&self, error: Arc<RequestError>) {
        self.inner.lock().exception = Some(error);
    }

    pub fn clear_exception(&self) {
        self.inner.lock().exception = None;
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: TransactionState) {
        self.inner.lock().state = state;
    }

    /// Re-arm the transaction for another pass through the pipeline.
    ///
    /// Clears the response and exception, records the optional delay and
    /// moves the state back to `Before`.
    pub fn retry(&self, delay: Option<Duration>) {
        let mut inner = self.inner.lock();
        inner.response = None;
        inner.exception = None;
        inner.transfer_info = None;
        inner.retry_delay = delay;
        inner.retries += 1;
        inner.state = TransactionState::Before;
    }

    /// Delay hint recorded by the last [`retry`](Self::retry).
    pub fn retry_delay(&self) -> Option<Duration> {
        self.inner.lock().retry_delay
    }

    pub(crate) fn take_retry_delay(&self) -> Option<Duration> {
        self.inner.lock().retry_delay.take()
    }

    pub fn retries(&self) -> u32 {
        self.inner.lock().retries
    }

    pub fn transfer_info(&self) -> Option<TransferInfo> {
        self.inner.lock().transfer_info.clone()
    }

    pub(crate) fn set_transfer_info(&self, info: Option<TransferInfo>) {
        self.inner.lock().transfer_info = info;
    }

    /// Identity comparison.
    pub fn same(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("method", &inner.request.method())
            .field("url", &inner.request.url())
            .field("state", &inner.state)
            .field("status", &inner.response.as_ref().map(Response::status))
            .field("failed", &inner.exception.is_some())
            .finish()
    }
}

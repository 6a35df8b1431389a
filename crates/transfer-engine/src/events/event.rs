//! The four lifecycle events.

use std::sync::Arc;
use std::time::Duration;

use super::emitter::{EventName, Listener, ListenerResult};
use crate::domain::{ClientHandle, Request, Response, Transaction, TransactionState, TransferInfo};
use crate::error::{AdapterError, RequestError};

/// Behaviour shared by every lifecycle event.
pub trait Event {
    const NAME: EventName;

    fn transaction(&self) -> &Transaction;

    fn stop_propagation(&mut self);

    fn is_propagation_stopped(&self) -> bool;

    /// Snapshot of the request being transferred.
    fn request(&self) -> Request {
        self.transaction().request()
    }

    fn client(&self) -> Option<ClientHandle> {
        self.transaction().client()
    }

    /// Invoke `listener` if it is bound to this event type.
    #[doc(hidden)]
    fn call(listener: &Listener, event: &mut Self) -> ListenerResult;
}

/// Emitted before any network activity.
pub struct BeforeEvent {
    transaction: Transaction,
    stopped: bool,
}

impl BeforeEvent {
    pub(crate) fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            stopped: false,
        }
    }

    /// Resolve the transaction without a transfer.
    ///
    /// `complete` fires for the supplied response once `before` dispatch ends.
    pub fn intercept(&mut self, response: Response) {
        self.transaction.set_response(response);
        self.transaction.set_state(TransactionState::Intercepted);
        self.stopped = true;
    }
}

impl Event for BeforeEvent {
    const NAME: EventName = EventName::Before;

    fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    fn stop_propagation(&mut self) {
        self.stopped = true;
    }

    fn is_propagation_stopped(&self) -> bool {
        self.stopped
    }

    fn call(listener: &Listener, event: &mut Self) -> ListenerResult {
        match listener {
            Listener::Before(f) => f(event),
            _ => Ok(()),
        }
    }
}

/// Emitted once the status line and headers have been received.
pub struct HeadersEvent {
    transaction: Transaction,
    response: Response,
    stopped: bool,
}

impl HeadersEvent {
    /// Fails when the transaction has no response yet.
    pub fn new(transaction: Transaction) -> Result<Self, AdapterError> {
        let response = transaction.response().ok_or(AdapterError::MissingResponse)?;
        Ok(Self {
            transaction,
            response,
            stopped: false,
        })
    }

    pub fn response(&self) -> &Response {
        &self.response
    }
}

impl Event for HeadersEvent {
    const NAME: EventName = EventName::Headers;

    fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    fn stop_propagation(&mut self) {
        self.stopped = true;
    }

    fn is_propagation_stopped(&self) -> bool {
        self.stopped
    }

    fn call(listener: &Listener, event: &mut Self) -> ListenerResult {
        match listener {
            Listener::Headers(f) => f(event),
            _ => Ok(()),
        }
    }
}

/// Emitted when the transaction resolves with a response.
pub struct CompleteEvent {
    transaction: Transaction,
    stopped: bool,
    retry: bool,
}

impl CompleteEvent {
    pub(crate) fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            stopped: false,
            retry: false,
        }
    }

    pub fn response(&self) -> Option<Response> {
        self.transaction.response()
    }

    /// Replace the response and stop propagation.
    pub fn intercept(&mut self, response: Response) {
        self.transaction.set_response(response);
        self.stopped = true;
    }

    /// Re-arm the transaction; it is sent again after `delay`.
    pub fn retry(&mut self, delay: Option<Duration>) {
        self.transaction.retry(delay);
        self.retry = true;
        self.stopped = true;
    }

    pub(crate) fn retry_requested(&self) -> bool {
        self.retry
    }

    pub fn transfer_info(&self) -> Option<TransferInfo> {
        self.transaction.transfer_info()
    }
}

impl Event for CompleteEvent {
    const NAME: EventName = EventName::Complete;

    fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    fn stop_propagation(&mut self) {
        self.stopped = true;
    }

    fn is_propagation_stopped(&self) -> bool {
        self.stopped
    }

    fn call(listener: &Listener, event: &mut Self) -> ListenerResult {
        match listener {
            Listener::Complete(f) => f(event),
            _ => Ok(()),
        }
    }
}

/// Emitted when the transfer fails or a listener raised.
pub struct ErrorEvent {
    transaction: Transaction,
    exception: Arc<RequestError>,
    stopped: bool,
    intercepted: bool,
    retry: bool,
}

impl ErrorEvent {
    pub(crate) fn new(transaction: Transaction, exception: Arc<RequestError>) -> Self {
        Self {
            transaction,
            exception,
            stopped: false,
            intercepted: false,
            retry: false,
        }
    }

    pub fn exception(&self) -> &Arc<RequestError> {
        &self.exception
    }

    /// The response received before the failure, if any.
    pub fn response(&self) -> Option<Response> {
        self.transaction
            .response()
            .or_else(|| self.exception.response().cloned())
    }

    /// Recover with a substitute response.
    ///
    /// Stops propagation; the exception is cleared and `complete` fires for
    /// the substitute once `error` dispatch ends.
    pub fn intercept(&mut self, response: Response) {
        self.transaction.set_response(response);
        self.intercepted = true;
        self.stopped = true;
    }

    pub fn is_intercepted(&self) -> bool {
        self.intercepted
    }

    /// Re-arm the transaction; it is sent again after `delay`.
    pub fn retry(&mut self, delay: Option<Duration>) {
        self.transaction.retry(delay);
        self.retry = true;
        self.stopped = true;
    }

    pub(crate) fn retry_requested(&self) -> bool {
        self.retry
    }

    pub fn transfer_info(&self) -> Option<TransferInfo> {
        self.transaction
            .transfer_info()
            .or_else(|| self.exception.transfer_info().cloned())
    }
}

impl Event for ErrorEvent {
    const NAME: EventName = EventName::Error;

    fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    fn stop_propagation(&mut self) {
        self.stopped = true;
    }

    fn is_propagation_stopped(&self) -> bool {
        self.stopped
    }

    fn call(listener: &Listener, event: &mut Self) -> ListenerResult {
        match listener {
            Listener::Error(f) => f(event),
            _ => Ok(()),
        }
    }
}

//! Event pipeline shared by every adapter.
//!
//! These functions carry the adapter obligations: they emit the event,
//! contain listener failures, route failures to `error`, and turn
//! interception and retry into an explicit [`Outcome`] the caller acts on.
//! Fatal conditions never pass through here; they are `AdapterError`s
//! raised by the adapters themselves.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::emitter::dispatch;
use super::event::{BeforeEvent, CompleteEvent, ErrorEvent, Event, HeadersEvent};
use crate::domain::{Response, Transaction, TransactionState};
use crate::error::{RequestError, SendError};

/// What happened to a transaction at one pipeline step.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// `before` finished without a response: the adapter must transfer.
    Proceed,
    /// `complete` fired and nobody objected.
    Resolved,
    /// A listener supplied the response (at `before` or at `error`).
    Intercepted,
    /// A listener re-armed the transaction.
    Retry(Option<Duration>),
    /// `error` fired and nobody recovered. The failure is attached to the
    /// transaction.
    Failed(Arc<RequestError>),
    /// An `error` listener stopped propagation without supplying a response.
    /// The failure stays attached but is not raised.
    Suppressed(Arc<RequestError>),
}

impl Outcome {
    /// Whether the transaction reached a terminal state.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Outcome::Resolved | Outcome::Intercepted | Outcome::Failed(_) | Outcome::Suppressed(_)
        )
    }
}

/// Emit `before`. Intercepting listeners settle the transaction here.
pub fn emit_before(tx: &Transaction) -> Outcome {
    tx.set_state(TransactionState::Before);
    let mut event = BeforeEvent::new(tx.clone());

    if let Err(e) = dispatch(tx, &mut event) {
        return relay_listener_failure(tx, e);
    }

    if tx.has_response() {
        tx.set_state(TransactionState::Intercepted);
        debug!(transaction = %tx.id(), "intercepted at before");
        return match emit_complete(tx) {
            Outcome::Resolved => Outcome::Intercepted,
            other => other,
        };
    }

    Outcome::Proceed
}

/// Emit `headers`. The transaction must have a response.
pub fn emit_headers(tx: &Transaction) -> anyhow::Result<()> {
    let mut event = HeadersEvent::new(tx.clone())?;
    dispatch(tx, &mut event)
}

/// Emit `complete`. Listener failures are routed to `error`.
pub fn emit_complete(tx: &Transaction) -> Outcome {
    tx.set_state(TransactionState::Complete);

    let effective_url = tx
        .transfer_info()
        .and_then(|info| info.effective_url)
        .unwrap_or_else(|| tx.with_request(|r| r.url().to_string()));
    tx.with_response_mut(|response| {
        if response.effective_url().is_none() {
            response.set_effective_url(effective_url);
        }
    });

    let mut event = CompleteEvent::new(tx.clone());
    if let Err(e) = dispatch(tx, &mut event) {
        return relay_listener_failure(tx, e);
    }

    if event.retry_requested() {
        return Outcome::Retry(tx.retry_delay());
    }
    Outcome::Resolved
}

/// Emit `error` for `error`.
///
/// The failure is attached to the transaction and marked as emitted. An
/// intercepting listener clears it and `complete` fires for the substitute.
/// A listener that only stops propagation keeps it attached but suppressed.
pub fn emit_error(tx: &Transaction, error: Arc<RequestError>) -> Outcome {
    error.mark_emitted();
    tx.set_exception(error.clone());
    tx.set_state(TransactionState::Error);
    warn!(
        transaction = %tx.id(),
        url = %error.url(),
        code = ?error.code(),
        error = %error,
        "transfer failed"
    );

    let mut event = ErrorEvent::new(tx.clone(), error.clone());
    if let Err(e) = dispatch(tx, &mut event) {
        // A failing error listener replaces the failure; it is not re-emitted.
        let failure = wrap_listener_failure(tx, e);
        failure.mark_emitted();
        tx.set_exception(failure.clone());
        return Outcome::Failed(failure);
    }

    if event.retry_requested() {
        return Outcome::Retry(tx.retry_delay());
    }

    if event.is_intercepted() {
        tx.clear_exception();
        debug!(transaction = %tx.id(), "error intercepted");
        return match emit_complete(tx) {
            Outcome::Resolved => Outcome::Intercepted,
            other => other,
        };
    }

    if event.is_propagation_stopped() {
        error.mark_suppressed();
        debug!(transaction = %tx.id(), "error suppressed");
        return Outcome::Suppressed(error);
    }

    Outcome::Failed(error)
}

/// The result a single-transaction `send` hands back once the transaction
/// has settled.
///
/// Unrecovered failures are raised. A suppressed failure yields the
/// response held by the transaction or carried by the failure, and is raised
/// only when neither exists.
pub(crate) fn final_response(tx: &Transaction) -> Result<Response, SendError> {
    match tx.exception() {
        Some(error) if error.is_suppressed() => tx
            .response()
            .or_else(|| error.response().cloned())
            .ok_or(SendError::Request(error)),
        Some(error) => Err(SendError::Request(error)),
        None => tx
            .response()
            .ok_or_else(|| SendError::Request(Arc::new(tx.with_request(RequestError::no_response)))),
    }
}

/// Route a listener failure: emit it to `error` unless it already was.
pub(crate) fn relay_listener_failure(tx: &Transaction, e: anyhow::Error) -> Outcome {
    let failure = wrap_listener_failure(tx, e);
    if failure.is_emitted() {
        tx.set_exception(failure.clone());
        tx.set_state(TransactionState::Error);
        return Outcome::Failed(failure);
    }
    emit_error(tx, failure)
}

/// Reuse a `RequestError` raised by a listener; wrap anything else.
fn wrap_listener_failure(tx: &Transaction, e: anyhow::Error) -> Arc<RequestError> {
    let e = match e.downcast::<SendError>() {
        Ok(SendError::Request(inner)) => return inner,
        Ok(other) => {
            return Arc::new(tx.with_request(|r| RequestError::new(other.to_string(), r)).with_source(other))
        }
        Err(e) => e,
    };
    match e.downcast::<RequestError>() {
        Ok(inner) => Arc::new(inner),
        Err(e) => {
            let message = e.to_string();
            Arc::new(tx.with_request(|r| RequestError::new(message, r)).with_source(e))
        }
    }
}

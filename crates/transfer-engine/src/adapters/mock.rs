//! In-memory adapter for tests and offline use.
//!
//! Replies come from a FIFO queue or from a responder closure. Every send
//! still runs the full event sequence, so listeners behave exactly as they
//! would against a real transport.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::domain::{Response, Transaction, TransactionState};
use crate::error::{RequestError, SendError};
use crate::events::pipeline::{final_response, relay_listener_failure};
use crate::events::{emit_before, emit_complete, emit_error, emit_headers, Outcome};
use crate::ports::Adapter;

/// Builds a reply for a transaction.
pub type Responder = Arc<dyn Fn(&Transaction) -> MockReply + Send + Sync>;

/// A queued reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response(Response),
    /// A transport failure with this message.
    Failure(String),
}

impl From<Response> for MockReply {
    fn from(response: Response) -> Self {
        MockReply::Response(response)
    }
}

pub struct MockAdapter {
    queue: Mutex<VecDeque<MockReply>>,
    responder: Option<Responder>,
    read_bodies: bool,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            responder: None,
            read_bodies: true,
        }
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `replies` in order.
    pub fn with_replies<I, R>(replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<MockReply>,
    {
        let adapter = Self::default();
        adapter.queue.lock().extend(replies.into_iter().map(Into::into));
        adapter
    }

    /// Answer every transaction through `responder`. The queue is ignored.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&Transaction) -> MockReply + Send + Sync + 'static,
    {
        Self {
            responder: Some(Arc::new(responder)),
            ..Self::default()
        }
    }

    /// Whether request bodies are consumed as a transport would.
    pub fn with_read_bodies(mut self, read: bool) -> Self {
        self.read_bodies = read;
        self
    }

    pub fn push(&self, reply: impl Into<MockReply>) {
        self.queue.lock().push_back(reply.into());
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    fn next_reply(&self, tx: &Transaction) -> MockReply {
        if let Some(responder) = &self.responder {
            return responder(tx);
        }
        let next = self.queue.lock().pop_front();
        next.unwrap_or_else(|| MockReply::Failure("No response queued".to_string()))
    }

    fn transfer(&self, tx: &Transaction) -> Outcome {
        tx.set_state(TransactionState::Transferring);
        match self.next_reply(tx) {
            MockReply::Failure(message) => {
                let error = tx.with_request(|r| RequestError::new(message, r));
                emit_error(tx, Arc::new(error))
            }
            MockReply::Response(response) => {
                if self.read_bodies {
                    if let Some(body) = tx.with_request(|r| r.body().cloned()) {
                        if let Err(e) = std::io::copy(&mut body.clone(), &mut std::io::sink()) {
                            debug!(transaction = %tx.id(), error = %e, "mock could not drain request body");
                        }
                    }
                }
                tx.set_response(response);
                if let Err(e) = emit_headers(tx) {
                    return relay_listener_failure(tx, e);
                }
                emit_complete(tx)
            }
        }
    }
}

impl Adapter for MockAdapter {
    fn send(&self, transaction: &Transaction) -> Result<Response, SendError> {
        loop {
            let outcome = match emit_before(transaction) {
                Outcome::Proceed => self.transfer(transaction),
                settled => settled,
            };
            match outcome {
                Outcome::Retry(_) => continue,
                Outcome::Failed(error) => return Err(SendError::Request(error)),
                _ => return final_response(transaction),
            }
        }
    }
}

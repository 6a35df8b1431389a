//! State of one run of the multiplexed scheduler.
//!
//! A batch owns a native multiplexer, the transfers registered with it, the
//! lazy sources still to be drained and the retries waiting for their delay.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use curl::easy::Easy2;
use curl::multi::{Easy2Handle, Multi};
use parking_lot::Mutex;

use super::mediator::Mediator;
use crate::domain::Transaction;
use crate::error::AdapterError;
use crate::ports::TransactionIter;

/// Lazy sources drained in order. Shared so that `send_all` calls made while
/// a batch runs can append to it.
#[derive(Default)]
pub(crate) struct PendingQueue {
    sources: VecDeque<TransactionIter>,
}

impl PendingQueue {
    pub(crate) fn new(source: TransactionIter) -> Self {
        let mut queue = Self::default();
        queue.push(source);
        queue
    }

    pub(crate) fn push(&mut self, source: TransactionIter) {
        self.sources.push_back(source);
    }

    fn next(&mut self) -> Option<Transaction> {
        while let Some(front) = self.sources.front_mut() {
            if let Some(tx) = front.next() {
                return Some(tx);
            }
            self.sources.pop_front();
        }
        None
    }

    fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

pub(crate) type SharedQueue = Arc<Mutex<PendingQueue>>;

struct Registered {
    transaction: Transaction,
    handle: Easy2Handle<Mediator>,
}

pub(crate) struct BatchContext {
    multi: Multi,
    window: usize,
    registered: HashMap<usize, Registered>,
    pending: SharedQueue,
    retries: Vec<(Instant, Transaction)>,
}

fn token_of(tx: &Transaction) -> usize {
    tx.id().as_u64() as usize
}

impl BatchContext {
    pub(crate) fn new(multi: Multi, window: usize, pending: SharedQueue) -> Self {
        Self {
            multi,
            window: window.max(1),
            registered: HashMap::new(),
            pending,
            retries: Vec::new(),
        }
    }

    pub(crate) fn multi(&self) -> &Multi {
        &self.multi
    }

    pub(crate) fn window(&self) -> usize {
        self.window
    }

    /// Register `easy` for `tx` with the multiplexer.
    pub(crate) fn add_transaction(
        &mut self,
        tx: &Transaction,
        easy: Easy2<Mediator>,
    ) -> Result<(), AdapterError> {
        let token = token_of(tx);
        if self.registered.contains_key(&token) {
            return Err(AdapterError::AlreadyRegistered(tx.id()));
        }
        let mut handle = self.multi.add2(easy)?;
        handle.set_token(token)?;
        self.registered.insert(
            token,
            Registered {
                transaction: tx.clone(),
                handle,
            },
        );
        Ok(())
    }

    /// Detach `tx` and hand back its handle for inspection.
    pub(crate) fn remove_transaction(
        &mut self,
        tx: &Transaction,
    ) -> Result<Easy2<Mediator>, AdapterError> {
        let entry = self
            .registered
            .remove(&token_of(tx))
            .ok_or(AdapterError::NotRegistered(tx.id()))?;
        Ok(self.multi.remove2(entry.handle)?)
    }

    /// The transaction registered under a native token.
    pub(crate) fn find_transaction(&self, token: usize) -> Result<Transaction, AdapterError> {
        self.registered
            .get(&token)
            .map(|entry| entry.transaction.clone())
            .ok_or(AdapterError::HandleNotFound(token))
    }

    pub(crate) fn is_registered(&self, tx: &Transaction) -> bool {
        self.registered.contains_key(&token_of(tx))
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.registered.len()
    }

    /// Transfers the multiplexer reported finished, as `(token, result)`.
    pub(crate) fn drain_finished(&self) -> Vec<(usize, Result<(), curl::Error>)> {
        let mut done = Vec::new();
        self.multi.messages(|message| {
            if let (Ok(token), Some(result)) = (message.token(), message.result()) {
                done.push((token, result));
            }
        });
        done
    }

    pub(crate) fn schedule_retry(&mut self, tx: Transaction, delay: Option<Duration>) {
        let ready_at = Instant::now() + delay.unwrap_or_default();
        self.retries.push((ready_at, tx));
    }

    /// When the earliest waiting retry becomes due.
    pub(crate) fn next_retry_due(&self) -> Option<Instant> {
        self.retries.iter().map(|(at, _)| *at).min()
    }

    /// The next transaction to register: a due retry first, then the sources.
    pub(crate) fn next_pending(&mut self) -> Option<Transaction> {
        let now = Instant::now();
        if let Some(index) = self.retries.iter().position(|(at, _)| *at <= now) {
            return Some(self.retries.remove(index).1);
        }
        self.pending.lock().next()
    }

    /// Whether retries or unread sources remain.
    pub(crate) fn has_pending(&self) -> bool {
        !self.retries.is_empty() || !self.pending.lock().is_empty()
    }

    /// Detach whatever is still registered and return the multiplexer.
    pub(crate) fn into_multi(self) -> Multi {
        let BatchContext {
            multi, registered, ..
        } = self;
        for (_, entry) in registered {
            if let Err(e) = multi.remove2(entry.handle) {
                tracing::debug!(error = %e, "failed to detach abandoned transfer");
            }
        }
        multi
    }
}

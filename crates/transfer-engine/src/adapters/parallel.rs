//! Adapter combinators.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{Response, Transaction};
use crate::error::{AdapterError, SendError};
use crate::ports::{Adapter, ParallelAdapter, TransactionIter};

/// Satisfies [`ParallelAdapter`] by sending one transaction at a time.
///
/// Per-transaction failures stay attached to their transaction; only fatal
/// adapter errors stop the batch.
#[derive(Clone)]
pub struct FakeParallelAdapter {
    adapter: Arc<dyn Adapter>,
}

impl FakeParallelAdapter {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self { adapter }
    }
}

impl ParallelAdapter for FakeParallelAdapter {
    fn send_all(&self, transactions: TransactionIter, concurrency: usize) -> Result<(), AdapterError> {
        debug!(concurrency, "sending batch sequentially");
        for tx in transactions {
            match self.adapter.send(&tx) {
                Ok(_) | Err(SendError::Request(_)) => {}
                Err(SendError::Adapter(e)) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Routes `stream=true` requests to a streaming adapter and the rest to the
/// default one.
#[derive(Clone)]
pub struct StreamingProxyAdapter {
    default: Arc<dyn Adapter>,
    streaming: Arc<dyn Adapter>,
}

impl StreamingProxyAdapter {
    pub fn new(default: Arc<dyn Adapter>, streaming: Arc<dyn Adapter>) -> Self {
        Self { default, streaming }
    }
}

impl Adapter for StreamingProxyAdapter {
    fn send(&self, transaction: &Transaction) -> Result<Response, SendError> {
        if transaction.with_request(|r| r.config().stream) {
            self.streaming.send(transaction)
        } else {
            self.default.send(transaction)
        }
    }
}

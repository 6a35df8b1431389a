//! Adapter ports.
//!
//! Every adapter must:
//!
//! 1. emit `before` prior to any transfer;
//! 2. emit `headers` exactly once when a transferred response has its
//!    status line and headers, before the body is complete;
//! 3. emit `complete` exactly once on success, including after interception;
//! 4. emit `error` on transport failure, raising it from `send` unless a
//!    listener recovered it.
//!
//! The functions in [`crate::events::pipeline`] implement the event half of
//! these obligations.

use crate::domain::{Response, Transaction};
use crate::error::{AdapterError, SendError};

/// Boxed lazy transaction sequence.
pub type TransactionIter = Box<dyn Iterator<Item = Transaction> + Send>;

/// Sends one transaction at a time.
pub trait Adapter: Send + Sync {
    /// Transfer `transaction` and return its final response.
    fn send(&self, transaction: &Transaction) -> Result<Response, SendError>;
}

/// Sends a lazy sequence of transactions with bounded concurrency.
pub trait ParallelAdapter: Send + Sync {
    /// Transfer every transaction, at most `concurrency` at once.
    ///
    /// Per-transaction failures are never returned; they stay attached to
    /// their transaction. Only fatal configuration errors are.
    fn send_all(&self, transactions: TransactionIter, concurrency: usize) -> Result<(), AdapterError>;
}
